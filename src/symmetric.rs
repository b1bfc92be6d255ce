//! 对称加密：消息载荷的机密性层。

pub mod aes_gcm;

pub use self::aes_gcm::{AesGcmKey, AesGcmSystem};
