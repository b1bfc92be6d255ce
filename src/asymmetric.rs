//! 非对称密码系统：身份密钥对、证书与消息签名、会话密钥封装。

pub mod rsa;
pub mod traits;

pub use self::rsa::{KeyPair, RsaCryptoSystem, RsaPrivateKeyWrapper, RsaPublicKeyWrapper, RsaSignature};
pub use self::traits::AsymmetricCryptographicSystem;
