//! Defines the custom error type for the `seal-chat` crate.
//!
//! 中文: 定义 `seal-chat` 的错误类型。证书与消息层面的失败不会以错误的形式抛出，
//! 而是作为判定结果（`verified`、`tampered`）返回；这里只包含请求级别的失败。

use thiserror::Error;

/// The main error type for the `seal-chat` crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad registration or issuance input. No identity is created.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The user id is already active; the existing identity is retained.
    #[error("identity already registered: {0}")]
    DuplicateIdentity(String),

    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("encryption or decryption failed: {0}")]
    Encryption(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoding from Base64 failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Encryption(format!("UTF-8 conversion error: {}", err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
