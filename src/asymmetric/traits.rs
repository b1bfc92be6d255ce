//! 定义了非对称加密系统的核心 Trait。
use crate::common::config::CryptoConfig;
use std::fmt::Debug;

/// `AsymmetricCryptographicSystem` 定义了非对称算法必须实现的核心功能。
///
/// 在 `seal-chat` 中，非对称算法承担两种职责：
/// 对证书和消息进行签名（真实性），以及封装对称会话密钥（可选的机密性）。
pub trait AsymmetricCryptographicSystem: Sized {
    /// 公钥类型
    type PublicKey: Clone + Debug + PartialEq;

    /// 私钥类型
    type PrivateKey: Clone + Debug;

    /// 签名类型
    type Signature: AsRef<[u8]> + Clone + Debug;

    /// 错误类型
    type Error: std::error::Error + Send + Sync + 'static;

    /// 生成密钥对
    fn generate_keypair(
        config: &CryptoConfig,
    ) -> Result<(Self::PublicKey, Self::PrivateKey), Self::Error>;

    /// 使用私钥对消息签名。相同输入必须产生相同签名。
    fn sign(private_key: &Self::PrivateKey, message: &[u8])
    -> Result<Self::Signature, Self::Error>;

    /// 使用公钥验证签名
    fn verify(
        public_key: &Self::PublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error>;

    /// 使用公钥封装一个短数据块（通常是对称会话密钥）
    fn wrap_key(public_key: &Self::PublicKey, key: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// 使用私钥解封数据块
    fn unwrap_key(private_key: &Self::PrivateKey, wrapped: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// 将公钥导出为标准格式
    fn export_public_key(public_key: &Self::PublicKey) -> Result<String, Self::Error>;

    /// 将私钥导出为标准格式
    fn export_private_key(private_key: &Self::PrivateKey) -> Result<String, Self::Error>;

    /// 从标准格式导入公钥
    fn import_public_key(key_data: &str) -> Result<Self::PublicKey, Self::Error>;

    /// 从标准格式导入私钥
    fn import_private_key(key_data: &str) -> Result<Self::PrivateKey, Self::Error>;
}
