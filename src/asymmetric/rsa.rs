//! `RsaCryptoSystem` 提供基于 RSA 的身份密钥、签名与密钥封装。
//!
//! - 签名：RSASSA-PKCS1-v1_5 + SHA-256。该方案是确定性的，
//!   因此对相同输入与固定 CA 密钥的证书签发会得到相同的证书。
//! - 密钥封装：RSA-OAEP + SHA-256，用于封装消息载荷的 AES-256-GCM 会话密钥。
//! - 密钥在内存中以 DER 保存，对外以 PEM（SPKI / PKCS#8）交换。

use crate::asymmetric::traits::AsymmetricCryptographicSystem;
use crate::common::config::CryptoConfig;
use crate::common::utils::ZeroizingVec;
use crate::error::Error;
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::rand_core::OsRng as RsaOsRng;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// RSA公钥包装器（DER 编码的 SPKI）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKeyWrapper(pub Vec<u8>);

impl RsaPublicKeyWrapper {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// 导出为 PEM
    pub fn to_pem(&self) -> Result<String, Error> {
        RsaCryptoSystem::export_public_key(self)
    }

    /// 从 PEM 导入
    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        RsaCryptoSystem::import_public_key(pem)
    }
}

/// RSA私钥包装器（DER 编码的 PKCS#8），离开作用域时自动擦除
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPrivateKeyWrapper(pub ZeroizingVec);

impl RsaPrivateKeyWrapper {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// RSA 签名包装器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaSignature(pub Vec<u8>);

impl AsRef<[u8]> for RsaSignature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 一个身份（或 CA）的密钥对。私钥只属于持有它的一方。
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: RsaPublicKeyWrapper,
    pub private_key: RsaPrivateKeyWrapper,
}

impl KeyPair {
    pub fn generate(config: &CryptoConfig) -> Result<Self, Error> {
        let (public_key, private_key) = RsaCryptoSystem::generate_keypair(config)?;
        Ok(Self {
            public_key,
            private_key,
        })
    }

    pub fn sign(&self, message: &[u8]) -> Result<RsaSignature, Error> {
        RsaCryptoSystem::sign(&self.private_key, message)
    }
}

/// RSA加密系统实现
pub struct RsaCryptoSystem;

impl AsymmetricCryptographicSystem for RsaCryptoSystem {
    type PublicKey = RsaPublicKeyWrapper;
    type PrivateKey = RsaPrivateKeyWrapper;
    type Signature = RsaSignature;
    type Error = Error;

    fn generate_keypair(
        config: &CryptoConfig,
    ) -> Result<(Self::PublicKey, Self::PrivateKey), Self::Error> {
        let bits = config.rsa_key_bits;
        let mut rsa_rng = RsaOsRng;

        let private_key = RsaPrivateKey::new(&mut rsa_rng, bits)
            .map_err(|e| Error::Key(format!("生成RSA密钥失败: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);

        let public_der = public_key
            .to_public_key_der()
            .map_err(|e| Error::Key(format!("导出RSA公钥DER失败: {}", e)))?;
        let private_der = private_key
            .to_pkcs8_der()
            .map_err(|e| Error::Key(format!("导出RSA私钥DER失败: {}", e)))?;

        Ok((
            RsaPublicKeyWrapper(public_der.as_bytes().to_vec()),
            RsaPrivateKeyWrapper(ZeroizingVec(private_der.as_bytes().to_vec())),
        ))
    }

    fn sign(
        private_key: &Self::PrivateKey,
        message: &[u8],
    ) -> Result<Self::Signature, Self::Error> {
        let rsa_private_key = RsaPrivateKey::from_pkcs8_der(&private_key.0)
            .map_err(|e| Error::Key(format!("解析RSA私钥失败: {}", e)))?;

        let signing_key = SigningKey::<Sha256>::new(rsa_private_key);
        let signature = signing_key
            .try_sign(message)
            .map_err(|e| Error::Signature(format!("签名失败: {}", e)))?;

        Ok(RsaSignature(signature.to_vec()))
    }

    fn verify(
        public_key: &Self::PublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        let rsa_public_key = RsaPublicKey::from_public_key_der(&public_key.0)
            .map_err(|e| Error::Key(format!("解析RSA公钥失败: {}", e)))?;

        let verifying_key = VerifyingKey::<Sha256>::new(rsa_public_key);
        let rsa_signature = Pkcs1v15Signature::try_from(signature)
            .map_err(|e| Error::Signature(format!("无效的签名格式: {}", e)))?;

        verifying_key
            .verify(message, &rsa_signature)
            .map_err(|e| Error::Signature(format!("签名验证失败: {}", e)))
    }

    fn wrap_key(public_key: &Self::PublicKey, key: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let public_key = RsaPublicKey::from_public_key_der(&public_key.0)
            .map_err(|e| Error::Key(format!("解析RSA公钥失败: {}", e)))?;

        let mut rng = RsaOsRng;
        public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), key)
            .map_err(|e| Error::Encryption(format!("RSA-OAEP封装失败: {}", e)))
    }

    fn unwrap_key(private_key: &Self::PrivateKey, wrapped: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let private_key = RsaPrivateKey::from_pkcs8_der(&private_key.0)
            .map_err(|e| Error::Key(format!("解析RSA私钥失败: {}", e)))?;

        private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| Error::Encryption(format!("RSA-OAEP解封失败: {}", e)))
    }

    fn export_public_key(public_key: &Self::PublicKey) -> Result<String, Self::Error> {
        let public_key = RsaPublicKey::from_public_key_der(&public_key.0)
            .map_err(|e| Error::Key(format!("解析RSA公钥失败: {}", e)))?;

        public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| Error::Key(format!("RSA公钥导出失败: {}", e)))
    }

    fn export_private_key(private_key: &Self::PrivateKey) -> Result<String, Self::Error> {
        let private_key = RsaPrivateKey::from_pkcs8_der(&private_key.0)
            .map_err(|e| Error::Key(format!("解析RSA私钥失败: {}", e)))?;

        let pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| Error::Key(format!("RSA私钥导出失败: {}", e)))?
            .to_string();
        Ok(pem)
    }

    fn import_public_key(key_data: &str) -> Result<Self::PublicKey, Self::Error> {
        let public_key = RsaPublicKey::from_public_key_pem(key_data)
            .map_err(|e| Error::Key(format!("导入RSA公钥失败: {}", e)))?;

        let public_der = public_key
            .to_public_key_der()
            .map_err(|e| Error::Key(format!("导出RSA公钥DER失败: {}", e)))?;

        Ok(RsaPublicKeyWrapper(public_der.as_bytes().to_vec()))
    }

    fn import_private_key(key_data: &str) -> Result<Self::PrivateKey, Self::Error> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(key_data)
            .map_err(|e| Error::Key(format!("导入RSA私钥失败: {}", e)))?;

        let private_der = private_key
            .to_pkcs8_der()
            .map_err(|e| Error::Key(format!("导出RSA私钥DER失败: {}", e)))?;

        Ok(RsaPrivateKeyWrapper(ZeroizingVec(
            private_der.as_bytes().to_vec(),
        )))
    }
}
