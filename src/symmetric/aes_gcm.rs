//! AES-256-GCM 对称加密实现
//!
//! 每条需要机密性的消息都使用一个新的随机会话密钥；密钥本身再由收件人的
//! RSA 公钥封装（见 [`crate::pipeline`]）。
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::common::utils::ZeroizingVec;
use crate::error::Error;

const KEY_SIZE: usize = 32; // AES-256 需要 32 字节的密钥
const NONCE_SIZE: usize = 12; // GCM 标准的 Nonce 大小是 12 字节

/// AES-256-GCM 会话密钥
#[derive(Debug, Clone)]
pub struct AesGcmKey(ZeroizingVec);

impl AesGcmKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::Key(format!(
                "Invalid key size: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(ZeroizingVec(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// AES-GCM 对称加密系统
pub struct AesGcmSystem;

impl AesGcmSystem {
    /// 生成一个随机的 AES-256 密钥
    pub fn generate_key() -> AesGcmKey {
        let key = Aes256Gcm::generate_key(OsRng);
        AesGcmKey(ZeroizingVec(key.to_vec()))
    }

    /// 加密数据，输出为 `nonce || ciphertext`
    pub fn encrypt(key: &AesGcmKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|e| Error::Encryption(format!("AES-GCM加密失败: {}", e)))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(nonce.as_slice());
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// 解密 `nonce || ciphertext`
    pub fn decrypt(key: &AesGcmKey, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
        if data.len() < NONCE_SIZE {
            return Err(Error::Encryption(
                "Ciphertext is too short to contain a nonce".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad })
            .map_err(|e| Error::Encryption(format!("AES-GCM解密失败: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_with_aad() {
        let key = AesGcmSystem::generate_key();
        let ciphertext = AesGcmSystem::encrypt(&key, b"hello bob", b"alice->bob").unwrap();
        let plaintext = AesGcmSystem::decrypt(&key, &ciphertext, b"alice->bob").unwrap();
        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = AesGcmSystem::generate_key();
        let ciphertext = AesGcmSystem::encrypt(&key, b"hello bob", b"alice->bob").unwrap();
        assert!(AesGcmSystem::decrypt(&key, &ciphertext, b"mallory->bob").is_err());
    }

    #[test]
    fn test_short_input_is_rejected() {
        let key = AesGcmSystem::generate_key();
        assert!(AesGcmSystem::decrypt(&key, &[0u8; 4], b"").is_err());
    }

    #[test]
    fn test_key_size_is_checked() {
        assert!(AesGcmKey::from_bytes(vec![0u8; 16]).is_err());
        assert!(AesGcmKey::from_bytes(vec![0u8; 32]).is_ok());
    }
}
