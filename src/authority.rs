//! 证书颁发机构（CA）
//!
//! CA 在进程启动时创建一次，持有唯一的签名密钥对。密钥对存放在 `ArcSwap` 中：
//! 签发与验证只读取一个快照，不需要加锁；[`CertificateAuthority::rotate`]
//! 原子地替换密钥，此后之前签发的所有证书都将无法通过验证。

use arc_swap::ArcSwap;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::asymmetric::{KeyPair, RsaPublicKeyWrapper};
use crate::certificate::{Certificate, CertificateData};
use crate::common::config::CryptoConfig;
use crate::error::Error;

struct CaKeys {
    key_pair: KeyPair,
    public_key_pem: String,
    generation: u64,
}

impl CaKeys {
    fn new(key_pair: KeyPair, generation: u64) -> Result<Self, Error> {
        let public_key_pem = key_pair.public_key.to_pem()?;
        Ok(Self {
            key_pair,
            public_key_pem,
            generation,
        })
    }
}

/// 进程级证书颁发机构。以显式实例的方式传递给注册表与验证引擎。
pub struct CertificateAuthority {
    issuer_id: String,
    config: CryptoConfig,
    keys: ArcSwap<CaKeys>,
}

impl CertificateAuthority {
    /// 生成新的 CA 密钥对
    pub fn new(config: &CryptoConfig, issuer_id: &str) -> Result<Self, Error> {
        let key_pair = KeyPair::generate(config)?;
        let ca = Self::from_key_pair(issuer_id, key_pair, config)?;
        info!(issuer = %issuer_id, bits = config.rsa_key_bits, "Certificate Authority keys generated");
        Ok(ca)
    }

    /// 使用给定的密钥对构造 CA（用于固定的测试夹具）
    pub fn from_key_pair(
        issuer_id: &str,
        key_pair: KeyPair,
        config: &CryptoConfig,
    ) -> Result<Self, Error> {
        if issuer_id.trim().is_empty() {
            return Err(Error::InvalidRequest("issuer id must not be empty".to_string()));
        }
        Ok(Self {
            issuer_id: issuer_id.to_string(),
            config: config.clone(),
            keys: ArcSwap::from_pointee(CaKeys::new(key_pair, 0)?),
        })
    }

    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// 当前 CA 公钥。任何一方都可以凭此离线验证证书。
    pub fn ca_public_key(&self) -> RsaPublicKeyWrapper {
        self.keys.load().key_pair.public_key.clone()
    }

    pub fn ca_public_key_pem(&self) -> String {
        self.keys.load().public_key_pem.clone()
    }

    /// 轮换次数；每次 [`rotate`](Self::rotate) 加一
    pub fn generation(&self) -> u64 {
        self.keys.load().generation
    }

    /// 同一快照中的 CA 公钥与其代数
    pub fn ca_public_key_with_generation(&self) -> (RsaPublicKeyWrapper, u64) {
        let keys = self.keys.load();
        (keys.key_pair.public_key.clone(), keys.generation)
    }

    /// 以当前时间为起点签发证书
    pub fn issue_certificate(
        &self,
        subject_id: &str,
        subject_public_key: &RsaPublicKeyWrapper,
        validity_window: Duration,
    ) -> Result<Certificate, Error> {
        self.issue_certificate_at(subject_id, subject_public_key, validity_window, Utc::now())
    }

    /// 签发证书，有效期为 `[valid_from, valid_from + validity_window]`。
    ///
    /// 时间被截断到整秒。对相同的输入和相同的 CA 密钥，输出完全一致。
    pub fn issue_certificate_at(
        &self,
        subject_id: &str,
        subject_public_key: &RsaPublicKeyWrapper,
        validity_window: Duration,
        valid_from: DateTime<Utc>,
    ) -> Result<Certificate, Error> {
        if subject_id.trim().is_empty() {
            return Err(Error::InvalidRequest("subject id must not be empty".to_string()));
        }
        if validity_window <= Duration::zero() {
            return Err(Error::InvalidRequest(format!(
                "validity window must be positive, got {}s",
                validity_window.num_seconds()
            )));
        }

        let valid_from = valid_from.trunc_subsecs(0);
        let valid_until = valid_from
            .checked_add_signed(validity_window)
            .ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "validity window of {}s is out of range",
                    validity_window.num_seconds()
                ))
            })?;
        let data = CertificateData {
            subject_id: subject_id.to_string(),
            public_key: subject_public_key.to_pem()?,
            issuer_id: self.issuer_id.clone(),
            valid_from,
            valid_until,
        };

        let keys = self.keys.load();
        let signature = keys.key_pair.sign(&data.signed_bytes()?)?;
        debug!(subject = %subject_id, generation = keys.generation, "certificate issued");

        Ok(Certificate {
            data,
            signature: BASE64.encode(signature.as_ref()),
        })
    }

    /// 生成新的 CA 密钥对并原子替换。之前的证书全部失效，不设宽限期。
    pub fn rotate(&self) -> Result<u64, Error> {
        let key_pair = KeyPair::generate(&self.config)?;
        let generation = self.generation() + 1;
        self.keys.store(Arc::new(CaKeys::new(key_pair, generation)?));
        info!(issuer = %self.issuer_id, generation, "Certificate Authority keys rotated");
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_ca, test_crypto_config};

    #[test]
    fn test_issue_binds_subject_and_key() {
        let ca = test_ca();
        let subject = KeyPair::generate(&test_crypto_config()).unwrap();

        let cert = ca
            .issue_certificate("alice", &subject.public_key, Duration::days(30))
            .unwrap();

        assert_eq!(cert.subject_id(), "alice");
        assert_eq!(cert.data.issuer_id, ca.issuer_id());
        assert_eq!(cert.data.subject_public_key().unwrap(), subject.public_key);
        assert_eq!(cert.data.valid_until - cert.data.valid_from, Duration::days(30));
    }

    #[test]
    fn test_issuance_is_deterministic() {
        let ca = test_ca();
        let subject = KeyPair::generate(&test_crypto_config()).unwrap();
        let from = Utc::now();

        let first = ca
            .issue_certificate_at("alice", &subject.public_key, Duration::days(1), from)
            .unwrap();
        let second = ca
            .issue_certificate_at("alice", &subject.public_key, Duration::days(1), from)
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_empty_subject_and_non_positive_window() {
        let ca = test_ca();
        let subject = KeyPair::generate(&test_crypto_config()).unwrap();

        let empty = ca.issue_certificate("  ", &subject.public_key, Duration::days(1));
        assert!(matches!(empty, Err(Error::InvalidRequest(_))));

        let zero = ca.issue_certificate("alice", &subject.public_key, Duration::zero());
        assert!(matches!(zero, Err(Error::InvalidRequest(_))));

        let negative = ca.issue_certificate("alice", &subject.public_key, Duration::days(-1));
        assert!(matches!(negative, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_oversized_window_is_refused() {
        let ca = test_ca();
        let subject = KeyPair::generate(&test_crypto_config()).unwrap();

        let result = ca.issue_certificate("alice", &subject.public_key, Duration::days(200_000_000));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));

        // 上限附近仍可签发
        let century = ca.issue_certificate("alice", &subject.public_key, Duration::days(36_500));
        assert!(century.is_ok());
    }

    #[test]
    fn test_rotate_replaces_public_key() {
        let ca = test_ca();
        let before = ca.ca_public_key();

        assert_eq!(ca.rotate().unwrap(), 1);
        assert_ne!(before, ca.ca_public_key());
        assert_eq!(ca.generation(), 1);
        assert_eq!(ca.ca_public_key_with_generation(), (ca.ca_public_key(), 1));
    }
}
