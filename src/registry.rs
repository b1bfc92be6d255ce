//! 身份注册表
//!
//! 注册是自我声明的：同一会话范围内一个用户 ID 只能处于激活状态一次。
//! 注册表支持两种方式：
//!
//! - [`IdentityRegistry::register`]：由服务端生成密钥对并托管，私钥随结果返回给注册方；
//! - [`IdentityRegistry::enroll`]：持有方自行生成密钥对，只提交公钥，注册表从不接触私钥。
//!
//! 登出后身份材料被丢弃；重新注册会得到全新的、互不相关的密钥对与证书。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::info;

use crate::asymmetric::{KeyPair, RsaPublicKeyWrapper};
use crate::authority::CertificateAuthority;
use crate::certificate::Certificate;
use crate::common::config::{CryptoConfig, IdentityPolicy};
use crate::error::Error;

/// `register` 返回给注册方的完整身份材料
#[derive(Debug, Clone)]
pub struct IdentityBundle {
    pub user_id: String,
    pub key_pair: KeyPair,
    pub certificate: Certificate,
    pub ca_public_key: RsaPublicKeyWrapper,
}

/// `enroll` 的结果：只有证书与 CA 公钥
#[derive(Debug, Clone)]
pub struct EnrolledCertificate {
    pub certificate: Certificate,
    pub ca_public_key: RsaPublicKeyWrapper,
}

#[derive(Debug, Clone)]
struct RegisteredIdentity {
    certificate: Certificate,
    public_key: RsaPublicKeyWrapper,
    /// 仅在服务端托管的注册方式下存在
    key_pair: Option<KeyPair>,
}

pub struct IdentityRegistry {
    ca: Arc<CertificateAuthority>,
    crypto: CryptoConfig,
    policy: IdentityPolicy,
    identities: DashMap<String, RegisteredIdentity>,
}

impl IdentityRegistry {
    pub fn new(ca: Arc<CertificateAuthority>, crypto: CryptoConfig, policy: IdentityPolicy) -> Self {
        Self {
            ca,
            crypto,
            policy,
            identities: DashMap::new(),
        }
    }

    pub fn authority(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    /// 生成密钥对、签发证书，并把结果登记为该用户在本会话中的身份
    pub fn register(&self, user_id: &str) -> Result<IdentityBundle, Error> {
        self.ensure_available(user_id)?;

        let key_pair = KeyPair::generate(&self.crypto)?;
        let certificate =
            self.ca
                .issue_certificate(user_id, &key_pair.public_key, self.policy.validity_window())?;

        self.insert(
            user_id,
            RegisteredIdentity {
                certificate: certificate.clone(),
                public_key: key_pair.public_key.clone(),
                key_pair: Some(key_pair.clone()),
            },
        )?;
        info!(user_id = %user_id, "identity registered with server-held keys");

        Ok(IdentityBundle {
            user_id: user_id.to_string(),
            key_pair,
            certificate,
            ca_public_key: self.ca.ca_public_key(),
        })
    }

    /// 为调用方提交的公钥（SPKI PEM）签发证书
    pub fn enroll(&self, user_id: &str, public_key_pem: &str) -> Result<EnrolledCertificate, Error> {
        self.ensure_available(user_id)?;

        let public_key = RsaPublicKeyWrapper::from_pem(public_key_pem)
            .map_err(|e| Error::InvalidRequest(format!("unusable public key: {}", e)))?;
        let certificate =
            self.ca
                .issue_certificate(user_id, &public_key, self.policy.validity_window())?;

        self.insert(
            user_id,
            RegisteredIdentity {
                certificate: certificate.clone(),
                public_key,
                key_pair: None,
            },
        )?;
        info!(user_id = %user_id, "identity enrolled with client-held keys");

        Ok(EnrolledCertificate {
            certificate,
            ca_public_key: self.ca.ca_public_key(),
        })
    }

    /// 丢弃用户的身份材料。返回该用户之前是否处于激活状态。
    pub fn logout(&self, user_id: &str) -> bool {
        let removed = self.identities.remove(user_id).is_some();
        if removed {
            info!(user_id = %user_id, "identity discarded");
        }
        removed
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.identities.contains_key(user_id)
    }

    /// 当前激活的用户，按字典序
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.identities.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn public_key(&self, user_id: &str) -> Option<RsaPublicKeyWrapper> {
        self.identities.get(user_id).map(|e| e.public_key.clone())
    }

    pub fn certificate(&self, user_id: &str) -> Option<Certificate> {
        self.identities.get(user_id).map(|e| e.certificate.clone())
    }

    /// 服务端托管的密钥对；通过 `enroll` 注册的身份返回 `None`
    pub fn custodied_key_pair(&self, user_id: &str) -> Option<KeyPair> {
        self.identities
            .get(user_id)
            .and_then(|e| e.key_pair.clone())
    }

    fn ensure_available(&self, user_id: &str) -> Result<(), Error> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("user id must not be empty".to_string()));
        }
        if self.identities.contains_key(user_id) {
            return Err(Error::DuplicateIdentity(user_id.to_string()));
        }
        Ok(())
    }

    // 密钥生成不在分片锁内进行；并发注册同一 ID 时，先插入者获胜。
    fn insert(&self, user_id: &str, identity: RegisteredIdentity) -> Result<(), Error> {
        match self.identities.entry(user_id.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateIdentity(user_id.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(identity);
                Ok(())
            }
        }
    }
}
