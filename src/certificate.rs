//! Identity certificates.
//!
//! A [`Certificate`] binds a user id to an RSA public key for a validity
//! window. The CA signs the compact JSON encoding of [`CertificateData`];
//! the field order of that struct is therefore part of the wire format.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::asymmetric::RsaPublicKeyWrapper;
use crate::error::Error;

/// The signed portion of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateData {
    #[serde(rename = "user_id")]
    pub subject_id: String,
    /// Subject public key, SPKI PEM.
    pub public_key: String,
    #[serde(rename = "issued_by")]
    pub issuer_id: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl CertificateData {
    /// Canonical bytes covered by the CA signature.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    /// `valid_from <= now <= valid_until`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    pub fn subject_public_key(&self) -> Result<RsaPublicKeyWrapper, Error> {
        RsaPublicKeyWrapper::from_pem(&self.public_key)
    }
}

/// A CA-signed certificate as it travels on the wire:
/// `{"data": {...}, "signature": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub data: CertificateData,
    pub signature: String,
}

impl Certificate {
    pub fn subject_id(&self) -> &str {
        &self.data.subject_id
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(BASE64.decode(&self.signature)?)
    }

    /// Hex SHA-256 over the signed fields and the signature. Two certificates
    /// with the same fingerprint are byte-for-byte the same assertion.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Ok(bytes) = self.data.signed_bytes() {
            hasher.update(&bytes);
        }
        hasher.update(self.signature.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
