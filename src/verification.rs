//! Certificate verification engine.
//!
//! [`verify`] is a pure function of its inputs. [`VerificationEngine`] runs it
//! against the current CA key and records the verdict in a verifier's
//! [`TrustCache`], either inline or on the blocking pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::asymmetric::{AsymmetricCryptographicSystem, RsaCryptoSystem, RsaPublicKeyWrapper};
use crate::authority::CertificateAuthority;
use crate::certificate::Certificate;
use crate::trust::{TrustCache, TrustState};

/// Why a certificate was not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateRejection {
    /// The CA signature does not verify (or cannot be decoded).
    BadSignature,
    NotYetValid,
    Expired,
    /// The certificate names someone other than the claimed sender.
    SubjectMismatch,
    /// Signed correctly, but the embedded public key does not parse.
    MalformedKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CertificateRejection>,
}

impl VerificationVerdict {
    pub fn accepted() -> Self {
        Self {
            verified: true,
            reason: None,
        }
    }

    pub fn rejected(reason: CertificateRejection) -> Self {
        Self {
            verified: false,
            reason: Some(reason),
        }
    }
}

/// Checks, in order: CA signature, validity window, subject binding.
pub fn verify(
    certificate: &Certificate,
    claimed_subject_id: &str,
    ca_public_key: &RsaPublicKeyWrapper,
    now: DateTime<Utc>,
) -> VerificationVerdict {
    let signature_ok = match (certificate.data.signed_bytes(), certificate.signature_bytes()) {
        (Ok(bytes), Ok(signature)) => {
            RsaCryptoSystem::verify(ca_public_key, &bytes, &signature).is_ok()
        }
        _ => false,
    };
    if !signature_ok {
        return VerificationVerdict::rejected(CertificateRejection::BadSignature);
    }

    if now < certificate.data.valid_from {
        return VerificationVerdict::rejected(CertificateRejection::NotYetValid);
    }
    if now > certificate.data.valid_until {
        return VerificationVerdict::rejected(CertificateRejection::Expired);
    }

    if certificate.subject_id() != claimed_subject_id {
        return VerificationVerdict::rejected(CertificateRejection::SubjectMismatch);
    }

    if certificate.data.subject_public_key().is_err() {
        return VerificationVerdict::rejected(CertificateRejection::MalformedKey);
    }

    VerificationVerdict::accepted()
}

/// A certificate check that still has to run for a verifier.
#[derive(Debug, Clone)]
pub struct CertificateCheck {
    pub claimed_subject_id: String,
    pub certificate: Certificate,
}

#[derive(Clone)]
pub struct VerificationEngine {
    ca: Arc<CertificateAuthority>,
}

impl VerificationEngine {
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        Self { ca }
    }

    pub fn ca_public_key(&self) -> RsaPublicKeyWrapper {
        self.ca.ca_public_key()
    }

    /// Verifies against the current CA key without touching any cache.
    pub fn verify(
        &self,
        certificate: &Certificate,
        claimed_subject_id: &str,
        now: DateTime<Utc>,
    ) -> VerificationVerdict {
        verify(certificate, claimed_subject_id, &self.ca.ca_public_key(), now)
    }

    /// Verifies and records the verdict in `trust`, overwriting any previous
    /// state for the subject. The entry is stamped with the CA generation
    /// whose key produced the verdict.
    pub fn check(
        &self,
        trust: &TrustCache,
        certificate: &Certificate,
        claimed_subject_id: &str,
        now: DateTime<Utc>,
    ) -> VerificationVerdict {
        let (ca_public_key, generation) = self.ca.ca_public_key_with_generation();
        let verdict = verify(certificate, claimed_subject_id, &ca_public_key, now);
        let fingerprint = certificate.fingerprint();
        let state = trust.set(claimed_subject_id, Some(&fingerprint), generation, &verdict, now);

        match state {
            TrustState::Verified => {
                info!(subject = %claimed_subject_id, "certificate verified")
            }
            _ => warn!(
                subject = %claimed_subject_id,
                reason = ?verdict.reason,
                "certificate rejected"
            ),
        }
        verdict
    }

    /// Runs a pending check on the blocking pool. The verdict is recorded in
    /// `trust` when the task completes.
    pub fn spawn_check(
        &self,
        trust: Arc<TrustCache>,
        check: CertificateCheck,
    ) -> JoinHandle<VerificationVerdict> {
        let engine = self.clone();
        debug!(subject = %check.claimed_subject_id, "scheduling certificate verification");
        tokio::task::spawn_blocking(move || {
            engine.check(&trust, &check.certificate, &check.claimed_subject_id, Utc::now())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric::KeyPair;
    use crate::test_support::{test_ca, test_crypto_config};
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use chrono::Duration;

    fn issued(ca: &CertificateAuthority, subject: &str) -> Certificate {
        let keys = KeyPair::generate(&test_crypto_config()).unwrap();
        ca.issue_certificate(subject, &keys.public_key, Duration::days(1))
            .unwrap()
    }

    #[test]
    fn test_issued_certificate_verifies_inside_window() {
        let ca = test_ca();
        let cert = issued(&ca, "alice");
        let pk = ca.ca_public_key();

        for now in [
            cert.data.valid_from,
            cert.data.valid_from + Duration::hours(12),
            cert.data.valid_until,
        ] {
            assert!(verify(&cert, "alice", &pk, now).verified);
        }
    }

    #[test]
    fn test_mutated_signature_is_rejected() {
        let ca = test_ca();
        let mut cert = issued(&ca, "alice");
        let mut raw = cert.signature_bytes().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        cert.signature = BASE64.encode(raw);

        let verdict = verify(&cert, "alice", &ca.ca_public_key(), Utc::now());
        assert_eq!(
            verdict,
            VerificationVerdict::rejected(CertificateRejection::BadSignature)
        );
    }

    #[test]
    fn test_undecodable_signature_is_rejected() {
        let ca = test_ca();
        let mut cert = issued(&ca, "alice");
        cert.signature = "%%% not base64 %%%".to_string();

        assert!(!verify(&cert, "alice", &ca.ca_public_key(), Utc::now()).verified);
    }

    #[test]
    fn test_altered_fields_are_rejected() {
        let ca = test_ca();
        let mut cert = issued(&ca, "alice");
        cert.data.valid_until += Duration::days(365);

        let verdict = verify(&cert, "alice", &ca.ca_public_key(), Utc::now());
        assert_eq!(verdict.reason, Some(CertificateRejection::BadSignature));
    }

    #[test]
    fn test_window_boundaries() {
        let ca = test_ca();
        let cert = issued(&ca, "alice");
        let pk = ca.ca_public_key();

        let late = verify(&cert, "alice", &pk, cert.data.valid_until + Duration::seconds(1));
        assert_eq!(late.reason, Some(CertificateRejection::Expired));

        let early = verify(&cert, "alice", &pk, cert.data.valid_from - Duration::seconds(1));
        assert_eq!(early.reason, Some(CertificateRejection::NotYetValid));
    }

    #[test]
    fn test_subject_mismatch_is_rejected() {
        let ca = test_ca();
        let cert = issued(&ca, "mallory");

        let verdict = verify(&cert, "alice", &ca.ca_public_key(), Utc::now());
        assert_eq!(verdict.reason, Some(CertificateRejection::SubjectMismatch));
    }

    #[test]
    fn test_verify_is_idempotent() {
        let ca = test_ca();
        let cert = issued(&ca, "alice");
        let pk = ca.ca_public_key();
        let now = Utc::now();

        let first = verify(&cert, "alice", &pk, now);
        for _ in 0..3 {
            assert_eq!(verify(&cert, "alice", &pk, now), first);
        }
    }

    #[test]
    fn test_rotation_invalidates_existing_certificates() {
        let ca = Arc::new(test_ca());
        let engine = VerificationEngine::new(ca.clone());
        let cert = issued(&ca, "alice");
        assert!(engine.verify(&cert, "alice", Utc::now()).verified);

        ca.rotate().unwrap();
        let verdict = engine.verify(&cert, "alice", Utc::now());
        assert_eq!(verdict.reason, Some(CertificateRejection::BadSignature));
    }

    #[test]
    fn test_check_records_and_can_flip() {
        let ca = Arc::new(test_ca());
        let engine = VerificationEngine::new(ca.clone());
        let trust = TrustCache::new();

        let good = issued(&ca, "alice");
        assert!(engine.check(&trust, &good, "alice", Utc::now()).verified);
        assert_eq!(trust.get("alice"), TrustState::Verified);

        let forged = issued(&ca, "mallory");
        assert!(!engine.check(&trust, &forged, "alice", Utc::now()).verified);
        assert_eq!(trust.get("alice"), TrustState::Rejected);
    }

    #[tokio::test]
    async fn test_spawned_check_records_verdict() {
        let ca = Arc::new(test_ca());
        let engine = VerificationEngine::new(ca.clone());
        let trust = Arc::new(TrustCache::new());
        let cert = issued(&ca, "alice");

        assert!(trust.begin("alice", &cert.fingerprint(), ca.generation()));
        let verdict = engine
            .spawn_check(
                trust.clone(),
                CertificateCheck {
                    claimed_subject_id: "alice".to_string(),
                    certificate: cert,
                },
            )
            .await
            .unwrap();

        assert!(verdict.verified);
        assert_eq!(trust.get("alice"), TrustState::Verified);
    }

    #[tokio::test]
    async fn test_last_completed_check_wins() {
        let ca = Arc::new(test_ca());
        let engine = VerificationEngine::new(ca.clone());
        let trust = Arc::new(TrustCache::new());
        let genuine = issued(&ca, "alice");
        let foreign = issued(&ca, "mallory");

        let run = |certificate: Certificate| {
            engine.spawn_check(
                trust.clone(),
                CertificateCheck {
                    claimed_subject_id: "alice".to_string(),
                    certificate,
                },
            )
        };

        // Both checks are in flight for the same subject at once.
        let first = run(genuine.clone());
        let second = run(foreign.clone());
        let (first, second) = tokio::join!(first, second);
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(first.verified);
        assert_eq!(second.reason, Some(CertificateRejection::SubjectMismatch));

        // Whichever finished last owns the entry; the record agrees with the state.
        let state = trust.get("alice");
        let record = trust.record("alice").unwrap();
        assert_eq!(state.is_verified(), record.verified);
        assert_eq!(trust.len(), 1);

        // Completing in a known order: the later verdict replaces the earlier one.
        assert!(run(genuine.clone()).await.unwrap().verified);
        assert_eq!(trust.get("alice"), TrustState::Verified);
        assert!(!run(foreign).await.unwrap().verified);
        assert_eq!(trust.get("alice"), TrustState::Rejected);
        assert!(run(genuine).await.unwrap().verified);
        assert_eq!(trust.get("alice"), TrustState::Verified);
    }

    #[test]
    fn test_check_after_rotation_is_stamped_with_new_generation() {
        let ca = Arc::new(test_ca());
        let engine = VerificationEngine::new(ca.clone());
        let trust = TrustCache::new();
        let cert = issued(&ca, "alice");

        assert!(trust.begin("alice", &cert.fingerprint(), 0));
        assert!(engine.check(&trust, &cert, "alice", Utc::now()).verified);
        assert!(!trust.begin("alice", &cert.fingerprint(), 0));

        assert_eq!(ca.rotate().unwrap(), 1);
        assert!(trust.begin("alice", &cert.fingerprint(), 1));
        let verdict = engine.check(&trust, &cert, "alice", Utc::now());
        assert_eq!(verdict.reason, Some(CertificateRejection::BadSignature));
        assert_eq!(trust.get("alice"), TrustState::Rejected);
        assert!(!trust.begin("alice", &cert.fingerprint(), 1));
    }
}
