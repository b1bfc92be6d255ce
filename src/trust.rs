//! Per-verifier trust cache.
//!
//! Every verifying party owns one [`TrustCache`]. Entries move through
//! `Unknown -> Pending -> {Verified, Rejected}`; a later verification of the
//! same subject overwrites the terminal state and the last completed write
//! wins. Each entry remembers the fingerprint of the certificate it judged
//! and the CA generation it was judged under, so a subject presenting a
//! different certificate, or any subject after a CA rotation, is verified
//! again. Nothing here is persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::verification::VerificationVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    Unknown,
    Pending,
    Verified,
    Rejected,
}

impl TrustState {
    /// Display projection: only `Verified` counts as verified.
    pub fn is_verified(self) -> bool {
        matches!(self, TrustState::Verified)
    }
}

/// Result of the most recent completed verification of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub subject_id: String,
    pub verified: bool,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct TrustEntry {
    state: TrustState,
    fingerprint: Option<String>,
    ca_generation: u64,
    record: Option<VerificationRecord>,
}

#[derive(Debug, Default)]
pub struct TrustCache {
    entries: DashMap<String, TrustEntry>,
}

impl TrustCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject_id: &str) -> TrustState {
        self.entries
            .get(subject_id)
            .map(|entry| entry.state)
            .unwrap_or(TrustState::Unknown)
    }

    pub fn record(&self, subject_id: &str) -> Option<VerificationRecord> {
        self.entries
            .get(subject_id)
            .and_then(|entry| entry.record.clone())
    }

    /// Claims the verification of `fingerprint` for `subject_id` under CA
    /// generation `ca_generation`.
    ///
    /// Returns `true` (and moves the entry to `Pending`) when the subject is
    /// unknown, was last judged on a different certificate, or was judged
    /// before the CA rotated. Returns `false` when a verdict for this exact
    /// certificate and generation exists or is in flight.
    pub fn begin(&self, subject_id: &str, fingerprint: &str, ca_generation: u64) -> bool {
        match self.entries.entry(subject_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.fingerprint.as_deref() == Some(fingerprint)
                    && entry.ca_generation == ca_generation
                {
                    return false;
                }
                entry.state = TrustState::Pending;
                entry.fingerprint = Some(fingerprint.to_string());
                entry.ca_generation = ca_generation;
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TrustEntry {
                    state: TrustState::Pending,
                    fingerprint: Some(fingerprint.to_string()),
                    ca_generation,
                    record: None,
                });
                true
            }
        }
    }

    /// Records a completed verdict. Overwrites any previous state.
    pub fn set(
        &self,
        subject_id: &str,
        fingerprint: Option<&str>,
        ca_generation: u64,
        verdict: &VerificationVerdict,
        at: DateTime<Utc>,
    ) -> TrustState {
        let state = if verdict.verified {
            TrustState::Verified
        } else {
            TrustState::Rejected
        };
        let record = VerificationRecord {
            subject_id: subject_id.to_string(),
            verified: verdict.verified,
            verified_at: at,
        };

        self.entries
            .entry(subject_id.to_string())
            .and_modify(|entry| {
                entry.state = state;
                entry.record = Some(record.clone());
                entry.ca_generation = ca_generation;
                if let Some(fp) = fingerprint {
                    entry.fingerprint = Some(fp.to_string());
                }
            })
            .or_insert_with(|| TrustEntry {
                state,
                fingerprint: fingerprint.map(str::to_string),
                ca_generation,
                record: Some(record.clone()),
            });

        state
    }

    /// Known peers and their current state, sorted by subject id.
    pub fn snapshot(&self) -> Vec<(String, TrustState)> {
        let mut peers: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.state))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::CertificateRejection;

    fn ok() -> VerificationVerdict {
        VerificationVerdict::accepted()
    }

    fn bad() -> VerificationVerdict {
        VerificationVerdict::rejected(CertificateRejection::BadSignature)
    }

    #[test]
    fn test_unknown_until_begun() {
        let cache = TrustCache::new();
        assert_eq!(cache.get("alice"), TrustState::Unknown);
        assert!(cache.record("alice").is_none());

        assert!(cache.begin("alice", "fp1", 0));
        assert_eq!(cache.get("alice"), TrustState::Pending);
    }

    #[test]
    fn test_begin_is_claimed_once_per_certificate() {
        let cache = TrustCache::new();
        assert!(cache.begin("alice", "fp1", 0));
        assert!(!cache.begin("alice", "fp1", 0));

        cache.set("alice", Some("fp1"), 0, &ok(), Utc::now());
        assert!(!cache.begin("alice", "fp1", 0));
        assert_eq!(cache.get("alice"), TrustState::Verified);

        // A different certificate for the same subject is verified again.
        assert!(cache.begin("alice", "fp2", 0));
        assert_eq!(cache.get("alice"), TrustState::Pending);
    }

    #[test]
    fn test_ca_rotation_reopens_verified_subjects() {
        let cache = TrustCache::new();
        assert!(cache.begin("alice", "fp1", 0));
        cache.set("alice", Some("fp1"), 0, &ok(), Utc::now());
        assert!(!cache.begin("alice", "fp1", 0));

        // Same certificate, new CA key: the old verdict no longer counts.
        assert!(cache.begin("alice", "fp1", 1));
        assert_eq!(cache.get("alice"), TrustState::Pending);
        assert!(!cache.begin("alice", "fp1", 1));

        cache.set("alice", Some("fp1"), 1, &bad(), Utc::now());
        assert_eq!(cache.get("alice"), TrustState::Rejected);
        assert!(!cache.begin("alice", "fp1", 1));
    }

    #[test]
    fn test_last_verdict_wins() {
        let cache = TrustCache::new();
        let now = Utc::now();

        assert_eq!(cache.set("alice", None, 0, &ok(), now), TrustState::Verified);
        assert_eq!(cache.set("alice", None, 0, &bad(), now), TrustState::Rejected);
        assert_eq!(cache.get("alice"), TrustState::Rejected);

        let record = cache.record("alice").unwrap();
        assert!(!record.verified);
        assert_eq!(record.verified_at, now);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let cache = TrustCache::new();
        cache.set("carol", None, 0, &ok(), Utc::now());
        cache.begin("alice", "fp", 0);
        cache.set("bob", None, 0, &bad(), Utc::now());

        assert_eq!(
            cache.snapshot(),
            vec![
                ("alice".to_string(), TrustState::Pending),
                ("bob".to_string(), TrustState::Rejected),
                ("carol".to_string(), TrustState::Verified),
            ]
        );
    }
}
