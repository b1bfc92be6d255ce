//! # Seal-Chat: Certificate-Backed Message Authentication
//!
//! `seal-chat` provides the trust layer of a two-party chat: a certificate
//! authority that binds user ids to RSA public keys, a verification engine
//! with a per-verifier trust cache, and a pipeline that signs outgoing
//! messages and flags tampered ones on receipt.
//!
//! ## Core Concepts
//!
//! - **`CertificateAuthority`**: issues signed certificates; its key pair can be rotated.
//! - **`IdentityRegistry`**: registers users (server-held keys) or enrolls
//!   client-generated public keys.
//! - **`AuthenticationPipeline`**: encrypt-then-sign on the way out, signature
//!   check on the way in. Tampered messages are delivered and flagged, never dropped.
//! - **`ChatServer`**: the event hub a transport plugs into.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seal_chat::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Error> {
//!     let config = CryptoConfig::default();
//!     let ca = Arc::new(CertificateAuthority::new(&config, "Secure Messaging App")?);
//!     let registry = IdentityRegistry::new(ca, config, IdentityPolicy::default());
//!
//!     let mut alice = Identity::generate("alice", &CryptoConfig::default())?;
//!     let mut bob = Identity::generate("bob", &CryptoConfig::default())?;
//!     alice.enroll(&registry)?;
//!     bob.enroll(&registry)?;
//!
//!     let pipeline = AuthenticationPipeline::default();
//!     let outgoing = alice.compose(&pipeline, "bob", "hello", true, Some(bob.public_key()))?;
//!     let received = bob.receive(&pipeline, outgoing)?;
//!
//!     assert!(!received.tampered);
//!     assert_eq!(bob.open(&received)?, "hello");
//!     Ok(())
//! }
//! ```

pub mod asymmetric;
pub mod authority;
pub mod certificate;
pub mod common;
pub mod conversation;
pub mod error;
pub mod identity;
pub mod message;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod symmetric;
pub mod trust;
pub mod verification;

pub use error::{Error, Result};

// --- Prelude ---
// The types most callers need.
pub mod prelude {
    pub use crate::authority::CertificateAuthority;
    pub use crate::certificate::{Certificate, CertificateData};
    pub use crate::common::{ConfigFile, CryptoConfig, IdentityPolicy};
    pub use crate::conversation::{ConversationStore, JsonLinesLog, MessageLog};
    pub use crate::error::Error;
    pub use crate::identity::Identity;
    pub use crate::message::{Message, MessageBody};
    pub use crate::pipeline::AuthenticationPipeline;
    pub use crate::protocol::{ClientEvent, ServerEvent};
    pub use crate::registry::IdentityRegistry;
    pub use crate::server::ChatServer;
    pub use crate::trust::{TrustCache, TrustState};
    pub use crate::verification::{CertificateRejection, VerificationEngine, VerificationVerdict};
}

/// The version of the `seal-chat` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
