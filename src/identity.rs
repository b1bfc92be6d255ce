//! Client-side identity.
//!
//! An [`Identity`] keeps its key pair inside the boundary that generated it
//! and carries its own [`TrustCache`] for the peers it hears from.

use chrono::Utc;
use tracing::debug;

use crate::asymmetric::{KeyPair, RsaPublicKeyWrapper};
use crate::certificate::Certificate;
use crate::common::config::CryptoConfig;
use crate::error::Error;
use crate::message::Message;
use crate::pipeline::{self, AuthenticationPipeline};
use crate::registry::{IdentityBundle, IdentityRegistry};
use crate::trust::TrustCache;

#[derive(Debug)]
pub struct Identity {
    user_id: String,
    key_pair: KeyPair,
    certificate: Option<Certificate>,
    ca_public_key: Option<RsaPublicKeyWrapper>,
    /// Bumped whenever a different CA key is adopted, so earlier trust
    /// verdicts are re-checked against it.
    ca_generation: u64,
    trust: TrustCache,
}

impl Identity {
    /// Generates a fresh key pair locally. The identity has no certificate
    /// until it is enrolled.
    pub fn generate(user_id: &str, config: &CryptoConfig) -> Result<Self, Error> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("user id must not be empty".to_string()));
        }
        Ok(Self {
            user_id: user_id.to_string(),
            key_pair: KeyPair::generate(config)?,
            certificate: None,
            ca_public_key: None,
            ca_generation: 0,
            trust: TrustCache::new(),
        })
    }

    /// Adopts the material returned by a server-side registration.
    pub fn from_bundle(bundle: IdentityBundle) -> Self {
        Self {
            user_id: bundle.user_id,
            key_pair: bundle.key_pair,
            certificate: Some(bundle.certificate),
            ca_public_key: Some(bundle.ca_public_key),
            ca_generation: 0,
            trust: TrustCache::new(),
        }
    }

    /// Submits the public key to the registry and keeps the issued certificate.
    pub fn enroll(&mut self, registry: &IdentityRegistry) -> Result<&Certificate, Error> {
        let enrolled = registry.enroll(&self.user_id, &self.key_pair.public_key.to_pem()?)?;
        self.adopt_ca_key(enrolled.ca_public_key);
        Ok(&*self.certificate.insert(enrolled.certificate))
    }

    /// Adopts a certificate issued for this identity elsewhere, e.g. the
    /// reply to an `enroll_user` event.
    pub fn install_certificate(
        &mut self,
        certificate: Certificate,
        ca_public_key: RsaPublicKeyWrapper,
    ) -> Result<(), Error> {
        if certificate.subject_id() != self.user_id
            || certificate.data.subject_public_key()? != self.key_pair.public_key
        {
            return Err(Error::InvalidRequest(format!(
                "certificate does not belong to {}",
                self.user_id
            )));
        }
        self.certificate = Some(certificate);
        self.adopt_ca_key(ca_public_key);
        Ok(())
    }

    fn adopt_ca_key(&mut self, ca_public_key: RsaPublicKeyWrapper) {
        if self.ca_public_key.as_ref().is_some_and(|known| *known != ca_public_key) {
            self.ca_generation += 1;
        }
        self.ca_public_key = Some(ca_public_key);
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn public_key(&self) -> &RsaPublicKeyWrapper {
        &self.key_pair.public_key
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    pub fn ca_public_key(&self) -> Option<&RsaPublicKeyWrapper> {
        self.ca_public_key.as_ref()
    }

    pub fn trust(&self) -> &TrustCache {
        &self.trust
    }

    /// Builds an outgoing message. With `encrypted` set it is signed, and
    /// sealed to `recipient_key` when the pipeline provides confidentiality.
    pub fn compose(
        &self,
        pipeline: &AuthenticationPipeline,
        recipient: &str,
        text: &str,
        encrypted: bool,
        recipient_key: Option<&RsaPublicKeyWrapper>,
    ) -> Result<Message, Error> {
        let message = Message::new(&self.user_id, recipient, text, encrypted);
        if !encrypted {
            return Ok(message);
        }
        let certificate = self
            .certificate
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest(format!("{} is not enrolled", self.user_id)))?;
        pipeline.authenticate(message, &self.key_pair, certificate, recipient_key)
    }

    /// Runs the inbound pipeline against this identity's trust cache.
    pub fn receive(&self, pipeline: &AuthenticationPipeline, message: Message) -> Result<Message, Error> {
        let ca_public_key = self
            .ca_public_key
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest(format!("{} has no CA key", self.user_id)))?;
        let received = pipeline.authenticate_inbound(
            message,
            &self.trust,
            ca_public_key,
            self.ca_generation,
            Utc::now(),
        );
        debug!(
            user_id = %self.user_id,
            from = %received.sender,
            tampered = received.tampered,
            "message received"
        );
        Ok(received)
    }

    /// Readable payload of a message addressed to this identity.
    pub fn open(&self, message: &Message) -> Result<String, Error> {
        pipeline::open(message, &self.key_pair.private_key)
    }
}
