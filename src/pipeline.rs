//! Message authentication pipeline.
//!
//! Outbound, [`AuthenticationPipeline::authenticate`] signs messages that ask
//! for authentication (`encrypted == true`) and attaches the sender's
//! certificate; with confidentiality enabled the payload is also sealed to the
//! recipient, with a second copy of the session key wrapped for the sender.
//! Plain messages pass through untouched.
//!
//! Inbound, the receiver recomputes the signature check and writes the
//! `tampered` / `integrity_failure` verdicts. The verdict is computed once
//! at receipt. Certificate trust is tracked separately in the receiver's
//! [`TrustCache`]; a message is never held back waiting for it.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::asymmetric::{
    AsymmetricCryptographicSystem, KeyPair, RsaCryptoSystem, RsaPrivateKeyWrapper,
    RsaPublicKeyWrapper,
};
use crate::certificate::Certificate;
use crate::error::Error;
use crate::message::{Message, MessageBody, SealedPayload};
use crate::symmetric::{AesGcmKey, AesGcmSystem};
use crate::trust::TrustCache;
use crate::verification::{self, CertificateCheck};

/// A received message with its verdicts, plus the certificate check that the
/// receiver still has to run (first contact or a new certificate).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: Message,
    pub certificate_check: Option<CertificateCheck>,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthenticationPipeline {
    confidentiality: bool,
}

impl Default for AuthenticationPipeline {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AuthenticationPipeline {
    pub fn new(confidentiality: bool) -> Self {
        Self { confidentiality }
    }

    pub fn confidentiality(&self) -> bool {
        self.confidentiality
    }

    /// Prepares an outgoing message.
    ///
    /// `recipient_key` is only used when confidentiality is enabled; without
    /// it the payload is signed but left readable.
    pub fn authenticate(
        &self,
        mut message: Message,
        sender_key_pair: &KeyPair,
        sender_certificate: &Certificate,
        recipient_key: Option<&RsaPublicKeyWrapper>,
    ) -> Result<Message, Error> {
        message.integrity_failure = false;
        message.tampered = false;

        if !message.encrypted {
            message.signature = None;
            message.certificate = None;
            return Ok(message);
        }

        if sender_certificate.subject_id() != message.sender {
            return Err(Error::InvalidRequest(format!(
                "certificate for {} cannot sign messages from {}",
                sender_certificate.subject_id(),
                message.sender
            )));
        }

        if let (true, Some(recipient_key)) = (self.confidentiality, recipient_key) {
            if let MessageBody::Plain(text) = &message.body {
                let sealed = seal(
                    text,
                    &message.sender,
                    &message.recipient,
                    recipient_key,
                    &sender_key_pair.public_key,
                )?;
                message.body = MessageBody::Sealed(sealed);
            }
        }

        let signature = sender_key_pair.sign(&message.signed_bytes()?)?;
        message.signature = Some(BASE64.encode(signature.as_ref()));
        message.certificate = Some(sender_certificate.clone());

        debug!(
            id = %message.id,
            sender = %message.sender,
            recipient = %message.recipient,
            sealed = matches!(message.body, MessageBody::Sealed(_)),
            "message authenticated"
        );
        Ok(message)
    }

    /// Writes the integrity verdicts onto `message`. Annotations supplied by
    /// the sender are discarded.
    pub fn annotate(&self, mut message: Message) -> Message {
        let intact = !message.encrypted || signature_matches(&message);
        message.integrity_failure = !intact;
        message.tampered = !intact;

        if !intact {
            warn!(
                id = %message.id,
                sender = %message.sender,
                recipient = %message.recipient,
                "integrity check failed: message signature does not match"
            );
        }
        message
    }

    /// Annotates the message and, for authenticated messages whose certificate
    /// this receiver has not judged under `ca_generation` yet, marks the sender
    /// `Pending` and hands back the check to run. The caller delivers the
    /// message right away.
    pub fn receive(&self, message: Message, trust: &TrustCache, ca_generation: u64) -> InboundMessage {
        let message = self.annotate(message);

        let certificate_check = match (&message.certificate, message.encrypted) {
            (Some(certificate), true)
                if trust.begin(&message.sender, &certificate.fingerprint(), ca_generation) =>
            {
                Some(CertificateCheck {
                    claimed_subject_id: message.sender.clone(),
                    certificate: certificate.clone(),
                })
            }
            _ => None,
        };

        InboundMessage {
            message,
            certificate_check,
        }
    }

    /// Synchronous inbound path: annotates the message and, if needed,
    /// verifies the sender's certificate before returning.
    pub fn authenticate_inbound(
        &self,
        message: Message,
        trust: &TrustCache,
        ca_public_key: &RsaPublicKeyWrapper,
        ca_generation: u64,
        now: DateTime<Utc>,
    ) -> Message {
        let inbound = self.receive(message, trust, ca_generation);
        if let Some(check) = inbound.certificate_check {
            let verdict =
                verification::verify(&check.certificate, &check.claimed_subject_id, ca_public_key, now);
            trust.set(
                &check.claimed_subject_id,
                Some(&check.certificate.fingerprint()),
                ca_generation,
                &verdict,
                now,
            );
        }
        inbound.message
    }
}

/// Checks the signature against the public key of the attached certificate.
/// A certificate naming someone other than the sender counts as a mismatch.
fn signature_matches(message: &Message) -> bool {
    let (Some(certificate), Some(signature)) = (&message.certificate, &message.signature) else {
        return false;
    };
    if certificate.subject_id() != message.sender {
        return false;
    }
    let Ok(public_key) = certificate.data.subject_public_key() else {
        return false;
    };
    let Ok(signature) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(bytes) = message.signed_bytes() else {
        return false;
    };
    RsaCryptoSystem::verify(&public_key, &bytes, &signature).is_ok()
}

fn seal(
    plaintext: &str,
    sender: &str,
    recipient: &str,
    recipient_key: &RsaPublicKeyWrapper,
    sender_key: &RsaPublicKeyWrapper,
) -> Result<SealedPayload, Error> {
    let session_key = AesGcmSystem::generate_key();
    let aad = Message::sealing_aad(sender, recipient);
    let ciphertext = AesGcmSystem::encrypt(&session_key, plaintext.as_bytes(), &aad)?;
    let wrapped_key = RsaCryptoSystem::wrap_key(recipient_key, session_key.as_bytes())?;
    let sender_wrapped_key = RsaCryptoSystem::wrap_key(sender_key, session_key.as_bytes())?;

    Ok(SealedPayload {
        wrapped_key: BASE64.encode(wrapped_key),
        sender_wrapped_key: Some(BASE64.encode(sender_wrapped_key)),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Recovers the readable payload with the private key of either the
/// recipient or the sender.
pub fn open(message: &Message, private_key: &RsaPrivateKeyWrapper) -> Result<String, Error> {
    let sealed = match &message.body {
        MessageBody::Plain(text) => return Ok(text.clone()),
        MessageBody::Sealed(sealed) => sealed,
    };
    let ciphertext = BASE64.decode(&sealed.ciphertext)?;
    let aad = Message::sealing_aad(&message.sender, &message.recipient);

    let mut last_error = None;
    for wrapped in std::iter::once(&sealed.wrapped_key).chain(&sealed.sender_wrapped_key) {
        match open_with(wrapped, &ciphertext, &aad, private_key) {
            Ok(text) => return Ok(text),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Encryption("no wrapped key".to_string())))
}

fn open_with(
    wrapped_key: &str,
    ciphertext: &[u8],
    aad: &[u8],
    private_key: &RsaPrivateKeyWrapper,
) -> Result<String, Error> {
    let wrapped = BASE64.decode(wrapped_key)?;
    let session_key = AesGcmKey::from_bytes(RsaCryptoSystem::unwrap_key(private_key, &wrapped)?)?;
    let plaintext = AesGcmSystem::decrypt(&session_key, ciphertext, aad)?;
    Ok(String::from_utf8(plaintext)?)
}
