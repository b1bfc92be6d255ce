//! Defines the events exchanged between clients and the chat server.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`. Decoding
//! is fail-soft: a frame that does not match any known event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::certificate::Certificate;
use crate::error::Error;
use crate::message::Message;
use crate::verification::CertificateRejection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    pub sender: String,
    pub recipient: String,
    pub message: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Requests a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Server-side key generation; the reply carries the private key.
    RegisterUser { user_id: String },
    /// Certificate issuance for a key pair the client generated itself.
    EnrollUser { user_id: String, public_key: String },
    SendMessage(SendMessage),
    /// A message the client already authenticated with its own keys.
    RelayMessage { message: Message },
    VerifyUser { user_id: String, certificate: Certificate },
    GetConversation { user_id: String, recipient_id: String },
    SetTamperingMode { active: bool },
    RequestIntercept,
    ClearIntercepted,
    TamperedMessage { message: Message },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyGenerated {
    pub public_key: String,
    pub private_key: String,
    pub certificate: Certificate,
    pub ca_public_key: String,
}

/// Stable codes for requests the server refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    DuplicateIdentity,
    UnknownIdentity,
    Internal,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Error::DuplicateIdentity(_) => ErrorCode::DuplicateIdentity,
            Error::UnknownIdentity(_) => ErrorCode::UnknownIdentity,
            _ => ErrorCode::Internal,
        }
    }
}

/// Responses and broadcasts the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    KeyGenerated(KeyGenerated),
    CertificateIssued {
        certificate: Certificate,
        ca_public_key: String,
    },
    NewMessage(Message),
    VerificationResult {
        user_id: String,
        verified: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<CertificateRejection>,
    },
    ConversationHistory {
        conversation_with: String,
        messages: Vec<Message>,
    },
    UserListUpdated { users: Vec<String> },
    InterceptedMessages { messages: Vec<Message> },
    Error { code: ErrorCode, message: String },
}

impl ServerEvent {
    pub fn error(err: &Error) -> Self {
        ServerEvent::Error {
            code: ErrorCode::from(err),
            message: err.to_string(),
        }
    }
}

/// Body of `GET /api/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<String>,
}

/// Decodes one client frame; malformed frames yield `None`.
pub fn decode_client_event(frame: &str) -> Option<ClientEvent> {
    match serde_json::from_str(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "dropping malformed client frame");
            None
        }
    }
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, Error> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register_user() {
        let event = decode_client_event(r#"{"event":"register_user","data":{"user_id":"alice"}}"#);
        assert_eq!(
            event,
            Some(ClientEvent::RegisterUser {
                user_id: "alice".to_string()
            })
        );
    }

    #[test]
    fn test_decode_send_message_defaults() {
        let event = decode_client_event(
            r#"{"event":"send_message","data":{"sender":"alice","recipient":"bob","message":"hi"}}"#,
        );
        let Some(ClientEvent::SendMessage(send)) = event else {
            panic!("expected send_message");
        };
        assert!(!send.encrypted);
        assert!(send.timestamp.is_none());
    }

    #[test]
    fn test_decode_unit_event() {
        assert_eq!(
            decode_client_event(r#"{"event":"request_intercept"}"#),
            Some(ClientEvent::RequestIntercept)
        );
        assert_eq!(
            decode_client_event(r#"{"event":"clear_intercepted"}"#),
            Some(ClientEvent::ClearIntercepted)
        );
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        assert!(decode_client_event("not json").is_none());
        assert!(decode_client_event(r#"{"event":"launch_missiles","data":{}}"#).is_none());
        assert!(decode_client_event(r#"{"event":"register_user","data":{}}"#).is_none());
    }

    #[test]
    fn test_encode_verification_result() {
        let text = encode_server_event(&ServerEvent::VerificationResult {
            user_id: "alice".to_string(),
            verified: false,
            reason: Some(CertificateRejection::Expired),
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(json["event"], "verification_result");
        assert_eq!(json["data"]["verified"], false);
        assert_eq!(json["data"]["reason"], "expired");
    }

    #[test]
    fn test_encode_user_list() {
        let text = encode_server_event(&ServerEvent::UserListUpdated {
            users: vec!["alice".to_string()],
        })
        .unwrap();
        assert_eq!(text, r#"{"event":"user_list_updated","data":{"users":["alice"]}}"#);
    }
}
