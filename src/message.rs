//! 聊天消息数据模型
//!
//! 线上格式与事件协议一致：明文载荷位于 `message` 字段，加密载荷位于
//! `encrypted_message` 字段；`integrity_failure` / `tampered` 只由接收方的认证管线写入。

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certificate::Certificate;
use crate::error::Error;

/// 使用收件人公钥封装的载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// RSA-OAEP 封装的 AES-256-GCM 会话密钥（Base64）
    pub wrapped_key: String,
    /// 同一会话密钥用发送方公钥封装的副本，发送方据此读取自己的消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_wrapped_key: Option<String>,
    /// `nonce || ciphertext`（Base64）
    pub ciphertext: String,
}

/// 传输中的载荷：明文或密文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    #[serde(rename = "message")]
    Plain(String),
    #[serde(rename = "encrypted_message")]
    Sealed(SealedPayload),
}

impl MessageBody {
    /// 明文内容；密文载荷返回 `None`
    pub fn as_plain(&self) -> Option<&str> {
        match self {
            MessageBody::Plain(text) => Some(text),
            MessageBody::Sealed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub sender: String,
    pub recipient: String,
    #[serde(flatten)]
    pub body: MessageBody,
    /// 发送方是否要求认证（签名 + 证书）
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    /// 发送方签名（Base64）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub integrity_failure: bool,
    #[serde(default)]
    pub tampered: bool,
}

/// 签名覆盖的字段
#[derive(Serialize)]
struct SignedContent<'a> {
    sender: &'a str,
    recipient: &'a str,
    timestamp: String,
    body: &'a MessageBody,
}

impl Message {
    /// 创建一条明文消息，时间戳精确到毫秒
    pub fn new(sender: &str, recipient: &str, text: &str, encrypted: bool) -> Self {
        Self::new_at(sender, recipient, text, encrypted, Utc::now())
    }

    pub fn new_at(
        sender: &str,
        recipient: &str,
        text: &str,
        encrypted: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body: MessageBody::Plain(text.to_string()),
            encrypted,
            certificate: None,
            signature: None,
            timestamp: timestamp.trunc_subsecs(3),
            integrity_failure: false,
            tampered: false,
        }
    }

    /// 签名所覆盖的规范字节：发送方、收件人、时间戳与传输中的载荷
    pub fn signed_bytes(&self) -> Result<Vec<u8>, Error> {
        let content = SignedContent {
            sender: &self.sender,
            recipient: &self.recipient,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            body: &self.body,
        };
        Ok(serde_json::to_vec(&content)?)
    }

    /// 密文载荷的附加认证数据，将密文绑定到发送方与收件人
    pub(crate) fn sealing_aad(sender: &str, recipient: &str) -> Vec<u8> {
        format!("{}\u{0}{}", sender, recipient).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_body_uses_message_field() {
        let msg = Message::new("alice", "bob", "hi", false);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["message"], "hi");
        assert!(json.get("encrypted_message").is_none());
        assert!(json.get("signature").is_none());
        assert_eq!(json["integrity_failure"], false);
    }

    #[test]
    fn test_sealed_body_uses_encrypted_message_field() {
        let mut msg = Message::new("alice", "bob", "hi", true);
        msg.body = MessageBody::Sealed(SealedPayload {
            wrapped_key: "k".to_string(),
            sender_wrapped_key: None,
            ciphertext: "c".to_string(),
        });
        let json = serde_json::to_value(&msg).unwrap();

        assert!(json.get("message").is_none());
        assert_eq!(json["encrypted_message"]["ciphertext"], "c");
        assert!(json["encrypted_message"].get("sender_wrapped_key").is_none());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_signed_bytes_cover_payload_and_routing() {
        let msg = Message::new("alice", "bob", "hi", true);
        let base = msg.signed_bytes().unwrap();

        let mut altered = msg.clone();
        altered.body = MessageBody::Plain("hi!".to_string());
        assert_ne!(base, altered.signed_bytes().unwrap());

        let mut rerouted = msg.clone();
        rerouted.recipient = "carol".to_string();
        assert_ne!(base, rerouted.signed_bytes().unwrap());

        // Verdict annotations are not signed.
        let mut annotated = msg.clone();
        annotated.tampered = true;
        assert_eq!(base, annotated.signed_bytes().unwrap());
    }

    #[test]
    fn test_minimal_wire_message_deserializes() {
        let json = r#"{"sender":"alice","recipient":"bob","message":"yo","timestamp":"2026-10-19T10:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.body.as_plain(), Some("yo"));
        assert!(!msg.encrypted);
    }
}
