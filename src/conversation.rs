//! Conversation store.
//!
//! Conversations are keyed by the unordered pair of participants and hold
//! messages in arrival order. Every append goes to a [`MessageLog`] first;
//! [`ConversationStore::restore`] rebuilds the index from that log.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Error;
use crate::message::Message;

/// Unordered pair `{user_a, user_b}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey(String, String);

impl ConversationKey {
    pub fn new(user_a: &str, user_b: &str) -> Self {
        if user_a <= user_b {
            Self(user_a.to_string(), user_b.to_string())
        } else {
            Self(user_b.to_string(), user_a.to_string())
        }
    }

    pub fn of(message: &Message) -> Self {
        Self::new(&message.sender, &message.recipient)
    }
}

/// Append-only message log.
#[async_trait]
pub trait MessageLog: Send + Sync + 'static {
    async fn append(&self, message: &Message) -> Result<(), Error>;

    /// Every logged message, oldest first.
    async fn load(&self) -> Result<Vec<Message>, Error>;
}

#[derive(Debug, Default)]
pub struct InMemoryLog {
    entries: Mutex<Vec<Message>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn append(&self, message: &Message) -> Result<(), Error> {
        self.entries.lock().await.push(message.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Message>, Error> {
        Ok(self.entries.lock().await.clone())
    }
}

/// One JSON document per line, appended and flushed per message.
#[derive(Debug)]
pub struct JsonLinesLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesLog {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageLog for JsonLinesLog {
    async fn append(&self, message: &Message) -> Result<(), Error> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Message>, Error> {
        let _guard = self.file.lock().await;
        let reader = BufReader::new(File::open(&self.path).await?);
        let mut lines = reader.lines();
        let mut messages = Vec::new();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(message) => messages.push(message),
                // A torn final write must not make the whole history unreadable.
                Err(e) => warn!(path = %self.path.display(), line = line_no, error = %e, "skipping unreadable log line"),
            }
        }
        Ok(messages)
    }
}

pub struct ConversationStore {
    conversations: DashMap<ConversationKey, Vec<Message>>,
    log: Arc<dyn MessageLog>,
}

impl ConversationStore {
    pub fn new(log: Arc<dyn MessageLog>) -> Self {
        Self {
            conversations: DashMap::new(),
            log,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLog::new()))
    }

    /// Rebuilds the conversation index from everything already in `log`.
    pub async fn restore(log: Arc<dyn MessageLog>) -> Result<Self, Error> {
        let messages = log.load().await?;
        let store = Self::new(log);
        let count = messages.len();
        for message in messages {
            store.index(message);
        }
        debug!(messages = count, "conversation history restored");
        Ok(store)
    }

    /// Appends to the log, then to the in-memory conversation.
    pub async fn append(&self, message: Message) -> Result<(), Error> {
        self.log.append(&message).await?;
        self.index(message);
        Ok(())
    }

    /// Messages between the two users in arrival order.
    pub fn history(&self, user_a: &str, user_b: &str) -> Vec<Message> {
        self.conversations
            .get(&ConversationKey::new(user_a, user_b))
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    fn index(&self, message: Message) {
        self.conversations
            .entry(ConversationKey::of(&message))
            .or_default()
            .push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_key_is_unordered() {
        assert_eq!(ConversationKey::new("alice", "bob"), ConversationKey::new("bob", "alice"));
        assert_ne!(ConversationKey::new("alice", "bob"), ConversationKey::new("alice", "carol"));
    }

    #[tokio::test]
    async fn test_history_keeps_arrival_order() {
        let store = ConversationStore::in_memory();
        let now = Utc::now();

        // The later-stamped message arrives first.
        let late = Message::new_at("bob", "alice", "second", false, now + Duration::seconds(5));
        let early = Message::new_at("alice", "bob", "first", false, now);
        store.append(late.clone()).await.unwrap();
        store.append(early.clone()).await.unwrap();
        store
            .append(Message::new("alice", "carol", "elsewhere", false))
            .await
            .unwrap();

        assert_eq!(store.history("alice", "bob"), vec![late, early]);
        assert_eq!(store.history("bob", "alice").len(), 2);
        assert_eq!(store.conversation_count(), 2);
        assert!(store.history("bob", "carol").is_empty());
    }

    #[tokio::test]
    async fn test_json_lines_log_restores_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("messages.jsonl");

        let first = Message::new("alice", "bob", "hello", false);
        let second = Message::new("bob", "alice", "hi", false);
        {
            let log = Arc::new(JsonLinesLog::open(&path).await.unwrap());
            let store = ConversationStore::new(log);
            store.append(first.clone()).await.unwrap();
            store.append(second.clone()).await.unwrap();
        }

        let log = Arc::new(JsonLinesLog::open(&path).await.unwrap());
        let restored = ConversationStore::restore(log).await.unwrap();
        assert_eq!(restored.history("alice", "bob"), vec![first, second]);
    }

    #[tokio::test]
    async fn test_unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let message = Message::new("alice", "bob", "kept", false);

        let log = JsonLinesLog::open(&path).await.unwrap();
        log.append(&message).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{\"sender\": \"tru")
            .await
            .unwrap();

        assert_eq!(log.load().await.unwrap(), vec![message]);
    }
}
