//! Chat server: session management and event dispatch.
//!
//! The transport (WebSocket, Socket.IO, TLS) is outside this crate. A
//! transport calls [`ChatServer::connect`] for each connection, feeds inbound
//! frames to [`ChatServer::handle_text`] and forwards everything received on
//! the returned channel to the client.
//!
//! Each session owns its own trust cache. When a recipient hears from a
//! sender for the first time, the message is stored and delivered at once,
//! and the certificate is verified on the blocking pool; the verdict reaches
//! the session as a `verification_result` event if it is still connected.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::asymmetric::{AsymmetricCryptographicSystem, RsaCryptoSystem};
use crate::authority::CertificateAuthority;
use crate::common::config::{ConfigFile, RelayConfig};
use crate::conversation::{ConversationStore, JsonLinesLog, MessageLog};
use crate::error::Error;
use crate::message::Message;
use crate::pipeline::AuthenticationPipeline;
use crate::protocol::{
    ClientEvent, KeyGenerated, SendMessage, ServerEvent, UsersResponse, decode_client_event,
};
use crate::registry::IdentityRegistry;
use crate::trust::TrustCache;
use crate::verification::VerificationEngine;

pub type SessionId = Uuid;

struct Session {
    user_id: Option<String>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    trust: Arc<TrustCache>,
}

/// Interception log and hold switch for the relay. While tampering mode is
/// active, relayed messages are only logged; whoever enabled it decides what
/// reaches the recipient via `tampered_message`. Nothing is logged unless
/// interception is enabled, and the log keeps only the newest messages.
struct Relay {
    config: RelayConfig,
    tampering: AtomicBool,
    log: Mutex<VecDeque<Message>>,
}

impl Relay {
    fn new(config: RelayConfig) -> Self {
        Self {
            config,
            tampering: AtomicBool::new(false),
            log: Mutex::new(VecDeque::new()),
        }
    }

    async fn record(&self, message: &Message) {
        if !self.config.interception_enabled || self.config.intercept_log_limit == 0 {
            return;
        }
        let mut log = self.log.lock().await;
        while log.len() >= self.config.intercept_log_limit {
            log.pop_front();
        }
        log.push_back(message.clone());
    }
}

pub struct ChatServer {
    registry: Arc<IdentityRegistry>,
    engine: VerificationEngine,
    pipeline: AuthenticationPipeline,
    conversations: Arc<ConversationStore>,
    sessions: Arc<DashMap<SessionId, Session>>,
    user_sessions: DashMap<String, SessionId>,
    relay: Relay,
}

impl ChatServer {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        pipeline: AuthenticationPipeline,
        conversations: Arc<ConversationStore>,
    ) -> Self {
        let engine = VerificationEngine::new(registry.authority().clone());
        Self {
            registry,
            engine,
            pipeline,
            conversations,
            sessions: Arc::new(DashMap::new()),
            user_sessions: DashMap::new(),
            relay: Relay::new(RelayConfig::default()),
        }
    }

    /// Replaces the relay settings. Interception stays off unless `config`
    /// enables it.
    pub fn with_relay(mut self, config: RelayConfig) -> Self {
        if config.interception_enabled {
            warn!(limit = config.intercept_log_limit, "relay interception enabled");
        }
        self.relay = Relay::new(config);
        self
    }

    /// Builds the CA, registry and conversation store described by `config`.
    pub async fn from_config(config: &ConfigFile) -> Result<Self, Error> {
        config.validate()?;

        let ca = Arc::new(CertificateAuthority::new(
            &config.crypto,
            &config.identity.issuer_id,
        )?);
        let registry = Arc::new(IdentityRegistry::new(
            ca,
            config.crypto.clone(),
            config.identity.clone(),
        ));
        let conversations = match &config.storage.history_path {
            Some(path) => {
                let log: Arc<dyn MessageLog> = Arc::new(JsonLinesLog::open(path).await?);
                ConversationStore::restore(log).await?
            }
            None => ConversationStore::in_memory(),
        };

        Ok(Self::new(
            registry,
            AuthenticationPipeline::new(config.crypto.confidentiality),
            Arc::new(conversations),
        )
        .with_relay(config.relay.clone()))
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    /// Opens a session and returns the channel its events arrive on.
    pub fn connect(&self) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (outbound, inbound) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();
        self.sessions.insert(
            session_id,
            Session {
                user_id: None,
                outbound,
                trust: Arc::new(TrustCache::new()),
            },
        );
        info!(session = %session_id, "client connected");
        (session_id, inbound)
    }

    /// Tears the session down: its trust cache and pending verification
    /// results are dropped and its identity is logged out.
    pub fn disconnect(&self, session_id: SessionId) {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return;
        };
        info!(session = %session_id, "client disconnected");

        if let Some(user_id) = session.user_id {
            self.user_sessions
                .remove_if(&user_id, |_, bound| *bound == session_id);
            if self.registry.logout(&user_id) {
                self.broadcast_user_list();
            }
        }
    }

    /// Query surface for `GET /api/users`.
    pub fn users(&self) -> UsersResponse {
        UsersResponse {
            users: self.registry.users(),
        }
    }

    /// The trust cache of a session, for rendering verification badges.
    pub fn trust_cache(&self, session_id: SessionId) -> Option<Arc<TrustCache>> {
        self.sessions.get(&session_id).map(|s| s.trust.clone())
    }

    /// Decodes and dispatches one raw frame. Malformed frames are ignored.
    pub async fn handle_text(&self, session_id: SessionId, frame: &str) {
        if let Some(event) = decode_client_event(frame) {
            self.handle(session_id, event).await;
        }
    }

    pub async fn handle(&self, session_id: SessionId, event: ClientEvent) {
        if !self.sessions.contains_key(&session_id) {
            warn!(session = %session_id, "event from unknown session ignored");
            return;
        }

        match event {
            ClientEvent::RegisterUser { user_id } => self.on_register(session_id, user_id).await,
            ClientEvent::EnrollUser {
                user_id,
                public_key,
            } => self.on_enroll(session_id, user_id, public_key),
            ClientEvent::SendMessage(request) => self.on_send(session_id, request).await,
            ClientEvent::RelayMessage { message } => self.on_relay(session_id, message).await,
            ClientEvent::VerifyUser {
                user_id,
                certificate,
            } => {
                let Some(trust) = self.trust_cache(session_id) else {
                    return;
                };
                let verdict = self.engine.check(&trust, &certificate, &user_id, Utc::now());
                self.send_to(
                    session_id,
                    ServerEvent::VerificationResult {
                        user_id,
                        verified: verdict.verified,
                        reason: verdict.reason,
                    },
                );
            }
            ClientEvent::GetConversation {
                user_id,
                recipient_id,
            } => {
                if !self.owns(session_id, &user_id) {
                    return;
                }
                let messages = self.conversations.history(&user_id, &recipient_id);
                debug!(
                    user_id = %user_id,
                    recipient_id = %recipient_id,
                    count = messages.len(),
                    "conversation history requested"
                );
                self.send_to(
                    session_id,
                    ServerEvent::ConversationHistory {
                        conversation_with: recipient_id,
                        messages,
                    },
                );
            }
            ClientEvent::SetTamperingMode { .. }
            | ClientEvent::RequestIntercept
            | ClientEvent::ClearIntercepted
            | ClientEvent::TamperedMessage { .. }
                if !self.relay.config.interception_enabled =>
            {
                warn!(session = %session_id, "relay interception is disabled, request refused");
                self.send_to(
                    session_id,
                    ServerEvent::error(&Error::InvalidRequest(
                        "relay interception is disabled".to_string(),
                    )),
                );
            }
            ClientEvent::SetTamperingMode { active } => {
                self.relay.tampering.store(active, Ordering::SeqCst);
                warn!(session = %session_id, active, "relay tampering mode changed");
            }
            ClientEvent::RequestIntercept => {
                let messages = self.relay.log.lock().await.iter().cloned().collect();
                self.send_to(session_id, ServerEvent::InterceptedMessages { messages });
            }
            ClientEvent::ClearIntercepted => {
                let cleared = {
                    let mut log = self.relay.log.lock().await;
                    let cleared = log.len();
                    log.clear();
                    cleared
                };
                info!(session = %session_id, cleared, "interception log cleared");
            }
            ClientEvent::TamperedMessage { message } => {
                warn!(
                    id = %message.id,
                    sender = %message.sender,
                    recipient = %message.recipient,
                    "forwarding message injected by relay"
                );
                self.deliver_to_recipient(message).await;
            }
        }
    }

    async fn on_register(&self, session_id: SessionId, user_id: String) {
        if self.bound_user(session_id).is_some() {
            self.send_to(
                session_id,
                ServerEvent::error(&Error::InvalidRequest(
                    "session already has an identity".to_string(),
                )),
            );
            return;
        }

        let registry = self.registry.clone();
        let requested = user_id.clone();
        let result = tokio::task::spawn_blocking(move || registry.register(&requested))
            .await
            .unwrap_or_else(|e| Err(Error::Key(format!("key generation task failed: {}", e))));

        let bundle = match result {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "registration rejected");
                self.send_to(session_id, ServerEvent::error(&err));
                return;
            }
        };

        let exported = (
            bundle.key_pair.public_key.to_pem(),
            RsaCryptoSystem::export_private_key(&bundle.key_pair.private_key),
            bundle.ca_public_key.to_pem(),
        );
        let (Ok(public_key), Ok(private_key), Ok(ca_public_key)) = exported else {
            error!(user_id = %user_id, "failed to export registered key material");
            self.registry.logout(&user_id);
            self.send_to(
                session_id,
                ServerEvent::error(&Error::Key("key export failed".to_string())),
            );
            return;
        };

        if !self.bind(session_id, &user_id) {
            self.registry.logout(&user_id);
            return;
        }
        self.broadcast_user_list();
        self.send_to(
            session_id,
            ServerEvent::KeyGenerated(KeyGenerated {
                public_key,
                private_key,
                certificate: bundle.certificate,
                ca_public_key,
            }),
        );
    }

    fn on_enroll(&self, session_id: SessionId, user_id: String, public_key: String) {
        if self.bound_user(session_id).is_some() {
            self.send_to(
                session_id,
                ServerEvent::error(&Error::InvalidRequest(
                    "session already has an identity".to_string(),
                )),
            );
            return;
        }

        let enrolled = match self.registry.enroll(&user_id, &public_key) {
            Ok(enrolled) => enrolled,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "enrollment rejected");
                self.send_to(session_id, ServerEvent::error(&err));
                return;
            }
        };
        let ca_public_key = match enrolled.ca_public_key.to_pem() {
            Ok(pem) => pem,
            Err(err) => {
                self.registry.logout(&user_id);
                self.send_to(session_id, ServerEvent::error(&err));
                return;
            }
        };

        if !self.bind(session_id, &user_id) {
            self.registry.logout(&user_id);
            return;
        }
        self.broadcast_user_list();
        self.send_to(
            session_id,
            ServerEvent::CertificateIssued {
                certificate: enrolled.certificate,
                ca_public_key,
            },
        );
    }

    async fn on_send(&self, session_id: SessionId, request: SendMessage) {
        if !self.owns(session_id, &request.sender) {
            return;
        }

        let mut message = Message::new_at(
            &request.sender,
            &request.recipient,
            &request.message,
            request.encrypted,
            request.timestamp.unwrap_or_else(Utc::now),
        );
        info!(
            id = %message.id,
            sender = %message.sender,
            recipient = %message.recipient,
            encrypted = message.encrypted,
            "message received from sender"
        );

        if message.encrypted {
            let key_pair = self.registry.custodied_key_pair(&message.sender);
            let certificate = self.registry.certificate(&message.sender);
            let (Some(key_pair), Some(certificate)) = (key_pair, certificate) else {
                // Enrolled clients sign themselves.
                warn!(sender = %message.sender, "no server-held keys for sender, message refused");
                self.send_to(
                    session_id,
                    ServerEvent::error(&Error::InvalidRequest(format!(
                        "no server-held keys for {}, sign the message and use relay_message",
                        message.sender
                    ))),
                );
                return;
            };
            let recipient_key = self.registry.public_key(&message.recipient);
            message = match self.pipeline.authenticate(
                message.clone(),
                &key_pair,
                &certificate,
                recipient_key.as_ref(),
            ) {
                Ok(authenticated) => authenticated,
                Err(err) => {
                    warn!(id = %message.id, error = %err, "signing failed, message refused");
                    self.send_to(session_id, ServerEvent::error(&err));
                    return;
                }
            };
        }

        self.route(message).await;
    }

    async fn on_relay(&self, session_id: SessionId, message: Message) {
        if !self.owns(session_id, &message.sender) {
            return;
        }
        self.route(message).await;
    }

    /// Echoes to the sender, records the message for interception and, unless
    /// the relay is holding messages, delivers it to the recipient.
    async fn route(&self, message: Message) {
        self.send_to_user(&message.sender, ServerEvent::NewMessage(message.clone()));
        self.relay.record(&message).await;

        if self.relay.tampering.load(Ordering::SeqCst) {
            info!(id = %message.id, "relay is holding messages, delivery deferred");
            return;
        }
        self.deliver_to_recipient(message).await;
    }

    async fn deliver_to_recipient(&self, message: Message) {
        let recipient_session = self.user_sessions.get(&message.recipient).map(|s| *s);
        let trust = recipient_session.and_then(|id| self.trust_cache(id));

        let (message, check) = match &trust {
            Some(trust) => {
                let generation = self.registry.authority().generation();
                let inbound = self.pipeline.receive(message, trust, generation);
                (inbound.message, inbound.certificate_check)
            }
            None => (self.pipeline.annotate(message), None),
        };

        if let Err(err) = self.conversations.append(message.clone()).await {
            error!(id = %message.id, error = %err, "failed to append message to history");
        }

        let Some(recipient_session) = recipient_session else {
            debug!(recipient = %message.recipient, "recipient offline, message stored only");
            return;
        };
        self.send_to(recipient_session, ServerEvent::NewMessage(message));

        if let (Some(check), Some(trust)) = (check, trust) {
            let user_id = check.claimed_subject_id.clone();
            let handle = self.engine.spawn_check(trust, check);
            let sessions = self.sessions.clone();
            tokio::spawn(async move {
                let verdict = match handle.await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        error!(error = %e, "certificate verification task failed");
                        return;
                    }
                };
                // A torn-down session gets nothing.
                send_event(
                    &sessions,
                    recipient_session,
                    ServerEvent::VerificationResult {
                        user_id,
                        verified: verdict.verified,
                        reason: verdict.reason,
                    },
                );
            });
        }
    }

    fn bound_user(&self, session_id: SessionId) -> Option<String> {
        self.sessions
            .get(&session_id)
            .and_then(|s| s.user_id.clone())
    }

    /// Whether the session speaks for `sender`. Refusals are reported back
    /// and nothing is delivered.
    fn owns(&self, session_id: SessionId, sender: &str) -> bool {
        if self.bound_user(session_id).as_deref() == Some(sender) {
            return true;
        }
        warn!(session = %session_id, sender = %sender, "request for a foreign identity refused");
        self.send_to(
            session_id,
            ServerEvent::error(&Error::UnknownIdentity(sender.to_string())),
        );
        false
    }

    fn bind(&self, session_id: SessionId, user_id: &str) -> bool {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        session.user_id = Some(user_id.to_string());
        drop(session);
        self.user_sessions.insert(user_id.to_string(), session_id);
        true
    }

    fn send_to(&self, session_id: SessionId, event: ServerEvent) {
        send_event(&self.sessions, session_id, event);
    }

    fn send_to_user(&self, user_id: &str, event: ServerEvent) {
        let session_id = self.user_sessions.get(user_id).map(|s| *s);
        if let Some(session_id) = session_id {
            self.send_to(session_id, event);
        }
    }

    fn broadcast_user_list(&self) {
        let users = self.registry.users();
        for session in self.sessions.iter() {
            let event = ServerEvent::UserListUpdated {
                users: users.clone(),
            };
            if session.outbound.send(event).is_err() {
                debug!(session = %session.key(), "session channel closed");
            }
        }
    }
}

/// Queues `event` for a live session. Unknown sessions and closed channels
/// are skipped.
fn send_event(sessions: &DashMap<SessionId, Session>, session_id: SessionId, event: ServerEvent) {
    if let Some(session) = sessions.get(&session_id) {
        if session.outbound.send(event).is_err() {
            debug!(session = %session_id, "session channel closed");
        }
    }
}
