#![forbid(unsafe_code)]

// In-memory collaborators for unit tests

use crate::api::{AuthApi, CreateRoomRequest, CredentialPayload, Identity, RoomApi};
use crate::channel::protocol::{ChannelEvent, Outbound};
use crate::channel::{Channel, ChannelAuth, Connector, Transport};
use crate::error::{ApiError, ConnectionError, MessageError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBehavior {
    Ok,
    MissingSessionId,
    /// Login answers 404, registration succeeds
    RegisterRequired,
    LoginStatus(u16),
}

pub struct FakeAuth {
    behavior: AuthBehavior,
    room_status: Option<u16>,
    login_calls: AtomicUsize,
    register_calls: AtomicUsize,
    room_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn new(behavior: AuthBehavior) -> Self {
        Self {
            behavior,
            room_status: None,
            login_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            room_calls: AtomicUsize::new(0),
        }
    }

    /// Room creation answers with this HTTP status
    pub fn failing_rooms(mut self, status: u16) -> Self {
        self.room_status = Some(status);
        self
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(SeqCst)
    }

    pub fn room_calls(&self) -> usize {
        self.room_calls.load(SeqCst)
    }
}

fn payload_for(identity: &Identity) -> CredentialPayload {
    CredentialPayload {
        token: Some(format!("token-{}", identity.email)),
        session_id: Some(format!("session-{}", identity.email)),
        display_name: Some(identity.name.clone()),
    }
}

fn status(status: u16) -> ApiError {
    ApiError::Status {
        status,
        body: String::new(),
    }
}

impl AuthApi for FakeAuth {
    async fn login(&self, identity: &Identity) -> Result<CredentialPayload, ApiError> {
        self.login_calls.fetch_add(1, SeqCst);
        match self.behavior {
            AuthBehavior::Ok => Ok(payload_for(identity)),
            AuthBehavior::MissingSessionId => Ok(CredentialPayload {
                session_id: None,
                ..payload_for(identity)
            }),
            AuthBehavior::RegisterRequired => Err(status(404)),
            AuthBehavior::LoginStatus(code) => Err(status(code)),
        }
    }

    async fn register(&self, identity: &Identity) -> Result<CredentialPayload, ApiError> {
        self.register_calls.fetch_add(1, SeqCst);
        Ok(payload_for(identity))
    }
}

impl RoomApi for FakeAuth {
    async fn create_room(
        &self,
        _request: &CreateRoomRequest,
        _bearer_token: &str,
    ) -> Result<String, ApiError> {
        self.room_calls.fetch_add(1, SeqCst);
        match self.room_status {
            Some(code) => Err(status(code)),
            None => Ok("room-created".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Succeed,
    AlwaysFail,
    /// The first `n` connect calls fail with a handshake error
    FailFirst(usize),
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Accept,
    Reject,
    /// Accept, then the server drops the connection
    DropAfterJoin,
}

/// What every channel opened by one connector saw
#[derive(Default)]
pub struct ChannelStats {
    sent: Mutex<Vec<Outbound>>,
    close_calls: AtomicUsize,
    effective_closes: AtomicUsize,
}

impl ChannelStats {
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn chat_messages(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Outbound::ChatMessage { .. }))
            .count()
    }

    pub fn mark_reads(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Outbound::MarkRead { .. }))
            .count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(SeqCst)
    }

    pub fn effective_closes(&self) -> usize {
        self.effective_closes.load(SeqCst)
    }
}

pub struct FakeConnector {
    mode: ConnectMode,
    join: JoinMode,
    failing_sends: bool,
    connect_calls: AtomicUsize,
    transports: Mutex<Vec<Transport>>,
    stats: Arc<ChannelStats>,
}

impl FakeConnector {
    pub fn new(mode: ConnectMode) -> Self {
        Self {
            mode,
            join: JoinMode::Accept,
            failing_sends: false,
            connect_calls: AtomicUsize::new(0),
            transports: Mutex::new(Vec::new()),
            stats: Arc::new(ChannelStats::default()),
        }
    }

    pub fn with_join(mut self, join: JoinMode) -> Self {
        self.join = join;
        self
    }

    /// Chat message sends fail with a transport error
    pub fn with_failing_sends(mut self) -> Self {
        self.failing_sends = true;
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(SeqCst)
    }

    pub fn transports_tried(&self) -> Vec<Transport> {
        self.transports.lock().unwrap().clone()
    }

    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

impl Connector for FakeConnector {
    type Channel = FakeChannel;

    async fn connect_once(
        &self,
        _auth: &ChannelAuth,
        transport: Transport,
    ) -> Result<FakeChannel, ConnectionError> {
        let call = self.connect_calls.fetch_add(1, SeqCst) + 1;
        self.transports.lock().unwrap().push(transport);
        match self.mode {
            ConnectMode::Rejected => Err(ConnectionError::Rejected("Invalid session".into())),
            ConnectMode::AlwaysFail => Err(ConnectionError::Handshake("connection refused".into())),
            ConnectMode::FailFirst(n) if call <= n => {
                Err(ConnectionError::Handshake("connection refused".into()))
            }
            _ => Ok(FakeChannel {
                inbox: VecDeque::new(),
                join: self.join,
                failing_sends: self.failing_sends,
                closed: false,
                next_id: 0,
                stats: Arc::clone(&self.stats),
            }),
        }
    }
}

/// Scripted server: answers a join per [`JoinMode`], echoes every chat
/// message back with an id and acknowledges every read receipt.
pub struct FakeChannel {
    inbox: VecDeque<ChannelEvent>,
    join: JoinMode,
    failing_sends: bool,
    closed: bool,
    next_id: usize,
    stats: Arc<ChannelStats>,
}

impl Channel for FakeChannel {
    async fn send(&mut self, message: Outbound) -> Result<(), MessageError> {
        if self.closed {
            return Err(MessageError::ChannelClosed);
        }
        if self.failing_sends && matches!(message, Outbound::ChatMessage { .. }) {
            return Err(MessageError::Transport("write buffer full".into()));
        }
        self.stats.sent.lock().unwrap().push(message.clone());
        match message {
            Outbound::JoinRoom { .. } => match self.join {
                JoinMode::Accept => self.inbox.push_back(ChannelEvent::JoinAccepted { participants: 1 }),
                JoinMode::Reject => self.inbox.push_back(ChannelEvent::JoinRejected {
                    reason: "Room not found".into(),
                }),
                JoinMode::DropAfterJoin => {
                    self.inbox.push_back(ChannelEvent::JoinAccepted { participants: 1 });
                    self.inbox.push_back(ChannelEvent::Disconnected {
                        reason: "transport close".into(),
                    });
                }
            },
            Outbound::ChatMessage { .. } => {
                self.next_id += 1;
                self.inbox.push_back(ChannelEvent::MessageReceived {
                    id: Some(format!("msg-{}", self.next_id)),
                });
            }
            Outbound::MarkRead { .. } => self.inbox.push_back(ChannelEvent::ReadAck),
        }
        Ok(())
    }

    async fn recv(&mut self) -> ChannelEvent {
        match self.inbox.pop_front() {
            Some(event) => {
                if matches!(event, ChannelEvent::Disconnected { .. }) {
                    self.closed = true;
                }
                event
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.stats.close_calls.fetch_add(1, SeqCst);
        if !self.closed {
            self.closed = true;
            self.stats.effective_closes.fetch_add(1, SeqCst);
        }
    }
}
