#![forbid(unsafe_code)]

// Session state machine - one simulated user from credential acquisition to disconnect

use crate::activity::ActivityLog;
use crate::api::{acquire_credentials, AuthApi, Credential, CredentialPayload, Identity};
use crate::channel::protocol::{ChannelEvent, Outbound};
use crate::channel::{connect_with_retry, Channel, ChannelAuth, Connector, ReconnectPolicy, Transport};
use crate::error::{ConnectionError, MessageError};
use crate::metrics::LoadMetrics;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of one session. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Connecting,
    Connected,
    JoiningRoom,
    InRoom,
    Sending,
    Draining,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Timing of the send phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Think time is drawn uniformly from `[think_min, think_max)`
    pub think_min: Duration,
    pub think_max: Duration,
    /// Wait after the last send before closing
    pub drain: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            think_min: Duration::from_millis(1000),
            think_max: Duration::from_millis(3000),
            drain: Duration::from_millis(5000),
        }
    }
}

impl Pacing {
    pub fn think_time(&self) -> Duration {
        if self.think_max <= self.think_min {
            return self.think_min;
        }
        rand::thread_rng().gen_range(self.think_min..self.think_max)
    }
}

/// Everything a session borrows from the run. Shared read-only by all
/// sessions; the metrics and activity handles synchronize internally.
pub struct SessionEnv<A, C> {
    pub auth: A,
    pub connector: C,
    pub metrics: LoadMetrics,
    pub activity: ActivityLog,
    pub messages_per_user: usize,
    pub pacing: Pacing,
    pub reconnect: ReconnectPolicy,
    pub transports: Vec<Transport>,
    /// Process shutdown: every suspension point stops and the channel closes
    pub cancel: CancellationToken,
    /// Run duration elapsed: stop sending, drain, close
    pub wind_down: CancellationToken,
}

/// Outcome of one session, returned when it reaches a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub user_id: usize,
    pub state: SessionState,
    pub reached_room: bool,
    pub messages_sent: usize,
}

/// How the channel phase ended
enum Exit {
    /// The channel is already gone
    Remote(String),
    /// The session decided to close
    Local,
}

pub struct Session<A, C> {
    user_id: usize,
    room_id: String,
    env: Arc<SessionEnv<A, C>>,
    state: SessionState,
    reached_room: bool,
    messages_sent: usize,
}

impl<A: AuthApi, C: Connector> Session<A, C> {
    pub fn new(user_id: usize, room_id: String, env: Arc<SessionEnv<A, C>>) -> Self {
        Self {
            user_id,
            room_id,
            env,
            state: SessionState::Unauthenticated,
            reached_room: false,
            messages_sent: 0,
        }
    }

    /// Drives the session to a terminal state. Never fails: every error is
    /// counted, logged and ends only this session.
    pub async fn run(mut self) -> SessionReport {
        let connect_start = Instant::now();

        if self.env.cancel.is_cancelled() {
            self.transition(SessionState::Closed);
            return self.report();
        }

        if let Some(credential) = self.authenticate().await {
            if let Some(channel) = self.connect(&credential, connect_start).await {
                self.drive(channel).await;
            }
        }
        self.report()
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            user_id: self.user_id,
            state: self.state,
            reached_room: self.reached_room,
            messages_sent: self.messages_sent,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("User {} {:?} -> {:?}", self.user_id, self.state, next);
        self.state = next;
    }

    async fn authenticate(&mut self) -> Option<Credential> {
        let env = Arc::clone(&self.env);
        let id = self.user_id;
        self.transition(SessionState::Authenticating);

        let identity = Identity::for_user(&id.to_string());
        let result = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => {
                self.transition(SessionState::Closed);
                return None;
            }
            result = acquire_credentials(&env.auth, &identity, &env.activity) => result,
        };

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                env.metrics.inc_errors_auth();
                env.activity.error(format!("Failed to create/login user {id}: {e}"));
                self.transition(SessionState::Failed);
                return None;
            }
        };
        env.metrics.inc_users_created();

        let summary = describe_payload(&payload);
        match payload.into_credential() {
            Ok(credential) => {
                self.transition(SessionState::Authenticated);
                Some(credential)
            }
            Err(_) => {
                env.metrics.inc_errors_auth();
                env.activity.error(format!("User {id} missing token/sessionId: {summary}"));
                self.transition(SessionState::Failed);
                None
            }
        }
    }

    async fn connect(
        &mut self,
        credential: &Credential,
        connect_start: Instant,
    ) -> Option<C::Channel> {
        let env = Arc::clone(&self.env);
        let id = self.user_id;
        self.transition(SessionState::Connecting);

        let auth = ChannelAuth {
            token: credential.token.clone(),
            session_id: credential.session_id.clone(),
        };
        let result = connect_with_retry(
            &env.connector,
            &auth,
            &env.transports,
            &env.reconnect,
            &env.cancel,
        )
        .await;

        match result {
            Ok(channel) => {
                let elapsed = connect_start.elapsed();
                env.metrics.inc_connected();
                env.metrics.record_connection_time(elapsed);
                let name = credential
                    .display_name
                    .clone()
                    .unwrap_or_else(|| format!("User-{id}"));
                env.activity.success(format!(
                    "User {id} ({name}) connected in {}ms",
                    elapsed.as_millis()
                ));
                self.transition(SessionState::Connected);
                Some(channel)
            }
            Err(ConnectionError::Cancelled) => {
                self.transition(SessionState::Closed);
                None
            }
            Err(e) => {
                env.metrics.inc_errors_connection();
                env.activity.error(format!("User {id} connection error: {e}"));
                self.transition(SessionState::Failed);
                None
            }
        }
    }

    /// Join, send and drain over an open channel, then close it. Every path
    /// out of here counts exactly one disconnect.
    async fn drive(&mut self, mut channel: C::Channel) {
        let exit = self.exchange(&mut channel).await;
        let reason = match exit {
            Exit::Remote(reason) => reason,
            Exit::Local => {
                channel.close().await;
                "io client disconnect".to_string()
            }
        };
        self.env.metrics.inc_disconnected();
        self.env
            .activity
            .warn(format!("User {} disconnected: {}", self.user_id, reason));
        self.transition(SessionState::Closed);
    }

    async fn exchange(&mut self, channel: &mut C::Channel) -> Exit {
        match self.join(channel).await {
            Ok(true) => {}
            // wound down before the room answered
            Ok(false) => return self.drain(channel).await,
            Err(exit) => return exit,
        }
        if let Err(exit) = self.send_messages(channel).await {
            return exit;
        }
        self.drain(channel).await
    }

    /// `Ok(true)` once in the room, `Ok(false)` when wind-down arrived first.
    async fn join(&mut self, channel: &mut C::Channel) -> Result<bool, Exit> {
        let env = Arc::clone(&self.env);
        let id = self.user_id;
        self.transition(SessionState::JoiningRoom);

        let join = Outbound::JoinRoom {
            room_id: self.room_id.clone(),
        };
        match channel.send(join).await {
            Ok(()) => {}
            Err(MessageError::ChannelClosed) => return Err(Exit::Remote("transport close".into())),
            Err(e) => {
                env.metrics.inc_errors_connection();
                env.activity.error(format!("User {id} failed to join room: {e}"));
                return Err(Exit::Local);
            }
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = env.cancel.cancelled() => return Err(Exit::Local),
                _ = env.wind_down.cancelled() => return Ok(false),
                event = channel.recv() => event,
            };
            match event {
                ChannelEvent::JoinAccepted { participants } => {
                    env.activity.info(format!(
                        "User {id} joined room {} with {participants} participants",
                        self.room_id
                    ));
                    self.reached_room = true;
                    self.transition(SessionState::InRoom);
                    return Ok(true);
                }
                ChannelEvent::JoinRejected { reason } => {
                    env.metrics.inc_errors_connection();
                    env.activity.error(format!("User {id} failed to join room: {reason}"));
                    return Err(Exit::Local);
                }
                other => {
                    if let Some(exit) = self.on_event(channel, other).await {
                        return Err(exit);
                    }
                }
            }
        }
    }

    async fn send_messages(&mut self, channel: &mut C::Channel) -> Result<(), Exit> {
        let env = Arc::clone(&self.env);
        let id = self.user_id;
        let total = env.messages_per_user;
        self.transition(SessionState::Sending);

        for i in 1..=total {
            let think = sleep(env.pacing.think_time());
            tokio::pin!(think);
            loop {
                tokio::select! {
                    biased;
                    _ = env.cancel.cancelled() => return Err(Exit::Local),
                    _ = env.wind_down.cancelled() => return Ok(()),
                    _ = &mut think => break,
                    event = channel.recv() => {
                        if let Some(exit) = self.on_event(channel, event).await {
                            return Err(exit);
                        }
                    }
                }
            }

            let message = Outbound::ChatMessage {
                room: self.room_id.clone(),
                kind: "text".to_string(),
                content: format!(
                    "Load test message {i}/{total} from user {id} at {}",
                    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                ),
            };
            let started = Instant::now();
            match channel.send(message).await {
                Ok(()) => {
                    env.metrics.inc_messages_sent();
                    env.metrics.record_latency(started.elapsed());
                    self.messages_sent += 1;
                }
                Err(MessageError::ChannelClosed) => {
                    return Err(Exit::Remote("transport close".into()))
                }
                Err(e) => {
                    env.metrics.inc_errors_message();
                    env.activity
                        .error(format!("User {id} failed to send message {i}: {e}"));
                }
            }
        }
        Ok(())
    }

    async fn drain(&mut self, channel: &mut C::Channel) -> Exit {
        let env = Arc::clone(&self.env);
        self.transition(SessionState::Draining);

        let window = sleep(env.pacing.drain);
        tokio::pin!(window);
        loop {
            tokio::select! {
                biased;
                _ = env.cancel.cancelled() => return Exit::Local,
                _ = &mut window => return Exit::Local,
                event = channel.recv() => {
                    if let Some(exit) = self.on_event(channel, event).await {
                        return exit;
                    }
                }
            }
        }
    }

    /// Events that may arrive at any point while connected. `Some` when the
    /// channel has gone away.
    async fn on_event(&mut self, channel: &mut C::Channel, event: ChannelEvent) -> Option<Exit> {
        let env = &self.env;
        let id = self.user_id;
        match event {
            ChannelEvent::MessageReceived { id: message_id } => {
                env.metrics.inc_messages_received();
                if let Some(message_id) = message_id {
                    let receipt = Outbound::MarkRead {
                        room_id: self.room_id.clone(),
                        message_ids: vec![message_id],
                    };
                    match channel.send(receipt).await {
                        Ok(()) => env.metrics.inc_messages_read(),
                        Err(MessageError::ChannelClosed) => {
                            return Some(Exit::Remote("transport close".into()))
                        }
                        Err(e) => {
                            env.metrics.inc_errors_message();
                            env.activity
                                .error(format!("User {id} failed to mark message read: {e}"));
                        }
                    }
                }
                None
            }
            ChannelEvent::ReadAck => {
                env.metrics.inc_read_acks();
                None
            }
            ChannelEvent::ChannelError { info } => {
                env.metrics.inc_errors_message();
                env.activity.error(format!("User {id} received error: {info}"));
                None
            }
            ChannelEvent::Disconnected { reason } => Some(Exit::Remote(reason)),
            ChannelEvent::JoinAccepted { .. } | ChannelEvent::JoinRejected { .. } => {
                debug!("User {} ignoring late join response", id);
                None
            }
        }
    }
}

/// Which credential fields were present, without echoing secrets
fn describe_payload(payload: &CredentialPayload) -> String {
    fn presence(value: &Option<String>) -> &'static str {
        match value {
            Some(v) if !v.is_empty() => "present",
            _ => "missing",
        }
    }
    format!(
        "token={}, sessionId={}",
        presence(&payload.token),
        presence(&payload.session_id)
    )
}
