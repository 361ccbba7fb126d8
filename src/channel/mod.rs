#![forbid(unsafe_code)]

// Channel module - persistent Socket.IO messaging channel with bounded reconnect

pub mod protocol;
mod polling;
mod websocket;

use crate::error::{ConnectionError, MessageError};
use protocol::{describe, ChannelEvent, Outbound, Packet};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
/// Silence tolerated before the open packet says otherwise
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(45);

/// Credential pair presented in the namespace connect packet
#[derive(Debug, Clone)]
pub struct ChannelAuth {
    pub token: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WebSocket,
    Polling,
}

impl Transport {
    /// Preferred first, degraded second
    pub const PREFERRED_ORDER: [Transport; 2] = [Transport::WebSocket, Transport::Polling];

    fn query_name(self) -> &'static str {
        match self {
            Transport::WebSocket => "websocket",
            Transport::Polling => "polling",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_name())
    }
}

/// Bound on automatic reconnection of the initial connect.
///
/// One initial attempt plus up to `attempts` retries, each preceded by a
/// fixed `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// An open messaging channel owned by exactly one session.
pub trait Channel: Send + 'static {
    /// Hands one operation to the transport. Returns once it is queued, not
    /// when the server has seen it.
    fn send(&mut self, message: Outbound) -> impl Future<Output = Result<(), MessageError>> + Send;

    /// Next inbound event. Cancel-safe, so it can sit in a `select!` next to
    /// timers. After `Disconnected` nothing more is delivered.
    fn recv(&mut self) -> impl Future<Output = ChannelEvent> + Send;

    /// Idempotent; closing an already closed channel does nothing.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens channels over one transport at a time.
pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    fn connect_once(
        &self,
        auth: &ChannelAuth,
        transport: Transport,
    ) -> impl Future<Output = Result<Self::Channel, ConnectionError>> + Send;
}

/// Connects with the given transports in order, retrying the whole sequence
/// under `policy`. A server-side refusal is final and is not retried.
pub async fn connect_with_retry<C: Connector>(
    connector: &C,
    auth: &ChannelAuth,
    transports: &[Transport],
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
) -> Result<C::Channel, ConnectionError> {
    let total = policy.attempts + 1;
    let mut last = String::from("no transport configured");

    for attempt in 1..=total {
        if attempt > 1 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }

        for &transport in transports {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
                result = connector.connect_once(auth, transport) => result,
            };
            match result {
                Ok(channel) => return Ok(channel),
                Err(e @ ConnectionError::Rejected(_)) => return Err(e),
                Err(e) => {
                    debug!("Connect attempt {}/{} over {} failed: {}", attempt, total, transport, e);
                    last = e.to_string();
                }
            }
        }
    }

    Err(ConnectionError::Exhausted {
        attempts: total,
        last,
    })
}

/// Inbound side of a transport pump. `Err` carries the closing reason and is
/// always the last item.
type Inbound = Result<Packet, String>;

/// Packet pipes between a [`SocketIoChannel`] and its transport tasks.
pub(crate) struct Wire {
    outgoing: mpsc::UnboundedSender<Packet>,
    incoming: mpsc::UnboundedReceiver<Inbound>,
    pump: CancellationToken,
}

/// Socket.IO client channel, independent of the transport underneath.
///
/// Pings are answered inside `recv`, so a session that keeps polling
/// `recv` keeps the connection alive. A server silent for longer than the
/// heartbeat advertised in its open packet is treated as gone.
pub struct SocketIoChannel {
    outgoing: mpsc::UnboundedSender<Packet>,
    incoming: mpsc::UnboundedReceiver<Inbound>,
    pump: CancellationToken,
    closed: bool,
    heartbeat: Duration,
    last_seen: Instant,
}

impl SocketIoChannel {
    async fn handshake(wire: Wire, auth: &ChannelAuth) -> Result<Self, ConnectionError> {
        let mut channel = SocketIoChannel {
            outgoing: wire.outgoing,
            incoming: wire.incoming,
            pump: wire.pump,
            closed: false,
            heartbeat: DEFAULT_HEARTBEAT,
            last_seen: Instant::now(),
        };
        channel.await_connect(auth).await?;
        Ok(channel)
    }

    async fn await_connect(&mut self, auth: &ChannelAuth) -> Result<(), ConnectionError> {
        loop {
            let packet = match self.incoming.recv().await {
                Some(Ok(packet)) => packet,
                Some(Err(reason)) => return Err(ConnectionError::Handshake(reason)),
                None => {
                    return Err(ConnectionError::Handshake(
                        "transport closed during handshake".to_string(),
                    ))
                }
            };
            self.last_seen = Instant::now();
            match packet {
                Packet::Open(handshake) => {
                    debug!("Engine.IO session {} opened", handshake.sid);
                    self.heartbeat = handshake.heartbeat();
                    let connect = Packet::Connect(Some(json!({
                        "token": auth.token,
                        "sessionId": auth.session_id,
                    })));
                    self.outgoing.send(connect).map_err(|_| {
                        ConnectionError::Handshake("transport closed during handshake".to_string())
                    })?;
                }
                Packet::Ping => {
                    let _ = self.outgoing.send(Packet::Pong);
                }
                Packet::Connect(_) => return Ok(()),
                Packet::ConnectError(info) => return Err(ConnectionError::Rejected(describe(&info))),
                Packet::Close | Packet::Disconnect => {
                    return Err(ConnectionError::Handshake(
                        "server closed during handshake".to_string(),
                    ))
                }
                _ => {}
            }
        }
    }

    fn finish(&mut self) {
        self.closed = true;
        self.pump.cancel();
    }
}

impl Channel for SocketIoChannel {
    async fn send(&mut self, message: Outbound) -> Result<(), MessageError> {
        if self.closed {
            return Err(MessageError::ChannelClosed);
        }
        let packet = message.into_packet()?;
        self.outgoing
            .send(packet)
            .map_err(|_| MessageError::ChannelClosed)
    }

    async fn recv(&mut self) -> ChannelEvent {
        if self.closed {
            return ChannelEvent::Disconnected {
                reason: "io client disconnect".to_string(),
            };
        }
        loop {
            let deadline = self.last_seen + self.heartbeat;
            let inbound = match tokio::time::timeout_at(deadline, self.incoming.recv()).await {
                Ok(inbound) => inbound,
                Err(_) => {
                    self.finish();
                    return ChannelEvent::Disconnected {
                        reason: "ping timeout".to_string(),
                    };
                }
            };
            if matches!(inbound, Some(Ok(_))) {
                self.last_seen = Instant::now();
            }
            let reason = match inbound {
                Some(Ok(Packet::Ping)) => {
                    let _ = self.outgoing.send(Packet::Pong);
                    continue;
                }
                Some(Ok(Packet::Event { name, payload })) => {
                    match ChannelEvent::from_event(&name, &payload) {
                        Some(event) => return event,
                        None => {
                            debug!("Ignoring event {}", name);
                            continue;
                        }
                    }
                }
                Some(Ok(Packet::Disconnect)) => "io server disconnect".to_string(),
                Some(Ok(Packet::Close)) => "transport close".to_string(),
                Some(Ok(_)) => continue,
                Some(Err(reason)) => reason,
                None => "transport close".to_string(),
            };
            self.finish();
            return ChannelEvent::Disconnected { reason };
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        // queued ahead of the pump shutdown so the writer flushes it first
        let _ = self.outgoing.send(Packet::Disconnect);
        self.finish();
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        self.pump.cancel();
    }
}

/// Connector for a Socket.IO server at a base URL such as
/// `wss://chat.example.com`.
pub struct SocketIoConnector {
    base: Url,
    client: reqwest::Client,
    handshake_timeout: Duration,
}

impl SocketIoConnector {
    pub fn new(socket_url: &str) -> Result<Self, ConnectionError> {
        let base = Url::parse(socket_url)
            .map_err(|e| ConnectionError::Handshake(format!("invalid socket url {socket_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        Ok(Self {
            base,
            client,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Connector for SocketIoConnector {
    type Channel = SocketIoChannel;

    async fn connect_once(
        &self,
        auth: &ChannelAuth,
        transport: Transport,
    ) -> Result<SocketIoChannel, ConnectionError> {
        let url = endpoint(&self.base, transport)?;
        let limit = self.handshake_timeout;
        let open = async {
            let pump = CancellationToken::new();
            let wire = match transport {
                Transport::WebSocket => websocket::open(&url, pump).await?,
                Transport::Polling => polling::open(&self.client, url.clone(), limit, pump).await?,
            };
            SocketIoChannel::handshake(wire, auth).await
        };
        // covers the transport open as well as the namespace connect
        match tokio::time::timeout(limit, open).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Handshake(format!(
                "{transport} handshake timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }
}

/// Engine.IO endpoint for a transport: `/socket.io/?EIO=4&transport=...`
/// with the scheme matched to the transport.
fn endpoint(base: &Url, transport: Transport) -> Result<Url, ConnectionError> {
    let secure = match base.scheme() {
        "http" | "ws" => false,
        "https" | "wss" => true,
        other => {
            return Err(ConnectionError::Handshake(format!(
                "unsupported socket url scheme {other}"
            )))
        }
    };
    let scheme = match (transport, secure) {
        (Transport::WebSocket, false) => "ws",
        (Transport::WebSocket, true) => "wss",
        (Transport::Polling, false) => "http",
        (Transport::Polling, true) => "https",
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| ConnectionError::Handshake(format!("cannot use scheme {scheme}")))?;
    url.set_path("/socket.io/");
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", transport.query_name());
    Ok(url)
}
