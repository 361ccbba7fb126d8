#![forbid(unsafe_code)]

// Error taxonomy: per-session failures (auth, connection, message) and run-fatal provisioning

use thiserror::Error;

/// Raw failure from the HTTP collaborator
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status, when the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ApiError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None if e.is_decode() => ApiError::Decode(e.to_string()),
            None => ApiError::Transport(e.to_string()),
        }
    }
}

/// Credential acquisition failure. Ends the affected session only.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Request(#[from] ApiError),

    #[error("credential payload is missing {0}")]
    MalformedCredential(&'static str),
}

/// Channel connect or room join failure. Ends the affected session only.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("transport handshake failed: {0}")]
    Handshake(String),

    #[error("server refused connection: {0}")]
    Rejected(String),

    #[error("gave up after {attempts} connect attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("connect cancelled")]
    Cancelled,
}

/// Send/receive path failure. Counted and logged; the session continues
/// unless the channel itself is gone.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("failed to encode packet: {0}")]
    Encode(String),

    #[error("transport write failed: {0}")]
    Transport(String),
}

/// Room setup failure. Fatal to the whole run.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("bootstrap identity could not authenticate: {0}")]
    Bootstrap(#[from] AuthError),

    #[error("room creation failed: {0}")]
    CreateRoom(#[source] ApiError),

    #[error("room setup cancelled")]
    Cancelled,
}
