#![forbid(unsafe_code)]

// reqwest-backed REST client for /api/auth and /api/rooms

use crate::api::{AuthApi, CreateRoomRequest, CredentialPayload, Identity, RoomApi};
use crate::error::ApiError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
const ROOM_TIMEOUT: Duration = Duration::from_secs(10);

/// Auth response. The server may return the fields directly or nested under
/// `data`; both are folded into one [`CredentialPayload`] here so the
/// session logic only ever sees the canonical shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthBody {
    token: Option<String>,
    session_id: Option<String>,
    user: Option<UserBody>,
    data: Option<Box<AuthBody>>,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    name: Option<String>,
}

impl AuthBody {
    fn normalize(self) -> CredentialPayload {
        let nested = self.data.map(|d| d.normalize()).unwrap_or_default();
        CredentialPayload {
            token: self.token.or(nested.token),
            session_id: self.session_id.or(nested.session_id),
            display_name: self.user.and_then(|u| u.name).or(nested.display_name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoomBody {
    #[serde(rename = "_id")]
    id: Option<String>,
    data: Option<RoomData>,
}

#[derive(Debug, Deserialize)]
struct RoomData {
    #[serde(rename = "_id")]
    id: Option<String>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// HTTP client for the chat backend's REST API
#[derive(Clone)]
pub struct HttpApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body).timeout(timeout);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!("POST {} -> {}", path, status);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl AuthApi for HttpApi {
    async fn login(&self, identity: &Identity) -> Result<CredentialPayload, ApiError> {
        let body = LoginBody {
            email: &identity.email,
            password: &identity.password,
        };
        let auth: AuthBody = self
            .post_json("/api/auth/login", &body, None, AUTH_TIMEOUT)
            .await?;
        Ok(auth.normalize())
    }

    async fn register(&self, identity: &Identity) -> Result<CredentialPayload, ApiError> {
        let auth: AuthBody = self
            .post_json("/api/auth/register", identity, None, AUTH_TIMEOUT)
            .await?;
        Ok(auth.normalize())
    }
}

impl RoomApi for HttpApi {
    async fn create_room(
        &self,
        request: &CreateRoomRequest,
        bearer_token: &str,
    ) -> Result<String, ApiError> {
        let room: RoomBody = self
            .post_json("/api/rooms", request, Some(bearer_token), ROOM_TIMEOUT)
            .await?;
        room.data
            .and_then(|d| d.id)
            .or(room.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::Decode("room response has no _id".to_string()))
    }
}
