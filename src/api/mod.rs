#![forbid(unsafe_code)]

// Request/response collaborators: authentication and room creation

pub mod http;

pub use http::HttpApi;

use crate::activity::ActivityLog;
use crate::error::{ApiError, AuthError};
use serde::Serialize;
use std::future::Future;

/// Password shared by every generated identity
pub const TEST_PASSWORD: &str = "Test1234!";

/// Login identity of one simulated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl Identity {
    /// Deterministic identity for a user index (or `"admin"` for the bootstrap user).
    pub fn for_user(id: &str) -> Self {
        Self {
            email: format!("loadtest-{id}@test.com"),
            password: TEST_PASSWORD.to_string(),
            name: format!("LoadTest User {id}"),
        }
    }
}

/// Credential fields as returned by the server, not yet validated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPayload {
    pub token: Option<String>,
    pub session_id: Option<String>,
    pub display_name: Option<String>,
}

/// Validated credential pair used to open a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub session_id: String,
    pub display_name: Option<String>,
}

impl CredentialPayload {
    /// Both token and session id must be present and non-empty.
    pub fn into_credential(self) -> Result<Credential, AuthError> {
        let token = non_empty(self.token).ok_or(AuthError::MalformedCredential("token"))?;
        let session_id =
            non_empty(self.session_id).ok_or(AuthError::MalformedCredential("sessionId"))?;
        Ok(Credential {
            token,
            session_id,
            display_name: self.display_name,
        })
    }

    /// Bearer token only, for the room bootstrap identity.
    pub fn into_token(self) -> Result<String, AuthError> {
        non_empty(self.token).ok_or(AuthError::MalformedCredential("token"))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Room creation body
#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub description: String,
    pub participants: Vec<String>,
}

impl CreateRoomRequest {
    pub fn load_test_room() -> Self {
        Self {
            name: "Load Test Room".to_string(),
            description: format!(
                "Room for load testing - {}",
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            ),
            participants: Vec::new(),
        }
    }
}

/// Authentication endpoint
pub trait AuthApi: Send + Sync + 'static {
    fn login(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<CredentialPayload, ApiError>> + Send;

    fn register(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<CredentialPayload, ApiError>> + Send;
}

/// Room-creation endpoint
pub trait RoomApi: Send + Sync + 'static {
    /// Returns the new room's id.
    fn create_room(
        &self,
        request: &CreateRoomRequest,
        bearer_token: &str,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;
}

/// Log in, falling back to registration when the account does not exist yet
/// (401 or 404). Any other failure is returned without retry.
pub async fn acquire_credentials<A: AuthApi>(
    api: &A,
    identity: &Identity,
    activity: &ActivityLog,
) -> Result<CredentialPayload, AuthError> {
    match api.login(identity).await {
        Ok(payload) => Ok(payload),
        Err(e) if matches!(e.status(), Some(401) | Some(404)) => {
            activity.info(format!("Registering new user: {}", identity.email));
            Ok(api.register(identity).await?)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AuthBehavior, FakeAuth};

    #[test]
    fn test_identity_for_user() {
        let id = Identity::for_user("12");
        assert_eq!(id.email, "loadtest-12@test.com");
        assert_eq!(id.password, "Test1234!");
        assert_eq!(id.name, "LoadTest User 12");
    }

    #[test]
    fn test_credential_requires_both_fields() {
        let full = CredentialPayload {
            token: Some("t".into()),
            session_id: Some("s".into()),
            display_name: None,
        };
        assert_eq!(full.clone().into_credential().unwrap().session_id, "s");

        let no_session = CredentialPayload { session_id: None, ..full.clone() };
        assert!(matches!(
            no_session.into_credential(),
            Err(AuthError::MalformedCredential("sessionId"))
        ));

        let empty_token = CredentialPayload { token: Some(String::new()), ..full };
        assert!(matches!(
            empty_token.into_credential(),
            Err(AuthError::MalformedCredential("token"))
        ));
    }

    #[tokio::test]
    async fn test_unknown_user_registers() {
        let api = FakeAuth::new(AuthBehavior::RegisterRequired);
        let payload = acquire_credentials(&api, &Identity::for_user("1"), &ActivityLog::default())
            .await
            .unwrap();
        assert!(payload.token.is_some());
        assert_eq!(api.login_calls(), 1);
        assert_eq!(api.register_calls(), 1);
    }

    #[tokio::test]
    async fn test_server_error_does_not_register() {
        let api = FakeAuth::new(AuthBehavior::LoginStatus(500));
        let result =
            acquire_credentials(&api, &Identity::for_user("1"), &ActivityLog::default()).await;
        assert!(matches!(result, Err(AuthError::Request(ApiError::Status { status: 500, .. }))));
        assert_eq!(api.register_calls(), 0);
    }
}
