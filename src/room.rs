#![forbid(unsafe_code)]

// Room provisioning - resolve the shared room every session joins

use crate::activity::ActivityLog;
use crate::api::{acquire_credentials, AuthApi, CreateRoomRequest, Identity, RoomApi};
use crate::error::ProvisioningError;
use tokio_util::sync::CancellationToken;

/// Identity used to create the room when none is configured
pub const BOOTSTRAP_USER: &str = "admin";

pub struct RoomProvisioner<'a, A> {
    api: &'a A,
    activity: &'a ActivityLog,
}

impl<'a, A: AuthApi + RoomApi> RoomProvisioner<'a, A> {
    pub fn new(api: &'a A, activity: &'a ActivityLog) -> Self {
        Self { api, activity }
    }

    /// Returns the configured room unchanged, or authenticates the bootstrap
    /// identity and creates a fresh room with its token. Not retried.
    pub async fn provision(
        &self,
        configured: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, ProvisioningError> {
        if let Some(room_id) = configured {
            self.activity.info(format!("Using existing room: {room_id}"));
            return Ok(room_id.to_string());
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisioningError::Cancelled),
            result = self.create() => result,
        };
        if let Err(e) = &result {
            self.activity.error(format!("Failed to create test room: {e}"));
        }
        result
    }

    async fn create(&self) -> Result<String, ProvisioningError> {
        self.activity.info("Creating test room admin user...");
        let identity = Identity::for_user(BOOTSTRAP_USER);
        let token = acquire_credentials(self.api, &identity, self.activity)
            .await?
            .into_token()?;

        self.activity.info("Creating load test room...");
        let room_id = self
            .api
            .create_room(&CreateRoomRequest::load_test_room(), &token)
            .await
            .map_err(ProvisioningError::CreateRoom)?;

        self.activity.success(format!("Load test room created: {room_id}"));
        Ok(room_id)
    }
}
