#![forbid(unsafe_code)]

// Batch scheduler - releases sessions in fixed-size batches and drives one run

use crate::activity::ActivityLog;
use crate::api::{AuthApi, RoomApi};
use crate::channel::{Connector, Transport};
use crate::config::RunConfig;
use crate::error::ProvisioningError;
use crate::metrics::{LoadMetrics, MetricsSnapshot};
use crate::room::RoomProvisioner;
use crate::session::{Session, SessionEnv, SessionReport, SessionState};
use futures_util::future::join_all;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Splits `[0, total)` into contiguous batches of `batch_size`; the last one
/// may be short.
pub fn partition(total: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub room_id: String,
    pub sessions: Vec<SessionReport>,
    /// Taken after every session task has been joined
    pub snapshot: MetricsSnapshot,
}

impl RunSummary {
    pub fn reached_room(&self) -> usize {
        self.sessions.iter().filter(|s| s.reached_room).count()
    }

    pub fn failed(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state == SessionState::Failed)
            .count()
    }
}

pub struct Runner<A, C> {
    config: RunConfig,
    env: Arc<SessionEnv<A, C>>,
}

impl<A: AuthApi + RoomApi, C: Connector> Runner<A, C> {
    /// `cancel` is the process shutdown token; the wind-down token used for
    /// `duration` is derived from it.
    pub fn new(
        config: RunConfig,
        auth: A,
        connector: C,
        metrics: LoadMetrics,
        activity: ActivityLog,
        cancel: CancellationToken,
    ) -> Self {
        let env = SessionEnv {
            auth,
            connector,
            metrics,
            activity,
            messages_per_user: config.messages_per_user,
            pacing: config.pacing,
            reconnect: config.reconnect,
            transports: Transport::PREFERRED_ORDER.to_vec(),
            wind_down: cancel.child_token(),
            cancel,
        };
        Self {
            config,
            env: Arc::new(env),
        }
    }

    pub fn metrics(&self) -> &LoadMetrics {
        &self.env.metrics
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.env.activity
    }

    /// Provisions the room, releases every batch and waits for all sessions.
    /// Only provisioning failure is returned as an error.
    pub async fn run(&self) -> Result<RunSummary, ProvisioningError> {
        let env = &self.env;
        let config = &self.config;

        let room_id = RoomProvisioner::new(&env.auth, &env.activity)
            .provision(config.room_id.as_deref(), &env.cancel)
            .await?;

        let batches = partition(config.total_users, config.batch_size);
        let total_batches = batches.len();
        env.activity.info(format!(
            "Starting load test: {} users in {} batches",
            config.total_users, total_batches
        ));
        env.activity.info(format!(
            "Batch configuration: {} users every {}ms",
            config.batch_size,
            config.batch_delay.as_millis()
        ));
        env.activity.info(format!("Target room: {room_id}"));

        let watchdog = config.duration.map(|duration| {
            let wind_down = env.wind_down.clone();
            let activity = env.activity.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = wind_down.cancelled() => {}
                    _ = sleep(duration) => {
                        activity.warn(format!(
                            "Test duration of {}s reached, winding down",
                            duration.as_secs()
                        ));
                        wind_down.cancel();
                    }
                }
            })
        });

        let mut handles = Vec::with_capacity(config.total_users);
        for (index, batch) in batches.into_iter().enumerate() {
            if env.wind_down.is_cancelled() {
                env.activity.warn(format!(
                    "Stopped releasing batches at {}/{}",
                    index + 1,
                    total_batches
                ));
                break;
            }

            env.activity.info(format!(
                "Spawning batch {}/{} (users {}-{})...",
                index + 1,
                total_batches,
                batch.start,
                batch.end - 1
            ));
            for user_id in batch {
                let session = Session::new(user_id, room_id.clone(), Arc::clone(env));
                handles.push(tokio::spawn(session.run()));
            }

            if index + 1 < total_batches {
                tokio::select! {
                    biased;
                    _ = env.wind_down.cancelled() => {}
                    _ = sleep(config.batch_delay) => {}
                }
            }
        }

        env.activity.info("All users spawned, waiting for completion...");

        let sessions = join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(report) => Some(report),
                Err(e) => {
                    error!("Session task failed: {}", e);
                    None
                }
            })
            .collect();

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        Ok(RunSummary {
            room_id,
            sessions,
            snapshot: env.metrics.snapshot(),
        })
    }
}
