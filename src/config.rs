#![forbid(unsafe_code)]

// Run configuration - CLI/env surface and the immutable RunConfig handed to the engine

use crate::channel::ReconnectPolicy;
use crate::session::Pacing;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--users must be at least 1")]
    NoUsers,

    #[error("--batch-size must be at least 1")]
    NoBatchSize,

    #[error("--report-interval must be at least 1ms")]
    NoReportInterval,
}

/// Synthetic concurrent load for Socket.IO chat services
#[derive(Parser, Debug, Clone)]
#[command(name = "chatload", version, about)]
pub struct Args {
    /// Total number of users to simulate
    #[arg(short = 'u', long, env = "CHATLOAD_USERS", default_value_t = 100)]
    pub users: usize,

    /// Ramp-up time in seconds (informational)
    #[arg(short = 'r', long, env = "CHATLOAD_RAMPUP", default_value_t = 30)]
    pub rampup: u64,

    /// Test duration in seconds (0 = until all messages sent)
    #[arg(short = 'd', long, env = "CHATLOAD_DURATION", default_value_t = 0)]
    pub duration: u64,

    /// Messages per user
    #[arg(short = 'm', long, env = "CHATLOAD_MESSAGES", default_value_t = 20)]
    pub messages: usize,

    /// Backend REST API URL
    #[arg(long, env = "CHATLOAD_API_URL", default_value = "http://localhost:5000")]
    pub api_url: String,

    /// Socket.IO server URL
    #[arg(long, env = "CHATLOAD_SOCKET_URL", default_value = "ws://localhost:5000")]
    pub socket_url: String,

    /// Room ID to send messages to (auto-create if not specified)
    #[arg(long, env = "CHATLOAD_ROOM_ID")]
    pub room_id: Option<String>,

    /// Number of users to spawn simultaneously per batch
    #[arg(short = 'b', long, env = "CHATLOAD_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Delay between batches in milliseconds
    #[arg(long, env = "CHATLOAD_BATCH_DELAY", default_value_t = 1000)]
    pub batch_delay: u64,

    /// Port of the Prometheus /metrics endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = 9100)]
    pub metrics_port: u16,

    /// Dashboard refresh interval in milliseconds
    #[arg(long, env = "CHATLOAD_REPORT_INTERVAL", default_value_t = 2000)]
    pub report_interval: u64,

    /// Print only the final report
    #[arg(long, env = "CHATLOAD_NO_DASHBOARD")]
    pub no_dashboard: bool,

    /// Write the final snapshot as JSON to this path
    #[arg(long, env = "CHATLOAD_SUMMARY_JSON")]
    pub summary_json: Option<PathBuf>,
}

/// Immutable engine configuration for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub total_users: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Informational only; pacing comes from batch size and delay
    pub ramp_up: Duration,
    /// `None` runs until every session finishes on its own
    pub duration: Option<Duration>,
    pub messages_per_user: usize,
    pub api_url: String,
    pub socket_url: String,
    pub room_id: Option<String>,
    pub pacing: Pacing,
    pub reconnect: ReconnectPolicy,
}

impl RunConfig {
    pub fn total_batches(&self) -> usize {
        self.total_users.div_ceil(self.batch_size)
    }
}

impl Args {
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        if self.users == 0 {
            return Err(ConfigError::NoUsers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::NoBatchSize);
        }
        Ok(RunConfig {
            total_users: self.users,
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay),
            ramp_up: Duration::from_secs(self.rampup),
            duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            messages_per_user: self.messages,
            api_url: self.api_url.trim_end_matches('/').to_string(),
            socket_url: self.socket_url.clone(),
            room_id: self.room_id.clone().filter(|id| !id.is_empty()),
            pacing: Pacing::default(),
            reconnect: ReconnectPolicy::default(),
        })
    }

    pub fn report_interval(&self) -> Result<Duration, ConfigError> {
        if self.report_interval == 0 {
            return Err(ConfigError::NoReportInterval);
        }
        Ok(Duration::from_millis(self.report_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["chatload"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.users, 100);
        assert_eq!(args.rampup, 30);
        assert_eq!(args.messages, 20);
        assert_eq!(args.batch_size, 10);
        assert_eq!(args.batch_delay, 1000);
        assert_eq!(args.report_interval, 2000);
        assert!(!args.no_dashboard);

        let config = args.run_config().unwrap();
        assert_eq!(config.duration, None);
        assert_eq!(config.room_id, None);
        assert_eq!(config.total_batches(), 10);
        assert_eq!(config.pacing, Pacing::default());
        assert_eq!(config.reconnect.attempts, 3);
    }

    #[test]
    fn test_short_flags_and_duration() {
        let args = parse(&["-u", "25", "-b", "10", "-m", "1", "-d", "60", "--room-id", "r1"]);
        let config = args.run_config().unwrap();
        assert_eq!(config.total_users, 25);
        assert_eq!(config.total_batches(), 3);
        assert_eq!(config.messages_per_user, 1);
        assert_eq!(config.duration, Some(Duration::from_secs(60)));
        assert_eq!(config.room_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_rejects_zero_users_and_batch() {
        assert_eq!(parse(&["-u", "0"]).run_config(), Err(ConfigError::NoUsers));
        assert_eq!(parse(&["-b", "0"]).run_config(), Err(ConfigError::NoBatchSize));
        assert_eq!(
            parse(&["--report-interval", "0"]).report_interval(),
            Err(ConfigError::NoReportInterval)
        );
    }

    #[test]
    fn test_api_url_trailing_slash_trimmed() {
        let config = parse(&["--api-url", "http://api.local/"]).run_config().unwrap();
        assert_eq!(config.api_url, "http://api.local");
    }
}
