#![forbid(unsafe_code)]

// Run-wide metrics: lock-free counters, rotating timing samples and point-in-time snapshots

pub mod stats;

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use stats::Summary;

/// Samples kept per sequence before the oldest are rotated out
pub const DEFAULT_SAMPLE_LIMIT: usize = 100_000;

/// Aggregator shared by every session of one run.
///
/// Cloning is cheap and every clone feeds the same counters. Increments are
/// single atomic adds so no update is lost under any number of callers.
#[derive(Clone)]
pub struct LoadMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    start_time: Instant,

    // Monotonic counters
    users_created: AtomicU64,
    connected: AtomicU64,
    disconnected: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_read: AtomicU64,
    read_acks_received: AtomicU64,
    errors_auth: AtomicU64,
    errors_connection: AtomicU64,
    errors_message: AtomicU64,

    // Samples in milliseconds, oldest first
    sample_limit: usize,
    latencies: Mutex<VecDeque<f64>>,
    connection_times: Mutex<VecDeque<f64>>,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self::with_sample_limit(DEFAULT_SAMPLE_LIMIT)
    }

    /// Keeps at most `limit` samples per sequence; counters are unaffected.
    pub fn with_sample_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                start_time: Instant::now(),
                users_created: AtomicU64::new(0),
                connected: AtomicU64::new(0),
                disconnected: AtomicU64::new(0),
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
                messages_read: AtomicU64::new(0),
                read_acks_received: AtomicU64::new(0),
                errors_auth: AtomicU64::new(0),
                errors_connection: AtomicU64::new(0),
                errors_message: AtomicU64::new(0),
                sample_limit: limit.max(1),
                latencies: Mutex::new(VecDeque::new()),
                connection_times: Mutex::new(VecDeque::new()),
            }),
        }
    }

    // --- Counter increments ---

    pub fn inc_users_created(&self) {
        self.inner.users_created.fetch_add(1, Relaxed);
    }

    pub fn inc_connected(&self) {
        self.inner.connected.fetch_add(1, Relaxed);
    }

    pub fn inc_disconnected(&self) {
        self.inner.disconnected.fetch_add(1, Relaxed);
    }

    pub fn inc_messages_sent(&self) {
        self.inner.messages_sent.fetch_add(1, Relaxed);
    }

    pub fn inc_messages_received(&self) {
        self.inner.messages_received.fetch_add(1, Relaxed);
    }

    pub fn inc_messages_read(&self) {
        self.inner.messages_read.fetch_add(1, Relaxed);
    }

    pub fn inc_read_acks(&self) {
        self.inner.read_acks_received.fetch_add(1, Relaxed);
    }

    pub fn inc_errors_auth(&self) {
        self.inner.errors_auth.fetch_add(1, Relaxed);
    }

    pub fn inc_errors_connection(&self) {
        self.inner.errors_connection.fetch_add(1, Relaxed);
    }

    pub fn inc_errors_message(&self) {
        self.inner.errors_message.fetch_add(1, Relaxed);
    }

    // --- Samples ---

    pub fn record_latency(&self, elapsed: Duration) {
        push_sample(&self.inner.latencies, self.inner.sample_limit, elapsed);
    }

    pub fn record_connection_time(&self, elapsed: Duration) {
        push_sample(&self.inner.connection_times, self.inner.sample_limit, elapsed);
    }

    // --- Snapshot ---

    /// Copy of every counter plus derived statistics.
    ///
    /// Samples are cloned under their lock and sorted outside it, so
    /// concurrent increments never wait on percentile computation.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> MetricsSnapshot {
        let i = &self.inner;
        let latencies = copy_samples(&i.latencies);
        let connection_times = copy_samples(&i.connection_times);

        let elapsed = now.saturating_duration_since(i.start_time);
        let messages_sent = i.messages_sent.load(Relaxed);
        let elapsed_secs = elapsed.as_secs_f64();
        let messages_per_sec = if elapsed_secs > 0.0 {
            messages_sent as f64 / elapsed_secs
        } else {
            0.0
        };

        MetricsSnapshot {
            elapsed,
            users_created: i.users_created.load(Relaxed),
            connected: i.connected.load(Relaxed),
            disconnected: i.disconnected.load(Relaxed),
            messages_sent,
            messages_received: i.messages_received.load(Relaxed),
            messages_read: i.messages_read.load(Relaxed),
            read_acks_received: i.read_acks_received.load(Relaxed),
            errors_auth: i.errors_auth.load(Relaxed),
            errors_connection: i.errors_connection.load(Relaxed),
            errors_message: i.errors_message.load(Relaxed),
            messages_per_sec,
            latency: Summary::from_samples(&latencies),
            connection_time: Summary::from_samples(&connection_times),
        }
    }
}

impl Default for LoadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn push_sample(samples: &Mutex<VecDeque<f64>>, limit: usize, elapsed: Duration) {
    if let Ok(mut s) = samples.lock() {
        if s.len() >= limit {
            s.pop_front();
        }
        s.push_back(elapsed.as_secs_f64() * 1000.0);
    }
}

fn copy_samples(samples: &Mutex<VecDeque<f64>>) -> Vec<f64> {
    samples
        .lock()
        .map(|s| s.iter().copied().collect())
        .unwrap_or_default()
}

/// Immutable point-in-time view of the aggregator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub users_created: u64,
    pub connected: u64,
    pub disconnected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_read: u64,
    pub read_acks_received: u64,
    pub errors_auth: u64,
    pub errors_connection: u64,
    pub errors_message: u64,
    pub messages_per_sec: f64,
    /// Message hand-off latency (ms)
    pub latency: Summary,
    /// Session start to channel connected (ms)
    pub connection_time: Summary,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl MetricsSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.errors_auth + self.errors_connection + self.errors_message
    }

    /// Render as gauges in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);

        render_gauge(&mut out, "ktb_users_created", "Total users created (login/register) in load test", self.users_created as f64);
        render_gauge(&mut out, "ktb_users_connected", "Users connected via Socket.IO", self.connected as f64);
        render_gauge(&mut out, "ktb_users_disconnected", "Total disconnected users", self.disconnected as f64);
        render_gauge(&mut out, "ktb_messages_sent", "Total messages sent so far", self.messages_sent as f64);
        render_gauge(&mut out, "ktb_messages_received", "Total messages received so far", self.messages_received as f64);
        render_gauge(&mut out, "ktb_messages_marked_read", "Total messages marked as read", self.messages_read as f64);
        render_gauge(&mut out, "ktb_read_acks_received", "Total read ack events received", self.read_acks_received as f64);
        render_gauge(&mut out, "ktb_messages_per_second", "Messages sent per second since run start", self.messages_per_sec);
        render_gauge(&mut out, "ktb_message_latency_avg_ms", "Average message latency in ms", self.latency.mean);
        render_gauge(&mut out, "ktb_message_latency_p95_ms", "P95 message latency in ms", self.latency.p95);
        render_gauge(&mut out, "ktb_message_latency_p99_ms", "P99 message latency in ms", self.latency.p99);
        render_gauge(&mut out, "ktb_connection_time_avg_ms", "Average connection time in ms", self.connection_time.mean);
        render_gauge(&mut out, "ktb_auth_errors", "Total auth errors", self.errors_auth as f64);
        render_gauge(&mut out, "ktb_connection_errors", "Total connection errors", self.errors_connection as f64);
        render_gauge(&mut out, "ktb_message_errors", "Total message errors", self.errors_message as f64);

        out
    }
}

fn render_gauge(out: &mut String, name: &str, help: &str, value: f64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}
