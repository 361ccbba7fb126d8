#![forbid(unsafe_code)]

// Recent activity ring buffer shown under the dashboard table

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Severity of an activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub level: Level,
    /// `[HH:MM:SS] message`
    pub message: String,
}

/// Fixed-capacity FIFO of formatted log lines. The oldest entry is evicted
/// once capacity is exceeded.
///
/// Every entry is also emitted as a `debug` tracing event, so a debug log
/// keeps the full history that the buffer drops without interleaving with
/// the dashboard at the default filter.
#[derive(Clone)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<ActivityEntry>>>,
    capacity: usize,
}

impl ActivityLog {
    pub const DEFAULT_CAPACITY: usize = 10;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity + 1))),
            capacity,
        }
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(level = ?level, "{}", message);

        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let entry = ActivityEntry {
            level,
            message: format!("[{timestamp}] {message}"),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(entry);
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.log(Level::Success, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
