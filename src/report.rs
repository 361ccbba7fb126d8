#![forbid(unsafe_code)]

// Console reporting - configuration banner, metrics table and recent activity

use crate::activity::{ActivityEntry, Level};
use crate::config::RunConfig;
use crate::metrics::MetricsSnapshot;
use crate::scheduler::RunSummary;
use colored::{ColoredString, Colorize};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

const RULE_WIDTH: usize = 80;

#[derive(Clone, Copy)]
enum Tone {
    Plain,
    Good,
    Notice,
    Info,
    Bad,
}

impl Tone {
    fn paint(self, text: String) -> ColoredString {
        match self {
            Tone::Plain => text.normal(),
            Tone::Good => text.green(),
            Tone::Notice => text.yellow(),
            Tone::Info => text.cyan(),
            Tone::Bad => text.red(),
        }
    }
}

enum Row {
    Metric(&'static str, String, Tone),
    Rule,
}

fn rows(snapshot: &MetricsSnapshot) -> Vec<Row> {
    use Row::{Metric, Rule};
    use Tone::*;

    vec![
        Metric("Elapsed Time", format!("{:.1}s", snapshot.elapsed.as_secs_f64()), Plain),
        Rule,
        Metric("Users Created", snapshot.users_created.to_string(), Good),
        Metric("Connected", snapshot.connected.to_string(), Good),
        Metric("Disconnected", snapshot.disconnected.to_string(), Notice),
        Rule,
        Metric("Messages Sent", snapshot.messages_sent.to_string(), Good),
        Metric("Messages Received", snapshot.messages_received.to_string(), Good),
        Metric("Messages Marked Read", snapshot.messages_read.to_string(), Info),
        Metric("Read Acks Received", snapshot.read_acks_received.to_string(), Info),
        Metric("Messages/sec", format!("{:.2}", snapshot.messages_per_sec), Plain),
        Rule,
        Metric("Avg Message Latency", format!("{:.2}ms", snapshot.latency.mean), Plain),
        Metric("P95 Message Latency", format!("{:.2}ms", snapshot.latency.p95), Plain),
        Metric("P99 Message Latency", format!("{:.2}ms", snapshot.latency.p99), Plain),
        Metric("Avg Connection Time", format!("{:.2}ms", snapshot.connection_time.mean), Plain),
        Rule,
        Metric("Auth Errors", snapshot.errors_auth.to_string(), Bad),
        Metric("Connection Errors", snapshot.errors_connection.to_string(), Bad),
        Metric("Message Errors", snapshot.errors_message.to_string(), Bad),
        Metric("Total Errors", snapshot.total_errors().to_string(), Bad),
    ]
}

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Two-column metrics table
pub fn render_table(snapshot: &MetricsSnapshot) -> String {
    let table_rows: Vec<TableRow> = rows(snapshot)
        .into_iter()
        .map(|row| match row {
            Row::Metric(label, value, tone) => TableRow {
                metric: tone.paint(label.to_string()).to_string(),
                value,
            },
            Row::Rule => TableRow {
                metric: "---".to_string(),
                value: "---".to_string(),
            },
        })
        .collect();

    let mut table = Table::new(table_rows);
    table.with(Style::sharp());
    format!("{table}\n")
}

/// Recent activity block, empty when there is nothing to show
pub fn render_activity(entries: &[ActivityEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let rule = "─".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "{}", "Recent Activity:".bold().white());
    let _ = writeln!(out, "{}", rule.bright_black());
    for entry in entries {
        let message = entry.message.as_str();
        let line = match entry.level {
            Level::Info => message.blue(),
            Level::Success => message.green(),
            Level::Warn => message.yellow(),
            Level::Error => message.red(),
        };
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "{}", rule.bright_black());
    out
}

/// Full dashboard frame: header, table and recent activity
pub fn render(snapshot: &MetricsSnapshot, entries: &[ActivityEntry]) -> String {
    format!(
        "{}\n{}\n{}",
        "\n=== Chat Load Test - Real-time Metrics ===\n".bold().cyan(),
        render_table(snapshot),
        render_activity(entries)
    )
}

/// Configuration summary printed before the run starts
pub fn banner(config: &RunConfig) -> String {
    let lines = [
        format!("  Users:           {}", config.total_users),
        format!("  Ramp-up time:    {}s", config.ramp_up.as_secs()),
        format!("  Batch size:      {} users/batch", config.batch_size),
        format!("  Batch delay:     {}ms", config.batch_delay.as_millis()),
        format!("  Total batches:   {}", config.total_batches()),
        format!("  Messages/user:   {}", config.messages_per_user),
        format!("  API URL:         {}", config.api_url),
        format!("  Socket.IO URL:   {}", config.socket_url),
        format!(
            "  Room ID:         {}",
            config.room_id.as_deref().unwrap_or("auto-create")
        ),
        format!(
            "  Duration:        {}",
            config
                .duration
                .map_or("until complete".to_string(), |d| format!("{}s", d.as_secs()))
        ),
    ];

    let mut out = String::new();
    let _ = writeln!(out, "{}", "\n=== Chat Load Test ===\n".bold().cyan());
    let _ = writeln!(out, "{}", "Configuration:".white());
    for line in lines {
        let _ = writeln!(out, "{}", line.bright_black());
    }
    out
}

/// Clears the terminal and draws one dashboard frame.
pub fn print_dashboard(frame: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "\x1b[2J\x1b[H{frame}")?;
    stdout.flush()
}

/// Pretty JSON form of a finished run: per-session outcomes plus the final
/// snapshot.
pub fn summary_json(summary: &RunSummary) -> serde_json::Result<String> {
    let value = serde_json::json!({
        "roomId": summary.room_id,
        "sessions": summary.sessions.len(),
        "reachedRoom": summary.reached_room(),
        "failed": summary.failed(),
        "metrics": summary.snapshot,
        "outcomes": summary.sessions,
    });
    serde_json::to_string_pretty(&value)
}

pub fn write_summary(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let json = summary_json(summary)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::metrics::LoadMetrics;
    use crate::session::{SessionReport, SessionState};
    use std::time::Duration;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_table_lists_every_metric() {
        plain();
        let metrics = LoadMetrics::new();
        metrics.inc_users_created();
        metrics.inc_errors_auth();
        metrics.inc_errors_message();
        metrics.record_latency(Duration::from_millis(12));
        let table = render_table(&metrics.snapshot());

        for label in [
            "Elapsed Time",
            "Users Created",
            "Connected",
            "Disconnected",
            "Messages Sent",
            "Messages Received",
            "Messages Marked Read",
            "Read Acks Received",
            "Messages/sec",
            "Avg Message Latency",
            "P95 Message Latency",
            "P99 Message Latency",
            "Avg Connection Time",
            "Auth Errors",
            "Connection Errors",
            "Message Errors",
            "Total Errors",
        ] {
            assert!(table.contains(label), "missing {label}");
        }
        assert!(table.contains("12.00ms"));
        let total = table.lines().find(|l| l.contains("Total Errors")).unwrap();
        assert!(total.contains(" 2 "));
    }

    #[test]
    fn test_table_is_boxed_and_aligned() {
        plain();
        let table = render_table(&LoadMetrics::new().snapshot());
        let lines: Vec<&str> = table.lines().collect();

        // header, 17 metrics and 4 section rules between the borders
        assert_eq!(lines.len(), 1 + 1 + 1 + 21 + 1);
        assert!(lines[0].starts_with('┌') && lines[0].ends_with('┐'));
        assert!(lines[1].contains("Metric") && lines[1].contains("Value"));
        assert!(lines[2].starts_with('├'));
        assert!(lines[lines.len() - 1].starts_with('└'));

        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }

    #[test]
    fn test_activity_block() {
        plain();
        assert_eq!(render_activity(&[]), "");

        let log = ActivityLog::default();
        log.success("User 1 connected");
        log.error("User 2 connection error");
        let block = render_activity(&log.entries());
        assert!(block.starts_with("Recent Activity:"));
        assert!(block.contains("User 1 connected"));
        assert!(block.contains("User 2 connection error"));
    }

    #[test]
    fn test_banner_shows_auto_create() {
        plain();
        let config = RunConfig {
            total_users: 25,
            batch_size: 10,
            batch_delay: Duration::from_millis(1000),
            ramp_up: Duration::from_secs(30),
            duration: None,
            messages_per_user: 20,
            api_url: "http://api".into(),
            socket_url: "ws://socket".into(),
            room_id: None,
            pacing: Default::default(),
            reconnect: Default::default(),
        };
        let text = banner(&config);
        assert!(text.contains("Total batches:   3"));
        assert!(text.contains("Room ID:         auto-create"));
        assert!(text.contains("Duration:        until complete"));
    }

    #[test]
    fn test_summary_json_shape() {
        let metrics = LoadMetrics::new();
        metrics.inc_users_created();
        metrics.inc_messages_sent();
        let summary = RunSummary {
            room_id: "room-9".into(),
            sessions: vec![
                SessionReport {
                    user_id: 0,
                    state: SessionState::Closed,
                    reached_room: true,
                    messages_sent: 1,
                },
                SessionReport {
                    user_id: 1,
                    state: SessionState::Failed,
                    reached_room: false,
                    messages_sent: 0,
                },
            ],
            snapshot: metrics.snapshot(),
        };

        let value: serde_json::Value = serde_json::from_str(&summary_json(&summary).unwrap()).unwrap();
        assert_eq!(value["roomId"], "room-9");
        assert_eq!(value["sessions"], 2);
        assert_eq!(value["reachedRoom"], 1);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["metrics"]["messagesSent"], 1);
        assert_eq!(value["outcomes"][1]["state"], "Failed");
        assert_eq!(value["outcomes"][0]["messagesSent"], 1);
    }
}
