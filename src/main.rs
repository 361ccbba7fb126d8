#![forbid(unsafe_code)]

use anyhow::Result;
use chatload::activity::ActivityLog;
use chatload::api::http::HttpApi;
use chatload::channel::SocketIoConnector;
use chatload::config::Args;
use chatload::metrics::LoadMetrics;
use chatload::report;
use chatload::scheduler::Runner;
use clap::Parser;
use colored::Colorize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the dashboard owns stdout; while it redraws only
    // warnings get through by default
    let default_filter = if args.no_dashboard {
        "chatload=info"
    } else {
        "chatload=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.run_config()?;
    let report_interval = args.report_interval()?;

    print!("{}", report::banner(&config));

    let metrics = LoadMetrics::new();
    let activity = ActivityLog::default();
    let cancel = CancellationToken::new();

    let exporter_shutdown = CancellationToken::new();
    let exporter = tokio::spawn(chatload::exporter::serve(
        args.metrics_port,
        metrics.clone(),
        exporter_shutdown.clone(),
    ));

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, closing sessions...");
                cancel.cancel();
            }
        })
    };

    let api = HttpApi::new(&config.api_url)?;
    let connector = SocketIoConnector::new(&config.socket_url)?;
    let runner = Runner::new(
        config,
        api,
        connector,
        metrics.clone(),
        activity.clone(),
        cancel.clone(),
    );

    let dashboard_stop = CancellationToken::new();
    let dashboard = (!args.no_dashboard).then(|| {
        tokio::spawn(dashboard_loop(
            metrics.clone(),
            activity.clone(),
            report_interval,
            dashboard_stop.clone(),
        ))
    });

    let outcome = runner.run().await;

    dashboard_stop.cancel();
    if let Some(dashboard) = dashboard {
        let _ = dashboard.await;
    }
    ctrl_c.abort();

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            error!("Failed to setup test room. Aborting test.");
            eprintln!("{}", format!("Failed to setup test room: {e}").red());
            exporter_shutdown.cancel();
            std::process::exit(1);
        }
    };

    println!("{}", report::render(&summary.snapshot, &activity.entries()));
    println!("{}", "✓ Load test completed!".bold().green());
    info!(
        "{} sessions, {} reached the room, {} failed",
        summary.sessions.len(),
        summary.reached_room(),
        summary.failed()
    );

    if let Some(path) = &args.summary_json {
        match report::write_summary(&summary, path) {
            Ok(()) => println!("Summary saved to {}", path.display()),
            Err(e) => warn!("Failed to write summary to {}: {}", path.display(), e),
        }
    }

    exporter_shutdown.cancel();
    match exporter.await {
        Ok(Err(e)) => warn!("Metrics server error: {}", e),
        Err(e) => warn!("Metrics server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    Ok(())
}

async fn dashboard_loop(
    metrics: LoadMetrics,
    activity: ActivityLog,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let frame = report::render(&metrics.snapshot(), &activity.entries());
                if let Err(e) = report::print_dashboard(&frame) {
                    warn!("Dashboard write failed: {}", e);
                    break;
                }
            }
        }
    }
}
