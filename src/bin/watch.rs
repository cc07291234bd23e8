// bin/watch.rs
//! Follows a gateway the way the dashboard page does and logs every card
//! that gets redrawn.
use clap::Parser;
use home_dashboard::dashboard::{Dashboard, transport::HttpTransport};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dashboard-watch", version, about = "Follow device state through a gateway")]
struct Args {
    /// Query endpoint of the gateway
    #[arg(default_value = "http://127.0.0.1:8081/")]
    url: String,
    /// Seconds between staleness checks
    #[arg(long, default_value_t = 5)]
    interval: u64,
    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("home_dashboard=info,dashboard_watch=info")),
        )
        .init();

    let args = Args::parse();
    let transport = HttpTransport::new(&args.url, Duration::from_secs(args.timeout))?;
    let dashboard = Dashboard::new(transport);
    let mut renders = dashboard.subscribe();

    let report = dashboard.load().await?;
    info!(url = %args.url, devices = report.devices.len(), "Watching gateway");
    for index in &report.devices {
        if let Some(card) = dashboard.card(*index).await {
            info!(device = index, name = %card.view.name, state = %card.view.state, "Card drawn");
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                dashboard.check_staleness(chrono::Utc::now()).await;
            }
            received = renders.recv() => match received {
                Ok(report) => {
                    for index in &report.devices {
                        if let Some(card) = dashboard.card(*index).await {
                            info!(device = index, name = %card.view.name, state = %card.view.state, "Card redrawn");
                        }
                    }
                    for group in &report.groups {
                        if let Some(card) = dashboard.group(group).await {
                            info!(group = %group, status = ?card.status, "Group redrawn");
                        }
                    }
                    if !report.removed.is_empty() {
                        info!(removed = ?report.removed, "Cards removed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed render reports"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }
        }
    }
    Ok(())
}
