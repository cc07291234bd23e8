// metrics/mod.rs
use metrics::describe_counter;
use metrics::describe_gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub fn setup_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to setup metrics: {}", e))?;
    describe();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

fn describe() {
    describe_counter!("gateway_queries_total", "Queries accepted, by reqtype");
    describe_counter!("gateway_query_failures_total", "Queries that failed, by reason");
    describe_counter!(
        "gateway_backend_registrations_total",
        "Light server registrations, including takeovers"
    );
    describe_gauge!("gateway_browser_clients", "Browsers listening for state pushes");
}
