// main.rs
use clap::Parser;
use home_dashboard::{
    AppState, cli::Cli, config::Settings, metrics::setup_metrics, router, templates::Templates,
    translate::Catalog,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("home_dashboard=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings =
        Settings::new().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    cli.apply(&mut settings)?;

    let catalog = Catalog::load(&settings.locale.catalog_dir, &settings.locale.default)?;
    let templates = Templates::load(&settings.server.views_dir)?;

    if settings.metrics.enabled {
        setup_metrics(settings.metrics.port)?;
    }

    let address = settings.bind_address();
    let state = AppState::new(settings, templates, catalog).shared();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    tracing::info!("Server started on {}", address);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
