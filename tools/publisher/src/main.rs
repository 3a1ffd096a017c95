use std::sync::Arc;

use anyhow::Context;
use publisher::config::GridConfig;
use publisher::runner::run_grid;
use tracing_subscriber::EnvFilter;
use view_engine::InMemoryBus;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GridConfig::from_env().context("loading GRID_* configuration")?;
    tracing::info!(
        topic = %config.topic,
        filter = config.filter.as_deref().unwrap_or(""),
        options = %config.options,
        run_secs = config.run_for.as_secs(),
        "Starting live grid"
    );

    let bus = Arc::new(InMemoryBus::with_defaults());
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    let summary = run_grid(&config, bus, ctrl_c).await?;

    tracing::info!(
        published = summary.published,
        interrupted = summary.interrupted,
        metrics = ?summary.metrics,
        "Live grid stopped"
    );
    Ok(())
}
