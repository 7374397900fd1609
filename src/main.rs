use anyhow::Context;
use outbox_relay::{config::Config, telemetry::init_tracing, AppContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_tracing(&config.observability);

    if let Some(e) = load_error {
        tracing::warn!(error = %e, "Failed to load configuration, using defaults");
    }

    tracing::info!("Starting outbox relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage backend: {:?}", config.state.backend);

    let ctx = AppContext::build(config)
        .await
        .context("failed to initialize relay")?;

    let tasks = ctx.spawn();

    tracing::info!("Outbox relay running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    ctx.shutdown(tasks).await;

    let stats = ctx.consumer.snapshot();
    tracing::info!(
        processed = stats.processed_total,
        errors = stats.error_total,
        dead_lettered = stats.dead_lettered_total,
        "Outbox relay stopped"
    );

    Ok(())
}
