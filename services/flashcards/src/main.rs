use anyhow::{Context, Result};
use flashcards_service::{
    start_api_server, AppState, Config, Dispatcher, DispatcherSettings, GeminiClient,
    PgFlashcardStore, S3ObjectStore,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting flashcards service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let store = Arc::new(
        PgFlashcardStore::new(&config.database)
            .await
            .context("Failed to initialize flashcard store")?,
    );

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let objects = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let generator = Arc::new(
        GeminiClient::new(&config.generation).context("Failed to initialize generation client")?,
    );

    let dispatcher = Dispatcher::new(
        store.clone(),
        objects,
        generator,
        DispatcherSettings::from_config(&config),
    );

    let state = AppState {
        dispatcher: Arc::new(dispatcher),
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Shutting down flashcards service");
    store.close().await;
    info!("Flashcards service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
