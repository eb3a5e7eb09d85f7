use anyhow::{Context, Result};
use capture_service::api::{bind_listener, serve_api};
use capture_service::{AppState, Category, Config, LocalClock};
use std::path::Path;
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
        version = env!("CARGO_PKG_VERSION"),
        result_root = %config.storage.result_root.display(),
        "Starting capture service"
    );

    // Initialize metrics
    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    // An unusable storage root is fatal here rather than on every request
    prepare_root(&config.storage.result_root).context("Failed to prepare result root")?;

    let state = AppState::new(&config.storage, Arc::new(LocalClock));

    // A bind failure ends the process here
    let listener = bind_listener(&config.api)
        .await
        .context("Failed to start API server")?;

    info!(address = %config.api_addr(), "Capture service started successfully");

    // Serve until the server fails or a shutdown signal arrives
    tokio::select! {
        result = serve_api(listener, state, &config.api, &config.storage) => {
            result.context("API server stopped")?;
        }
        _ = shutdown_signal() => {
            info!("Shutting down capture service");
        }
    }

    info!("Capture service stopped");

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
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Create the category roots up front
fn prepare_root(root: &Path) -> Result<()> {
    for category in [Category::Capture, Category::Video] {
        let dir = root.join(category.as_str());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_root_creates_categories() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("results");

        prepare_root(&root).unwrap();
        prepare_root(&root).unwrap();

        assert!(root.join("capture").is_dir());
        assert!(root.join("video").is_dir());
    }

    #[test]
    fn test_prepare_root_fails_on_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("results");
        std::fs::write(&root, b"").unwrap();

        assert!(prepare_root(&root).is_err());
    }
}
