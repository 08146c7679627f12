//! sieve server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use sieve_core::config::AppConfig;
use sieve_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sieve - chunked CSV upload, partition and archive server
#[derive(Parser, Debug)]
#[command(name = "sieved")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SIEVE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Override the bind address from the configuration
    #[arg(long)]
    bind: Option<String>,
}

/// Load configuration from an optional TOML file and `SIEVE_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SIEVE_").ignore(&["config"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sieve v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    if config.server.metrics_enabled {
        sieve_server::metrics::register_metrics();
        tracing::info!("Prometheus metrics registered");
    }

    for dir in [&config.storage.merged_dir, &config.storage.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let storage = sieve_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(
        backend = storage.backend_name(),
        upload_dir = %config.storage.upload_dir.display(),
        "Storage backend initialized"
    );

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config, storage);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C; in-flight requests are allowed to finish.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
