//! wrap-api - listening-history analysis and music generation service
//!
//! Serves the OAuth login flow, history fetch-and-archive routes, taste
//! analysis, and the streamed generation and expansion channels consumed by
//! the browser frontend and `wrap-cli`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use wrap_api::config::ServiceConfig;
use wrap_api::AppState;

const DEFAULT_FILTER: &str = "wrap_api=info,tower_http=info";

/// Command-line arguments for wrap-api
#[derive(Parser, Debug)]
#[command(name = "wrap-api")]
#[command(about = "Listening-history analysis and music generation service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "WRAP_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing starts with RUST_LOG or a built-in filter so config warnings
    // are visible; the configured level replaces the fallback once loaded.
    let from_env = EnvFilter::try_from_default_env().ok();
    let has_env_filter = from_env.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if dotenvy::dotenv().is_ok() {
        info!("Loaded environment from .env");
    }

    let args = Args::parse();

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    if !has_env_filter {
        let level = &config.logging.level;
        let directive = format!("wrap_api={},tower_http={}", level, level);
        filter_handle
            .reload(EnvFilter::new(directive))
            .context("Failed to apply configured log level")?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting wrap-api"
    );
    info!("Data directory: {}", config.data_dir.display());
    info!("Output directory: {}", config.output_dir.display());

    let address = config.bind_address();
    let state = AppState::from_config(config).context("Failed to initialize upstream clients")?;
    let app = wrap_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("Listening on http://{}", address);
    info!("Health check: http://{}/health", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
