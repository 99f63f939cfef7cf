use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use admission::config::{Cli, LogFormat};
use admission::http::HttpServer;
use admission::ratelimit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // Initialize tracing; RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }

    info!("Starting admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let settings = config.limiter.validate()?;
    info!(
        algorithm = %settings.algorithm,
        http_addr = %config.server.http_addr,
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::from_settings(&settings)?);

    let server = HttpServer::new(
        config.server.http_addr,
        Arc::clone(&rate_limiter),
        config.server.admission_timeout(),
    );

    let served = server.serve_with_shutdown(shutdown_signal()).await;

    // Stop background tasks whether or not the server exited cleanly
    if let Err(e) = rate_limiter.stop().await {
        error!(error = %e, "Rate limiter did not stop cleanly");
    }
    served?;

    info!("Admission service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
