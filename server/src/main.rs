mod auth;
mod error;
mod routes;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use chapterflow::logging::init_logging;
use chapterflow::{load_config, PipelineRunner};

use crate::routes::{router, AppState};

const CONFIG_ENV: &str = "CHAPTERFLOW_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "chapterflow.json";

/// Room for multipart framing on top of the archive itself.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = load_config(&config_path)?;
    init_logging(&config.logging)?;
    info!("Loaded config from {}", config_path);

    let runner = PipelineRunner::from_config(&config)?;
    match runner.recover_interrupted() {
        Ok(0) => {}
        Ok(n) => warn!("Marked {} interrupted jobs as failed", n),
        Err(e) => error!("Failed to recover interrupted jobs: {}", e),
    }

    let body_limit = usize::try_from(config.max_archive_bytes.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);
    let app = router(
        AppState {
            runner: runner.clone(),
        },
        body_limit,
    );

    let addr: SocketAddr = config.server.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    info!("Waiting up to {:?} for in-flight jobs", grace);
    let abandoned = runner.shutdown(grace).await;
    if abandoned > 0 {
        warn!("Abandoned {} jobs at shutdown", abandoned);
    }

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
