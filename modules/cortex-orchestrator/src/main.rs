use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cortex_bus::{Mirror, RedisMirror};
use cortex_common::{Config, CortexError, RetryPolicy};
use cortex_orchestrator::{MemoryStore, Orchestrator};

const EXIT_CONFIG: i32 = 1;
const EXIT_MIRROR_UNREACHABLE: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Vision Cortex starting...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let mirror: Arc<dyn Mirror> = match RedisMirror::connect(&config.redis_url, &RetryPolicy::default()).await
    {
        Ok(mirror) => Arc::new(mirror),
        Err(CortexError::Config(e)) => {
            error!(error = %e, "Invalid mirror configuration");
            std::process::exit(EXIT_CONFIG);
        }
        Err(e) => {
            error!(error = %e, "Bus mirror permanently unreachable at startup");
            std::process::exit(EXIT_MIRROR_UNREACHABLE);
        }
    };

    let store = Arc::new(MemoryStore::new());
    let orchestrator = match Orchestrator::build(config, Some(mirror), store) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "Orchestrator build failed");
            std::process::exit(EXIT_CONFIG);
        }
    };

    orchestrator.start();

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Signal handler failed, shutting down"),
    }

    orchestrator.shutdown().await;
    info!("Goodbye");
}
