use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use studymate::config::ServerConfig;
use studymate::core::server::ServerManager;
use studymate::handlers::{routes, PollingTransport};
use studymate::storage::{SharedStore, StorageBackend};

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("No .env file loaded: {}", e),
    }

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}", config.host, config.port);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn SharedStore> = Arc::new(StorageBackend::resolve(&config).await);

    let server = match ServerManager::new(config, store) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to initialize server: {}", e);
            std::process::exit(1);
        }
    };
    server.start_background_tasks();

    let polling = Arc::new(PollingTransport::new(server.clone()));
    polling.clone().start_reaper();

    let (bound, serving) = match warp::serve(routes(server, polling))
        .try_bind_with_graceful_shutdown(addr, shutdown_signal())
    {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting StudyMate server on {}", bound);
    serving.await;
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler, run until killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
