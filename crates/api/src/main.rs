use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vidfleet_api::config::ServerConfig;
use vidfleet_api::error::enable_error_details;
use vidfleet_api::router::build_app_router;
use vidfleet_api::state::AppState;
use vidfleet_engine::{JobDispatcher, NodeRegistry};
use vidfleet_store::{JobStore, JsonFilePersistence, NodeStore};
use vidfleet_transport::TransportSet;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vidfleet_api=debug,vidfleet_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    enable_error_details(config.is_development());
    tracing::info!(
        host = %config.host,
        port = %config.port,
        jobs_file = %config.jobs_file_path.display(),
        "Loaded server configuration",
    );

    // --- Job store ---
    let store = open_job_store(&config.jobs_file_path, config.persist_debounce()).await;

    // --- Engine ---
    let registry = NodeRegistry::new(NodeStore::new(), TransportSet::remote());
    let dispatcher = JobDispatcher::new(store.clone(), registry, config.reconcile_policy());

    // --- App state ---
    let state = AppState::new(config.clone(), dispatcher.clone());
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let cleanup = async {
        dispatcher.shutdown().await;
        tracing::info!("Reconciliation tasks stopped");
        if let Err(e) = store.flush().await {
            tracing::error!(error = %e, "Failed to flush job store");
        }
    };
    if tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), cleanup)
        .await
        .is_err()
    {
        tracing::warn!("Cleanup did not finish within the shutdown timeout");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Open the JSON-backed job store.
///
/// An unreadable file is moved aside and the server starts with no jobs.
async fn open_job_store(path: &Path, debounce: Duration) -> JobStore {
    let persistence = Arc::new(JsonFilePersistence::new(path));
    match JobStore::open(persistence.clone(), debounce).await {
        Ok(store) => store,
        Err(e) => {
            let aside = path.with_extension("json.corrupt");
            tracing::warn!(
                error = %e,
                moved_to = %aside.display(),
                "Could not load jobs file, starting empty",
            );
            if let Err(e) = tokio::fs::rename(path, &aside).await {
                tracing::warn!(error = %e, "Could not move unreadable jobs file aside");
            }
            JobStore::open(persistence, debounce)
                .await
                .expect("Failed to open job store")
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
