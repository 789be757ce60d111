use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slidemill_api::config::ServerConfig;
use slidemill_api::router::build_app_router;
use slidemill_api::state::AppState;
use slidemill_core::config::Settings;
use slidemill_engine::{InferenceRegistry, Scheduler};
use slidemill_events::EventBus;
use slidemill_store::{FileStore, Store};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slidemill=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let settings = Arc::new(Settings::from_env());
    tracing::info!(
        host = %config.host,
        port = config.port,
        max_workers = settings.max_workers,
        max_active_users = settings.max_active_users,
        "Loaded configuration"
    );

    // --- Core services ---
    let bus = Arc::new(EventBus::default());
    let store = Arc::new(Store::new(
        Arc::clone(&bus),
        settings.max_jobs_per_workflow,
    ));
    let files = Arc::new(
        FileStore::new(&settings.data_dir).expect("Failed to create data directories"),
    );
    tracing::info!(data_dir = %settings.data_dir.display(), "File store ready");

    let shutdown = CancellationToken::new();
    let inference = Arc::new(InferenceRegistry::new(&settings));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&files),
        Arc::clone(&settings),
        inference,
        shutdown.clone(),
    );
    tracing::info!("Scheduler started");

    // --- App state and router ---
    let state = AppState {
        settings,
        store,
        files,
        scheduler,
        bus,
    };
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
    // Running executors observe the token between tiles and fail over
    // to a terminal state, releasing their scheduler resources.
    tracing::info!("Server stopped accepting connections, draining workers");
    shutdown.cancel();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
