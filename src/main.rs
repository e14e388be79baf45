//! Simple NAS
//!
//! Serves one directory to the LAN: multipart uploads, streaming downloads,
//! and deletes that the operator approves on the console.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simple_nas::config::{ApprovalMode, Config};
use simple_nas::deletion::{ApprovalAuthority, ConsoleAuthority, DenyAllAuthority};
use simple_nas::routes;
use simple_nas::state::AppState;

/// How often expired pending deletes are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simple_nas=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let mut config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    config.storage.root = config
        .storage
        .root
        .canonicalize()
        .with_context(|| format!("Cannot serve directory {}", config.storage.root.display()))?;

    tracing::info!("Starting Simple NAS v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Serving directory: {}", config.storage.root.display());

    let authority: Arc<dyn ApprovalAuthority> = match config.approval.mode {
        ApprovalMode::Console => Arc::new(ConsoleAuthority::spawn()),
        ApprovalMode::Deny => {
            tracing::info!("Approval mode is deny: every delete request will be refused");
            Arc::new(DenyAllAuthority)
        }
    };

    let bind_to = (config.server.host.clone(), config.server.port);

    let state = AppState::new(config, authority);
    state.deletes().registry().clone().start_sweep_task(SWEEP_INTERVAL);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind((bind_to.0.as_str(), bind_to.1))
        .await
        .with_context(|| format!("Failed to bind {}:{}", bind_to.0, bind_to.1))?;
    tracing::info!("Serving at http://{}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("Server error")?;

    tracing::info!("Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then release every delete still awaiting the
/// admin so graceful shutdown is not held up by open approval prompts.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }

    let pending = state.deletes().registry().len();
    if pending > 0 {
        tracing::warn!(count = pending, "Interrupting pending delete requests");
    }
    state.shutdown();
}
