//! QuizCast Server
//!
//! Boots the HTTP gateway over the SQLite entitlement store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizcast_server::auth::RemoteIdentityVerifier;
use quizcast_server::config::Config;
use quizcast_server::routes;
use quizcast_server::state::AppState;
use quizcast_server::store::{create_pool, SqliteEntitlementStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "quizcast_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; secrets have no safe defaults
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting QuizCast Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        daily_allowance = config.entitlement.daily_allowance,
        checkout_grant_hours = config.entitlement.checkout_grant_hours,
        store_timeout_ms = config.entitlement.store_timeout_ms,
        "Entitlement policy loaded"
    );
    if config.server.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; manual upgrades are disabled");
    }

    // Initialize database
    let pool = create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let store = Arc::new(SqliteEntitlementStore::new(pool));
    let identity = Arc::new(
        RemoteIdentityVerifier::new(&config.auth).context("Failed to build identity verifier")?,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app_state = AppState::new(config, store, identity)?;
    app_state
        .documents()
        .clone()
        .start_cleanup_task(std::time::Duration::from_secs(300));

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("QuizCast Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
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
}
