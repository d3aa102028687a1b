//! streamledger server
//!
//! Boots the write-side HTTP edge and the account projector in one
//! process, wired to Redis (event log) and Postgres (view store).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamledger::api::{self, AppState};
use streamledger::event_log::RedisEventLog;
use streamledger::projection::{consumer_name, AccountProjector, PgViewStore, ViewStore};
use streamledger::service::AccountService;
use streamledger::Config;

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("0.0.0.0:{}", config.listen_port).parse()?;

    tracing::info!("Starting streamledger server");

    // Write side: command service over its own log client.
    let service_log = RedisEventLog::connect(&config.redis_url(), config.read_interval).await?;
    let service = Arc::new(AccountService::new(Arc::new(service_log), &config.stream));

    // Read side: view store plus projector over a second log client,
    // so each owns its connect/close lifecycle.
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let views = Arc::new(PgViewStore::new(pool.clone()));
    views.ensure_schema().await?;

    let projector_log =
        RedisEventLog::connect(&config.redis_url(), config.projector_read_interval).await?;
    let projector = AccountProjector::new(
        Arc::new(projector_log),
        views.clone() as Arc<dyn ViewStore>,
        &config.stream,
        consumer_name(),
        config.pending_interval,
    );
    projector.connect().await?;

    tracing::info!("Event log and view store connected");
    tracing::info!("Listening on http://{}", addr);

    let state = AppState {
        service: service.clone(),
        views: views as Arc<dyn ViewStore>,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    projector.close().await;
    service.close().await;
    pool.close().await;
    tracing::info!("Connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
