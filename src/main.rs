//! Scout Telemetry Server
//!
//! Stores monitoring snapshots posted by capture agents.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SCOUT TELEMETRY                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  capture agent ──POST /telemetry──▶ IngestService           │
//! │                                        │                    │
//! │                       ┌────────────────┴───────────┐        │
//! │                       ▼                            ▼        │
//! │              ┌─────────────────┐        ┌─────────────────┐ │
//! │              │  Latest State   │        │   History Log   │ │
//! │              │ (1 per subject) │        │ (time travel)   │ │
//! │              └────────┬────────┘        └────────┬────────┘ │
//! │                       ▼                          ▼          │
//! │     QueryService / MaintenanceService (export, purge)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod models;
mod handlers;
mod middleware;
mod error;
mod services;
mod store;


use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use config::{Config, StoreBackend};
use services::{IngestService, MaintenanceService, QueryService};
use store::{MemoryStore, PgTelemetryStore, TelemetryStore};

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    init_tracing(config.json_logs);

    tracing::info!("Scout Telemetry Server starting...");
    if config.is_production() && config.admin_token.contains("change-in-production") {
        tracing::warn!("ADMIN_TOKEN is still the development default");
    }

    let store = connect_store(&config).await?;
    let state = AppState::new(config.clone(), store.clone());

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server failed")?;

    tracing::info!("Shutting down, closing telemetry store");
    store.close().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "scout_telemetry=debug,tower_http=debug".into()))
        .with(fmt_layer)
        .init();
}

/// Construct the store once at startup; it is handed to every service.
async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn TelemetryStore>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            tracing::info!(
                "Database: {}",
                config.database_url.split('@').last().unwrap_or("***")
            );

            let pool = db::create_pool(&config.database_url, config.db_max_connections)
                .await
                .context("failed to create database pool")?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool)
                .await
                .context("failed to run migrations")?;

            Ok(Arc::new(PgTelemetryStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory telemetry store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub ingest: IngestService,
    pub query: QueryService,
    pub maintenance: MaintenanceService,
    pub store_name: &'static str,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn TelemetryStore>) -> Self {
        let store_name = match config.store_backend {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        };

        Self {
            ingest: IngestService::new(
                store.clone(),
                config.default_subject_id.clone(),
                config.store_timeout,
            ),
            query: QueryService::new(store.clone(), config.history_limit, config.store_timeout),
            maintenance: MaintenanceService::new(
                store,
                config.purge_policy.clone(),
                config.store_timeout,
            ),
            store_name,
            config,
        }
    }
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Producer and live-view routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route(
            "/telemetry",
            get(handlers::telemetry::list_latest).post(handlers::telemetry::ingest),
        )
        .route("/telemetry/:subject_id", get(handlers::telemetry::get_latest));

    // Dashboard routes (admin token)
    let admin_routes = Router::new()
        .route("/telemetry/:subject_id/history", get(handlers::telemetry::history))
        .route("/export/csv", get(handlers::export::csv))
        .route("/export/backup", get(handlers::export::backup))
        .route("/purge", post(handlers::maintenance::purge))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin_auth
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
