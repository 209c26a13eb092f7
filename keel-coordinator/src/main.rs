use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keel_coordinator::api::{self, AppState};
use keel_coordinator::config::ConfigHandle;
use keel_coordinator::db;
use keel_coordinator::repository::{MemoryStore, PgStore, Store};
use keel_coordinator::service::sweep_service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Keel Coordinator...");

    let config = ConfigHandle::load().context("Failed to load configuration")?;
    let snapshot = config.snapshot().await;
    tracing::info!("Configuration version {}", snapshot.version);

    let store: Arc<dyn Store> = match &snapshot.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Agents get a full heartbeat timeout to check in after a restart
    let refreshed = store
        .refresh_heartbeats(Utc::now())
        .await
        .context("Failed to refresh agent heartbeats")?;
    if refreshed > 0 {
        tracing::info!("{} known agent(s) given a fresh heartbeat window", refreshed);
    }

    let config = Arc::new(config);
    let sweep = tokio::spawn(sweep_service::run(store.clone(), config.clone()));

    // Build router with all API endpoints
    let app = api::create_router(AppState::new(store, config));

    tracing::info!("Listening on {}", snapshot.bind_addr);

    let listener = tokio::net::TcpListener::bind(&snapshot.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", snapshot.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweep.abort();
    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
