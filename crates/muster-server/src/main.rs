use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use sea_orm_migration::MigratorTrait;
use serde::Serialize;

use muster_core::config::CoreConfig;
use muster_core::snapshot::SnapshotCache;
use muster_core::vault::TokenVault;
use muster_server::sweeps::{CommandExpirySweeper, LivenessSweeper, RetentionRunner};
use muster_server::{admin_api, agent_api, state::AppState};

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn init_state() -> anyhow::Result<AppState> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;
    let db = muster_db::connect(&database_url).await?;

    // Apply migrations on boot (idempotent).
    muster_migration::Migrator::up(&db, None).await?;

    let config = Arc::new(CoreConfig::from_env());
    let vault = TokenVault::new(config.jwt_secret.clone(), config.token_ttl());
    let snapshots = SnapshotCache::new(config.snapshot_stale_window());

    Ok(AppState {
        db: Arc::new(db),
        config,
        vault: Arc::new(vault),
        snapshots: Arc::new(snapshots),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let state = init_state().await?;

    LivenessSweeper::new(state.db.clone(), state.config.clone()).spawn();
    CommandExpirySweeper::new(state.db.clone(), state.config.clone()).spawn();
    RetentionRunner::new(state.db.clone(), state.config.clone()).spawn();

    let app = Router::new()
        .route("/healthz", get(healthz))
        .nest("/agent", agent_api::router(state.clone()))
        .nest("/admin", admin_api::router(state));

    let addr: SocketAddr = std::env::var("MUSTER_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    tracing::info!(%addr, "muster-server HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
