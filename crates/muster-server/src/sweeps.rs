use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use muster_core::config::CoreConfig;
use muster_core::{commands, liveness, retention};
use muster_db::sea_orm::DatabaseConnection;

/// Flips silent devices offline. One conditional bulk update per tick;
/// the predicate re-checks `last_seen_at` inside the database so a
/// heartbeat landing mid-sweep wins.
#[derive(Clone)]
pub struct LivenessSweeper {
    db: Arc<DatabaseConnection>,
    config: Arc<CoreConfig>,
}

impl LivenessSweeper {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<CoreConfig>) -> Self {
        Self { db, config }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(Duration::from_secs(self.config.liveness_sweep_secs)).await;
            }
        });
    }

    async fn tick(&self) {
        let cutoff = self.config.offline_cutoff(Utc::now());
        if let Err(err) = liveness::sweep_offline(&self.db, cutoff).await {
            tracing::warn!(%err, "liveness sweep failed");
        }
    }
}

/// Marks lapsed pending commands expired. An optimization only; poll
/// filters on expiry regardless.
#[derive(Clone)]
pub struct CommandExpirySweeper {
    db: Arc<DatabaseConnection>,
    config: Arc<CoreConfig>,
}

impl CommandExpirySweeper {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<CoreConfig>) -> Self {
        Self { db, config }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(Duration::from_secs(self.config.command_sweep_secs)).await;
            }
        });
    }

    async fn tick(&self) {
        if let Err(err) = commands::sweep_expired(&self.db, Utc::now()).await {
            tracing::warn!(%err, "command expiry sweep failed");
        }
    }
}

/// Scheduled LGPD retention pass. Failures are logged and the next tick
/// retries; a bad row never wedges the schedule.
#[derive(Clone)]
pub struct RetentionRunner {
    db: Arc<DatabaseConnection>,
    config: Arc<CoreConfig>,
}

impl RetentionRunner {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<CoreConfig>) -> Self {
        Self { db, config }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(Duration::from_secs(self.config.retention_sweep_secs)).await;
            }
        });
    }

    async fn tick(&self) {
        if let Err(err) = retention::run_sweep(
            &self.db,
            &self.config.retention_defaults,
            self.config.retention_batch_size,
        )
        .await
        {
            tracing::warn!(%err, "retention sweep failed");
        }
    }
}
