use std::sync::Arc;

use muster_core::config::CoreConfig;
use muster_core::snapshot::SnapshotCache;
use muster_core::vault::TokenVault;
use muster_db::sea_orm::DatabaseConnection;

/// Composition root: the snapshot cache lives here as an injected
/// dependency, not a module-level singleton.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<CoreConfig>,
    pub vault: Arc<TokenVault>,
    pub snapshots: Arc<SnapshotCache>,
}
