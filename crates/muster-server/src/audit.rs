use muster_db::entities::activity_events;
use muster_db::sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Records an admin action as an activity event. Best-effort: a failed
/// audit write is logged, never bubbled into the request outcome.
pub async fn record(
    db: &DatabaseConnection,
    tenant: &str,
    actor: &str,
    device_id: Option<i64>,
    action: &str,
    meta: Option<serde_json::Value>,
) {
    let model = activity_events::ActiveModel {
        tenant: Set(tenant.to_string()),
        device_id: Set(device_id),
        actor: Set(Some(actor.to_string())),
        ip_address: Set(None),
        action: Set(action.to_string()),
        meta: Set(meta),
        created_at: Set(chrono::Utc::now().into()),
        ..Default::default()
    };

    if let Err(err) = model.insert(db).await {
        tracing::warn!(%err, action, "failed to write activity event");
    }
}
