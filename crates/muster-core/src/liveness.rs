use chrono::{DateTime, Utc};
use muster_db::entities::{devices, heartbeats};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::Condition;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::error::CoreError;
use crate::gateway::ResolvedDevice;
use crate::registry::DeviceStatus;

#[derive(Debug, Clone, Default)]
pub struct HeartbeatReport {
    pub ip_address: Option<String>,
    pub agent_version: Option<String>,
}

/// Last-write-wins on wall clock: a delayed heartbeat must never move
/// `last_seen_at` backwards.
pub fn merge_last_seen(current: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> DateTime<Utc> {
    match current {
        Some(c) if c > incoming => c,
        _ => incoming,
    }
}

pub async fn record_heartbeat(
    db: &DatabaseConnection,
    device: &ResolvedDevice,
    report: HeartbeatReport,
) -> Result<(), CoreError> {
    touch(db, device, report, false, Utc::now()).await
}

pub async fn record_inventory(
    db: &DatabaseConnection,
    device: &ResolvedDevice,
    report: HeartbeatReport,
) -> Result<(), CoreError> {
    touch(db, device, report, true, Utc::now()).await
}

async fn touch(
    db: &DatabaseConnection,
    device: &ResolvedDevice,
    report: HeartbeatReport,
    inventory: bool,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    let last_seen = merge_last_seen(device.last_seen_at, now);

    // Conditional update so a concurrent fresher heartbeat cannot be
    // regressed by this one.
    let mut update = devices::Entity::update_many()
        .col_expr(devices::Column::LastSeenAt, Expr::value(last_seen))
        .col_expr(devices::Column::UpdatedAt, Expr::value(now))
        .filter(devices::Column::Id.eq(device.id))
        .filter(
            Condition::any()
                .add(devices::Column::LastSeenAt.is_null())
                .add(devices::Column::LastSeenAt.lte(last_seen)),
        );
    if inventory {
        update = update.col_expr(devices::Column::LastInventoryAt, Expr::value(now));
    }
    update.exec(db).await?;

    // A heartbeat is proof of liveness; approved devices come online on
    // their first one, offline devices on reconnect.
    devices::Entity::update_many()
        .col_expr(
            devices::Column::Status,
            Expr::value(DeviceStatus::Online.as_str()),
        )
        .filter(devices::Column::Id.eq(device.id))
        .filter(
            devices::Column::Status.is_in([
                DeviceStatus::Offline.as_str(),
                DeviceStatus::Approved.as_str(),
            ]),
        )
        .exec(db)
        .await?;

    heartbeats::ActiveModel {
        device_id: Set(device.id),
        tenant: Set(device.tenant.clone()),
        ip_address: Set(report.ip_address),
        agent_version: Set(report.agent_version),
        received_at: Set(now.into()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    tracing::debug!(device_id = device.id, inventory, "liveness updated");
    Ok(())
}

/// Periodic offline detection: one conditional bulk update, not a timer per
/// device. The `last_seen_at < cutoff` predicate is re-checked by the
/// database at update time, so a heartbeat landing mid-sweep wins.
pub async fn sweep_offline(
    db: &DatabaseConnection,
    cutoff: DateTime<Utc>,
) -> Result<u64, CoreError> {
    let res = devices::Entity::update_many()
        .col_expr(
            devices::Column::Status,
            Expr::value(DeviceStatus::Offline.as_str()),
        )
        .col_expr(devices::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(devices::Column::Status.eq(DeviceStatus::Online.as_str()))
        .filter(devices::Column::LastSeenAt.lt(cutoff))
        .exec(db)
        .await?;

    if res.rows_affected > 0 {
        tracing::info!(flipped = res.rows_affected, "devices marked offline");
    }
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_heartbeats_never_regress() {
        let t5 = Utc::now();
        let t10 = t5 + chrono::Duration::seconds(5);

        // Heartbeats for t=10 then t=5 arriving in reverse order.
        let after_first = merge_last_seen(None, t10);
        let after_second = merge_last_seen(Some(after_first), t5);
        assert_eq!(after_second, t10);
    }

    #[test]
    fn fresher_heartbeat_advances() {
        let t5 = Utc::now();
        let t10 = t5 + chrono::Duration::seconds(5);
        assert_eq!(merge_last_seen(Some(t5), t10), t10);
        assert_eq!(merge_last_seen(None, t5), t5);
    }
}
