use chrono::{DateTime, Duration, Utc};
use muster_db::entities::{
    activity_events, commands, device_credentials, devices, heartbeats, pre_registrations,
    retention_policies,
};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{Condition, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;

/// Per-tenant retention thresholds, in days. Rows older than the retention
/// days are deleted; rows older than the anonymize days but younger than
/// deletion get their PII replaced instead.
#[derive(Debug, Clone, Serialize)]
pub struct RetentionThresholds {
    pub heartbeat_retention_days: i32,
    pub activity_retention_days: i32,
    pub ip_anonymize_after_days: i32,
    pub user_anonymize_after_days: i32,
}

impl From<retention_policies::Model> for RetentionThresholds {
    fn from(m: retention_policies::Model) -> Self {
        Self {
            heartbeat_retention_days: m.heartbeat_retention_days,
            activity_retention_days: m.activity_retention_days,
            ip_anonymize_after_days: m.ip_anonymize_after_days,
            user_anonymize_after_days: m.user_anonymize_after_days,
        }
    }
}

/// Masks an IP to a form that keeps coarse network locality for aggregate
/// statistics while dropping the host part. Already-masked values pass
/// through unchanged, which is what makes the sweep re-runnable.
pub fn mask_ip(ip: &str) -> String {
    if is_masked_ip(ip) {
        return ip.to_string();
    }
    if ip.contains(':') {
        let head = ip.split(':').next().unwrap_or("");
        return format!("{head}::x");
    }
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() == 4 {
        return format!("{}.{}.x.x", octets[0], octets[1]);
    }
    // Unparseable input still loses its PII.
    "x.x.x.x".to_string()
}

pub fn is_masked_ip(ip: &str) -> bool {
    ip.ends_with(".x.x") || ip.ends_with("::x")
}

/// Stable anonymous identifier: the same username always maps to the same
/// replacement, so per-user aggregate counts survive anonymization.
pub fn anonymize_actor(actor: &str) -> String {
    if is_anonymous_actor(actor) {
        return actor.to_string();
    }
    use sha2::Digest;
    let mut hasher = sha2::Sha256::new();
    hasher.update(actor.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("anon-{}", &digest[..12])
}

pub fn is_anonymous_actor(actor: &str) -> bool {
    actor.starts_with("anon-")
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepOutcome {
    pub heartbeats_deleted: u64,
    pub activity_deleted: u64,
    pub ips_anonymized: u64,
    pub actors_anonymized: u64,
}

enum TenantScope {
    Named(String),
    /// Tenants with no stored policy row; swept with the defaults.
    Except(Vec<String>),
}

impl TenantScope {
    fn condition<C: ColumnTrait>(&self, col: C) -> Condition {
        match self {
            TenantScope::Named(t) => Condition::all().add(col.eq(t.clone())),
            TenantScope::Except(ts) if ts.is_empty() => Condition::all(),
            TenantScope::Except(ts) => Condition::all().add(col.is_not_in(ts.clone())),
        }
    }
}

/// One full retention pass over every tenant. Deletes and anonymizations
/// run in bounded batches, each committing on its own, so the sweep never
/// holds a long transaction against heartbeat or command traffic.
/// Re-running on an unchanged dataset is a no-op.
pub async fn run_sweep(
    db: &DatabaseConnection,
    defaults: &RetentionThresholds,
    batch: u64,
) -> Result<SweepOutcome, CoreError> {
    let now = Utc::now();
    let policies = retention_policies::Entity::find().all(db).await?;
    let named: Vec<String> = policies.iter().map(|p| p.tenant.clone()).collect();

    let mut scopes: Vec<(TenantScope, RetentionThresholds)> = policies
        .into_iter()
        .map(|p| {
            let tenant = p.tenant.clone();
            (TenantScope::Named(tenant), RetentionThresholds::from(p))
        })
        .collect();
    scopes.push((TenantScope::Except(named), defaults.clone()));

    let mut outcome = SweepOutcome::default();
    for (scope, thresholds) in &scopes {
        sweep_scope(db, scope, thresholds, batch, now, &mut outcome).await?;
    }

    tracing::info!(
        heartbeats_deleted = outcome.heartbeats_deleted,
        activity_deleted = outcome.activity_deleted,
        ips_anonymized = outcome.ips_anonymized,
        actors_anonymized = outcome.actors_anonymized,
        "retention sweep finished"
    );
    Ok(outcome)
}

async fn sweep_scope(
    db: &DatabaseConnection,
    scope: &TenantScope,
    thresholds: &RetentionThresholds,
    batch: u64,
    now: DateTime<Utc>,
    outcome: &mut SweepOutcome,
) -> Result<(), CoreError> {
    let hb_cutoff = now - Duration::days(thresholds.heartbeat_retention_days as i64);
    let act_cutoff = now - Duration::days(thresholds.activity_retention_days as i64);
    let ip_cutoff = now - Duration::days(thresholds.ip_anonymize_after_days as i64);
    let user_cutoff = now - Duration::days(thresholds.user_anonymize_after_days as i64);

    // Anonymize before deleting so rows in the in-between window are
    // scrubbed even when both thresholds trip in the same run.
    outcome.ips_anonymized += anonymize_heartbeat_ips(db, scope, ip_cutoff, batch).await?;
    outcome.ips_anonymized += anonymize_activity_ips(db, scope, ip_cutoff, batch).await?;
    outcome.actors_anonymized += anonymize_activity_actors(db, scope, user_cutoff, batch).await?;

    outcome.heartbeats_deleted += delete_batched(
        db,
        scope.condition(heartbeats::Column::Tenant)
            .add(heartbeats::Column::ReceivedAt.lt(hb_cutoff)),
        batch,
        DeleteTarget::Heartbeats,
    )
    .await?;
    outcome.activity_deleted += delete_batched(
        db,
        scope.condition(activity_events::Column::Tenant)
            .add(activity_events::Column::CreatedAt.lt(act_cutoff)),
        batch,
        DeleteTarget::ActivityEvents,
    )
    .await?;

    Ok(())
}

enum DeleteTarget {
    Heartbeats,
    ActivityEvents,
}

/// Postgres DELETE has no LIMIT, so each batch deletes the ids of a bounded
/// subselect. Every exec is its own statement/commit.
async fn delete_batched(
    db: &DatabaseConnection,
    cond: Condition,
    batch: u64,
    target: DeleteTarget,
) -> Result<u64, CoreError> {
    let mut total = 0u64;
    loop {
        let rows_affected = match target {
            DeleteTarget::Heartbeats => {
                let sub = Query::select()
                    .column(heartbeats::Column::Id)
                    .from(heartbeats::Entity)
                    .cond_where(cond.clone())
                    .limit(batch)
                    .to_owned();
                heartbeats::Entity::delete_many()
                    .filter(Expr::col((heartbeats::Entity, heartbeats::Column::Id)).in_subquery(sub))
                    .exec(db)
                    .await?
                    .rows_affected
            }
            DeleteTarget::ActivityEvents => {
                let sub = Query::select()
                    .column(activity_events::Column::Id)
                    .from(activity_events::Entity)
                    .cond_where(cond.clone())
                    .limit(batch)
                    .to_owned();
                activity_events::Entity::delete_many()
                    .filter(
                        Expr::col((activity_events::Entity, activity_events::Column::Id))
                            .in_subquery(sub),
                    )
                    .exec(db)
                    .await?
                    .rows_affected
            }
        };

        total += rows_affected;
        if rows_affected < batch {
            break;
        }
    }
    Ok(total)
}

async fn anonymize_heartbeat_ips(
    db: &DatabaseConnection,
    scope: &TenantScope,
    cutoff: DateTime<Utc>,
    batch: u64,
) -> Result<u64, CoreError> {
    let mut total = 0u64;
    loop {
        // The not-like filters exclude already-masked rows, which is what
        // bounds the loop and keeps re-runs no-ops.
        let rows = heartbeats::Entity::find()
            .filter(
                scope
                    .condition(heartbeats::Column::Tenant)
                    .add(heartbeats::Column::ReceivedAt.lt(cutoff))
                    .add(heartbeats::Column::IpAddress.is_not_null())
                    .add(heartbeats::Column::IpAddress.not_like("%.x.x"))
                    .add(heartbeats::Column::IpAddress.not_like("%::x")),
            )
            .limit(batch)
            .all(db)
            .await?;

        let fetched = rows.len() as u64;
        let mut progressed = 0u64;
        for row in rows {
            let id = row.id;
            let masked = row.ip_address.as_deref().map(mask_ip);
            let mut active: heartbeats::ActiveModel = row.into();
            active.ip_address = Set(masked);
            match active.update(db).await {
                Ok(_) => progressed += 1,
                Err(err) => {
                    tracing::warn!(%err, heartbeat_id = id, "failed to anonymize heartbeat ip")
                }
            }
        }

        total += progressed;
        if fetched < batch || progressed == 0 {
            break;
        }
    }
    Ok(total)
}

async fn anonymize_activity_ips(
    db: &DatabaseConnection,
    scope: &TenantScope,
    cutoff: DateTime<Utc>,
    batch: u64,
) -> Result<u64, CoreError> {
    let mut total = 0u64;
    loop {
        let rows = activity_events::Entity::find()
            .filter(
                scope
                    .condition(activity_events::Column::Tenant)
                    .add(activity_events::Column::CreatedAt.lt(cutoff))
                    .add(activity_events::Column::IpAddress.is_not_null())
                    .add(activity_events::Column::IpAddress.not_like("%.x.x"))
                    .add(activity_events::Column::IpAddress.not_like("%::x")),
            )
            .limit(batch)
            .all(db)
            .await?;

        let fetched = rows.len() as u64;
        let mut progressed = 0u64;
        for row in rows {
            let id = row.id;
            let masked = row.ip_address.as_deref().map(mask_ip);
            let mut active: activity_events::ActiveModel = row.into();
            active.ip_address = Set(masked);
            match active.update(db).await {
                Ok(_) => progressed += 1,
                Err(err) => tracing::warn!(%err, event_id = id, "failed to anonymize event ip"),
            }
        }

        total += progressed;
        if fetched < batch || progressed == 0 {
            break;
        }
    }
    Ok(total)
}

async fn anonymize_activity_actors(
    db: &DatabaseConnection,
    scope: &TenantScope,
    cutoff: DateTime<Utc>,
    batch: u64,
) -> Result<u64, CoreError> {
    let mut total = 0u64;
    loop {
        let rows = activity_events::Entity::find()
            .filter(
                scope
                    .condition(activity_events::Column::Tenant)
                    .add(activity_events::Column::CreatedAt.lt(cutoff))
                    .add(activity_events::Column::Actor.is_not_null())
                    .add(activity_events::Column::Actor.not_like("anon-%")),
            )
            .limit(batch)
            .all(db)
            .await?;

        let fetched = rows.len() as u64;
        let mut progressed = 0u64;
        for row in rows {
            let id = row.id;
            let anon = row.actor.as_deref().map(anonymize_actor);
            let mut active: activity_events::ActiveModel = row.into();
            active.actor = Set(anon);
            match active.update(db).await {
                Ok(_) => progressed += 1,
                Err(err) => tracing::warn!(%err, event_id = id, "failed to anonymize actor"),
            }
        }

        total += progressed;
        if fetched < batch || progressed == 0 {
            break;
        }
    }
    Ok(total)
}

#[derive(Debug, Serialize)]
pub struct RetentionStatus {
    pub heartbeat_rows: u64,
    pub activity_rows: u64,
    pub oldest_heartbeat_at: Option<DateTime<Utc>>,
    pub oldest_activity_at: Option<DateTime<Utc>>,
    pub policies: Vec<retention_policies::Model>,
}

pub async fn status(db: &DatabaseConnection) -> Result<RetentionStatus, CoreError> {
    let heartbeat_rows = heartbeats::Entity::find().count(db).await?;
    let activity_rows = activity_events::Entity::find().count(db).await?;
    let oldest_heartbeat_at = heartbeats::Entity::find()
        .order_by_asc(heartbeats::Column::ReceivedAt)
        .one(db)
        .await?
        .map(|h| h.received_at.to_utc());
    let oldest_activity_at = activity_events::Entity::find()
        .order_by_asc(activity_events::Column::CreatedAt)
        .one(db)
        .await?
        .map(|e| e.created_at.to_utc());
    let policies = retention_policies::Entity::find().all(db).await?;

    Ok(RetentionStatus {
        heartbeat_rows,
        activity_rows,
        oldest_heartbeat_at,
        oldest_activity_at,
        policies,
    })
}

/// Data-subject export: everything the store holds about one device, as
/// JSON. Credentials are omitted; they contain only hashes, not PII.
pub async fn export_device(
    db: &DatabaseConnection,
    external_id: Uuid,
) -> Result<serde_json::Value, CoreError> {
    let device = crate::registry::find_by_external_id(db, external_id).await?;

    let heartbeat_rows = heartbeats::Entity::find()
        .filter(heartbeats::Column::DeviceId.eq(device.id))
        .order_by_asc(heartbeats::Column::ReceivedAt)
        .all(db)
        .await?;
    let activity_rows = activity_events::Entity::find()
        .filter(activity_events::Column::DeviceId.eq(device.id))
        .order_by_asc(activity_events::Column::CreatedAt)
        .all(db)
        .await?;
    let command_rows = commands::Entity::find()
        .filter(commands::Column::DeviceId.eq(device.id))
        .order_by_asc(commands::Column::CreatedAt)
        .all(db)
        .await?;
    let pre_registration = pre_registrations::Entity::find()
        .filter(pre_registrations::Column::DeviceId.eq(device.id))
        .one(db)
        .await?;

    Ok(serde_json::json!({
        "device": device,
        "heartbeats": heartbeat_rows,
        "activity_events": activity_rows,
        "commands": command_rows,
        "pre_registration": pre_registration,
    }))
}

/// Data-subject erasure: hard-deletes every row tied to the device,
/// including the device itself, in one transaction.
pub async fn erase_device(db: &DatabaseConnection, external_id: Uuid) -> Result<(), CoreError> {
    let device = crate::registry::find_by_external_id(db, external_id).await?;
    let device_id = device.id;

    let txn = db.begin().await?;
    heartbeats::Entity::delete_many()
        .filter(heartbeats::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    activity_events::Entity::delete_many()
        .filter(activity_events::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    commands::Entity::delete_many()
        .filter(commands::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    pre_registrations::Entity::delete_many()
        .filter(pre_registrations::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    device_credentials::Entity::delete_many()
        .filter(device_credentials::Column::DeviceId.eq(device_id))
        .exec(&txn)
        .await?;
    devices::Entity::delete_by_id(device_id).exec(&txn).await?;
    txn.commit().await?;

    tracing::warn!(device_id, "device erased on request");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn sweep_rerun_on_scrubbed_data_is_a_noop() {
        let now = Utc::now();
        let stale = heartbeats::Model {
            id: 1,
            device_id: 7,
            tenant: "default".to_string(),
            ip_address: Some("203.0.113.7".to_string()),
            agent_version: None,
            received_at: (now - Duration::days(40)).into(),
        };
        let mut scrubbed = stale.clone();
        scrubbed.ip_address = Some("203.0.x.x".to_string());

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            // First pass: no policy rows, one heartbeat ip to mask, nothing
            // in activity events.
            .append_query_results([Vec::<retention_policies::Model>::new()])
            .append_query_results([vec![stale]])
            .append_query_results([vec![scrubbed]])
            .append_query_results([
                Vec::<activity_events::Model>::new(),
                Vec::<activity_events::Model>::new(),
            ])
            // Second pass: the not-like guards match nothing anymore.
            .append_query_results([Vec::<retention_policies::Model>::new()])
            .append_query_results([Vec::<heartbeats::Model>::new()])
            .append_query_results([
                Vec::<activity_events::Model>::new(),
                Vec::<activity_events::Model>::new(),
            ])
            .append_exec_results([
                // First pass deletes two lapsed heartbeats, no activity rows.
                MockExecResult { last_insert_id: 0, rows_affected: 2 },
                MockExecResult { last_insert_id: 0, rows_affected: 0 },
                // Second pass finds nothing left to delete.
                MockExecResult { last_insert_id: 0, rows_affected: 0 },
                MockExecResult { last_insert_id: 0, rows_affected: 0 },
            ])
            .into_connection();

        let defaults = RetentionThresholds {
            heartbeat_retention_days: 90,
            activity_retention_days: 180,
            ip_anonymize_after_days: 30,
            user_anonymize_after_days: 60,
        };

        let first = run_sweep(&db, &defaults, 50).await.unwrap();
        assert_eq!(first.ips_anonymized, 1);
        assert_eq!(first.heartbeats_deleted, 2);
        assert_eq!(first.activity_deleted, 0);
        assert_eq!(first.actors_anonymized, 0);

        let second = run_sweep(&db, &defaults, 50).await.unwrap();
        assert_eq!(second.ips_anonymized, 0);
        assert_eq!(second.heartbeats_deleted, 0);
        assert_eq!(second.activity_deleted, 0);
        assert_eq!(second.actors_anonymized, 0);
    }

    #[test]
    fn ipv4_keeps_network_half() {
        assert_eq!(mask_ip("203.0.113.7"), "203.0.x.x");
    }

    #[test]
    fn ipv6_keeps_leading_group() {
        assert_eq!(mask_ip("2001:db8::7334"), "2001::x");
    }

    #[test]
    fn garbage_is_fully_masked() {
        assert_eq!(mask_ip("not-an-ip"), "x.x.x.x");
    }

    #[test]
    fn masking_is_idempotent() {
        let once = mask_ip("203.0.113.7");
        assert_eq!(mask_ip(&once), once);
        assert!(is_masked_ip(&once));
        let v6 = mask_ip("2001:db8::7334");
        assert_eq!(mask_ip(&v6), v6);
    }

    #[test]
    fn actor_anonymization_is_stable_and_idempotent() {
        let a = anonymize_actor("maria.silva");
        let b = anonymize_actor("maria.silva");
        assert_eq!(a, b);
        assert!(a.starts_with("anon-"));
        assert_ne!(a, anonymize_actor("joao.santos"));
        // Re-anonymizing an already-anonymized value is a no-op.
        assert_eq!(anonymize_actor(&a), a);
    }

    #[test]
    fn anonymous_marker_detection() {
        assert!(is_anonymous_actor("anon-1a2b3c4d5e6f"));
        assert!(!is_anonymous_actor("maria.silva"));
    }
}
