use chrono::Utc;
use muster_db::entities::{device_credentials, devices, pre_registrations};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::vault::TokenVault;

/// Device lifecycle states. `online`/`offline` are owned by the liveness
/// tracker; administrators only drive approve/block/unblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Approved,
    Blocked,
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Approved => "approved",
            DeviceStatus::Blocked => "blocked",
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeviceStatus::Pending),
            "approved" => Some(DeviceStatus::Approved),
            "blocked" => Some(DeviceStatus::Blocked),
            "online" => Some(DeviceStatus::Online),
            "offline" => Some(DeviceStatus::Offline),
            _ => None,
        }
    }

    /// `approve` is only legal from `pending`.
    pub fn on_approve(self) -> Result<DeviceStatus, CoreError> {
        match self {
            DeviceStatus::Pending => Ok(DeviceStatus::Approved),
            from => Err(CoreError::InvalidTransition {
                action: "approve",
                from,
            }),
        }
    }

    /// `block` is reachable from any non-pending state. Blocking an already
    /// blocked device is rejected so a stale admin view cannot silently
    /// overwrite the recorded block reason.
    pub fn on_block(self) -> Result<DeviceStatus, CoreError> {
        match self {
            DeviceStatus::Approved | DeviceStatus::Online | DeviceStatus::Offline => {
                Ok(DeviceStatus::Blocked)
            }
            from => Err(CoreError::InvalidTransition {
                action: "block",
                from,
            }),
        }
    }

    /// Unblocking always lands in `offline`; the device has to prove
    /// liveness with a fresh heartbeat before it counts as online again.
    pub fn on_unblock(self) -> Result<DeviceStatus, CoreError> {
        match self {
            DeviceStatus::Blocked => Ok(DeviceStatus::Offline),
            from => Err(CoreError::InvalidTransition {
                action: "unblock",
                from,
            }),
        }
    }

    pub fn accepts_commands(self) -> bool {
        !matches!(self, DeviceStatus::Pending | DeviceStatus::Blocked)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn normalize_serial(serial: &str) -> String {
    serial.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub serial: String,
    pub hostname: String,
    pub mac_address: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub tenant: Option<String>,
}

pub struct Enrollment {
    pub device: devices::Model,
    /// Returned to the agent exactly once; only its hash is stored.
    pub token: String,
}

/// First contact (or re-enrollment) from a hardware serial. Creates the
/// device in `pending` (or `approved` under the auto-approve policy),
/// revokes any previous credentials, issues a fresh one, and consumes a
/// matching open pre-registration, all in one transaction.
pub async fn enroll(
    db: &DatabaseConnection,
    vault: &TokenVault,
    cfg: &CoreConfig,
    req: EnrollRequest,
) -> Result<Enrollment, CoreError> {
    let serial = normalize_serial(&req.serial);
    if serial.is_empty() {
        return Err(CoreError::Conflict("hardware serial is required".into()));
    }
    let now = Utc::now();

    let txn = db.begin().await?;

    let existing = devices::Entity::find()
        .filter(devices::Column::Serial.eq(serial.clone()))
        .one(&txn)
        .await?;

    let device = match existing {
        Some(device) => {
            let status = DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Pending);
            if status == DeviceStatus::Blocked {
                // The serial stays bound to the blocked row; re-enrollment is
                // an admin unblock away, not a fresh identity.
                return Err(CoreError::Conflict(format!(
                    "serial {serial} belongs to a blocked device"
                )));
            }

            // Re-enrollment: older credentials are revoked, never deleted.
            revoke_credentials(&txn, device.id, "re-enrollment", now).await?;

            let mut active: devices::ActiveModel = device.into();
            active.hostname = Set(req.hostname.clone());
            active.mac_address = Set(req.mac_address.clone());
            active.os_name = Set(req.os_name.clone());
            active.os_version = Set(req.os_version.clone());
            active.updated_at = Set(now.into());
            active.update(&txn).await?
        }
        None => {
            let status = if cfg.auto_approve {
                DeviceStatus::Approved
            } else {
                DeviceStatus::Pending
            };

            let device = devices::ActiveModel {
                external_id: Set(Uuid::new_v4()),
                tenant: Set(req.tenant.clone().unwrap_or_else(|| "default".to_string())),
                hostname: Set(req.hostname.clone()),
                serial: Set(serial.clone()),
                mac_address: Set(req.mac_address.clone()),
                os_name: Set(req.os_name.clone()),
                os_version: Set(req.os_version.clone()),
                status: Set(status.as_str().to_string()),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            // Consume an open pre-registration for this serial, if any,
            // atomically with device creation.
            if let Some(pre) = pre_registrations::Entity::find()
                .filter(pre_registrations::Column::Serial.eq(serial.clone()))
                .filter(pre_registrations::Column::Enrolled.eq(false))
                .one(&txn)
                .await?
            {
                let mut active: pre_registrations::ActiveModel = pre.into();
                active.enrolled = Set(true);
                active.device_id = Set(Some(device.id));
                active.enrolled_at = Set(Some(now.into()));
                active.update(&txn).await?;
            }

            device
        }
    };

    let issued = vault
        .issue(device.id, device.external_id, &device.hostname)
        .map_err(|e| CoreError::Internal(format!("token issuance failed: {e}")))?;

    device_credentials::ActiveModel {
        id: Set(Uuid::new_v4()),
        device_id: Set(device.id),
        token_hash: Set(issued.token_hash),
        created_at: Set(now.into()),
        last_used_at: Set(None),
        revoked_at: Set(None),
        revoke_reason: Set(None),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    tracing::info!(device_id = device.id, serial = %device.serial, status = %device.status, "device enrolled");

    Ok(Enrollment {
        device,
        token: issued.token,
    })
}

/// Marks every non-revoked credential of a device unusable from this
/// instant. History is preserved for the forensic trail.
pub async fn revoke_credentials<C: ConnectionTrait>(
    conn: &C,
    device_id: i64,
    reason: &str,
    now: chrono::DateTime<Utc>,
) -> Result<u64, CoreError> {
    let res = device_credentials::Entity::update_many()
        .col_expr(device_credentials::Column::RevokedAt, Expr::value(now))
        .col_expr(
            device_credentials::Column::RevokeReason,
            Expr::value(reason),
        )
        .filter(device_credentials::Column::DeviceId.eq(device_id))
        .filter(device_credentials::Column::RevokedAt.is_null())
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentState {
    Pending,
    Approved,
    Blocked,
    PreRegistered,
}

/// Unauthenticated status poll by serial, for agents that do not hold a
/// token yet. Online/offline both read as approved from the agent's side.
pub async fn enrollment_status(
    db: &DatabaseConnection,
    serial: &str,
) -> Result<EnrollmentState, CoreError> {
    let serial = normalize_serial(serial);

    if let Some(device) = devices::Entity::find()
        .filter(devices::Column::Serial.eq(serial.clone()))
        .one(db)
        .await?
    {
        let state = match DeviceStatus::parse(&device.status) {
            Some(DeviceStatus::Pending) => EnrollmentState::Pending,
            Some(DeviceStatus::Blocked) => EnrollmentState::Blocked,
            _ => EnrollmentState::Approved,
        };
        return Ok(state);
    }

    if pre_registrations::Entity::find()
        .filter(pre_registrations::Column::Serial.eq(serial))
        .filter(pre_registrations::Column::Enrolled.eq(false))
        .one(db)
        .await?
        .is_some()
    {
        return Ok(EnrollmentState::PreRegistered);
    }

    Err(CoreError::NotFound("device"))
}

pub async fn find_by_external_id(
    db: &DatabaseConnection,
    external_id: Uuid,
) -> Result<devices::Model, CoreError> {
    devices::Entity::find()
        .filter(devices::Column::ExternalId.eq(external_id))
        .one(db)
        .await?
        .ok_or(CoreError::NotFound("device"))
}

pub async fn list_devices(db: &DatabaseConnection) -> Result<Vec<devices::Model>, CoreError> {
    Ok(devices::Entity::find()
        .order_by_desc(devices::Column::LastSeenAt)
        .all(db)
        .await?)
}

pub async fn approve(
    db: &DatabaseConnection,
    external_id: Uuid,
    actor: &str,
) -> Result<devices::Model, CoreError> {
    let device = find_by_external_id(db, external_id).await?;
    let from = DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Pending);
    let to = from.on_approve()?;
    let now = Utc::now();

    let mut active: devices::ActiveModel = device.into();
    active.status = Set(to.as_str().to_string());
    active.approved_by = Set(Some(actor.to_string()));
    active.approved_at = Set(Some(now.into()));
    active.updated_at = Set(now.into());
    let device = active.update(db).await?;

    tracing::info!(device_id = device.id, actor, "device approved");
    Ok(device)
}

/// Blocks the device and revokes its credentials in one transaction, so a
/// blocked device can never hold an accepted credential.
pub async fn block(
    db: &DatabaseConnection,
    external_id: Uuid,
    actor: &str,
    reason: &str,
) -> Result<devices::Model, CoreError> {
    if reason.trim().is_empty() {
        return Err(CoreError::Conflict("a block reason is required".into()));
    }

    let device = find_by_external_id(db, external_id).await?;
    let from = DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Pending);
    let to = from.on_block()?;
    let now = Utc::now();

    let txn = db.begin().await?;
    revoke_credentials(&txn, device.id, &format!("device blocked: {reason}"), now).await?;

    let device_id = device.id;
    let mut active: devices::ActiveModel = device.into();
    active.status = Set(to.as_str().to_string());
    active.blocked_by = Set(Some(actor.to_string()));
    active.blocked_at = Set(Some(now.into()));
    active.block_reason = Set(Some(reason.to_string()));
    active.updated_at = Set(now.into());
    let device = active.update(&txn).await?;
    txn.commit().await?;

    tracing::warn!(device_id, actor, reason, "device blocked");
    Ok(device)
}

pub async fn unblock(
    db: &DatabaseConnection,
    external_id: Uuid,
    actor: &str,
) -> Result<devices::Model, CoreError> {
    let device = find_by_external_id(db, external_id).await?;
    let from = DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Pending);
    let to = from.on_unblock()?;
    let now = Utc::now();

    let mut active: devices::ActiveModel = device.into();
    active.status = Set(to.as_str().to_string());
    active.blocked_by = Set(None);
    active.blocked_at = Set(None);
    active.block_reason = Set(None);
    active.updated_at = Set(now.into());
    let device = active.update(db).await?;

    tracing::info!(device_id = device.id, actor, "device unblocked");
    Ok(device)
}

/// Registers a serial ahead of first contact. At most one open
/// pre-registration per serial; consumed exactly once at enrollment.
pub async fn pre_register(
    db: &DatabaseConnection,
    serial: &str,
    description: Option<String>,
    registered_by: &str,
) -> Result<pre_registrations::Model, CoreError> {
    let serial = normalize_serial(serial);
    if serial.is_empty() {
        return Err(CoreError::Conflict("hardware serial is required".into()));
    }

    if devices::Entity::find()
        .filter(devices::Column::Serial.eq(serial.clone()))
        .one(db)
        .await?
        .is_some()
    {
        return Err(CoreError::Conflict(format!(
            "serial {serial} is already enrolled"
        )));
    }

    if pre_registrations::Entity::find()
        .filter(pre_registrations::Column::Serial.eq(serial.clone()))
        .filter(pre_registrations::Column::Enrolled.eq(false))
        .one(db)
        .await?
        .is_some()
    {
        return Err(CoreError::Conflict(format!(
            "serial {serial} already has an open pre-registration"
        )));
    }

    let row = pre_registrations::ActiveModel {
        id: Set(Uuid::new_v4()),
        serial: Set(serial),
        description: Set(description),
        registered_by: Set(registered_by.to_string()),
        enrolled: Set(false),
        device_id: Set(None),
        created_at: Set(Utc::now().into()),
        enrolled_at: Set(None),
    }
    .insert(db)
    .await?;

    Ok(row)
}

pub async fn list_pre_registrations(
    db: &DatabaseConnection,
) -> Result<Vec<pre_registrations::Model>, CoreError> {
    Ok(pre_registrations::Entity::find()
        .order_by_desc(pre_registrations::Column::CreatedAt)
        .all(db)
        .await?)
}

pub async fn delete_pre_registration(db: &DatabaseConnection, id: Uuid) -> Result<(), CoreError> {
    let row = pre_registrations::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or(CoreError::NotFound("pre-registration"))?;

    if row.enrolled {
        return Err(CoreError::Conflict(
            "pre-registration already consumed by an enrollment".into(),
        ));
    }

    pre_registrations::Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn test_vault() -> TokenVault {
        TokenVault::new(b"test-secret".to_vec(), chrono::Duration::days(1))
    }

    fn enroll_request(serial: &str) -> EnrollRequest {
        EnrollRequest {
            serial: serial.to_string(),
            hostname: "host-01".to_string(),
            mac_address: None,
            os_name: None,
            os_version: None,
            tenant: None,
        }
    }

    fn device_row(id: i64, status: &str) -> devices::Model {
        let now = Utc::now();
        devices::Model {
            id,
            external_id: Uuid::new_v4(),
            tenant: "default".to_string(),
            hostname: "host-01".to_string(),
            serial: "ABC1234".to_string(),
            mac_address: None,
            os_name: None,
            os_version: None,
            status: status.to_string(),
            last_seen_at: None,
            last_inventory_at: None,
            approved_by: None,
            approved_at: None,
            blocked_by: None,
            blocked_at: None,
            block_reason: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn credential_row(device_id: i64) -> device_credentials::Model {
        device_credentials::Model {
            id: Uuid::new_v4(),
            device_id,
            token_hash: "0".repeat(64),
            created_at: Utc::now().into(),
            last_used_at: None,
            revoked_at: None,
            revoke_reason: None,
        }
    }

    #[tokio::test]
    async fn enrollment_consumes_open_pre_registration() {
        let now = Utc::now();
        let device = device_row(7, "pending");
        let open = pre_registrations::Model {
            id: Uuid::new_v4(),
            serial: "ABC1234".to_string(),
            description: None,
            registered_by: "admin".to_string(),
            enrolled: false,
            device_id: None,
            created_at: now.into(),
            enrolled_at: None,
        };
        let mut consumed = open.clone();
        consumed.enrolled = true;
        consumed.device_id = Some(7);
        consumed.enrolled_at = Some(now.into());

        // One result set per statement, in enrollment order: serial lookup
        // (miss), device insert, pre-registration lookup (hit), its update,
        // credential insert. A skipped step would desynchronize the queue
        // and fail the typed decode below.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<devices::Model>::new()])
            .append_query_results([vec![device]])
            .append_query_results([vec![open]])
            .append_query_results([vec![consumed]])
            .append_query_results([vec![credential_row(7)]])
            .into_connection();

        let enrollment = enroll(&db, &test_vault(), &CoreConfig::from_env(), enroll_request("abc1234"))
            .await
            .unwrap();

        assert_eq!(enrollment.device.serial, "ABC1234");
        assert_eq!(enrollment.device.status, "pending");
        let claims = test_vault().verify(&enrollment.token).unwrap();
        assert_eq!(claims.device_id(), Some(7));
    }

    #[tokio::test]
    async fn re_enrollment_revokes_previous_credentials() {
        let existing = device_row(7, "approved");
        let mut refreshed = existing.clone();
        refreshed.hostname = "host-02".to_string();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![existing]])
            .append_query_results([vec![refreshed]])
            .append_query_results([vec![credential_row(7)]])
            // The revoke-previous-credentials bulk update.
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let mut req = enroll_request("ABC1234");
        req.hostname = "host-02".to_string();
        let enrollment = enroll(&db, &test_vault(), &CoreConfig::from_env(), req)
            .await
            .unwrap();

        assert_eq!(enrollment.device.hostname, "host-02");
        assert!(test_vault().verify(&enrollment.token).is_ok());
    }

    #[tokio::test]
    async fn enrolling_a_blocked_serial_is_a_conflict() {
        let mut blocked = device_row(7, "blocked");
        blocked.block_reason = Some("reported stolen".to_string());

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![blocked]])
            .into_connection();

        match enroll(&db, &test_vault(), &CoreConfig::from_env(), enroll_request("ABC1234")).await {
            Err(CoreError::Conflict(msg)) => assert!(msg.contains("blocked")),
            Err(other) => panic!("expected Conflict, got {other:?}"),
            Ok(_) => panic!("expected Conflict, got a fresh credential"),
        }
    }

    #[test]
    fn approve_only_from_pending() {
        assert_eq!(
            DeviceStatus::Pending.on_approve().unwrap(),
            DeviceStatus::Approved
        );
        for from in [
            DeviceStatus::Approved,
            DeviceStatus::Blocked,
            DeviceStatus::Online,
            DeviceStatus::Offline,
        ] {
            let err = from.on_approve().unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidTransition { action: "approve", from: f } if f == from)
            );
        }
    }

    #[test]
    fn block_from_any_non_pending_state() {
        for from in [
            DeviceStatus::Approved,
            DeviceStatus::Online,
            DeviceStatus::Offline,
        ] {
            assert_eq!(from.on_block().unwrap(), DeviceStatus::Blocked);
        }
        assert!(DeviceStatus::Pending.on_block().is_err());
        assert!(DeviceStatus::Blocked.on_block().is_err());
    }

    #[test]
    fn unblock_lands_in_offline_not_online() {
        assert_eq!(
            DeviceStatus::Blocked.on_unblock().unwrap(),
            DeviceStatus::Offline
        );
        for from in [
            DeviceStatus::Pending,
            DeviceStatus::Approved,
            DeviceStatus::Online,
            DeviceStatus::Offline,
        ] {
            assert!(from.on_unblock().is_err());
        }
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            DeviceStatus::Pending,
            DeviceStatus::Approved,
            DeviceStatus::Blocked,
            DeviceStatus::Online,
            DeviceStatus::Offline,
        ] {
            assert_eq!(DeviceStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DeviceStatus::parse("weird"), None);
    }

    #[test]
    fn command_channel_requires_trusted_status() {
        assert!(!DeviceStatus::Pending.accepts_commands());
        assert!(!DeviceStatus::Blocked.accepts_commands());
        assert!(DeviceStatus::Approved.accepts_commands());
        assert!(DeviceStatus::Online.accepts_commands());
        assert!(DeviceStatus::Offline.accepts_commands());
    }

    #[test]
    fn serials_are_case_insensitive() {
        assert_eq!(normalize_serial("  abc1234 "), "ABC1234");
        assert_eq!(normalize_serial("ABC1234"), "ABC1234");
    }
}
