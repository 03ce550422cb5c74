use chrono::{DateTime, Utc};
use muster_db::entities::commands;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::registry::DeviceStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Success,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Success => "success",
            CommandStatus::Failed => "failed",
            CommandStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CommandStatus::Pending),
            "success" => Some(CommandStatus::Success),
            "failed" => Some(CommandStatus::Failed),
            "expired" => Some(CommandStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

/// Terminal statuses an agent may report. Expiry is never reported; it is
/// decided server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Success,
    Failed,
}

impl ReportedStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ReportedStatus::Success),
            "failed" => Some(ReportedStatus::Failed),
            _ => None,
        }
    }

    fn as_command_status(self) -> CommandStatus {
        match self {
            ReportedStatus::Success => CommandStatus::Success,
            ReportedStatus::Failed => CommandStatus::Failed,
        }
    }
}

/// A command is visible to its agent only while pending and unexpired.
/// This predicate, not the background sweep, is the source of truth.
pub fn is_visible(cmd: &commands::Model, now: DateTime<Utc>) -> bool {
    cmd.status == CommandStatus::Pending.as_str() && cmd.expires_at.to_utc() > now
}

pub async fn enqueue(
    db: &DatabaseConnection,
    device_id: i64,
    device_status: DeviceStatus,
    command_type: &str,
    payload: serde_json::Value,
    created_by: &str,
    ttl: chrono::Duration,
) -> Result<commands::Model, CoreError> {
    if !device_status.accepts_commands() {
        return Err(CoreError::Conflict(format!(
            "cannot queue a command for a {device_status} device"
        )));
    }
    if command_type.trim().is_empty() {
        return Err(CoreError::Conflict("command type is required".into()));
    }

    let now = Utc::now();
    let cmd = commands::ActiveModel {
        id: Set(Uuid::new_v4()),
        device_id: Set(device_id),
        command_type: Set(command_type.to_string()),
        payload: Set(payload),
        created_by: Set(created_by.to_string()),
        created_at: Set(now.into()),
        expires_at: Set((now + ttl).into()),
        status: Set(CommandStatus::Pending.as_str().to_string()),
        result_payload: Set(None),
        reported_at: Set(None),
    }
    .insert(db)
    .await?;

    tracing::info!(command_id = %cmd.id, device_id, command_type, "command queued");
    Ok(cmd)
}

/// The agent's only view of pending work: this device's unexpired,
/// unexecuted commands, oldest first.
pub async fn poll(
    db: &DatabaseConnection,
    device_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<commands::Model>, CoreError> {
    Ok(commands::Entity::find()
        .filter(commands::Column::DeviceId.eq(device_id))
        .filter(commands::Column::Status.eq(CommandStatus::Pending.as_str()))
        .filter(commands::Column::ExpiresAt.gt(now))
        .order_by_asc(commands::Column::CreatedAt)
        .all(db)
        .await?)
}

/// Why a result report against an existing command row was refused.
/// Factored out so the taxonomy is testable without a database.
pub fn classify_stale_report(
    cmd: &commands::Model,
    device_id: i64,
    now: DateTime<Utc>,
) -> CoreError {
    if cmd.device_id != device_id {
        // Another device's command id; to this agent it does not exist.
        return CoreError::NotFound("command");
    }
    match CommandStatus::parse(&cmd.status) {
        Some(CommandStatus::Pending) if cmd.expires_at.to_utc() <= now => {
            CoreError::StaleOperation("command expired before the result arrived".into())
        }
        Some(s) if s.is_terminal() => {
            CoreError::StaleOperation(format!("command already terminal ({s})", s = s.as_str()))
        }
        _ => CoreError::Internal("concurrent report lost the race".into()),
    }
}

/// Records the agent-reported terminal status. The conditional update is
/// the correctness guard: a late result from a reconnecting agent can never
/// resurrect an expired or already-terminal command.
pub async fn report_result(
    db: &DatabaseConnection,
    device_id: i64,
    command_id: Uuid,
    status: ReportedStatus,
    result_payload: Option<serde_json::Value>,
) -> Result<commands::Model, CoreError> {
    let now = Utc::now();

    let res = commands::Entity::update_many()
        .col_expr(
            commands::Column::Status,
            Expr::value(status.as_command_status().as_str()),
        )
        .col_expr(commands::Column::ResultPayload, Expr::value(result_payload))
        .col_expr(commands::Column::ReportedAt, Expr::value(now))
        .filter(commands::Column::Id.eq(command_id))
        .filter(commands::Column::DeviceId.eq(device_id))
        .filter(commands::Column::Status.eq(CommandStatus::Pending.as_str()))
        .filter(commands::Column::ExpiresAt.gt(now))
        .exec(db)
        .await?;

    let cmd = commands::Entity::find_by_id(command_id)
        .one(db)
        .await?
        .ok_or(CoreError::NotFound("command"))?;

    if res.rows_affected == 0 {
        return Err(classify_stale_report(&cmd, device_id, now));
    }

    tracing::info!(command_id = %command_id, device_id, status = %cmd.status, "command result recorded");
    Ok(cmd)
}

pub async fn list_for_device(
    db: &DatabaseConnection,
    device_id: i64,
) -> Result<Vec<commands::Model>, CoreError> {
    Ok(commands::Entity::find()
        .filter(commands::Column::DeviceId.eq(device_id))
        .order_by_desc(commands::Column::CreatedAt)
        .all(db)
        .await?)
}

/// Marks lapsed pending commands `expired` so poll stays cheap at scale.
/// Purely an optimization; `poll` filters on expiry regardless.
pub async fn sweep_expired(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<u64, CoreError> {
    let res = commands::Entity::update_many()
        .col_expr(
            commands::Column::Status,
            Expr::value(CommandStatus::Expired.as_str()),
        )
        .filter(commands::Column::Status.eq(CommandStatus::Pending.as_str()))
        .filter(commands::Column::ExpiresAt.lte(now))
        .exec(db)
        .await?;

    if res.rows_affected > 0 {
        tracing::info!(expired = res.rows_affected, "pending commands expired");
    }
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn command(status: CommandStatus, expires_in_secs: i64) -> commands::Model {
        let now = Utc::now();
        commands::Model {
            id: Uuid::new_v4(),
            device_id: 7,
            command_type: "collect-logs".to_string(),
            payload: serde_json::json!({}),
            created_by: "admin".to_string(),
            created_at: now.into(),
            expires_at: (now + chrono::Duration::seconds(expires_in_secs)).into(),
            status: status.as_str().to_string(),
            result_payload: None,
            reported_at: None,
        }
    }

    #[test]
    fn only_pending_unexpired_commands_are_visible() {
        let now = Utc::now();
        assert!(is_visible(&command(CommandStatus::Pending, 60), now));
        assert!(!is_visible(&command(CommandStatus::Pending, -1), now));
        assert!(!is_visible(&command(CommandStatus::Success, 60), now));
        assert!(!is_visible(&command(CommandStatus::Expired, 60), now));
    }

    #[test]
    fn second_report_is_stale_not_not_found() {
        let now = Utc::now();
        let done = command(CommandStatus::Success, 60);
        match classify_stale_report(&done, 7, now) {
            CoreError::StaleOperation(msg) => assert!(msg.contains("terminal")),
            other => panic!("expected StaleOperation, got {other:?}"),
        }
    }

    #[test]
    fn late_report_against_expired_command_is_stale() {
        let now = Utc::now();
        let lapsed = command(CommandStatus::Pending, -60);
        match classify_stale_report(&lapsed, 7, now) {
            CoreError::StaleOperation(msg) => assert!(msg.contains("expired")),
            other => panic!("expected StaleOperation, got {other:?}"),
        }
    }

    #[test]
    fn another_devices_command_reads_as_unknown() {
        let now = Utc::now();
        let cmd = command(CommandStatus::Pending, 60);
        assert!(matches!(
            classify_stale_report(&cmd, 8, now),
            CoreError::NotFound("command")
        ));
    }

    #[test]
    fn reported_status_excludes_expired() {
        assert_eq!(ReportedStatus::parse("success"), Some(ReportedStatus::Success));
        assert_eq!(ReportedStatus::parse("failed"), Some(ReportedStatus::Failed));
        assert_eq!(ReportedStatus::parse("expired"), None);
        assert_eq!(ReportedStatus::parse("pending"), None);
    }

    #[tokio::test]
    async fn expired_command_absent_from_poll_after_sweep() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<commands::Model>::new()])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let now = Utc::now();
        assert_eq!(sweep_expired(&db, now).await.unwrap(), 1);
        assert!(poll(&db, 7, now).await.unwrap().is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(CommandStatus::Success.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
        assert!(CommandStatus::Expired.is_terminal());
    }
}
