use crate::retention::RetentionThresholds;

/// Everything the core enforces but does not decide. Parsed once from
/// `MUSTER_*` environment variables at boot; dev-friendly defaults,
/// production deployments set them explicitly.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Secret for signing/verifying agent bearer tokens and admin sessions.
    pub jwt_secret: Vec<u8>,
    /// How often agents are told to heartbeat.
    pub heartbeat_interval_secs: u64,
    /// A device with no heartbeat for this long is flipped offline by the sweep.
    pub offline_after_secs: i64,
    pub inventory_interval_hours: u64,
    /// Lifetime of a queued command before it expires unexecuted.
    pub command_ttl_hours: i64,
    /// Snapshot cache staleness window. Independent of the command TTL.
    pub snapshot_stale_secs: i64,
    /// Lifetime of an issued agent bearer token.
    pub token_ttl_days: i64,
    pub min_agent_version: String,
    /// When set, enrollment lands devices in `approved` instead of `pending`.
    pub auto_approve: bool,
    pub liveness_sweep_secs: u64,
    pub command_sweep_secs: u64,
    pub retention_sweep_secs: u64,
    /// Max rows touched per retention batch; each batch commits on its own.
    pub retention_batch_size: u64,
    /// Fallback thresholds for tenants without a stored policy row.
    pub retention_defaults: RetentionThresholds,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let jwt_secret = std::env::var("MUSTER_JWT_SECRET")
            .unwrap_or_else(|_| "dev-insecure-change-me".to_string())
            .into_bytes();

        Self {
            jwt_secret,
            heartbeat_interval_secs: env_u64("MUSTER_HEARTBEAT_INTERVAL_SECS", 60),
            offline_after_secs: env_i64("MUSTER_OFFLINE_AFTER_SECS", 180),
            inventory_interval_hours: env_u64("MUSTER_INVENTORY_INTERVAL_HOURS", 24),
            command_ttl_hours: env_i64("MUSTER_COMMAND_TTL_HOURS", 24),
            snapshot_stale_secs: env_i64("MUSTER_SNAPSHOT_STALE_SECS", 60),
            token_ttl_days: env_i64("MUSTER_TOKEN_TTL_DAYS", 365),
            min_agent_version: std::env::var("MUSTER_MIN_AGENT_VERSION")
                .unwrap_or_else(|_| "0.1.0".to_string()),
            auto_approve: env_bool("MUSTER_AUTO_APPROVE", false),
            liveness_sweep_secs: env_u64("MUSTER_LIVENESS_SWEEP_SECS", 30),
            command_sweep_secs: env_u64("MUSTER_COMMAND_SWEEP_SECS", 60),
            retention_sweep_secs: env_u64("MUSTER_RETENTION_SWEEP_SECS", 3600),
            retention_batch_size: env_u64("MUSTER_RETENTION_BATCH_SIZE", 500).clamp(10, 10_000),
            retention_defaults: RetentionThresholds {
                heartbeat_retention_days: env_i32("MUSTER_HEARTBEAT_RETENTION_DAYS", 90),
                activity_retention_days: env_i32("MUSTER_ACTIVITY_RETENTION_DAYS", 180),
                ip_anonymize_after_days: env_i32("MUSTER_IP_ANONYMIZE_AFTER_DAYS", 30),
                user_anonymize_after_days: env_i32("MUSTER_USER_ANONYMIZE_AFTER_DAYS", 60),
            },
        }
    }

    pub fn command_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.command_ttl_hours)
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.token_ttl_days)
    }

    pub fn snapshot_stale_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.snapshot_stale_secs)
    }

    pub fn offline_cutoff(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        now - chrono::Duration::seconds(self.offline_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_env() {
        let cfg = CoreConfig::from_env();
        assert_eq!(cfg.snapshot_stale_secs, 60);
        assert_eq!(cfg.command_ttl_hours, 24);
        // The two windows are configured independently; nothing ties them.
        assert_ne!(cfg.snapshot_stale_secs, cfg.command_ttl_hours);
        assert!(cfg.retention_defaults.ip_anonymize_after_days < cfg.retention_defaults.heartbeat_retention_days);
    }
}
