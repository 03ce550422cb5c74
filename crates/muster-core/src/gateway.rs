use chrono::Utc;
use muster_db::entities::{device_credentials, devices};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::error::CoreError;
use crate::registry::DeviceStatus;
use crate::vault::{self, TokenVault, VaultError};

/// Every way agent authentication can fail, kept distinguishable so
/// operators can tell an attacker replay from a stale client after
/// re-enrollment, and a blocked device from a bad token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("missing bearer token")]
    MissingToken,
    #[error("{0}")]
    Token(VaultError),
    #[error("device referenced by token no longer exists")]
    DeviceMissing,
    #[error("device has no credentials on record")]
    NoCredentials,
    #[error("credential has been revoked")]
    CredentialRevoked,
    #[error("token does not match any stored credential")]
    CredentialMismatch,
    #[error("device is blocked{}", match .reason { Some(r) => format!(": {r}"), None => String::new() })]
    DeviceBlocked { reason: Option<String> },
    #[error("device is awaiting approval")]
    DevicePending,
}

impl AuthFailure {
    /// Stable machine-readable reason code surfaced to callers and logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "missing_token",
            AuthFailure::Token(VaultError::Expired) => "token_expired",
            AuthFailure::Token(VaultError::WrongAudience) => "wrong_audience",
            AuthFailure::Token(_) => "token_malformed",
            AuthFailure::DeviceMissing => "device_missing",
            AuthFailure::NoCredentials => "no_credentials",
            AuthFailure::CredentialRevoked => "credential_revoked",
            AuthFailure::CredentialMismatch => "credential_mismatch",
            AuthFailure::DeviceBlocked { .. } => "device_blocked",
            AuthFailure::DevicePending => "device_pending",
        }
    }

    /// Blocked/pending mean the credential itself was valid: authorization,
    /// not authentication. Agents back off instead of re-enrolling.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            AuthFailure::DeviceBlocked { .. } | AuthFailure::DevicePending
        )
    }
}

/// Device identity attached to the request context once the gateway has
/// resolved a presented token.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub id: i64,
    pub external_id: Uuid,
    pub hostname: String,
    pub serial: String,
    pub tenant: String,
    pub status: DeviceStatus,
    pub last_seen_at: Option<chrono::DateTime<Utc>>,
}

/// Matches a presented token hash against the device's credential rows.
/// The sub-causes matter: an empty credential set, a revoked match, and a
/// plain mismatch are three different operational incidents.
pub fn match_credential<'a>(
    presented_hash: &str,
    credentials: &'a [device_credentials::Model],
) -> Result<&'a device_credentials::Model, AuthFailure> {
    if credentials.is_empty() {
        return Err(AuthFailure::NoCredentials);
    }

    match credentials.iter().find(|c| c.token_hash == presented_hash) {
        Some(c) if c.revoked_at.is_none() => Ok(c),
        Some(_) => Err(AuthFailure::CredentialRevoked),
        None => Err(AuthFailure::CredentialMismatch),
    }
}

/// Full gateway check for an agent-facing request: cryptographic verify,
/// then the (internal id, external id, token hash) triple must match one
/// non-revoked credential row, then the device status gate. On success the
/// credential's `last_used_at` is stamped.
pub async fn authenticate(
    db: &DatabaseConnection,
    vault: &TokenVault,
    bearer: Option<&str>,
) -> Result<ResolvedDevice, CoreError> {
    let token = match bearer {
        Some(t) if !t.is_empty() => t,
        _ => return Err(reject(AuthFailure::MissingToken, None, "")),
    };
    let fp = vault::fingerprint(token);

    let claims = match vault.verify(token) {
        Ok(c) => c,
        Err(e) => return Err(reject(AuthFailure::Token(e), None, &fp)),
    };

    let device_id = match claims.device_id() {
        Some(id) => id,
        None => return Err(reject(AuthFailure::Token(VaultError::Malformed), None, &fp)),
    };

    let device = match devices::Entity::find_by_id(device_id).one(db).await? {
        Some(d) => d,
        None => return Err(reject(AuthFailure::DeviceMissing, Some(device_id), &fp)),
    };

    // All three identity claims must resolve to the same credential row.
    if device.external_id != claims.did {
        return Err(reject(
            AuthFailure::CredentialMismatch,
            Some(device_id),
            &fp,
        ));
    }

    let credentials = device_credentials::Entity::find()
        .filter(device_credentials::Column::DeviceId.eq(device.id))
        .all(db)
        .await?;

    let credential = match match_credential(&vault::token_hash(token), &credentials) {
        Ok(c) => c.clone(),
        Err(f) => return Err(reject(f, Some(device_id), &fp)),
    };

    let status = DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Pending);
    match status {
        DeviceStatus::Blocked => {
            return Err(reject(
                AuthFailure::DeviceBlocked {
                    reason: device.block_reason.clone(),
                },
                Some(device_id),
                &fp,
            ));
        }
        DeviceStatus::Pending => {
            return Err(reject(AuthFailure::DevicePending, Some(device_id), &fp));
        }
        _ => {}
    }

    let mut active: device_credentials::ActiveModel = credential.into();
    active.last_used_at = Set(Some(Utc::now().into()));
    active.update(db).await?;

    Ok(ResolvedDevice {
        id: device.id,
        external_id: device.external_id,
        hostname: device.hostname,
        serial: device.serial,
        tenant: device.tenant,
        status,
        last_seen_at: device.last_seen_at.map(|t| t.to_utc()),
    })
}

fn reject(failure: AuthFailure, device_id: Option<i64>, token_fp: &str) -> CoreError {
    tracing::warn!(
        reason = failure.reason_code(),
        device_id,
        token = token_fp,
        "agent authentication rejected"
    );
    CoreError::Auth(failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(hash: &str, revoked: bool) -> device_credentials::Model {
        let now = Utc::now();
        device_credentials::Model {
            id: Uuid::new_v4(),
            device_id: 1,
            token_hash: hash.to_string(),
            created_at: now.into(),
            last_used_at: None,
            revoked_at: revoked.then(|| now.into()),
            revoke_reason: revoked.then(|| "re-enrollment".to_string()),
        }
    }

    #[test]
    fn matching_non_revoked_credential_wins() {
        let creds = vec![credential("old", true), credential("current", false)];
        let found = match_credential("current", &creds).unwrap();
        assert_eq!(found.token_hash, "current");
    }

    #[test]
    fn revoked_match_is_not_a_generic_failure() {
        // A structurally valid token whose credential was revoked is the
        // "stale client after re-enrollment" case.
        let creds = vec![credential("old", true), credential("current", false)];
        assert_eq!(
            match_credential("old", &creds),
            Err(AuthFailure::CredentialRevoked)
        );
    }

    #[test]
    fn unknown_hash_and_empty_set_are_distinct() {
        let creds = vec![credential("current", false)];
        assert_eq!(
            match_credential("attacker", &creds),
            Err(AuthFailure::CredentialMismatch)
        );
        assert_eq!(match_credential("anything", &[]), Err(AuthFailure::NoCredentials));
    }

    #[test]
    fn reason_codes_are_stable_and_unique() {
        let failures = [
            AuthFailure::MissingToken,
            AuthFailure::Token(VaultError::Expired),
            AuthFailure::Token(VaultError::Malformed),
            AuthFailure::Token(VaultError::WrongAudience),
            AuthFailure::DeviceMissing,
            AuthFailure::NoCredentials,
            AuthFailure::CredentialRevoked,
            AuthFailure::CredentialMismatch,
            AuthFailure::DeviceBlocked { reason: None },
            AuthFailure::DevicePending,
        ];
        let codes: Vec<_> = failures.iter().map(|f| f.reason_code()).collect();
        let mut dedup = codes.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(codes.len(), dedup.len());
    }

    #[test]
    fn blocked_and_pending_are_authorization_failures() {
        assert!(AuthFailure::DeviceBlocked { reason: None }.is_authorization());
        assert!(AuthFailure::DevicePending.is_authorization());
        assert!(!AuthFailure::CredentialRevoked.is_authorization());
        assert!(!AuthFailure::MissingToken.is_authorization());
    }

    #[test]
    fn block_reason_is_surfaced_in_the_message() {
        let f = AuthFailure::DeviceBlocked {
            reason: Some("stolen".to_string()),
        };
        assert!(f.to_string().contains("stolen"));
    }
}
