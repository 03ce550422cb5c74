use crate::gateway::AuthFailure;
use crate::registry::DeviceStatus;

/// Error taxonomy for every core operation. Call sites match on the
/// variant instead of relying on catch-all middleware; the HTTP layer
/// maps each variant to a status code and a stable reason code.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Auth(AuthFailure),
    #[error("invalid transition: cannot {action} a device in status {from}")]
    InvalidTransition {
        action: &'static str,
        from: DeviceStatus,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("stale operation: {0}")]
    StaleOperation(String),
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AuthFailure> for CoreError {
    fn from(f: AuthFailure) -> Self {
        CoreError::Auth(f)
    }
}
