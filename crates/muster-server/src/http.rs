use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use muster_core::error::CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

/// One place where the error taxonomy meets HTTP. 401 tells an agent to
/// re-enroll; 403 (blocked/pending) tells it to back off and retry later
/// without re-enrolling.
pub fn error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Auth(f) if f.is_authorization() => StatusCode::FORBIDDEN,
        CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
        CoreError::InvalidTransition { .. } | CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::StaleOperation(_) => StatusCode::GONE,
        CoreError::Db(_) | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::Auth(f) => f.reason_code(),
        CoreError::InvalidTransition { .. } => "invalid_transition",
        CoreError::Conflict(_) => "conflict",
        CoreError::NotFound(_) => "not_found",
        CoreError::StaleOperation(_) => "stale_operation",
        CoreError::Db(_) | CoreError::Internal(_) => "internal",
    }
}

pub fn error_response(err: CoreError) -> Response {
    let status = error_status(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        // Internal detail stays in the logs, not the response body.
        tracing::error!(error = %err, "request failed");
        return json_error(status, error_code(&err), "internal error");
    }
    json_error(status, error_code(&err), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::gateway::AuthFailure;
    use muster_core::registry::DeviceStatus;
    use muster_core::vault::VaultError;

    #[test]
    fn authentication_and_authorization_get_different_statuses() {
        let auth = CoreError::Auth(AuthFailure::Token(VaultError::Expired));
        assert_eq!(error_status(&auth), StatusCode::UNAUTHORIZED);

        let blocked = CoreError::Auth(AuthFailure::DeviceBlocked {
            reason: Some("stolen".into()),
        });
        assert_eq!(error_status(&blocked), StatusCode::FORBIDDEN);

        let pending = CoreError::Auth(AuthFailure::DevicePending);
        assert_eq!(error_status(&pending), StatusCode::FORBIDDEN);
    }

    #[test]
    fn taxonomy_maps_to_distinct_codes() {
        assert_eq!(
            error_code(&CoreError::Auth(AuthFailure::CredentialRevoked)),
            "credential_revoked"
        );
        assert_eq!(
            error_code(&CoreError::InvalidTransition {
                action: "approve",
                from: DeviceStatus::Online
            }),
            "invalid_transition"
        );
        assert_eq!(error_code(&CoreError::NotFound("command")), "not_found");
        assert_eq!(
            error_code(&CoreError::StaleOperation("late".into())),
            "stale_operation"
        );
        assert_eq!(error_status(&CoreError::StaleOperation("late".into())), StatusCode::GONE);
    }
}
