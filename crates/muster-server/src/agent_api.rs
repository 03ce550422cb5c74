use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muster_core::registry::EnrollmentState;
use muster_core::snapshot::TelemetryPayload;
use muster_core::{commands, gateway, liveness, registry};

use crate::http::{error_response, json_error};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/heartbeat", post(heartbeat))
        .route("/inventory", post(inventory))
        .route("/commands", get(poll_commands))
        .route("/commands/result", post(command_result))
        .layer(middleware::from_fn_with_state(state.clone(), agent_auth))
        .with_state(state.clone());

    Router::new()
        .route("/enroll", post(enroll))
        .route("/enrollment-status", get(enrollment_status))
        // Unauthenticated by design: the telemetry side-channel assumes a
        // trusted network. Deployment-level tradeoff, revisit before
        // exposing this listener beyond the LAN.
        .route("/snapshot", post(push_snapshot))
        .with_state(state)
        .merge(authed)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Gateway middleware for every authenticated agent route: verify, match
/// the credential triple, gate on device status, then attach the resolved
/// identity for downstream handlers.
pub async fn agent_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers()).map(str::to_string);
    match gateway::authenticate(&state.db, &state.vault, token.as_deref()).await {
        Ok(device) => {
            req.extensions_mut().insert(device);
            next.run(req).await
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct AgentConfigBody {
    heartbeat_interval_secs: u64,
    inventory_interval_hours: u64,
    min_agent_version: String,
}

impl AgentConfigBody {
    fn from_state(state: &AppState) -> Self {
        Self {
            heartbeat_interval_secs: state.config.heartbeat_interval_secs,
            inventory_interval_hours: state.config.inventory_interval_hours,
            min_agent_version: state.config.min_agent_version.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnrollBody {
    serial: String,
    hostname: String,
    mac_address: Option<String>,
    os_name: Option<String>,
    os_version: Option<String>,
    tenant: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnrollResponse {
    device_id: Uuid,
    status: String,
    token: String,
    config: AgentConfigBody,
}

async fn enroll(State(state): State<AppState>, Json(body): Json<EnrollBody>) -> Response {
    let req = registry::EnrollRequest {
        serial: body.serial,
        hostname: body.hostname,
        mac_address: body.mac_address,
        os_name: body.os_name,
        os_version: body.os_version,
        tenant: body.tenant,
    };

    match registry::enroll(&state.db, &state.vault, &state.config, req).await {
        Ok(enrollment) => Json(EnrollResponse {
            device_id: enrollment.device.external_id,
            status: enrollment.device.status.clone(),
            token: enrollment.token,
            config: AgentConfigBody::from_state(&state),
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    serial: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    state: EnrollmentState,
}

async fn enrollment_status(
    State(state): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> Response {
    match registry::enrollment_status(&state.db, &q.serial).await {
        Ok(s) => Json(StatusResponse { state: s }).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize, Default)]
struct HeartbeatBody {
    agent_version: Option<String>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: &'static str,
    next_heartbeat_secs: u64,
}

async fn heartbeat(
    State(state): State<AppState>,
    Extension(device): Extension<gateway::ResolvedDevice>,
    headers: HeaderMap,
    body: Option<Json<HeartbeatBody>>,
) -> Response {
    let report = liveness::HeartbeatReport {
        ip_address: client_ip(&headers),
        agent_version: body.and_then(|Json(b)| b.agent_version),
    };

    match liveness::record_heartbeat(&state.db, &device, report).await {
        Ok(()) => Json(HeartbeatResponse {
            status: "ok",
            next_heartbeat_secs: state.config.heartbeat_interval_secs,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct InventoryBody {
    agent_version: Option<String>,
    // The full hardware/software snapshot is opaque to the core; only the
    // liveness timestamps matter here.
    #[allow(dead_code)]
    #[serde(default)]
    inventory: serde_json::Value,
}

async fn inventory(
    State(state): State<AppState>,
    Extension(device): Extension<gateway::ResolvedDevice>,
    headers: HeaderMap,
    Json(body): Json<InventoryBody>,
) -> Response {
    let report = liveness::HeartbeatReport {
        ip_address: client_ip(&headers),
        agent_version: body.agent_version,
    };

    match liveness::record_inventory(&state.db, &device, report).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct CommandDto {
    id: Uuid,
    command_type: String,
    payload: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn poll_commands(
    State(state): State<AppState>,
    Extension(device): Extension<gateway::ResolvedDevice>,
) -> Response {
    let now = Utc::now();
    match commands::poll(&state.db, device.id, now).await {
        Ok(cmds) => {
            let dtos: Vec<CommandDto> = cmds
                .into_iter()
                .filter(|c| commands::is_visible(c, now))
                .map(|c| CommandDto {
                    id: c.id,
                    command_type: c.command_type,
                    payload: c.payload,
                    created_at: c.created_at.to_utc(),
                    expires_at: c.expires_at.to_utc(),
                })
                .collect();
            Json(dtos).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct CommandResultBody {
    command_id: Uuid,
    status: String,
    result: Option<serde_json::Value>,
}

async fn command_result(
    State(state): State<AppState>,
    Extension(device): Extension<gateway::ResolvedDevice>,
    Json(body): Json<CommandResultBody>,
) -> Response {
    let status = match commands::ReportedStatus::parse(&body.status) {
        Some(s) => s,
        None => {
            return json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_param",
                format!("unknown result status {:?}", body.status),
            );
        }
    };

    match commands::report_result(&state.db, device.id, body.command_id, status, body.result).await
    {
        Ok(cmd) => Json(serde_json::json!({ "id": cmd.id, "status": cmd.status })).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    serial: String,
    #[serde(flatten)]
    payload: TelemetryPayload,
}

async fn push_snapshot(State(state): State<AppState>, Json(body): Json<SnapshotBody>) -> Response {
    if body.serial.trim().is_empty() {
        return json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_param",
            "serial is required",
        );
    }

    state.snapshots.put(&body.serial, body.payload);
    StatusCode::ACCEPTED.into_response()
}
