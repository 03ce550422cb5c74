use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use muster_core::registry::DeviceStatus;
use muster_core::{commands, registry, retention};

use crate::admin_auth::{self, AdminIdentity, admin_guard};
use crate::audit;
use crate::http::{error_response, json_error};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/:id", get(get_device))
        .route("/devices/:id/approve", post(approve_device))
        .route("/devices/:id/block", post(block_device))
        .route("/devices/:id/unblock", post(unblock_device))
        .route(
            "/devices/:id/commands",
            get(list_device_commands).post(enqueue_command),
        )
        .route("/devices/:id/export", get(export_device))
        .route("/devices/:id/erase", delete(erase_device))
        .route(
            "/pre-registrations",
            get(list_pre_registrations).post(create_pre_registration),
        )
        .route("/pre-registrations/:id", delete(delete_pre_registration))
        .route("/snapshots", get(list_snapshots))
        .route("/snapshots/:serial", get(get_snapshot))
        .route("/retention/status", get(retention_status))
        .route("/retention/run", post(retention_run))
        .layer(middleware::from_fn_with_state(state.clone(), admin_guard))
        .with_state(state.clone());

    Router::new()
        .route("/login", post(admin_auth::login))
        .route("/logout", post(admin_auth::logout))
        .route("/whoami", get(admin_auth::whoami))
        .with_state(state)
        .merge(guarded)
}

async fn list_devices(State(state): State<AppState>) -> Response {
    match registry::list_devices(&state.db).await {
        Ok(devices) => Json(devices).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_device(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match registry::find_by_external_id(&state.db, id).await {
        Ok(device) => Json(device).into_response(),
        Err(err) => error_response(err),
    }
}

async fn approve_device(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<Uuid>,
) -> Response {
    match registry::approve(&state.db, id, &admin.username).await {
        Ok(device) => {
            audit::record(
                &state.db,
                &device.tenant,
                &admin.username,
                Some(device.id),
                "device.approve",
                None,
            )
            .await;
            Json(device).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    reason: String,
}

async fn block_device(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<Uuid>,
    Json(body): Json<BlockBody>,
) -> Response {
    match registry::block(&state.db, id, &admin.username, &body.reason).await {
        Ok(device) => {
            audit::record(
                &state.db,
                &device.tenant,
                &admin.username,
                Some(device.id),
                "device.block",
                Some(serde_json::json!({ "reason": body.reason })),
            )
            .await;
            Json(device).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn unblock_device(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<Uuid>,
) -> Response {
    match registry::unblock(&state.db, id, &admin.username).await {
        Ok(device) => {
            audit::record(
                &state.db,
                &device.tenant,
                &admin.username,
                Some(device.id),
                "device.unblock",
                None,
            )
            .await;
            Json(device).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueBody {
    command_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn enqueue_command(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<Uuid>,
    Json(body): Json<EnqueueBody>,
) -> Response {
    let device = match registry::find_by_external_id(&state.db, id).await {
        Ok(d) => d,
        Err(err) => return error_response(err),
    };
    let status = DeviceStatus::parse(&device.status).unwrap_or(DeviceStatus::Pending);

    match commands::enqueue(
        &state.db,
        device.id,
        status,
        &body.command_type,
        body.payload,
        &admin.username,
        state.config.command_ttl(),
    )
    .await
    {
        Ok(cmd) => {
            audit::record(
                &state.db,
                &device.tenant,
                &admin.username,
                Some(device.id),
                "command.enqueue",
                Some(serde_json::json!({ "command_id": cmd.id, "type": cmd.command_type })),
            )
            .await;
            (StatusCode::CREATED, Json(cmd)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn list_device_commands(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let device = match registry::find_by_external_id(&state.db, id).await {
        Ok(d) => d,
        Err(err) => return error_response(err),
    };
    match commands::list_for_device(&state.db, device.id).await {
        Ok(cmds) => Json(cmds).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct PreRegisterBody {
    serial: String,
    description: Option<String>,
}

async fn create_pre_registration(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Json(body): Json<PreRegisterBody>,
) -> Response {
    match registry::pre_register(&state.db, &body.serial, body.description, &admin.username).await
    {
        Ok(row) => {
            audit::record(
                &state.db,
                "default",
                &admin.username,
                None,
                "pre_registration.create",
                Some(serde_json::json!({ "serial": row.serial })),
            )
            .await;
            (StatusCode::CREATED, Json(row)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn list_pre_registrations(State(state): State<AppState>) -> Response {
    match registry::list_pre_registrations(&state.db).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => error_response(err),
    }
}

async fn delete_pre_registration(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<Uuid>,
) -> Response {
    match registry::delete_pre_registration(&state.db, id).await {
        Ok(()) => {
            audit::record(
                &state.db,
                "default",
                &admin.username,
                None,
                "pre_registration.delete",
                Some(serde_json::json!({ "id": id })),
            )
            .await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn list_snapshots(State(state): State<AppState>) -> Response {
    Json(state.snapshots.list_active()).into_response()
}

async fn get_snapshot(State(state): State<AppState>, Path(serial): Path<String>) -> Response {
    match state.snapshots.get(&serial) {
        Some(view) => Json(view).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "not_found", "no snapshot for serial"),
    }
}

async fn retention_status(State(state): State<AppState>) -> Response {
    match retention::status(&state.db).await {
        Ok(s) => Json(s).into_response(),
        Err(err) => error_response(err),
    }
}

async fn retention_run(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
) -> Response {
    match retention::run_sweep(
        &state.db,
        &state.config.retention_defaults,
        state.config.retention_batch_size,
    )
    .await
    {
        Ok(outcome) => {
            audit::record(
                &state.db,
                "default",
                &admin.username,
                None,
                "retention.run",
                serde_json::to_value(&outcome).ok(),
            )
            .await;
            Json(outcome).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn export_device(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match retention::export_device(&state.db, id).await {
        Ok(dump) => Json(dump).into_response(),
        Err(err) => error_response(err),
    }
}

async fn erase_device(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(id): Path<Uuid>,
) -> Response {
    match retention::erase_device(&state.db, id).await {
        Ok(()) => {
            audit::record(
                &state.db,
                "default",
                &admin.username,
                None,
                "device.erase",
                Some(serde_json::json!({ "external_id": id })),
            )
            .await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err),
    }
}
