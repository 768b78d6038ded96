//! REST API handlers.
//!
//! Each handler reads/writes through `Fleet` (or asks the monitor) and
//! returns JSON responses.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet_monitor::{KillReason, MonitorError};
use fleet_state::*;
use tracing::{debug, info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn state_error(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_data_fault() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn monitor_error(e: MonitorError) -> Response {
    let status = match &e {
        MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::AlreadyExists(_) => StatusCode::CONFLICT,
        MonitorError::InvalidName(_) => StatusCode::BAD_REQUEST,
        MonitorError::MalformedPolicy { .. } | MonitorError::InvalidRecord { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        MonitorError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        MonitorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

// ── Groups ─────────────────────────────────────────────────────

/// GET /api/v1/groups
///
/// Malformed groups are left out, the same way the monitor skips them.
pub async fn list_groups<S: FleetStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let mut names = match state.fleet.group_names().await {
        Ok(names) => names,
        Err(e) => return state_error(e),
    };
    names.sort();

    let mut groups = Vec::with_capacity(names.len());
    for name in names {
        match state.fleet.server_group(&name).await {
            Ok(group) => groups.push(group),
            Err(StateError::NotFound(_)) => continue,
            Err(e) if e.is_data_fault() => {
                warn!(group = %name, error = %e, "leaving malformed group out of listing");
            }
            Err(e) => return state_error(e),
        }
    }
    ApiResponse::ok(groups).into_response()
}

/// GET /api/v1/groups/{name}
pub async fn get_group<S: FleetStore>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.fleet.server_group(&name).await {
        Ok(group) => ApiResponse::ok(group).into_response(),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/groups
pub async fn create_group<S: FleetStore>(
    State(state): State<ApiState<S>>,
    Json(group): Json<ServerGroup>,
) -> impl IntoResponse {
    if group.name.trim().is_empty() || group.prefix.trim().is_empty() {
        return error_response("group name and prefix are required", StatusCode::BAD_REQUEST);
    }
    match state.fleet.group_exists(&group.name).await {
        Ok(true) => return error_response("group already exists", StatusCode::CONFLICT),
        Ok(false) => {}
        Err(e) => return state_error(e),
    }
    match state.fleet.register_group(&group).await {
        Ok(_) => {
            info!(group = %group.name, prefix = %group.prefix, "group registered via api");
            (StatusCode::CREATED, ApiResponse::ok(group)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/groups/{name}
pub async fn delete_group<S: FleetStore>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.fleet.remove_group(&name).await {
        Ok(true) => ApiResponse::ok("deleted").into_response(),
        Ok(false) => error_response("group not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

// ── Servers ────────────────────────────────────────────────────

/// GET /api/v1/servers
pub async fn list_servers<S: FleetStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    match state.fleet.server_statuses().await {
        Ok(entries) => {
            let records: Vec<ServerRecord> = entries
                .into_iter()
                .filter_map(|entry| match entry.record {
                    Ok(record) => Some(record),
                    Err(e) => {
                        debug!(key = %entry.key, error = %e, "skipping unreadable status record");
                        None
                    }
                })
                .collect();
            ApiResponse::ok(records).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/servers/{name}
pub async fn get_server<S: FleetStore>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.fleet.server_status(&name).await {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("server not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// PUT /api/v1/servers/{name}
///
/// Heartbeat: the instance overwrites its own status record.
pub async fn put_server<S: FleetStore>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
    Json(record): Json<ServerRecord>,
) -> impl IntoResponse {
    if record.name != name {
        return error_response("record name does not match path", StatusCode::BAD_REQUEST);
    }
    match state.fleet.put_server_status(&record).await {
        Ok(()) => {
            debug!(server = %name, tps = record.tps, players = record.player_count, "heartbeat");
            ApiResponse::ok(record).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// Query string for DELETE /api/v1/servers/{name}.
#[derive(Debug, Default, serde::Deserialize)]
pub struct KillParams {
    pub reason: Option<String>,
}

/// DELETE /api/v1/servers/{name}
///
/// With a monitor attached this schedules a kill (default reason
/// `Cleanup`) and answers 202. Without one only the status record is
/// dropped.
pub async fn delete_server<S: FleetStore>(
    State(state): State<ApiState<S>>,
    Path(name): Path<String>,
    Query(params): Query<KillParams>,
) -> impl IntoResponse {
    let Some(monitor) = &state.monitor else {
        return match state.fleet.remove_server(&name).await {
            Ok(true) => ApiResponse::ok("deleted").into_response(),
            Ok(false) => error_response("server not found", StatusCode::NOT_FOUND),
            Err(e) => state_error(e),
        };
    };

    let reason = match params.reason.as_deref() {
        None => KillReason::Cleanup,
        Some(raw) => match raw.parse::<KillReason>() {
            Ok(reason) => reason,
            Err(e) => return error_response(&e, StatusCode::BAD_REQUEST),
        },
    };
    match monitor.kill_server(&name, reason).await {
        Ok(scheduled) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "server": name,
                "reason": reason.to_string(),
                "scheduled": scheduled,
            })),
        )
            .into_response(),
        Err(e) => monitor_error(e),
    }
}

// ── Monitor ────────────────────────────────────────────────────

/// GET /api/v1/monitor
pub async fn monitor_snapshot<S: FleetStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let Some(monitor) = &state.monitor else {
        return monitor_error(MonitorError::Unavailable);
    };
    match monitor.snapshot().await {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => monitor_error(e),
    }
}
