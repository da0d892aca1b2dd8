//! HTTP handlers for restart orchestration endpoints.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use std::time::Duration;

use crate::{
    AppState,
    api::models::restart::{
        RestartCancel, RestartCancelled, RestartCreate, RestartCreated, RestartHistoryQuery, RestartHistoryResponse,
    },
    config::AdminConfig,
    errors::{Error, Result},
    lifecycle::{RestartOptions, RestartStatus},
};

const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Principal header set by the proxy in front of the admin API, then the body, then the default.
fn resolve_principal(headers: &HeaderMap, admin: &AdminConfig, requestor: Option<&str>) -> String {
    headers
        .get(admin.principal_header.as_str())
        .and_then(|value| value.to_str().ok())
        .or(requestor)
        .map(str::trim)
        .filter(|principal| !principal.is_empty())
        .unwrap_or(admin.default_principal.as_str())
        .to_string()
}

#[utoipa::path(
    post,
    path = "/restart",
    tag = "restart",
    summary = "Request restart",
    description = "Start a graceful restart. Returns immediately; poll the status endpoint to follow progress.",
    request_body = RestartCreate,
    responses(
        (status = 202, description = "Restart accepted", body = RestartCreated),
        (status = 400, description = "Invalid drain timeout"),
        (status = 409, description = "A restart is already in progress"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_restart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RestartCreate>,
) -> Result<(StatusCode, Json<RestartCreated>)> {
    let config = state.config.current();
    let restart = &config.restart;

    let drain_timeout = match body.timeout {
        Some(secs) => {
            let timeout = Duration::from_secs(secs);
            if timeout > restart.max_drain_timeout {
                return Err(Error::BadRequest {
                    message: format!(
                        "timeout must be at most {} seconds",
                        restart.max_drain_timeout.as_secs()
                    ),
                });
            }
            timeout
        }
        None => restart.default_drain_timeout,
    };

    let requestor = resolve_principal(&headers, &config.admin, body.requestor.as_deref());
    let options = RestartOptions::builder()
        .maybe_reason(body.reason.filter(|reason| !reason.trim().is_empty()))
        .force(body.force)
        .reload_config(body.reload_config)
        .drain_timeout(drain_timeout)
        .build();

    let ticket = state.orchestrator.request_restart(requestor, options)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RestartCreated {
            attempt_id: ticket.attempt_id,
            estimated_seconds: ticket.estimated_seconds,
            state: ticket.state,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/restart/cancel",
    tag = "restart",
    summary = "Cancel restart",
    description = "Cancel a restart that has not started reloading yet, or acknowledge a failed one.",
    request_body = RestartCancel,
    responses(
        (status = 200, description = "Cancelled or acknowledged", body = RestartCancelled),
        (status = 409, description = "Nothing to cancel, or the restart can no longer be cancelled"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn cancel_restart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RestartCancel>,
) -> Result<Json<RestartCancelled>> {
    let config = state.config.current();
    let requestor = resolve_principal(&headers, &config.admin, body.requestor.as_deref());

    let outcome = state.orchestrator.cancel_restart(requestor)?;

    Ok(Json(RestartCancelled {
        ok: true,
        cancelled_attempt_id: outcome.cancelled_attempt_id,
        acknowledged_failure: outcome.acknowledged_failure,
    }))
}

#[utoipa::path(
    get,
    path = "/restart/status",
    tag = "restart",
    summary = "Restart status",
    responses(
        (status = 200, description = "Current lifecycle status", body = RestartStatus),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_restart_status(State(state): State<AppState>) -> Json<RestartStatus> {
    Json(state.orchestrator.status())
}

#[utoipa::path(
    get,
    path = "/restart/history",
    tag = "restart",
    summary = "Restart history",
    params(RestartHistoryQuery),
    responses(
        (status = 200, description = "Most recent attempts, newest last", body = RestartHistoryResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_restart_history(
    State(state): State<AppState>,
    Query(query): Query<RestartHistoryQuery>,
) -> Json<RestartHistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(RestartHistoryResponse {
        entries: state.orchestrator.history(limit),
        total: state.orchestrator.history_len(),
    })
}
