use crate::lifecycle::{LifecycleState, RestartStatus};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A restart was requested while another attempt is still running
    #[error("A restart is already in progress (state: {state})")]
    RestartAlreadyInProgress { state: LifecycleState },

    /// Cancellation requested outside the cancellable window
    #[error("Cannot cancel restart in state {state}")]
    CannotCancel { state: LifecycleState },

    /// Request rejected by admission control because a restart is underway
    #[error("Service is restarting (state: {})", status.state)]
    ServiceRestarting {
        status: Box<RestartStatus>,
        retry_after: Duration,
    },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::RestartAlreadyInProgress { .. } | Error::CannotCancel { .. } => StatusCode::CONFLICT,
            Error::ServiceRestarting { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::RestartAlreadyInProgress { state } => {
                format!("A restart is already in progress (state: {state})")
            }
            Error::CannotCancel { state } => match state {
                LifecycleState::Idle => "No restart is in progress".to_string(),
                other => format!("Restart can no longer be cancelled (state: {other})"),
            },
            Error::ServiceRestarting { .. } => "Service is restarting, please retry shortly".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Machine-readable code included in JSON error bodies
    fn code(&self) -> &'static str {
        match self {
            Error::RestartAlreadyInProgress { .. } => "restart_in_progress",
            Error::CannotCancel { .. } => "cannot_cancel",
            Error::ServiceRestarting { .. } => "service_restarting",
            Error::BadRequest { .. } => "bad_request",
            Error::Internal { .. } | Error::Other(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::RestartAlreadyInProgress { .. } | Error::CannotCancel { .. } => {
                tracing::info!("Lifecycle conflict: {}", self);
            }
            Error::ServiceRestarting { .. } | Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let code = self.code();
        let message = self.user_message();

        match self {
            Error::ServiceRestarting { status: restart_status, retry_after } => {
                let body = json!({
                    "code": code,
                    "message": message,
                    "restart_status": restart_status,
                });

                let mut response = (status, Json(body)).into_response();
                // Retry-After is whole seconds; never advertise zero
                let seconds = retry_after.as_secs().max(1);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
                response
            }
            Error::RestartAlreadyInProgress { state } | Error::CannotCancel { state } => {
                let body = json!({
                    "code": code,
                    "message": message,
                    "state": state,
                });
                (status, Json(body)).into_response()
            }
            _ => (status, message).into_response(),
        }
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::Utc;

    fn idle_status() -> RestartStatus {
        RestartStatus {
            state: LifecycleState::Preparing,
            is_restarting: true,
            active_request_count: 2,
            current_attempt: None,
            active_requests: None,
            last_failure: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::RestartAlreadyInProgress {
                state: LifecycleState::Restarting
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::CannotCancel {
                state: LifecycleState::Restarting
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::BadRequest {
                message: "nope".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Other(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let err = Error::Other(anyhow::anyhow!("database password is hunter2"));
        assert_eq!(err.user_message(), "Internal server error");
    }

    #[test]
    fn test_cannot_cancel_when_idle_message() {
        let err = Error::CannotCancel {
            state: LifecycleState::Idle,
        };
        assert_eq!(err.user_message(), "No restart is in progress");
    }

    #[tokio::test]
    async fn test_service_restarting_response() {
        let err = Error::ServiceRestarting {
            status: Box::new(idle_status()),
            retry_after: Duration::from_secs(7),
        };

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "service_restarting");
        assert_eq!(json["restart_status"]["state"], "preparing");
        assert_eq!(json["restart_status"]["active_request_count"], 2);
    }
}
