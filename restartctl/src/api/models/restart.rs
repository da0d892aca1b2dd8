use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::lifecycle::{FailureNotice, LifecycleState, RestartHistoryEntry};

fn default_true() -> bool {
    true
}

/// Request payload for starting a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RestartCreate {
    /// Who is asking. Ignored when the principal header is present.
    pub requestor: Option<String>,
    /// Free-text justification, recorded in history and audit events
    pub reason: Option<String>,
    /// Skip waiting for in-flight requests
    #[serde(default)]
    pub force: bool,
    /// Reload and validate configuration as part of the restart
    #[serde(default = "default_true")]
    pub reload_config: bool,
    /// Drain timeout in seconds; defaults to `restart.default_drain_timeout`
    pub timeout: Option<u64>,
}

/// Response for an accepted restart.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RestartCreated {
    #[schema(value_type = String, format = "uuid")]
    pub attempt_id: Uuid,
    pub estimated_seconds: u64,
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RestartCancel {
    pub requestor: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestartCancelled {
    pub ok: bool,
    /// Set when an attempt in its cancellable window was stopped
    #[schema(value_type = Option<String>, format = "uuid")]
    pub cancelled_attempt_id: Option<Uuid>,
    /// Set when the call acknowledged a failed attempt instead
    pub acknowledged_failure: Option<FailureNotice>,
}

/// Query parameters for restart history
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct RestartHistoryQuery {
    /// Maximum number of entries to return (default 10)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestartHistoryResponse {
    /// Newest last
    pub entries: Vec<RestartHistoryEntry>,
    /// Number of entries retained in total
    pub total: usize,
}
