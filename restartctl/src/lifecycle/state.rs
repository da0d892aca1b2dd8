use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Lifecycle state of the process. Exactly one value exists system-wide, owned by the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Preparing,
    WaitingForDrain,
    Restarting,
    Recovering,
    Completed,
    Failed,
}

impl LifecycleState {
    /// Whether new work should be turned away. `Failed` counts as restarting until the
    /// failure is acknowledged.
    pub fn is_restarting(self) -> bool {
        self != LifecycleState::Idle
    }

    /// A new attempt may be requested from these states.
    pub fn accepts_restart(self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::Failed)
    }

    /// Cooperative cancellation is only possible before configuration is touched.
    pub fn is_cancellable(self) -> bool {
        matches!(self, LifecycleState::Preparing | LifecycleState::WaitingForDrain)
    }

    /// The legal-transition table. Every state change goes through this check.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, WaitingForDrain | Restarting | Failed | Idle)
                | (WaitingForDrain, Restarting | Failed | Idle)
                | (Restarting, Completed | Recovering | Failed)
                | (Recovering, Failed)
                | (Completed, Idle)
                | (Failed, Idle)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Preparing => "preparing",
            LifecycleState::WaitingForDrain => "waiting_for_drain",
            LifecycleState::Restarting => "restarting",
            LifecycleState::Recovering => "recovering",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied state change, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LifecycleTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
}
