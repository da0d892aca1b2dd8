//! Graceful restart orchestration.
//!
//! The [`RestartOrchestrator`] owns the single lifecycle state of the process and runs restart
//! attempts as background tasks. It consults the [`InFlightTracker`] to wait for in-flight work
//! to drain before reloading configuration through a [`ConfigStore`](crate::config_store::ConfigStore),
//! and rolls back to the pre-attempt snapshot if anything past the backup fails.
//!
//! The serving layer only needs two things from this module: [`RestartOrchestrator::is_restarting`]
//! for admission control, and [`InFlightTracker::track`] to register each admitted request for as
//! long as it is being processed (see [`crate::admission`]).

pub mod audit;
pub mod history;
pub mod hooks;
pub mod orchestrator;
pub mod state;
pub mod tracker;
pub mod watcher;

pub use audit::{AuditAction, AuditEvent, AuditSink, TracingAuditSink};
pub use history::{RestartHistory, RestartHistoryEntry};
pub use hooks::{HookPhase, RestartHook, hook_fn};
pub use orchestrator::{
    AttemptId, CancelOutcome, FailureNotice, OrchestratorSettings, RestartAttempt, RestartFailure, RestartOptions,
    RestartOrchestrator, RestartStatus, RestartTicket,
};
pub use state::{LifecycleState, LifecycleTransition};
pub use tracker::{ActiveRequestSummary, InFlightGuard, InFlightRequest, InFlightTracker};
