//! The restart orchestrator: sole owner of the lifecycle state.
//!
//! A restart attempt runs as its own background task:
//!
//! 1. pre-restart hooks (isolated failures)
//! 2. unless forced, `WaitingForDrain` until the tracker is empty or the drain timeout elapses
//! 3. if reloading, snapshot the configuration (failure aborts before anything is touched)
//! 4. `Restarting`: reload and validate configuration, then run restart actions
//! 5. post-restart hooks (isolated failures)
//! 6. `Completed`, then back to `Idle`
//!
//! A failure in steps 3-4 moves to `Recovering` and restores the snapshot when one was taken,
//! then settles in `Failed`. `Failed` is reported through [`RestartOrchestrator::status`] until a
//! new request supersedes it or a cancel acknowledges it.

use bon::Builder;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error as ThisError;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::{AuditAction, AuditEvent, AuditSink};
use super::history::{RestartHistory, RestartHistoryEntry};
use super::hooks::{HookPhase, RestartHook, panic_message, run_hooks, run_isolated};
use super::state::{LifecycleState, LifecycleTransition};
use super::tracker::{ActiveRequestSummary, InFlightTracker};
use crate::config::RestartConfig;
use crate::config_store::{ConfigSnapshot, ConfigStore};
use crate::errors::{Error, Result};

pub type AttemptId = Uuid;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Parameters of a restart request.
#[derive(Debug, Clone, Builder)]
pub struct RestartOptions {
    #[builder(into, default = "manual restart".to_string())]
    pub reason: String,
    /// Skip the drain wait entirely
    #[builder(default = false)]
    pub force: bool,
    #[builder(default = true)]
    pub reload_config: bool,
    #[builder(default = Duration::from_secs(30))]
    pub drain_timeout: Duration,
}

impl Default for RestartOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The attempt currently owned by the orchestrator.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestartAttempt {
    pub id: Uuid,
    pub requestor: String,
    pub requested_at: DateTime<Utc>,
    pub reason: String,
    pub force: bool,
    pub reload_config: bool,
    #[serde(with = "humantime_serde")]
    #[schema(value_type = String, example = "30s")]
    pub drain_timeout: Duration,
}

impl RestartAttempt {
    pub fn new(requestor: impl Into<String>, options: RestartOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            requestor: requestor.into(),
            requested_at: Utc::now(),
            reason: options.reason,
            force: options.force,
            reload_config: options.reload_config,
            drain_timeout: options.drain_timeout,
        }
    }
}

/// Returned when a restart is accepted.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestartTicket {
    pub attempt_id: Uuid,
    pub estimated_seconds: u64,
    pub state: LifecycleState,
}

/// The most recent failed attempt, reported until acknowledged.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FailureNotice {
    pub attempt_id: Uuid,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
    /// Rollback failed, so the live configuration may be partially applied
    pub config_state_unknown: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RestartStatus {
    pub state: LifecycleState,
    pub is_restarting: bool,
    pub active_request_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_attempt: Option<RestartAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_requests: Option<Vec<ActiveRequestSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureNotice>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub cancelled_attempt_id: Option<AttemptId>,
    pub acknowledged_failure: Option<FailureNotice>,
}

/// Why a restart attempt failed. Captured by the background task, never returned to callers.
#[derive(Debug, ThisError)]
pub enum RestartFailure {
    #[error("configuration backup failed: {0}")]
    ConfigBackupFailed(String),

    #[error("configuration reload failed: {0}")]
    ConfigReloadFailed(String),

    #[error("configuration validation failed: {0}")]
    ConfigValidationFailed(String),

    #[error("restart action '{name}' failed: {cause}")]
    RestartActionFailed { name: String, cause: String },

    #[error("rollback failed ({cause}) after: {original}; configuration state is unknown")]
    RollbackFailed { original: Box<RestartFailure>, cause: String },

    #[error("restart sequence panicked: {0}")]
    Panicked(String),

    #[error("restart attempt was cancelled")]
    Cancelled,

    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition { from: LifecycleState, to: LifecycleState },
}

impl RestartFailure {
    pub fn config_state_unknown(&self) -> bool {
        matches!(self, RestartFailure::RollbackFailed { .. })
    }
}

/// Tunables taken from [`RestartConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub history_limit: usize,
    pub drain_poll_interval: Duration,
    pub estimate_padding: Duration,
}

impl From<&RestartConfig> for OrchestratorSettings {
    fn from(config: &RestartConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            drain_poll_interval: config.drain_poll_interval,
            estimate_padding: config.estimate_padding,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&RestartConfig::default())
    }
}

struct ActiveAttempt {
    attempt: RestartAttempt,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Lifecycle {
    state: LifecycleState,
    attempt: Option<ActiveAttempt>,
    last_failure: Option<FailureNotice>,
}

/// How a finished attempt ended, as recorded in history.
struct Outcome {
    failure: Option<RestartFailure>,
    rolled_back: bool,
}

struct Inner {
    settings: RwLock<OrchestratorSettings>,
    lifecycle: RwLock<Lifecycle>,
    // Mirrors `lifecycle.state.is_restarting()` so admission checks never touch the lock
    restarting: AtomicBool,
    tracker: InFlightTracker,
    config: Arc<dyn ConfigStore>,
    audit: Arc<dyn AuditSink>,
    history: Mutex<RestartHistory>,
    pre_hooks: RwLock<Vec<Arc<dyn RestartHook>>>,
    post_hooks: RwLock<Vec<Arc<dyn RestartHook>>>,
    actions: RwLock<Vec<Arc<dyn RestartHook>>>,
    transitions: broadcast::Sender<LifecycleTransition>,
}

// Lifecycle mutations are single assignments checked against the transition table, so state
// behind a poisoned lock is still consistent.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn lifecycle(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        write(&self.lifecycle)
    }

    fn history(&self) -> MutexGuard<'_, RestartHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The single place the lifecycle state changes.
    fn apply(&self, lifecycle: &mut Lifecycle, next: LifecycleState) -> std::result::Result<(), RestartFailure> {
        let from = lifecycle.state;
        if !from.can_transition_to(next) {
            return Err(RestartFailure::IllegalTransition { from, to: next });
        }

        lifecycle.state = next;
        self.restarting.store(next.is_restarting(), Ordering::SeqCst);
        info!(%from, to = %next, "Lifecycle transition");

        // No subscribers is fine
        let _ = self.transitions.send(LifecycleTransition {
            from,
            to: next,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Picks up restart tunables from the configuration now in effect, so a reload that changes
    /// them applies from the next attempt on.
    fn refresh_settings(&self) {
        let settings = OrchestratorSettings::from(&self.config.current().restart);
        self.history().set_capacity(settings.history_limit);
        *write(&self.settings) = settings;
    }

    fn emit(&self, action: AuditAction, principal: &str, attempt_id: Option<AttemptId>, details: serde_json::Value) {
        self.audit.emit(AuditEvent::new(action, principal, attempt_id, details));
    }
}

/// Owns the lifecycle state and runs restart attempts. Cheap to clone.
#[derive(Clone)]
pub struct RestartOrchestrator {
    inner: Arc<Inner>,
}

impl RestartOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        tracker: InFlightTracker,
        config: Arc<dyn ConfigStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let history = RestartHistory::new(settings.history_limit);

        Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(settings),
                lifecycle: RwLock::new(Lifecycle::default()),
                restarting: AtomicBool::new(false),
                tracker,
                config,
                audit,
                history: Mutex::new(history),
                pre_hooks: RwLock::default(),
                post_hooks: RwLock::default(),
                actions: RwLock::default(),
                transitions,
            }),
        }
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.inner.tracker
    }

    /// Admission check for the serving layer: true whenever the state is not `Idle`.
    pub fn is_restarting(&self) -> bool {
        self.inner.restarting.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        read(&self.inner.lifecycle).state
    }

    pub fn status(&self) -> RestartStatus {
        let (state, current_attempt, last_failure) = {
            let lifecycle = read(&self.inner.lifecycle);
            (
                lifecycle.state,
                lifecycle.attempt.as_ref().map(|active| active.attempt.clone()),
                lifecycle.last_failure.clone(),
            )
        };

        let active: Vec<ActiveRequestSummary> = self.inner.tracker.snapshot().iter().map(Into::into).collect();

        RestartStatus {
            state,
            is_restarting: state.is_restarting(),
            active_request_count: active.len(),
            current_attempt,
            active_requests: (!active.is_empty()).then_some(active),
            last_failure,
            timestamp: Utc::now(),
        }
    }

    /// The most recent `limit` finished attempts, newest last.
    pub fn history(&self, limit: usize) -> Vec<RestartHistoryEntry> {
        self.inner.history().recent(limit)
    }

    pub fn history_len(&self) -> usize {
        self.inner.history().len()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<LifecycleTransition> {
        self.inner.transitions.subscribe()
    }

    pub fn add_pre_restart_hook(&self, hook: Arc<dyn RestartHook>) {
        write(&self.inner.pre_hooks).push(hook);
    }

    pub fn add_post_restart_hook(&self, hook: Arc<dyn RestartHook>) {
        write(&self.inner.post_hooks).push(hook);
    }

    /// Work performed inside `Restarting` after configuration is reloaded. Unlike hooks, a
    /// failing action fails the attempt and triggers rollback.
    pub fn add_restart_action(&self, action: Arc<dyn RestartHook>) {
        write(&self.inner.actions).push(action);
    }

    /// Starts a restart attempt in the background and returns immediately.
    ///
    /// Allowed from `Idle`, and from `Failed`, in which case the request acknowledges the
    /// failure. Any other state yields [`Error::RestartAlreadyInProgress`].
    pub fn request_restart(&self, requestor: impl Into<String>, options: RestartOptions) -> Result<RestartTicket> {
        // Checked before any state changes; a failed spawn would strand the lifecycle in `Preparing`
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::Internal {
            operation: format!("start restart attempt: no async runtime ({e})"),
        })?;

        let attempt = RestartAttempt::new(requestor, options);
        let cancel = CancellationToken::new();

        let acknowledged = {
            let mut lifecycle = self.inner.lifecycle();
            let state = lifecycle.state;
            if !state.accepts_restart() {
                return Err(Error::RestartAlreadyInProgress { state });
            }

            let acknowledged = if state == LifecycleState::Failed {
                self.inner
                    .apply(&mut lifecycle, LifecycleState::Idle)
                    .map_err(anyhow::Error::from)?;
                lifecycle.last_failure.take()
            } else {
                None
            };

            self.inner
                .apply(&mut lifecycle, LifecycleState::Preparing)
                .map_err(anyhow::Error::from)?;
            lifecycle.attempt = Some(ActiveAttempt {
                attempt: attempt.clone(),
                cancel: cancel.clone(),
            });
            acknowledged
        };

        if let Some(failure) = acknowledged {
            self.inner.emit(
                AuditAction::FailureAcknowledged,
                &attempt.requestor,
                Some(failure.attempt_id),
                json!({ "superseded_by": attempt.id, "error_message": failure.error_message }),
            );
        }

        info!(
            attempt_id = %attempt.id,
            requestor = %attempt.requestor,
            reason = %attempt.reason,
            force = attempt.force,
            reload_config = attempt.reload_config,
            drain_timeout = %humantime::format_duration(attempt.drain_timeout),
            "Restart requested"
        );
        self.inner.emit(
            AuditAction::RestartRequested,
            &attempt.requestor,
            Some(attempt.id),
            json!({
                "reason": attempt.reason,
                "force": attempt.force,
                "reload_config": attempt.reload_config,
                "drain_timeout_secs": attempt.drain_timeout.as_secs(),
            }),
        );

        let ticket = RestartTicket {
            attempt_id: attempt.id,
            estimated_seconds: self.estimate(&attempt).as_secs(),
            state: LifecycleState::Preparing,
        };

        let span = info_span!("restart_attempt", attempt_id = %attempt.id);
        runtime.spawn(self.clone().run_attempt(attempt, cancel).instrument(span));

        Ok(ticket)
    }

    fn estimate(&self, attempt: &RestartAttempt) -> Duration {
        let padding = read(&self.inner.settings).estimate_padding;
        if attempt.force {
            padding
        } else {
            attempt.drain_timeout + padding
        }
    }

    /// Cancels an attempt that has not reached `Restarting` yet, or acknowledges a failure.
    pub fn cancel_restart(&self, requestor: impl Into<String>) -> Result<CancelOutcome> {
        let requestor = requestor.into();
        let mut lifecycle = self.inner.lifecycle();
        let current = lifecycle.state;

        match current {
            state if state.is_cancellable() => {
                let active = lifecycle.attempt.take();
                self.inner
                    .apply(&mut lifecycle, LifecycleState::Idle)
                    .map_err(anyhow::Error::from)?;
                drop(lifecycle);

                let attempt_id = active.map(|active| {
                    active.cancel.cancel();
                    active.attempt.id
                });

                info!(?attempt_id, %requestor, cancelled_in = %state, "Restart cancelled");
                self.inner.emit(
                    AuditAction::RestartCancelled,
                    &requestor,
                    attempt_id,
                    json!({ "cancelled_in": state }),
                );
                metrics::counter!("restartctl_restart_attempts_total", "outcome" => "cancelled").increment(1);

                Ok(CancelOutcome {
                    cancelled_attempt_id: attempt_id,
                    acknowledged_failure: None,
                })
            }
            LifecycleState::Failed => {
                self.inner
                    .apply(&mut lifecycle, LifecycleState::Idle)
                    .map_err(anyhow::Error::from)?;
                let failure = lifecycle.last_failure.take();
                drop(lifecycle);

                info!(%requestor, "Restart failure acknowledged");
                self.inner.emit(
                    AuditAction::FailureAcknowledged,
                    &requestor,
                    failure.as_ref().map(|f| f.attempt_id),
                    json!({ "error_message": failure.as_ref().map(|f| f.error_message.clone()) }),
                );

                Ok(CancelOutcome {
                    cancelled_attempt_id: None,
                    acknowledged_failure: failure,
                })
            }
            state => Err(Error::CannotCancel { state }),
        }
    }

    /// Moves `attempt_id` to `next`, provided it is still the current attempt.
    fn advance(&self, attempt_id: AttemptId, next: LifecycleState) -> std::result::Result<(), RestartFailure> {
        let mut lifecycle = self.inner.lifecycle();
        let is_current = lifecycle.attempt.as_ref().is_some_and(|active| active.attempt.id == attempt_id);
        if !is_current {
            return Err(RestartFailure::Cancelled);
        }
        self.inner.apply(&mut lifecycle, next)
    }

    fn hooks(list: &RwLock<Vec<Arc<dyn RestartHook>>>) -> Vec<Arc<dyn RestartHook>> {
        read(list).clone()
    }

    async fn run_attempt(self, attempt: RestartAttempt, cancel: CancellationToken) {
        let started = Instant::now();
        let mut snapshot = None;

        let result = AssertUnwindSafe(self.execute(&attempt, &cancel, &mut snapshot))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RestartFailure::Panicked(panic_message(panic.as_ref()))));

        let outcome = match result {
            Ok(()) => Outcome {
                failure: None,
                rolled_back: false,
            },
            Err(RestartFailure::Cancelled) => {
                debug!("Restart task stopped after cancellation");
                return;
            }
            Err(failure) => self.recover(&attempt, failure, snapshot).await,
        };

        self.finalize(attempt, started, outcome);
    }

    async fn execute(
        &self,
        attempt: &RestartAttempt,
        cancel: &CancellationToken,
        snapshot: &mut Option<ConfigSnapshot>,
    ) -> std::result::Result<(), RestartFailure> {
        let pre_hooks = Self::hooks(&self.inner.pre_hooks);
        run_hooks(HookPhase::PreRestart, &pre_hooks, attempt).await;

        if !attempt.force {
            self.advance(attempt.id, LifecycleState::WaitingForDrain)?;
            self.wait_for_drain(attempt, cancel).await?;
        }

        if attempt.reload_config {
            let taken = self
                .inner
                .config
                .snapshot()
                .map_err(|e| RestartFailure::ConfigBackupFailed(format!("{e:#}")))?;
            debug!(taken_at = %taken.taken_at(), "Configuration snapshot taken");
            *snapshot = Some(taken);
        }

        self.advance(attempt.id, LifecycleState::Restarting)?;

        if attempt.reload_config {
            self.inner
                .config
                .reload()
                .await
                .map_err(|e| RestartFailure::ConfigReloadFailed(format!("{e:#}")))?;
            self.inner
                .config
                .validate()
                .map_err(|e| RestartFailure::ConfigValidationFailed(format!("{e:#}")))?;
            info!("Configuration reloaded and validated");
        }

        for action in Self::hooks(&self.inner.actions) {
            debug!(action = action.name(), "Running restart action");
            run_isolated(action.as_ref(), attempt)
                .await
                .map_err(|e| RestartFailure::RestartActionFailed {
                    name: action.name().to_string(),
                    cause: format!("{e:#}"),
                })?;
        }

        let post_hooks = Self::hooks(&self.inner.post_hooks);
        run_hooks(HookPhase::PostRestart, &post_hooks, attempt).await;

        self.advance(attempt.id, LifecycleState::Completed)
    }

    /// Waits until no requests are in flight, the drain timeout elapses, or the attempt is
    /// cancelled. Only cancellation is an error; a timeout proceeds with stragglers logged.
    async fn wait_for_drain(
        &self,
        attempt: &RestartAttempt,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), RestartFailure> {
        let tracker = &self.inner.tracker;
        let deadline = tokio::time::Instant::now() + attempt.drain_timeout;
        let mut poll = tokio::time::interval(read(&self.inner.settings).drain_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            in_flight = tracker.count(),
            timeout = %humantime::format_duration(attempt.drain_timeout),
            "Waiting for in-flight requests to drain"
        );

        loop {
            let drained = tracker.drained();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let remaining = tracker.count();
            if remaining == 0 {
                info!("In-flight requests drained");
                return Ok(());
            }
            debug!(remaining, "Still draining");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RestartFailure::Cancelled),
                _ = &mut drained => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let stragglers = tracker.snapshot();
                    warn!(
                        remaining = stragglers.len(),
                        "Drain timeout elapsed, proceeding with requests still in flight"
                    );
                    for request in &stragglers {
                        warn!(
                            request_id = %request.id,
                            endpoint = %request.endpoint,
                            duration_ms = request.elapsed_ms(),
                            "Request still in flight after drain timeout"
                        );
                    }
                    return Ok(());
                }
                _ = poll.tick() => {}
            }
        }
    }

    /// Rolls back to the snapshot if configuration may have been touched.
    async fn recover(&self, attempt: &RestartAttempt, failure: RestartFailure, snapshot: Option<ConfigSnapshot>) -> Outcome {
        error!("Restart attempt failed: {}", failure);

        let Some(snapshot) = snapshot.filter(|_| self.state() == LifecycleState::Restarting) else {
            return Outcome {
                failure: Some(failure),
                rolled_back: false,
            };
        };

        if let Err(e) = self.advance(attempt.id, LifecycleState::Recovering) {
            error!("Could not enter recovery: {}", e);
            return Outcome {
                failure: Some(failure),
                rolled_back: false,
            };
        }

        let restored = match AssertUnwindSafe(self.inner.config.restore(&snapshot)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("restore panicked: {}", panic_message(panic.as_ref()))),
        };

        match restored {
            Ok(()) => {
                info!("Configuration rolled back to pre-restart snapshot");
                Outcome {
                    failure: Some(failure),
                    rolled_back: true,
                }
            }
            Err(e) => {
                error!(
                    config_state_unknown = true,
                    "Configuration rollback failed, live configuration state is unknown: {:#}", e
                );
                Outcome {
                    failure: Some(RestartFailure::RollbackFailed {
                        original: Box::new(failure),
                        cause: format!("{e:#}"),
                    }),
                    rolled_back: false,
                }
            }
        }
    }

    /// Records the attempt and settles the lifecycle: `Idle` after success, `Failed` otherwise.
    fn finalize(&self, attempt: RestartAttempt, started: Instant, outcome: Outcome) {
        let duration = started.elapsed();
        let ended_at = Utc::now();
        let succeeded = outcome.failure.is_none();
        let error_message = outcome.failure.as_ref().map(ToString::to_string);

        self.inner.refresh_settings();
        self.inner.history().push(RestartHistoryEntry {
            attempt_id: attempt.id,
            requestor: attempt.requestor.clone(),
            reason: attempt.reason.clone(),
            started_at: attempt.requested_at,
            ended_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            succeeded,
            error_message: error_message.clone(),
            force: attempt.force,
            reload_config: attempt.reload_config,
            rolled_back: outcome.rolled_back,
        });

        {
            let mut lifecycle = self.inner.lifecycle();
            let is_current = lifecycle.attempt.as_ref().is_some_and(|active| active.attempt.id == attempt.id);
            if is_current {
                lifecycle.attempt = None;
                let next = match &outcome.failure {
                    None => LifecycleState::Idle,
                    Some(failure) => {
                        lifecycle.last_failure = Some(FailureNotice {
                            attempt_id: attempt.id,
                            error_message: failure.to_string(),
                            failed_at: ended_at,
                            config_state_unknown: failure.config_state_unknown(),
                        });
                        LifecycleState::Failed
                    }
                };
                if let Err(e) = self.inner.apply(&mut lifecycle, next) {
                    error!("Could not settle lifecycle after attempt: {}", e);
                }
            }
        }

        let outcome_label = if succeeded { "succeeded" } else { "failed" };
        metrics::counter!("restartctl_restart_attempts_total", "outcome" => outcome_label).increment(1);
        metrics::histogram!("restartctl_restart_duration_seconds").record(duration.as_secs_f64());

        let details = json!({
            "reason": attempt.reason,
            "duration_ms": duration.as_millis() as u64,
            "rolled_back": outcome.rolled_back,
            "error_message": error_message,
        });
        if succeeded {
            info!(duration_ms = duration.as_millis() as u64, "Restart completed");
            self.inner
                .emit(AuditAction::RestartCompleted, &attempt.requestor, Some(attempt.id), details);
        } else {
            self.inner
                .emit(AuditAction::RestartFailed, &attempt.requestor, Some(attempt.id), details);
        }
    }
}
