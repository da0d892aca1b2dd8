//! Shared helpers for unit and HTTP tests.

use async_trait::async_trait;
use axum::{Router, http::StatusCode, routing::get};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::config_store::{ConfigSnapshot, ConfigStore};
use crate::lifecycle::{
    AuditAction, AuditEvent, AuditSink, InFlightTracker, LifecycleState, LifecycleTransition, OrchestratorSettings,
    RestartOrchestrator,
};
use crate::{AppState, Application};

pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.restart.drain_poll_interval = Duration::from_millis(10);
    config.restart.watch_debounce = Duration::from_millis(50);
    config
}

/// In-memory [`ConfigStore`] with switchable failures and call counters.
#[derive(Default)]
pub struct MemoryConfigStore {
    current: Mutex<Arc<Config>>,
    next: Mutex<Option<Config>>,
    fail_snapshot: AtomicBool,
    fail_reload: AtomicBool,
    fail_restore: AtomicBool,
    snapshots: AtomicUsize,
    reloads: AtomicUsize,
    restores: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            current: Mutex::new(Arc::new(config)),
            ..Default::default()
        }
    }

    /// Configuration the next successful reload makes current.
    pub fn set_next(&self, config: Config) {
        *self.next.lock().unwrap() = Some(config);
    }

    pub fn fail_snapshot(&self, fail: bool) {
        self.fail_snapshot.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn current(&self) -> Arc<Config> {
        self.current.lock().unwrap().clone()
    }

    fn snapshot(&self) -> anyhow::Result<ConfigSnapshot> {
        if self.fail_snapshot.load(Ordering::SeqCst) {
            anyhow::bail!("snapshot storage unavailable");
        }
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(ConfigSnapshot::new(self.current()))
    }

    async fn reload(&self) -> anyhow::Result<()> {
        if self.fail_reload.load(Ordering::SeqCst) {
            anyhow::bail!("config source unreadable");
        }
        if let Some(next) = self.next.lock().unwrap().take() {
            *self.current.lock().unwrap() = Arc::new(next);
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restore(&self, snapshot: &ConfigSnapshot) -> anyhow::Result<()> {
        if self.fail_restore.load(Ordering::SeqCst) {
            anyhow::bail!("config store rejected restore");
        }
        *self.current.lock().unwrap() = snapshot.config().clone();
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Keeps every audit event for inspection.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().unwrap().iter().map(|event| event.action).collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn test_orchestrator(config: Config) -> (RestartOrchestrator, Arc<MemoryConfigStore>, Arc<RecordingAuditSink>) {
    let settings = OrchestratorSettings::from(&config.restart);
    let store = Arc::new(MemoryConfigStore::new(config));
    let audit = Arc::new(RecordingAuditSink::default());
    let orchestrator = RestartOrchestrator::new(settings, InFlightTracker::new(), store.clone(), audit.clone());
    (orchestrator, store, audit)
}

/// Polls until the orchestrator reaches `state`, panicking after a few seconds.
pub async fn wait_for_state(orchestrator: &RestartOrchestrator, state: LifecycleState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while orchestrator.state() != state {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {state}, still {}", orchestrator.state());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Target states of every transition received so far.
pub fn drain_transitions(rx: &mut broadcast::Receiver<LifecycleTransition>) -> Vec<LifecycleState> {
    let mut states = Vec::new();
    while let Ok(transition) = rx.try_recv() {
        states.push(transition.to);
    }
    states
}

/// Routes standing in for the service protected by admission control.
pub fn test_service_router() -> Router {
    Router::new()
        .route("/api/v1/ping", get(|| async { "pong" }))
        .route(
            "/api/v1/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "handler failed") }),
        )
}

/// Test server over the full router, backed by a [`MemoryConfigStore`].
pub fn create_test_app(config: Config) -> (axum_test::TestServer, AppState, Arc<MemoryConfigStore>) {
    let store = Arc::new(MemoryConfigStore::new(config));
    let app = Application::with_config_store(store.clone(), test_service_router());
    let state = app.state().clone();
    (app.into_test_server(), state, store)
}
