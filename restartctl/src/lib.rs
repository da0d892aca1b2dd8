//! # restartctl: Graceful Restart Orchestration
//!
//! `restartctl` coordinates graceful restarts of a long-running HTTP service. It owns the
//! restart lifecycle state machine, stops admitting new work while a restart is underway, waits
//! for in-flight requests to drain, reloads and validates configuration, and rolls back to the
//! previous configuration when the restart fails.
//!
//! ## Overview
//!
//! A restart is requested through the admin API (or by the configuration file watcher), runs in
//! the background, and moves through a fixed sequence of lifecycle states:
//!
//! ```text
//! Idle -> Preparing -> WaitingForDrain -> Restarting -> Completed -> Idle
//!                                             |
//!                                             +-> Recovering -> Failed
//! ```
//!
//! Only one attempt runs at a time. While any attempt is active, requests to the protected
//! service routes are answered with `503 Service Unavailable` and a `Retry-After` header. The
//! admin API, `/healthz` and `/internal/metrics` stay reachable so operators can observe and
//! cancel the restart.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer.
//! Configuration is held in memory behind an [`arc_swap::ArcSwap`] so that a reload can be
//! rolled back by swapping the previous snapshot back in.
//!
//! ### Core Components
//!
//! The **lifecycle layer** ([`lifecycle`]) contains the [`RestartOrchestrator`](lifecycle::RestartOrchestrator),
//! the [`InFlightTracker`](lifecycle::InFlightTracker), the bounded restart history, hooks and
//! audit events.
//!
//! The **admission layer** ([`admission`]) is middleware applied to the service router. It gates
//! requests on the orchestrator's restart flag and registers admitted requests with the tracker.
//!
//! The **API layer** ([`api`]) exposes the restart endpoints under `/admin/api/v1/restart`.
//!
//! The **configuration layer** ([`config`], [`config_store`]) loads YAML plus `RESTARTCTL_`
//! environment overrides and provides the snapshot/reload/restore operations the orchestrator
//! drives.
//!
//! ## Quick Start
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use clap::Parser;
//! use restartctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = restartctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     restartctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     // The service whose restarts are being coordinated
//!     let service = Router::new().route("/api/v1/ping", get(|| async { "pong" }));
//!
//!     let app = Application::new(config, &args, service).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await
//! }
//! ```

pub mod admission;
pub mod api;
pub mod config;
pub mod config_store;
pub mod errors;
pub mod lifecycle;
mod openapi;
pub mod telemetry;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;

use crate::{
    admission::admission_middleware,
    config_store::{ConfigStore, LiveConfig},
    lifecycle::{InFlightTracker, OrchestratorSettings, RestartOrchestrator, TracingAuditSink},
    openapi::ApiDoc,
};
use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use utoipa::OpenApi;

/// Application state shared across all request handlers.
///
/// - `config`: the live configuration, swapped on reload and restored on rollback
/// - `orchestrator`: the restart lifecycle and its in-flight tracker
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<dyn ConfigStore>,
    pub orchestrator: RestartOrchestrator,
}

/// Build the main application router.
///
/// `service_router` holds the routes whose availability is coordinated with restarts. It is
/// wrapped in [`admission_middleware`]; the admin API, health check and metrics are not.
pub fn build_router(state: &AppState, service_router: Router) -> Router {
    let admin_routes = Router::new()
        .route("/restart", post(api::handlers::restart::request_restart))
        .route("/restart/cancel", post(api::handlers::restart::cancel_restart))
        .route("/restart/status", get(api::handlers::restart::get_restart_status))
        .route("/restart/history", get(api::handlers::restart::get_restart_history))
        .with_state(state.clone());

    let service_router = service_router.layer(from_fn_with_state(state.clone(), admission_middleware));

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/admin/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/admin/api/v1", admin_routes)
        .merge(service_router);

    // Metrics setting is read once; toggling it needs a process restart
    if state.config.current().enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Background tasks running alongside the HTTP server.
///
/// Dropping the struct cancels the shutdown token through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    fn new() -> Self {
        let shutdown_token = tokio_util::sync::CancellationToken::new();
        Self {
            background_tasks: Vec::new(),
            drop_guard: Some(shutdown_token.clone().drop_guard()),
            shutdown_token,
        }
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Main application struct that owns the router, shared state and background tasks.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] wires the live configuration, the orchestrator and the
///    optional configuration file watcher
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, stops background tasks and flushes telemetry
pub struct Application {
    router: Router,
    app_state: AppState,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application backed by the configuration file named in `args`.
    pub async fn new(config: Config, args: &config::Args, service_router: Router) -> anyhow::Result<Self> {
        debug!("Starting restartctl with configuration: {:#?}", config);

        let watch = config.restart.watch_config_file.then_some(config.restart.watch_debounce);
        let store: Arc<dyn ConfigStore> = Arc::new(LiveConfig::new(config, args.clone()));
        let mut app = Self::with_config_store(store.clone(), service_router);

        if let Some(debounce) = watch {
            let handle = lifecycle::watcher::spawn_config_watcher(
                args.config_path(),
                debounce,
                app.app_state.orchestrator.clone(),
                store,
                app.bg_services.shutdown_token.clone(),
            )?;
            app.bg_services.background_tasks.push(handle);
        }

        Ok(app)
    }

    /// Create an application over any [`ConfigStore`], without starting background tasks.
    pub fn with_config_store(store: Arc<dyn ConfigStore>, service_router: Router) -> Self {
        let settings = OrchestratorSettings::from(&store.current().restart);
        let orchestrator = RestartOrchestrator::new(settings, InFlightTracker::new(), store.clone(), Arc::new(TracingAuditSink));

        let app_state = AppState::builder().config(store).orchestrator(orchestrator).build();
        let router = build_router(&app_state, service_router);

        Self {
            router,
            app_state,
            bg_services: BackgroundServices::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let config = self.app_state.config.current();
        let bind_addr = config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "restartctl listening on http://{}, available at http://localhost:{}",
            bind_addr, config.port
        );

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryConfigStore, create_test_app, create_test_config, test_service_router};

    #[tokio::test]
    async fn test_health_and_openapi_routes() {
        let (server, _state, _store) = create_test_app(create_test_config());

        let health = server.get("/healthz").await;
        health.assert_status_ok();
        assert_eq!(health.text(), "OK");

        let openapi: serde_json::Value = server.get("/admin/openapi.json").await.json();
        assert!(openapi["paths"]["/restart/status"].is_object());
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_disabled() {
        let mut config = create_test_config();
        config.enable_metrics = false;
        let (server, _state, _store) = create_test_app(config);

        let response = server.get("/internal/metrics").await;
        assert_eq!(response.status_code().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_enabled() {
        let mut config = create_test_config();
        config.enable_metrics = true;
        let app = Application::with_config_store(Arc::new(MemoryConfigStore::new(config)), test_service_router());
        let server = app.into_test_server();

        server.get("/api/v1/ping").await.assert_status_ok();

        let response = server.get("/internal/metrics").await;
        assert_eq!(response.status_code().as_u16(), 200);
        let content = response.text();
        assert!(content.contains("# HELP") || content.contains("# TYPE"));
    }

    #[tokio::test]
    async fn test_background_services_shutdown_cancels_token() {
        let mut services = BackgroundServices::new();
        let token = services.shutdown_token.clone();
        services.background_tasks.push(tokio::spawn(async move { token.cancelled().await }));

        tokio::time::timeout(std::time::Duration::from_secs(1), services.shutdown())
            .await
            .expect("background tasks should stop once shutdown is requested");
    }
}
