//! End-to-end tests over the full router: admission control, draining and the admin API together.

use axum::{Router, routing::get};
use serde_json::{Value, json};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::Application;
use crate::lifecycle::LifecycleState;
use crate::test_utils::{MemoryConfigStore, create_test_app, create_test_config, test_service_router, wait_for_state};

/// Service router with a `/api/v1/slow` route that holds until `gate` is notified.
fn gated_app(config: crate::Config, gate: Arc<Notify>) -> Application {
    let slow = Router::new().route(
        "/api/v1/slow",
        get(move || {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                "done"
            }
        }),
    );
    let store = Arc::new(MemoryConfigStore::new(config));
    Application::with_config_store(store, test_service_router().merge(slow))
}

async fn wait_for_in_flight(app_state: &crate::AppState, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while app_state.orchestrator.tracker().count() != count {
        assert!(tokio::time::Instant::now() < deadline, "in-flight count never reached {count}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test_log::test(tokio::test)]
async fn test_service_routes_rejected_while_restarting() {
    let (server, state, _store) = create_test_app(create_test_config());
    state.orchestrator.tracker().register("stuck", "/api/v1/stuck", None, None);

    let created = server
        .post("/admin/api/v1/restart")
        .add_header("x-restartctl-user", "ops")
        .json(&json!({ "reason": "rollout", "timeout": 60 }))
        .await;
    created.assert_status(axum::http::StatusCode::ACCEPTED);
    wait_for_state(&state.orchestrator, LifecycleState::WaitingForDrain).await;

    let rejected = server.get("/api/v1/ping").await;
    rejected.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rejected.header("retry-after"), "5");
    let body: Value = rejected.json();
    assert_eq!(body["code"], "service_restarting");
    assert_eq!(body["restart_status"]["state"], "waiting_for_drain");
    assert_eq!(body["restart_status"]["current_attempt"]["requestor"], "ops");
    assert_eq!(body["restart_status"]["active_request_count"], 1);

    // rejected requests never reach the tracker
    assert_eq!(state.orchestrator.tracker().count(), 1);

    // operators can still see and stop the restart
    server.get("/healthz").await.assert_status_ok();
    let status: Value = server.get("/admin/api/v1/restart/status").await.json();
    assert_eq!(status["state"], "waiting_for_drain");
    assert_eq!(status["active_requests"][0]["id"], "stuck");

    server.post("/admin/api/v1/restart/cancel").json(&json!({})).await.assert_status_ok();
    assert_eq!(state.orchestrator.state(), LifecycleState::Idle);

    server.get("/api/v1/ping").await.assert_status_ok();
}

#[tokio::test]
async fn test_retry_after_follows_config() {
    let mut config = create_test_config();
    config.admission.retry_after = Duration::from_secs(30);
    let (server, state, _store) = create_test_app(config);
    state.orchestrator.tracker().register("stuck", "/api/v1/stuck", None, None);

    server.post("/admin/api/v1/restart").json(&json!({})).await;
    wait_for_state(&state.orchestrator, LifecycleState::WaitingForDrain).await;

    let rejected = server.get("/api/v1/ping").await;
    assert_eq!(rejected.header("retry-after"), "30");

    state.orchestrator.cancel_restart("test").unwrap();
}

#[tokio::test]
async fn test_admitted_response_headers() {
    let (server, state, _store) = create_test_app(create_test_config());

    let response = server.get("/api/v1/ping").add_header("x-request-id", "client-chosen").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "pong");

    // client ids are ignored unless trusted
    let id = response.header("x-request-id");
    let id = id.to_str().unwrap();
    assert_ne!(id, "client-chosen");
    assert!(Uuid::parse_str(id).is_ok());

    let elapsed = response.header("x-response-time");
    assert!(elapsed.to_str().unwrap().ends_with('s'));

    assert_eq!(state.orchestrator.tracker().count(), 0);
}

#[tokio::test]
async fn test_trusted_client_request_id_is_echoed() {
    let mut config = create_test_config();
    config.admission.trust_client_request_id = true;
    config.admission.request_id_header = "x-correlation-id".to_string();
    let (server, _state, _store) = create_test_app(config);

    let response = server.get("/api/v1/ping").add_header("x-correlation-id", "client-42").await;
    assert_eq!(response.header("x-correlation-id"), "client-42");

    let generated = server.get("/api/v1/ping").await;
    assert!(Uuid::parse_str(generated.header("x-correlation-id").to_str().unwrap()).is_ok());
}

#[tokio::test]
async fn test_failed_handler_is_untracked() {
    let (server, state, _store) = create_test_app(create_test_config());

    let response = server.get("/api/v1/fail").await;
    response.assert_status(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.maybe_header("x-request-id").is_some());
    assert_eq!(state.orchestrator.tracker().count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_restart_waits_for_in_flight_request() {
    let gate = Arc::new(Notify::new());
    let app = gated_app(create_test_config(), gate.clone());
    let state = app.state().clone();
    let server = app.into_test_server();

    let slow = server.get("/api/v1/slow").into_future();
    let driver = async {
        wait_for_in_flight(&state, 1).await;

        let status: Value = server
            .get("/admin/api/v1/restart/status")
            .await
            .json();
        assert_eq!(status["active_requests"][0]["endpoint"], "/api/v1/slow");

        server.post("/admin/api/v1/restart").json(&json!({ "reload_config": false })).await;
        wait_for_state(&state.orchestrator, LifecycleState::WaitingForDrain).await;

        // still draining; new work is turned away
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.orchestrator.state(), LifecycleState::WaitingForDrain);
        server
            .get("/api/v1/ping")
            .await
            .assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);

        gate.notify_one();
    };

    let (response, ()) = tokio::join!(slow, driver);
    response.assert_status_ok();
    assert_eq!(response.text(), "done");

    wait_for_state(&state.orchestrator, LifecycleState::Idle).await;
    let history: Value = server.get("/admin/api/v1/restart/history").await.json();
    assert_eq!(history["total"], 1);
    assert_eq!(history["entries"][0]["succeeded"], true);

    server.get("/api/v1/ping").await.assert_status_ok();
}

#[tokio::test]
async fn test_forced_restart_does_not_wait() {
    let gate = Arc::new(Notify::new());
    let app = gated_app(create_test_config(), gate.clone());
    let state = app.state().clone();
    let server = app.into_test_server();

    let slow = server.get("/api/v1/slow").into_future();
    let driver = async {
        wait_for_in_flight(&state, 1).await;

        server
            .post("/admin/api/v1/restart")
            .json(&json!({ "force": true, "reload_config": false }))
            .await;
        wait_for_state(&state.orchestrator, LifecycleState::Idle).await;

        let history = state.orchestrator.history(1);
        assert!(history[0].succeeded);
        assert!(history[0].force);
        // the in-flight request was left running
        assert_eq!(state.orchestrator.tracker().count(), 1);

        gate.notify_one();
    };

    let (response, ()) = tokio::join!(slow, driver);
    response.assert_status_ok();
    assert_eq!(state.orchestrator.tracker().count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_reused_client_request_id_keeps_both_requests_tracked() {
    let mut config = create_test_config();
    config.admission.trust_client_request_id = true;
    let gate = Arc::new(Notify::new());
    let app = gated_app(config, gate.clone());
    let state = app.state().clone();
    let server = app.into_test_server();

    let slow = server.get("/api/v1/slow").add_header("x-request-id", "dup").into_future();
    let driver = async {
        wait_for_in_flight(&state, 1).await;

        let ping = server.get("/api/v1/ping").add_header("x-request-id", "dup").await;
        ping.assert_status_ok();
        assert_eq!(ping.header("x-request-id"), "dup");

        // the finished request must not take the slow one's entry with it
        assert_eq!(state.orchestrator.tracker().count(), 1);
        let status: Value = server.get("/admin/api/v1/restart/status").await.json();
        assert_eq!(status["active_requests"][0]["endpoint"], "/api/v1/slow");

        server.post("/admin/api/v1/restart").json(&json!({ "reload_config": false })).await;
        wait_for_state(&state.orchestrator, LifecycleState::WaitingForDrain).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.orchestrator.state(), LifecycleState::WaitingForDrain);

        gate.notify_one();
    };

    let (response, ()) = tokio::join!(slow, driver);
    response.assert_status_ok();
    assert_eq!(response.header("x-request-id"), "dup");

    wait_for_state(&state.orchestrator, LifecycleState::Idle).await;
    assert_eq!(state.orchestrator.tracker().count(), 0);
}
