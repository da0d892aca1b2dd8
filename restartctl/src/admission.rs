//! Admission control for the protected service routes.
//!
//! [`admission_middleware`] is the serving-layer side of the restart protocol. Each request is
//! checked against [`RestartOrchestrator::is_restarting`](crate::lifecycle::RestartOrchestrator::is_restarting)
//! before dispatch and answered with `503 Service Unavailable` plus `Retry-After` while a restart
//! is underway. Admitted requests are registered with the in-flight tracker for as long as the
//! handler runs; the guard unregisters on every exit path, including panics and client
//! disconnects that drop the future.
//!
//! Admitted responses carry the request id (`X-Request-ID` by default) and an `X-Response-Time`
//! header. A trusted client id is echoed back but never used as the tracker key; the tracker
//! always sees a server-generated id.

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::{AppState, errors::Error};

const DEFAULT_REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const RESPONSE_TIME_HEADER: HeaderName = HeaderName::from_static("x-response-time");
const MAX_CLIENT_REQUEST_ID_LEN: usize = 128;

/// Identifier assigned to an admitted request, available to handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

pub async fn admission_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, Error> {
    let config = state.config.current();
    let orchestrator = &state.orchestrator;

    if orchestrator.is_restarting() {
        metrics::counter!("restartctl_requests_rejected_total").increment(1);
        debug!(path = %request.uri().path(), "Rejecting request during restart");
        return Err(Error::ServiceRestarting {
            status: Box::new(orchestrator.status()),
            retry_after: config.admission.retry_after,
        });
    }

    let id_header =
        HeaderName::from_bytes(config.admission.request_id_header.as_bytes()).unwrap_or(DEFAULT_REQUEST_ID_HEADER);
    // Clients may reuse ids, so the tracker is always keyed by a fresh one
    let tracking_id = Uuid::new_v4().to_string();
    let request_id = config
        .admission
        .trust_client_request_id
        .then(|| client_request_id(request.headers(), &id_header))
        .flatten()
        .unwrap_or_else(|| tracking_id.clone());

    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let origin = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| forwarded_for(request.headers()));
    let client_info = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let started = Instant::now();
    let _guard = orchestrator.tracker().track(tracking_id, endpoint, origin, client_info);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(id_header, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}s", started.elapsed().as_secs_f64())) {
        headers.insert(RESPONSE_TIME_HEADER, value);
    }

    Ok(response)
}

fn client_request_id(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_CLIENT_REQUEST_ID_LEN)
        .map(str::to_string)
}

/// First hop of `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));

        assert!(forwarded_for(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_client_request_id_limits() {
        let name = DEFAULT_REQUEST_ID_HEADER;
        let mut headers = HeaderMap::new();
        headers.insert(name.clone(), HeaderValue::from_static("  abc-123 "));
        assert_eq!(client_request_id(&headers, &name).as_deref(), Some("abc-123"));

        headers.insert(name.clone(), HeaderValue::from_str(&"x".repeat(200)).unwrap());
        assert!(client_request_id(&headers, &name).is_none());

        headers.insert(name.clone(), HeaderValue::from_static(""));
        assert!(client_request_id(&headers, &name).is_none());
    }
}
