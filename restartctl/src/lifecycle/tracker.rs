//! Bookkeeping for requests currently being served.
//!
//! The tracker knows nothing about restarts. The serving layer registers each admitted request
//! and unregisters it when processing ends; the orchestrator only reads [`InFlightTracker::count`]
//! and [`InFlightTracker::snapshot`] and waits on [`InFlightTracker::drained`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::trace;
use utoipa::ToSchema;

/// A request admitted by the serving layer and not yet finished.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InFlightRequest {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub endpoint: String,
    pub origin: Option<String>,
    pub client_info: Option<String>,
    #[serde(skip)]
    started: Instant,
}

impl InFlightRequest {
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Condensed view of an in-flight request for status payloads.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ActiveRequestSummary {
    pub id: String,
    pub endpoint: String,
    pub origin: Option<String>,
    pub duration_ms: u64,
}

impl From<&InFlightRequest> for ActiveRequestSummary {
    fn from(request: &InFlightRequest) -> Self {
        Self {
            id: request.id.clone(),
            endpoint: request.endpoint.clone(),
            origin: request.origin.clone(),
            duration_ms: request.elapsed_ms(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    requests: Mutex<HashMap<String, InFlightRequest>>,
    drained: Notify,
}

/// Concurrency-safe registry of in-flight requests. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    inner: Arc<Inner>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section is a plain map operation, so a poisoned lock still holds a
    // consistent map.
    fn requests(&self) -> MutexGuard<'_, HashMap<String, InFlightRequest>> {
        self.inner.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a request. Never fails; admission decisions are made before this is called.
    ///
    /// Registering an id that is already live replaces its metadata.
    pub fn register(
        &self,
        id: impl Into<String>,
        endpoint: impl Into<String>,
        origin: Option<String>,
        client_info: Option<String>,
    ) {
        let request = InFlightRequest {
            id: id.into(),
            started_at: Utc::now(),
            endpoint: endpoint.into(),
            origin,
            client_info,
            started: Instant::now(),
        };
        trace!(request_id = %request.id, endpoint = %request.endpoint, "Registering in-flight request");

        let count = {
            let mut requests = self.requests();
            requests.insert(request.id.clone(), request);
            requests.len()
        };
        metrics::gauge!("restartctl_in_flight_requests").set(count as f64);
    }

    /// Removes a request. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: &str) {
        let (removed, count) = {
            let mut requests = self.requests();
            let removed = requests.remove(id).is_some();
            (removed, requests.len())
        };

        if !removed {
            return;
        }

        trace!(request_id = %id, remaining = count, "Unregistered in-flight request");
        metrics::gauge!("restartctl_in_flight_requests").set(count as f64);
        if count == 0 {
            self.inner.drained.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.requests().len()
    }

    /// Point-in-time copy of the live set, oldest first.
    pub fn snapshot(&self) -> Vec<InFlightRequest> {
        let mut requests: Vec<_> = self.requests().values().cloned().collect();
        requests.sort_by_key(|request| request.started);
        requests
    }

    /// Resolves the next time the live set becomes empty.
    ///
    /// Call [`Notified::enable`] before checking [`count`](Self::count), otherwise a drain
    /// between the check and the await is missed.
    pub fn drained(&self) -> Notified<'_> {
        self.inner.drained.notified()
    }

    /// Registers a request and returns a guard that unregisters it when dropped, which covers
    /// normal completion, errors, panics and cancelled futures alike.
    pub fn track(
        &self,
        id: impl Into<String>,
        endpoint: impl Into<String>,
        origin: Option<String>,
        client_info: Option<String>,
    ) -> InFlightGuard {
        let id = id.into();
        self.register(id.clone(), endpoint, origin, client_info);
        InFlightGuard {
            tracker: self.clone(),
            id,
        }
    }
}

/// Unregisters its request on drop.
#[derive(Debug)]
#[must_use = "the request is unregistered as soon as the guard is dropped"]
pub struct InFlightGuard {
    tracker: InFlightTracker,
    id: String,
}

impl InFlightGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.unregister(&self.id);
    }
}
