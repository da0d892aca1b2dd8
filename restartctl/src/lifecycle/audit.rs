use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RestartRequested,
    RestartCancelled,
    FailureAcknowledged,
    RestartCompleted,
    RestartFailed,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::RestartRequested => "restart_requested",
            AuditAction::RestartCancelled => "restart_cancelled",
            AuditAction::FailureAcknowledged => "failure_acknowledged",
            AuditAction::RestartCompleted => "restart_completed",
            AuditAction::RestartFailed => "restart_failed",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured record of a lifecycle action and who caused it.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub principal: String,
    pub attempt_id: Option<Uuid>,
    pub at: DateTime<Utc>,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, principal: impl Into<String>, attempt_id: Option<Uuid>, details: Value) -> Self {
        Self {
            action,
            principal: principal.into(),
            attempt_id,
            at: Utc::now(),
            details,
        }
    }
}

/// Destination for audit events. Emitting must not block; sinks that do I/O should hand the
/// event off to their own task.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events as tracing events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let attempt_id = event.attempt_id.map(|id| id.to_string()).unwrap_or_default();
        info!(
            target: "audit",
            action = %event.action,
            principal = %event.principal,
            attempt_id = %attempt_id,
            details = %event.details,
            "{}", event.action
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let id = Uuid::new_v4();
        let event = AuditEvent::new(AuditAction::RestartRequested, "admin", Some(id), json!({"force": true}));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["action"], "restart_requested");
        assert_eq!(value["principal"], "admin");
        assert_eq!(value["attempt_id"], id.to_string());
        assert_eq!(value["details"]["force"], true);
    }

    #[test_log::test]
    fn test_tracing_sink_accepts_events() {
        TracingAuditSink.emit(AuditEvent::new(AuditAction::RestartCancelled, "ops", None, Value::Null));
    }
}
