use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use utoipa::ToSchema;
use uuid::Uuid;

/// Summary of one finished restart attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RestartHistoryEntry {
    pub attempt_id: Uuid,
    pub requestor: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub force: bool,
    pub reload_config: bool,
    /// Configuration was restored from the pre-attempt snapshot
    pub rolled_back: bool,
}

/// Bounded list of finished attempts; the oldest entry is dropped once the cap is reached.
#[derive(Debug, Clone)]
pub struct RestartHistory {
    entries: VecDeque<RestartHistoryEntry>,
    capacity: usize,
}

impl RestartHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: RestartHistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Changes the cap, dropping the oldest entries if the history no longer fits.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The most recent `limit` entries, newest last.
    pub fn recent(&self, limit: usize) -> Vec<RestartHistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
