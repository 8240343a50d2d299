use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named unit of work submission. Deleting a batch cascades to its items.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Batch {
    pub id: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The unit of dispatchable work.
///
/// An item is in exactly one of three states: unlocked (`locked_at` and
/// `completed_at` both null), locked (`locked_at` set, `completed_at` null),
/// or completed (`completed_at` set; lock fields cleared in the same write).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub batch_id: i64,
    /// Business key, unique together with `site` within a batch.
    pub uid: String,
    pub site: i64,
    /// Filled in by reconciliation against the analytics warehouse.
    pub expected_count: Option<i64>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub matched_count: Option<i64>,
    /// Set by a downstream confirmation step, never written here.
    pub confirmed_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some() && self.completed_at.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// A dispatch target, pre-provisioned in the store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    pub trigger_url: String,
    pub active: bool,
    pub pending_start: bool,
}

/// How many items an active worker currently holds locked, computed as a
/// single consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerActivity {
    pub name: String,
    pub trigger_url: String,
    pub active_items: i64,
}
