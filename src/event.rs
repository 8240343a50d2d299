//! Structured events emitted by the dispatch and reaper loops.
//!
//! One sink method, one variant per event kind, so the default log sink can
//! be swapped for metrics or a recording sink in tests.

use crate::model::QueueItem;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Every active worker is at its concurrency limit.
    NoFreeWorkers,
    /// A worker was idle but no unlocked item existed.
    EmptyQueue { worker: String },
    /// An item was claimed and its worker accepted the invocation.
    ItemLocked { item_id: i64, worker: String },
    /// The worker webhook failed; the claim was rolled back.
    InvocationFailed {
        item_id: i64,
        worker: String,
        error: String,
    },
    /// The reaper force-released locks older than the timeout.
    StaleLocksCleared { items: Vec<QueueItem> },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: QueueEvent);
}

/// Default sink: structured log lines via `tracing`.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: QueueEvent) {
        match event {
            QueueEvent::NoFreeWorkers => info!("NO_FREE_WORKERS"),
            QueueEvent::EmptyQueue { worker } => info!(worker = %worker, "EMPTY_QUEUE"),
            QueueEvent::ItemLocked { item_id, worker } => {
                info!(item_id, worker = %worker, "LOCK_ITEM")
            }
            QueueEvent::InvocationFailed {
                item_id,
                worker,
                error,
            } => warn!(item_id, worker = %worker, error = %error, "INVOKE_WORKER_FAILED"),
            QueueEvent::StaleLocksCleared { items } => {
                let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
                info!(?ids, "CLEARED_STALE_LOCKS")
            }
        }
    }
}
