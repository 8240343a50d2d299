//! One dispatcher tick: find an idle worker, claim the next item, invoke the
//! worker, and only keep the lock if the invocation was accepted.

use tracing::instrument;

use crate::db::{self, Pool};
use crate::error::{Error, Result};
use crate::event::{EventSink, QueueEvent};
use crate::model::QueueItem;
use crate::worker::{WorkerInvocation, WorkerInvoker};

/// What a single dispatch tick did.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Every active worker is at the concurrency limit.
    NoFreeWorkers,
    /// A worker was idle but there was nothing to claim.
    EmptyQueue,
    /// The claim was rolled back because the webhook failed.
    InvocationFailed { item_id: i64, worker: String },
    /// Item claimed and worker notified.
    Dispatched(QueueItem),
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub worker_concurrency: i64,
    pub queue_url: String,
    pub report_no_free_workers: bool,
}

#[instrument(skip_all)]
pub async fn dispatch_next_item(
    pool: &Pool,
    invoker: &dyn WorkerInvoker,
    events: &dyn EventSink,
    settings: &DispatchSettings,
) -> Result<DispatchOutcome> {
    let activity = db::worker_activity(pool).await?;
    let Some(idle) = activity
        .iter()
        .find(|w| w.active_items < settings.worker_concurrency)
    else {
        if settings.report_no_free_workers {
            events.emit(QueueEvent::NoFreeWorkers);
        }
        return Ok(DispatchOutcome::NoFreeWorkers);
    };

    claim_and_invoke(pool, invoker, events, settings, &idle.name, &idle.trigger_url).await
}

/// Manual trigger: claim the next item for a named worker, skipping the
/// idle check (operator intent overrides the concurrency limit). Fails with
/// NotFound if no active worker has that name.
#[instrument(skip_all, fields(worker = %worker_name))]
pub async fn invoke_worker_on_next(
    pool: &Pool,
    invoker: &dyn WorkerInvoker,
    events: &dyn EventSink,
    settings: &DispatchSettings,
    worker_name: &str,
) -> Result<DispatchOutcome> {
    let worker = db::get_worker_by_name(pool, worker_name)
        .await?
        .filter(|w| w.active)
        .ok_or_else(|| Error::NotFound(format!("active worker {worker_name}")))?;

    claim_and_invoke(pool, invoker, events, settings, &worker.name, &worker.trigger_url).await
}

/// Claim and notify as one failure-atomic unit: the lock only commits once
/// the worker has accepted the invocation, so a failed webhook can never
/// strand an item in the locked state with no one processing it.
async fn claim_and_invoke(
    pool: &Pool,
    invoker: &dyn WorkerInvoker,
    events: &dyn EventSink,
    settings: &DispatchSettings,
    worker_name: &str,
    trigger_url: &str,
) -> Result<DispatchOutcome> {
    let mut tx = pool.begin().await?;
    let Some(item) = db::lock_next_item_tx(&mut tx, worker_name).await? else {
        events.emit(QueueEvent::EmptyQueue {
            worker: worker_name.to_string(),
        });
        return Ok(DispatchOutcome::EmptyQueue);
    };

    let payload = WorkerInvocation {
        queue_item_id: item.id,
        queue_url: settings.queue_url.clone(),
        worker_name: worker_name.to_string(),
    };
    if let Err(err) = invoker.invoke(trigger_url, &payload).await {
        // Roll the claim back; the item is claimable again on the next tick.
        tx.rollback().await?;
        events.emit(QueueEvent::InvocationFailed {
            item_id: item.id,
            worker: worker_name.to_string(),
            error: err.to_string(),
        });
        return Ok(DispatchOutcome::InvocationFailed {
            item_id: item.id,
            worker: worker_name.to_string(),
        });
    }

    tx.commit().await?;
    events.emit(QueueEvent::ItemLocked {
        item_id: item.id,
        worker: worker_name.to_string(),
    });
    Ok(DispatchOutcome::Dispatched(item))
}
