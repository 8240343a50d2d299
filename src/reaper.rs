//! Stale-lock recovery. The only mechanism that reclaims items from workers
//! that crash, hang, or lose their completion callback.

use tracing::instrument;

use crate::db::{self, Pool};
use crate::error::Result;
use crate::event::{EventSink, QueueEvent};
use crate::model::QueueItem;

/// One reaper tick: clear every lock older than `timeout_minutes` and return
/// the reclaimed rows. Emits an event only when something was reclaimed.
#[instrument(skip_all)]
pub async fn reap_stale_locks(
    pool: &Pool,
    events: &dyn EventSink,
    timeout_minutes: i64,
) -> Result<Vec<QueueItem>> {
    let cleared = db::clear_stale_locks(pool, timeout_minutes).await?;
    if !cleared.is_empty() {
        events.emit(QueueEvent::StaleLocksCleared {
            items: cleared.clone(),
        });
    }
    Ok(cleared)
}
