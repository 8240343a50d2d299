use sqlx::{Row, Sqlite, Transaction};
use tracing::instrument;

use super::Pool;
use crate::error::{Error, Result};
use crate::model::{QueueItem, Worker, WorkerActivity};

/// Claim the next unlocked item for `worker_name` in its own transaction.
#[instrument(skip_all)]
pub async fn lock_next_item(pool: &Pool, worker_name: &str) -> Result<Option<QueueItem>> {
    let mut tx = pool.begin().await?;
    let item = lock_next_item_tx(&mut tx, worker_name).await?;
    tx.commit().await?;
    Ok(item)
}

/// Claim the next unlocked item inside a caller-owned transaction, so the
/// claim can be rolled back if a follow-up step (the worker webhook) fails.
///
/// Select-and-lock runs as one UPDATE, so concurrent claimants can never win
/// the same row. Ordering: highest expected count first (unknown or zero
/// last), ties broken by insertion order.
pub async fn lock_next_item_tx(
    tx: &mut Transaction<'_, Sqlite>,
    worker_name: &str,
) -> Result<Option<QueueItem>> {
    let item = sqlx::query_as::<_, QueueItem>(
        "UPDATE queue_items \
         SET locked_at = CURRENT_TIMESTAMP, locked_by = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ( \
             SELECT id FROM queue_items \
             WHERE completed_at IS NULL AND locked_at IS NULL \
             ORDER BY COALESCE(expected_count, 0) DESC, id ASC \
             LIMIT 1 \
         ) \
         RETURNING *",
    )
    .bind(worker_name)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(item)
}

#[instrument(skip_all)]
pub async fn get_item(pool: &Pool, id: i64) -> Result<QueueItem> {
    sqlx::query_as::<_, QueueItem>("SELECT * FROM queue_items WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
}

/// Mark an item completed: sets `completed_at`/`matched_count` and clears the
/// lock fields in the same write. Deliberately not guarded against a second
/// call; it simply overwrites.
#[instrument(skip_all)]
pub async fn complete_item(pool: &Pool, id: i64, matched_count: i64) -> Result<QueueItem> {
    sqlx::query_as::<_, QueueItem>(
        "UPDATE queue_items \
         SET completed_at = CURRENT_TIMESTAMP, matched_count = ?, \
             locked_at = NULL, locked_by = NULL, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? \
         RETURNING *",
    )
    .bind(matched_count)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
}

/// Unconditionally clear an item's lock, for manual intervention.
#[instrument(skip_all)]
pub async fn release_item(pool: &Pool, id: i64) -> Result<QueueItem> {
    sqlx::query_as::<_, QueueItem>(
        "UPDATE queue_items \
         SET locked_at = NULL, locked_by = NULL, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
}

/// Force-release every uncompleted lock older than `timeout_minutes`,
/// returning the rows that were cleared. One UPDATE, so the read-then-clear
/// cannot race with concurrent claims on other rows.
#[instrument(skip_all)]
pub async fn clear_stale_locks(pool: &Pool, timeout_minutes: i64) -> Result<Vec<QueueItem>> {
    let cleared = sqlx::query_as::<_, QueueItem>(
        "UPDATE queue_items \
         SET locked_at = NULL, locked_by = NULL, updated_at = CURRENT_TIMESTAMP \
         WHERE completed_at IS NULL \
           AND locked_at IS NOT NULL \
           AND datetime(locked_at) < datetime('now', '-' || ? || ' minutes') \
         RETURNING *",
    )
    .bind(timeout_minutes)
    .fetch_all(pool)
    .await?;
    Ok(cleared)
}

/// Per active worker, how many items it currently holds locked. A single
/// query, so the counts are one consistent snapshot.
#[instrument(skip_all)]
pub async fn worker_activity(pool: &Pool) -> Result<Vec<WorkerActivity>> {
    let rows = sqlx::query_as::<_, WorkerActivity>(
        "SELECT w.name AS name, w.trigger_url AS trigger_url, COUNT(q.id) AS active_items \
         FROM workers w \
         LEFT JOIN queue_items q \
           ON q.locked_by = w.name AND q.locked_at IS NOT NULL AND q.completed_at IS NULL \
         WHERE w.active = TRUE \
         GROUP BY w.id \
         ORDER BY w.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn get_worker_by_name(pool: &Pool, name: &str) -> Result<Option<Worker>> {
    let worker = sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(worker)
}

/// All items in a batch, oldest first.
#[instrument(skip_all)]
pub async fn batch_items(pool: &Pool, batch_id: i64) -> Result<Vec<QueueItem>> {
    let items =
        sqlx::query_as::<_, QueueItem>("SELECT * FROM queue_items WHERE batch_id = ? ORDER BY id")
            .bind(batch_id)
            .fetch_all(pool)
            .await?;
    Ok(items)
}

/// Write a reconciled expected count, keyed by the item's business key so a
/// concurrent claim on the same row cannot be lost. Last write wins.
#[instrument(skip_all)]
pub async fn set_expected_count(
    pool: &Pool,
    batch_id: i64,
    uid: &str,
    site: i64,
    expected_count: i64,
) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE queue_items \
         SET expected_count = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE batch_id = ? AND uid = ? AND site = ?",
    )
    .bind(expected_count)
    .bind(batch_id)
    .bind(uid)
    .bind(site)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

#[instrument(skip_all)]
pub async fn insert_batch(pool: &Pool, description: Option<&str>) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO batches (description) VALUES (?) RETURNING id")
        .bind(description)
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn insert_item(pool: &Pool, batch_id: i64, uid: &str, site: i64) -> Result<i64> {
    let rec =
        sqlx::query("INSERT INTO queue_items (batch_id, uid, site) VALUES (?, ?, ?) RETURNING id")
            .bind(batch_id)
            .bind(uid)
            .bind(site)
            .fetch_one(pool)
            .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn insert_worker(pool: &Pool, name: &str, trigger_url: &str, active: bool) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO workers (name, trigger_url, active, pending_start) \
         VALUES (?, ?, ?, FALSE) RETURNING id",
    )
    .bind(name)
    .bind(trigger_url)
    .bind(active)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}
