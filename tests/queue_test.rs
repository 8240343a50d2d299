use muse_queue::db;
use muse_queue::error::Error;
use tempfile::TempDir;

async fn setup_pool() -> (db::Pool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (pool, dir)
}

#[tokio::test]
async fn claim_orders_by_expected_count_then_age() {
    let (pool, _dir) = setup_pool().await;
    let batch_id = db::insert_batch(&pool, None).await.unwrap();

    let i_null = db::insert_item(&pool, batch_id, "a", 1).await.unwrap();
    let i_five = db::insert_item(&pool, batch_id, "b", 1).await.unwrap();
    let i_ten = db::insert_item(&pool, batch_id, "c", 1).await.unwrap();
    let i_zero = db::insert_item(&pool, batch_id, "d", 1).await.unwrap();
    db::set_expected_count(&pool, batch_id, "b", 1, 5).await.unwrap();
    db::set_expected_count(&pool, batch_id, "c", 1, 10).await.unwrap();
    db::set_expected_count(&pool, batch_id, "d", 1, 0).await.unwrap();

    let mut order = Vec::new();
    while let Some(item) = db::lock_next_item(&pool, "W1").await.unwrap() {
        assert_eq!(item.locked_by.as_deref(), Some("W1"));
        assert!(item.locked_at.is_some());
        order.push(item.id);
    }

    // Highest expected count first; null and zero last, oldest id breaking ties.
    assert_eq!(order, vec![i_ten, i_five, i_null, i_zero]);

    // Nothing left unlocked.
    assert!(db::lock_next_item(&pool, "W2").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_are_disjoint() {
    let (pool, _dir) = setup_pool().await;
    let batch_id = db::insert_batch(&pool, None).await.unwrap();
    for n in 0..3 {
        db::insert_item(&pool, batch_id, &format!("uid-{n}"), 1)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..6 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            db::lock_next_item(&pool, &format!("W{n}")).await.unwrap()
        }));
    }

    let mut claimed_ids = Vec::new();
    for handle in handles {
        if let Some(item) = handle.await.unwrap() {
            claimed_ids.push(item.id);
        }
    }

    // min(6 callers, 3 items) claims, no item claimed twice.
    assert_eq!(claimed_ids.len(), 3);
    claimed_ids.sort();
    claimed_ids.dedup();
    assert_eq!(claimed_ids.len(), 3);

    let locked: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE locked_at IS NOT NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(locked, 3);
}

#[tokio::test]
async fn complete_clears_lock_and_is_permissive() {
    let (pool, _dir) = setup_pool().await;
    let batch_id = db::insert_batch(&pool, None).await.unwrap();
    let id = db::insert_item(&pool, batch_id, "12345678", 5).await.unwrap();

    let locked = db::lock_next_item(&pool, "W1").await.unwrap().unwrap();
    assert_eq!(locked.id, id);

    let done = db::complete_item(&pool, id, 3).await.unwrap();
    assert!(done.completed_at.is_some());
    assert_eq!(done.matched_count, Some(3));
    assert!(done.locked_at.is_none());
    assert!(done.locked_by.is_none());

    // A second call is not an error; it overwrites.
    let again = db::complete_item(&pool, id, 7).await.unwrap();
    assert!(again.completed_at.is_some());
    assert_eq!(again.matched_count, Some(7));

    // A completed item can never be claimed again.
    assert!(db::lock_next_item(&pool, "W2").await.unwrap().is_none());

    let err = db::complete_item(&pool, 9999, 1).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn release_clears_lock() {
    let (pool, _dir) = setup_pool().await;
    let batch_id = db::insert_batch(&pool, None).await.unwrap();
    let id = db::insert_item(&pool, batch_id, "u", 1).await.unwrap();
    db::lock_next_item(&pool, "W1").await.unwrap().unwrap();

    let released = db::release_item(&pool, id).await.unwrap();
    assert!(released.locked_at.is_none());
    assert!(released.locked_by.is_none());
    assert!(released.completed_at.is_none());

    // Released items go back into rotation.
    let reclaimed = db::lock_next_item(&pool, "W2").await.unwrap().unwrap();
    assert_eq!(reclaimed.id, id);

    let err = db::release_item(&pool, 9999).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn get_item_not_found() {
    let (pool, _dir) = setup_pool().await;
    let err = db::get_item(&pool, 42).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn stale_locks_respect_the_timeout_window() {
    let (pool, _dir) = setup_pool().await;
    let batch_id = db::insert_batch(&pool, None).await.unwrap();
    let stale_id = db::insert_item(&pool, batch_id, "stale", 1).await.unwrap();
    let fresh_id = db::insert_item(&pool, batch_id, "fresh", 1).await.unwrap();
    let done_id = db::insert_item(&pool, batch_id, "done", 1).await.unwrap();

    // Locked 25 minutes ago.
    sqlx::query(
        "UPDATE queue_items SET locked_at = datetime('now', '-25 minutes'), locked_by = 'W1' WHERE id = ?",
    )
    .bind(stale_id)
    .execute(&pool)
    .await
    .unwrap();

    // Locked just now.
    sqlx::query("UPDATE queue_items SET locked_at = CURRENT_TIMESTAMP, locked_by = 'W2' WHERE id = ?")
        .bind(fresh_id)
        .execute(&pool)
        .await
        .unwrap();

    // Completed long ago; an old locked_at on a completed row must be ignored.
    sqlx::query(
        "UPDATE queue_items SET locked_at = datetime('now', '-40 minutes'), locked_by = 'W3', completed_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(done_id)
    .execute(&pool)
    .await
    .unwrap();

    let cleared = db::clear_stale_locks(&pool, 20).await.unwrap();
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].id, stale_id);
    assert!(cleared[0].locked_at.is_none());
    assert!(cleared[0].locked_by.is_none());

    let fresh = db::get_item(&pool, fresh_id).await.unwrap();
    assert!(fresh.is_locked());

    // No newly-stale items: repeated call returns an empty list.
    let cleared = db::clear_stale_locks(&pool, 20).await.unwrap();
    assert!(cleared.is_empty());
}

#[tokio::test]
async fn worker_activity_counts_held_locks() {
    let (pool, _dir) = setup_pool().await;
    db::insert_worker(&pool, "W1", "http://w1", true).await.unwrap();
    db::insert_worker(&pool, "W2", "http://w2", true).await.unwrap();
    db::insert_worker(&pool, "W3", "http://w3", false).await.unwrap();

    let batch_id = db::insert_batch(&pool, None).await.unwrap();
    let a = db::insert_item(&pool, batch_id, "a", 1).await.unwrap();
    db::insert_item(&pool, batch_id, "b", 1).await.unwrap();
    let c = db::insert_item(&pool, batch_id, "c", 1).await.unwrap();

    db::lock_next_item(&pool, "W1").await.unwrap().unwrap();
    db::lock_next_item(&pool, "W1").await.unwrap().unwrap();
    // Completed items stop counting even though they were once held.
    db::complete_item(&pool, a, 1).await.unwrap();
    // An inactive worker's lock is invisible to the activity snapshot.
    sqlx::query("UPDATE queue_items SET locked_at = CURRENT_TIMESTAMP, locked_by = 'W3' WHERE id = ?")
        .bind(c)
        .execute(&pool)
        .await
        .unwrap();

    let activity = db::worker_activity(&pool).await.unwrap();
    let summary: Vec<(String, i64)> = activity
        .iter()
        .map(|w| (w.name.clone(), w.active_items))
        .collect();
    assert_eq!(summary, vec![("W1".to_string(), 1), ("W2".to_string(), 0)]);
}
