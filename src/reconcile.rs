//! Expected-count reconciliation: ask the analytics warehouse how many
//! records each `(site, uid)` pair should produce and write the answer onto
//! the batch's items.

use tracing::{info, instrument};

use crate::analytics::AnalyticsService;
use crate::db::{self, Pool};
use crate::error::Result;
use crate::model::QueueItem;

/// Build one grouped-count statement across the configured source tables for
/// the given uids. Counts for the same `(site, uid)` pair are summed across
/// tables.
pub fn expected_count_statement(tables: &[String], uids: &[String]) -> String {
    let uid_list = uids
        .iter()
        .map(|u| format!("'{}'", u.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ");
    let partitions = tables
        .iter()
        .map(|t| {
            format!(
                "SELECT site, SecondaryId, COUNT(*) AS cnt FROM {t} \
                 WHERE SecondaryId IN ({uid_list}) GROUP BY site, SecondaryId"
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    format!(
        "SELECT site, SecondaryId, SUM(cnt) AS expectedCount \
         FROM ({partitions}) GROUP BY site, SecondaryId"
    )
}

/// Reconcile every item in a batch against the warehouse. Items with no
/// matching `(site, uid)` group get an expected count of zero.
///
/// Per-item writes are independent and keyed by the business key, so a
/// partial failure leaves no corrupt state and re-running is idempotent.
#[instrument(skip_all)]
pub async fn load_batch_expected(
    pool: &Pool,
    analytics: &dyn AnalyticsService,
    tables: &[String],
    batch_id: i64,
) -> Result<Vec<QueueItem>> {
    let items = db::batch_items(pool, batch_id).await?;
    if items.is_empty() {
        return Ok(items);
    }

    let mut uids: Vec<String> = items.iter().map(|i| i.uid.clone()).collect();
    uids.sort();
    uids.dedup();

    let statement = expected_count_statement(tables, &uids);
    let rows = analytics.expected_counts(&statement).await?;

    for item in &items {
        let count = rows
            .iter()
            .find(|r| r.site == item.site && r.uid == item.uid)
            .map(|r| r.expected_count)
            .unwrap_or(0);
        db::set_expected_count(pool, batch_id, &item.uid, item.site, count).await?;
    }

    info!(batch_id, items = items.len(), "expected counts loaded");
    db::batch_items(pool, batch_id).await
}
