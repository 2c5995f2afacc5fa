use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::model::CountRecord;
use crate::remote::{CountSource, fetch_batches};
use crate::store::LocalStore;

#[derive(Debug, Default)]
pub(crate) struct CountFetchStats {
    pub expected: u64,
    pub fetched: usize,
    pub dropped: usize,
    pub batches: usize,
    pub inserted: usize,
}

/// Pulls the full remote count join in bounded pages, normalizes each row,
/// and hands everything to the store in one idempotent bulk upsert.
///
/// The pre-flight total is progress information only; the fetch terminates
/// on the first empty page regardless. A persistence failure partway
/// leaves applied rows in place, which is safe to reapply on retry.
pub(crate) fn fetch_and_store<S: CountSource + ?Sized>(
    source: &mut S,
    store: &mut LocalStore,
    batch_size: usize,
) -> Result<CountFetchStats> {
    let mut stats = CountFetchStats {
        expected: source.count_total()?,
        ..CountFetchStats::default()
    };

    info!(
        expected = stats.expected,
        batch_size, "fetching remote count records"
    );

    let mut records: Vec<CountRecord> = Vec::new();
    for batch in fetch_batches(source, batch_size) {
        let batch = batch?;
        stats.batches += 1;
        stats.fetched += batch.len();

        for raw in batch {
            match raw.normalize() {
                Ok(record) => records.push(record),
                Err(err @ SyncError::Validation { .. }) => {
                    debug!(error = %err, "dropping count row");
                    stats.dropped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            fetched = stats.fetched,
            expected = stats.expected,
            "fetch progress"
        );
    }

    stats.inserted = store.insert_counts(&records)?;
    info!(
        fetched = stats.fetched,
        inserted = stats.inserted,
        dropped = stats.dropped,
        "count fetch completed"
    );

    Ok(stats)
}
