use tracing::{info, warn};

use crate::error::Result;
use crate::remote::ProductSource;
use crate::store::LocalStore;

#[derive(Debug, Default)]
pub(crate) struct BackfillStats {
    pub missing: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub unresolved: usize,
    pub batches: usize,
}

/// Fetches metadata for products referenced by counts but absent from
/// `product_meta`, one bounded dual-key lookup per batch. Codes that
/// resolve against neither the current nor the legacy product code stay
/// missing and are retried on the next full run, not within this one.
pub(crate) fn run<S: ProductSource + ?Sized>(
    source: &mut S,
    store: &mut LocalStore,
    batch_size: usize,
) -> Result<BackfillStats> {
    let missing = store.missing_product_codes()?;
    let mut stats = BackfillStats {
        missing: missing.len(),
        ..BackfillStats::default()
    };

    if missing.is_empty() {
        info!("no product metadata missing");
        return Ok(stats);
    }

    info!(
        missing = missing.len(),
        batch_size, "backfilling product metadata"
    );

    for chunk in missing.chunks(batch_size.max(1)) {
        let metas = source.lookup_products(chunk)?;
        stats.batches += 1;
        stats.fetched += metas.len();
        stats.inserted += store.insert_product_meta(&metas)?;

        info!(
            batch = stats.batches,
            resolved = metas.len(),
            requested = chunk.len(),
            "backfill progress"
        );
    }

    stats.unresolved = store.missing_product_codes()?.len();
    if stats.unresolved > 0 {
        warn!(
            unresolved = stats.unresolved,
            "product codes resolved against neither current nor legacy code; retrying next run"
        );
    }

    Ok(stats)
}
