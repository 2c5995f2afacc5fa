use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::CorrectArgs;
use crate::model::Correction;
use crate::store::LocalStore;

/// Records an operator correction against one product/location/site
/// combination. Insert-only: repeating the same natural key is a no-op.
pub fn run(args: CorrectArgs) -> Result<()> {
    if !args.db_path.exists() {
        bail!(
            "local store not found: {} (run `stockrec sync` first)",
            args.db_path.display()
        );
    }

    let store = LocalStore::open(&args.db_path)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;

    let correction = Correction {
        canonical_code: args.sku,
        location: args.location,
        section: args.section,
        site: args.site,
        operator: args.operator,
        note: args.note,
    };

    let inserted = store.insert_correction(&correction)?;
    if inserted {
        info!(
            sku = %correction.canonical_code,
            site = %correction.site,
            location = %correction.location,
            "correction recorded"
        );
    } else {
        info!(
            sku = %correction.canonical_code,
            site = %correction.site,
            location = %correction.location,
            "correction already recorded for this key"
        );
    }

    Ok(())
}
