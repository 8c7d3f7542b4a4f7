//! Compact command implementation.

use super::{format_size, open_copy, read_journal, CliResult};
use fieldsync_core::journal::scan;
use fieldsync_core::{LocalStore, StoreConfig};
use std::path::Path;

/// Runs the compact command.
///
/// Compaction needs exclusive access and fails while the app has the
/// store open.
pub fn run(path: &Path, dry_run: bool) -> CliResult<()> {
    if dry_run {
        let records = scan(&read_journal(path)?)?.records.len();
        let stats = open_copy(path)?.stats()?;
        println!("Dry run: would fold {records} record(s) into one snapshot");
        println!("  Journal size: {}", format_size(stats.journal_bytes));
        println!("  Entity rows:  {}", stats.entities);
        println!("  Queued:       {}", stats.pending + stats.failed);
        return Ok(());
    }

    let (before, after) = compact(path)?;
    println!("Compacted {}", path.display());
    println!("  Before: {}", format_size(before));
    println!("  After:  {}", format_size(after));
    Ok(())
}

/// Compacts the store and returns journal sizes before and after.
pub fn compact(path: &Path) -> CliResult<(u64, u64)> {
    let store = LocalStore::open_with_config(path, StoreConfig::new().create_if_missing(false))?;
    let before = store.stats()?.journal_bytes;
    let after = store.compact()?.journal_bytes;
    tracing::info!(before, after, "compaction finished");
    Ok((before, after))
}
