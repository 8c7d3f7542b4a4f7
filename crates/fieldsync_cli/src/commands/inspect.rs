//! Inspect command implementation.

use super::{format_size, open_copy, print_json, CliResult, OutputFormat};
use fieldsync_core::{EntityRow, LocalStore};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Last committed sequence.
    pub sequence: u64,
    /// Next change id to be assigned.
    pub next_change_id: u64,
    /// Entity rows, tombstones included.
    pub entity_rows: usize,
    /// Live entities.
    pub live_entities: usize,
    /// Mutations waiting for delivery.
    pub pending: usize,
    /// Mutations whose last delivery failed.
    pub failed: usize,
    /// Remote removals waiting on local changes.
    pub deferred_removals: usize,
    /// Entity rows (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntitySummary>>,
}

/// One entity row.
#[derive(Debug, Serialize)]
pub struct EntitySummary {
    /// Project id.
    pub project_id: String,
    /// Entity id.
    pub entity_id: String,
    /// Whether a remote version is known.
    pub synced: bool,
    /// Whether the local view is deleted or absent.
    pub deleted: bool,
    /// Queued mutations.
    pub pending: usize,
    /// Whether a remote removal waits.
    pub removal_deferred: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_entities: bool, format: OutputFormat) -> CliResult<()> {
    let store = open_copy(path)?;
    let result = inspect(&store, path, show_entities)?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn inspect(store: &LocalStore, path: &Path, show_entities: bool) -> CliResult<InspectResult> {
    let stats = store.stats()?;
    let entities = show_entities.then(|| {
        store
            .entity_rows()
            .iter()
            .map(|row| summarize(store, row))
            .collect()
    });

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_bytes: stats.journal_bytes,
        sequence: stats.sequence,
        next_change_id: stats.next_change_id,
        entity_rows: stats.entities,
        live_entities: stats.live_entities,
        pending: stats.pending,
        failed: stats.failed,
        deferred_removals: stats.deferred_removals,
        entities,
    })
}

fn summarize(store: &LocalStore, row: &EntityRow) -> EntitySummary {
    EntitySummary {
        project_id: row.project_id.to_string(),
        entity_id: row.entity_id.to_string(),
        synced: row.base.is_some(),
        deleted: row.view.as_ref().map_or(true, |view| view.is_deleted()),
        pending: store.get_pending_changes(&row.entity_id).len(),
        removal_deferred: row.removal_deferred,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("FieldSync Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Journal:");
    println!("  Size:           {}", format_size(result.journal_bytes));
    println!("  Sequence:       {}", result.sequence);
    println!("  Next change id: {}", result.next_change_id);
    println!();
    println!("Entities:");
    println!("  Rows:              {}", result.entity_rows);
    println!("  Live:              {}", result.live_entities);
    println!("  Deferred removals: {}", result.deferred_removals);
    println!();
    println!("Mutations:");
    println!("  Pending: {}", result.pending);
    println!("  Failed:  {}", result.failed);

    if let Some(entities) = &result.entities {
        println!();
        println!("Rows:");
        for e in entities {
            let mut flags = Vec::new();
            if !e.synced {
                flags.push("local-only");
            }
            if e.deleted {
                flags.push("deleted");
            }
            if e.removal_deferred {
                flags.push("removal-deferred");
            }
            println!(
                "  {}/{}  {} queued  {}",
                e.project_id,
                e.entity_id,
                e.pending,
                flags.join(",")
            );
        }
    }
}
