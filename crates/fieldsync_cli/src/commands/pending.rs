//! Pending command implementation.

use super::{mutation_type_name, open_copy, print_json, CliResult, OutputFormat};
use fieldsync_core::{EntityId, LocalStore, Mutation, MutationState};
use serde::Serialize;
use std::path::Path;

/// One queued mutation.
#[derive(Debug, Serialize)]
pub struct PendingEntry {
    /// Change id.
    pub change_id: u64,
    /// Mutation type.
    pub mutation_type: &'static str,
    /// Project id.
    pub project_id: String,
    /// Entity id.
    pub entity_id: String,
    /// Requesting user.
    pub user_id: String,
    /// Device time, in milliseconds since the epoch.
    pub client_timestamp: u64,
    /// PENDING or FAILED.
    pub state: &'static str,
    /// Failed delivery attempts.
    pub retry_count: u32,
    /// Last delivery error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&Mutation> for PendingEntry {
    fn from(m: &Mutation) -> Self {
        Self {
            change_id: m.change_id.0,
            mutation_type: mutation_type_name(m.mutation_type),
            project_id: m.project_id.to_string(),
            entity_id: m.entity_id.to_string(),
            user_id: m.user_id.to_string(),
            client_timestamp: m.client_timestamp.as_millis(),
            state: match m.state {
                MutationState::Pending => "PENDING",
                MutationState::Failed => "FAILED",
            },
            retry_count: m.retry_count,
            last_error: m.last_error.clone(),
        }
    }
}

/// Runs the pending command.
pub fn run(path: &Path, entity: Option<&str>, format: OutputFormat) -> CliResult<()> {
    let store = open_copy(path)?;
    let entries = collect(&store, entity);

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No queued mutations");
            }
            for e in &entries {
                print!(
                    "change:{:<6} {:<7} {}/{}  {}",
                    e.change_id, e.mutation_type, e.project_id, e.entity_id, e.state
                );
                if let Some(err) = &e.last_error {
                    print!(" (attempts: {}, last error: {err})", e.retry_count);
                }
                println!();
            }
        }
    }
    Ok(())
}

fn collect(store: &LocalStore, entity: Option<&str>) -> Vec<PendingEntry> {
    let mutations = match entity {
        Some(id) => store.get_pending_changes(&EntityId::from(id)),
        None => store.all_pending_changes(),
    };
    mutations.iter().map(PendingEntry::from).collect()
}
