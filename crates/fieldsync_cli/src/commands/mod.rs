//! CLI command implementations.

pub mod compact;
pub mod dump_journal;
pub mod inspect;
pub mod pending;
pub mod verify;

use fieldsync_core::{journal_path_in, CoreError, LocalStore, MutationType, StoreConfig};
use fieldsync_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output format of the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No journal at the given path.
    #[error("no store found at {0}")]
    NoStore(PathBuf),

    /// Store error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),
}

/// Result type of CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Reads the raw journal bytes of the store at `path`.
pub fn read_journal(path: &Path) -> CliResult<Vec<u8>> {
    let journal = journal_path_in(path);
    if !journal.exists() {
        return Err(CliError::NoStore(path.to_path_buf()));
    }
    Ok(std::fs::read(journal)?)
}

/// Opens a private in-memory copy of the store.
///
/// The store on disk is neither locked nor modified, so this works while
/// the app has the store open. Torn tails are truncated in the copy only.
pub fn open_copy(path: &Path) -> CliResult<LocalStore> {
    let data = read_journal(path)?;
    let config = StoreConfig::new().sync_on_commit(false);
    Ok(LocalStore::open_with_backend(Box::new(InMemoryBackend::with_data(data)), config)?)
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Display name of a mutation type.
pub fn mutation_type_name(t: MutationType) -> &'static str {
    match t {
        MutationType::Create => "CREATE",
        MutationType::Update => "UPDATE",
        MutationType::Delete => "DELETE",
        MutationType::Reload => "RELOAD",
    }
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use fieldsync_core::{
        AuditInfo, Entity, EntityId, FieldChange, FieldValue, LayerId, LocalStore, Mutation, MutationPayload,
        ProjectId, Timestamp, UserId,
    };
    use std::path::Path;

    /// Creates a store with one synced entity and two queued mutations.
    pub fn seed(path: &Path) {
        let store = LocalStore::open(path).unwrap();
        let synced = Entity::new(
            ProjectId::from("p"),
            EntityId::from("synced"),
            LayerId::from("trees"),
            AuditInfo::new(UserId::from("u"), Timestamp::from_millis(1)),
        );
        store.merge_remote(synced).unwrap();
        let local = Entity::new(
            ProjectId::from("p"),
            EntityId::from("local"),
            LayerId::from("trees"),
            AuditInfo::new(UserId::from("u"), Timestamp::from_millis(2)),
        );
        store.apply_and_enqueue(Mutation::create(&local, UserId::from("u"))).unwrap();
        store
            .apply_and_enqueue(Mutation::update(
                ProjectId::from("p"),
                EntityId::from("local"),
                UserId::from("u"),
                MutationPayload {
                    field_changes: vec![FieldChange::set("height", FieldValue::Number(4.5))],
                    ..MutationPayload::default()
                },
            ))
            .unwrap();
    }
}
