//! Dump-journal command implementation.

use super::{mutation_type_name, print_json, read_journal, CliResult, OutputFormat};
use fieldsync_core::journal::{scan, JournalRecord, TableOp};
use serde::Serialize;
use std::path::Path;

/// One journal record.
#[derive(Debug, Serialize)]
pub struct DumpEntry {
    /// Byte offset of the frame.
    pub offset: u64,
    /// Commit sequence.
    pub sequence: u64,
    /// COMMIT or SNAPSHOT.
    pub kind: &'static str,
    /// Summaries of the table changes, or of the snapshot contents.
    pub ops: Vec<String>,
}

/// Runs the dump-journal command.
pub fn run(path: &Path, limit: Option<usize>, from_sequence: u64, format: OutputFormat) -> CliResult<()> {
    let data = read_journal(path)?;
    let outcome = scan(&data)?;
    let entries = entries(outcome.records, limit, from_sequence);

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            for e in &entries {
                println!("@{:<8} seq {:<6} {}", e.offset, e.sequence, e.kind);
                for op in &e.ops {
                    println!("    {op}");
                }
            }
            if outcome.torn_bytes > 0 {
                println!("<{} bytes of incomplete record>", outcome.torn_bytes);
            }
        }
    }
    Ok(())
}

fn entries(records: Vec<(u64, JournalRecord)>, limit: Option<usize>, from_sequence: u64) -> Vec<DumpEntry> {
    records
        .into_iter()
        .filter(|(_, record)| record.sequence() >= from_sequence)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, record)| {
            let sequence = record.sequence();
            match record {
                JournalRecord::Commit(commit) => DumpEntry {
                    offset,
                    sequence,
                    kind: "COMMIT",
                    ops: commit.ops.iter().map(describe).collect(),
                },
                JournalRecord::Snapshot(snapshot) => DumpEntry {
                    offset,
                    sequence,
                    kind: "SNAPSHOT",
                    ops: vec![format!(
                        "{} entity rows, {} mutations, next {}",
                        snapshot.entities.len(),
                        snapshot.mutations.len(),
                        snapshot.next_change_id
                    )],
                },
            }
        })
        .collect()
}

fn describe(op: &TableOp) -> String {
    match op {
        TableOp::PutEntity(row) => {
            let mut line = format!("put-entity {}/{}", row.project_id, row.entity_id);
            if row.view.as_ref().is_some_and(|v| v.is_deleted()) {
                line.push_str(" (deleted)");
            }
            if row.removal_deferred {
                line.push_str(" (removal deferred)");
            }
            line
        }
        TableOp::RemoveEntity {
            project_id,
            entity_id,
        } => format!("remove-entity {project_id}/{entity_id}"),
        TableOp::PutMutation(m) => format!(
            "put-mutation {} {} {}",
            m.change_id,
            mutation_type_name(m.mutation_type),
            m.entity_id
        ),
        TableOp::RemoveMutation(id) => format!("remove-mutation {id}"),
        TableOp::SetNextChangeId(id) => format!("next-change-id {id}"),
    }
}
