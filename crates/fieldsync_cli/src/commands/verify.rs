//! Verify command implementation.

use super::{open_copy, read_journal, CliError, CliResult};
use fieldsync_core::journal::{scan, JournalRecord};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Records decoded with a valid checksum.
    pub valid_records: usize,
    /// Bytes of an incomplete trailing record.
    pub torn_bytes: u64,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying store at {}", path.display());
    println!();

    let result = verify(path)?;
    println!("  Records checked: {}", result.valid_records);
    if result.torn_bytes > 0 {
        println!(
            "  Incomplete trailing record: {} bytes (discarded on next open)",
            result.torn_bytes
        );
    }
    for error in &result.errors {
        println!("    ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Checks frame integrity, sequence order and the replayed tables.
pub fn verify(path: &Path) -> CliResult<VerifyResult> {
    let data = read_journal(path)?;
    let mut result = VerifyResult::default();

    let outcome = match scan(&data) {
        Ok(outcome) => outcome,
        Err(err) if err.is_corruption() => {
            result.errors.push(err.to_string());
            return Ok(result);
        }
        Err(err) => return Err(err.into()),
    };
    result.valid_records = outcome.records.len();
    result.torn_bytes = outcome.torn_bytes;

    let mut last = 0u64;
    for (offset, record) in &outcome.records {
        let sequence = record.sequence();
        let ordered = match record {
            JournalRecord::Snapshot(_) => sequence >= last,
            JournalRecord::Commit(_) => sequence > last,
        };
        if !ordered {
            result.errors.push(format!(
                "record at offset {offset} has sequence {sequence} after {last}"
            ));
        }
        last = sequence;
    }

    let store = open_copy(path)?;
    result.errors.extend(store.check_consistency());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;
    use fieldsync_core::journal_path_in;
    use std::fs::OpenOptions;
    use std::io::Write;

    #[test]
    fn healthy_store_passes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.valid_records, 3);
        assert_eq!(result.torn_bytes, 0);
    }

    #[test]
    fn torn_tail_is_reported_but_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let mut file = OpenOptions::new()
            .append(true)
            .open(journal_path_in(dir.path()))
            .unwrap();
        file.write_all(b"FSJ1\x01\x00").unwrap();
        drop(file);

        let result = verify(dir.path()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.torn_bytes, 6);
    }

    #[test]
    fn flipped_byte_fails() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let journal = journal_path_in(dir.path());
        let mut data = std::fs::read(&journal).unwrap();
        let at = data.len() - 8;
        data[at] = !data[at];
        std::fs::write(&journal, data).unwrap();

        let result = verify(dir.path()).unwrap();
        assert!(!result.is_ok());
    }
}
