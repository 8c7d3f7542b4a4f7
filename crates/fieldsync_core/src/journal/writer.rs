//! Journal writer.

use crate::error::{CoreError, CoreResult};
use crate::journal::reader::{scan, ScanOutcome};
use crate::journal::record::JournalRecord;
use fieldsync_storage::StorageBackend;

/// Append-only journal over a storage backend.
///
/// An append either lands completely and durably or leaves the journal
/// byte-for-byte as it was. If a failed append cannot be rolled back the
/// journal is poisoned and refuses further writes.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    poisoned: bool,
}

impl Journal {
    /// Opens a journal, truncating any torn tail, and returns the records
    /// it holds.
    pub fn recover(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<(Self, ScanOutcome)> {
        let data = backend.read_all()?;
        let outcome = scan(&data)?;
        if outcome.torn_bytes > 0 {
            tracing::warn!(
                valid_len = outcome.valid_len,
                torn_bytes = outcome.torn_bytes,
                "discarding torn journal tail"
            );
            backend.truncate(outcome.valid_len)?;
            backend.sync()?;
        }
        Ok((
            Self {
                backend,
                sync_on_commit,
                poisoned: false,
            },
            outcome,
        ))
    }

    /// Appends one record and flushes it. Returns the frame offset.
    pub fn append(&mut self, record: &JournalRecord) -> CoreResult<u64> {
        if self.poisoned {
            return Err(CoreError::JournalPoisoned);
        }
        let frame = record.encode_frame()?;
        let before = self.backend.size()?;

        match self.write_frame(&frame) {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(rollback) = self.backend.truncate(before) {
                    tracing::error!(error = %rollback, "journal rollback failed");
                    self.poisoned = true;
                }
                Err(err)
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> CoreResult<u64> {
        let offset = self.backend.append(frame)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(offset)
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns true if a failed write could not be rolled back.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Swaps in a new backend, used after compaction.
    pub fn replace_backend(&mut self, backend: Box<dyn StorageBackend>) {
        self.backend = backend;
        self.poisoned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::record::{CommitRecord, TableOp};
    use crate::types::ChangeId;
    use fieldsync_storage::{FaultyBackend, InMemoryBackend};

    fn record(sequence: u64) -> JournalRecord {
        JournalRecord::Commit(CommitRecord {
            sequence,
            ops: vec![TableOp::SetNextChangeId(ChangeId::new(sequence))],
        })
    }

    #[test]
    fn append_then_recover() {
        let memory = InMemoryBackend::new();
        let (mut journal, outcome) = Journal::recover(Box::new(memory.clone()), false).unwrap();
        assert!(outcome.records.is_empty());

        journal.append(&record(1)).unwrap();
        let second = journal.append(&record(2)).unwrap();
        assert!(second > 0);

        let (_, outcome) = Journal::recover(Box::new(memory), false).unwrap();
        let sequences: Vec<u64> = outcome.records.iter().map(|(_, r)| r.sequence()).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn recover_truncates_torn_tail() {
        let memory = InMemoryBackend::new();
        let (mut journal, _) = Journal::recover(Box::new(memory.clone()), false).unwrap();
        journal.append(&record(1)).unwrap();
        let valid = memory.size().unwrap();

        let partial = record(2).encode_frame().unwrap();
        let mut raw = memory.clone();
        raw.append(&partial[..partial.len() / 2]).unwrap();

        let (_, outcome) = Journal::recover(Box::new(memory.clone()), false).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(memory.size().unwrap(), valid);
    }

    #[test]
    fn failed_append_is_rolled_back() {
        let memory = InMemoryBackend::new();
        let (faulty, faults) = FaultyBackend::new(Box::new(memory.clone()));
        let (mut journal, _) = Journal::recover(Box::new(faulty), false).unwrap();
        journal.append(&record(1)).unwrap();
        let before = memory.data();

        faults.tear_next_append(5);
        assert!(journal.append(&record(2)).is_err());
        assert_eq!(memory.data(), before);

        faults.set_fail_flush(true);
        assert!(journal.append(&record(3)).is_err());
        assert_eq!(memory.data(), before);
        assert!(!journal.is_poisoned());

        faults.clear();
        journal.append(&record(4)).unwrap();
    }
}
