//! Durable journal of committed transactions.
//!
//! The journal is the single source of truth for the local store. Entity
//! rows, queued mutations and the change-id allocator are all rebuilt from
//! it on open.

mod reader;
mod record;
mod writer;

pub use reader::{scan, ScanOutcome};
pub use record::{
    crc32, CommitRecord, EntityRow, JournalRecord, RecordKind, SnapshotRecord, TableOp, CRC_SIZE,
    HEADER_SIZE, JOURNAL_MAGIC, JOURNAL_VERSION,
};
pub use writer::Journal;
