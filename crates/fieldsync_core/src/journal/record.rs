//! Journal record types and framing.
//!
//! Every record is written as one frame:
//!
//! ```text
//! | magic "FSJ1" (4) | version u16 (2) | kind u8 (1) | length u32 (4) | payload | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The payload is CBOR. The CRC covers every
//! byte before it.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::mutation::Mutation;
use crate::types::{ChangeId, EntityId, ProjectId};
use serde::{Deserialize, Serialize};

/// Magic bytes opening every journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"FSJ1";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// One committed transaction.
    Commit,
    /// Full table image written by compaction.
    Snapshot,
}

impl RecordKind {
    /// Converts a kind byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Returns the kind byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Snapshot => 2,
        }
    }
}

/// Persisted state of one entity.
///
/// `base` is the last version received from the remote; `view` is `base`
/// with every queued mutation replayed on top and is what callers read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    /// Project of the entity.
    pub project_id: ProjectId,
    /// Entity id.
    pub entity_id: EntityId,
    /// Latest remote snapshot, if any was ever received.
    pub base: Option<Entity>,
    /// Locally visible version.
    pub view: Option<Entity>,
    /// A remote removal arrived while local changes were queued.
    pub removal_deferred: bool,
}

impl EntityRow {
    /// Creates an empty row.
    pub fn new(project_id: ProjectId, entity_id: EntityId) -> Self {
        Self {
            project_id,
            entity_id,
            base: None,
            view: None,
            removal_deferred: false,
        }
    }
}

/// One change to the store tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableOp {
    /// Insert or replace an entity row.
    PutEntity(EntityRow),
    /// Drop an entity row entirely.
    RemoveEntity {
        /// Project of the row.
        project_id: ProjectId,
        /// Entity of the row.
        entity_id: EntityId,
    },
    /// Insert or replace a queued mutation.
    PutMutation(Mutation),
    /// Drop a queued mutation.
    RemoveMutation(ChangeId),
    /// Advance the change-id allocator.
    SetNextChangeId(ChangeId),
}

/// All table changes of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit sequence number.
    pub sequence: u64,
    /// Changes, applied in order.
    pub ops: Vec<TableOp>,
}

/// Complete table image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Sequence of the last commit folded into the image.
    pub sequence: u64,
    /// Next change id to allocate.
    pub next_change_id: ChangeId,
    /// Every entity row.
    pub entities: Vec<EntityRow>,
    /// Every queued mutation.
    pub mutations: Vec<Mutation>,
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// One transaction.
    Commit(CommitRecord),
    /// Compacted image; replaces all tables.
    Snapshot(SnapshotRecord),
}

impl JournalRecord {
    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Commit(_) => RecordKind::Commit,
            Self::Snapshot(_) => RecordKind::Snapshot,
        }
    }

    /// Returns the commit sequence carried by the record.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Commit(c) => c.sequence,
            Self::Snapshot(s) => s.sequence,
        }
    }

    /// Encodes the CBOR payload.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        let result = match self {
            Self::Commit(c) => ciborium::into_writer(c, &mut buf),
            Self::Snapshot(s) => ciborium::into_writer(s, &mut buf),
        };
        result.map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a CBOR payload of the given kind.
    pub fn decode_payload(kind: RecordKind, payload: &[u8]) -> CoreResult<Self> {
        match kind {
            RecordKind::Commit => ciborium::from_reader(payload)
                .map(Self::Commit)
                .map_err(|e| CoreError::codec(e.to_string())),
            RecordKind::Snapshot => ciborium::from_reader(payload)
                .map(Self::Snapshot)
                .map_err(|e| CoreError::codec(e.to_string())),
        }
    }

    /// Encodes the complete frame.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("journal record payload too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.kind().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// CRC-32 (IEEE).
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AuditInfo;
    use crate::mutation::Mutation;
    use crate::types::{LayerId, Timestamp, UserId};

    #[test]
    fn crc_matches_reference_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn frame_layout() {
        let record = JournalRecord::Commit(CommitRecord {
            sequence: 7,
            ops: vec![TableOp::RemoveMutation(ChangeId::new(3))],
        });
        let frame = record.encode_frame().unwrap();

        assert_eq!(&frame[0..4], b"FSJ1");
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), JOURNAL_VERSION);
        assert_eq!(frame[6], RecordKind::Commit.as_byte());
        let len = u32::from_le_bytes([frame[7], frame[8], frame[9], frame[10]]) as usize;
        assert_eq!(frame.len(), HEADER_SIZE + len + CRC_SIZE);

        let body = &frame[..frame.len() - CRC_SIZE];
        let stored = u32::from_le_bytes(frame[frame.len() - 4..].try_into().unwrap());
        assert_eq!(crc32(body), stored);
    }

    #[test]
    fn snapshot_payload_decodes() {
        let entity = Entity::new(
            ProjectId::from("p"),
            EntityId::from("e"),
            LayerId::from("l"),
            AuditInfo::new(UserId::from("u"), Timestamp::from_millis(5)),
        );
        let mut mutation = Mutation::create(&entity, UserId::from("u"));
        mutation.change_id = ChangeId::new(1);
        let record = JournalRecord::Snapshot(SnapshotRecord {
            sequence: 2,
            next_change_id: ChangeId::new(2),
            entities: vec![EntityRow {
                project_id: ProjectId::from("p"),
                entity_id: EntityId::from("e"),
                base: None,
                view: Some(entity),
                removal_deferred: false,
            }],
            mutations: vec![mutation],
        });

        let payload = record.encode_payload().unwrap();
        let decoded = JournalRecord::decode_payload(RecordKind::Snapshot, &payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn unknown_kind_byte() {
        assert_eq!(RecordKind::from_byte(0), None);
        assert_eq!(RecordKind::from_byte(9), None);
    }
}
