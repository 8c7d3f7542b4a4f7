//! Error types for the local store.

use crate::types::{EntityId, ProjectId};
use std::io;
use thiserror::Error;

/// Result type for local store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the local replica store and mutation log.
///
/// Any error returned from a write means the write did **not** commit: the
/// journal and the in-memory tables are left exactly as they were.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// I/O error outside the storage backend (directory handling).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal is structurally invalid.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A journal record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A previous write failed and its partial bytes could not be rolled
    /// back; the store must be reopened to recover.
    #[error("journal poisoned by an unrecoverable write failure; reopen the store")]
    JournalPoisoned,

    /// The entity a mutation targets does not exist locally.
    #[error("entity {entity_id} not found in project {project_id}")]
    EntityNotFound {
        /// Project searched.
        project_id: ProjectId,
        /// Missing entity.
        entity_id: EntityId,
    },

    /// The mutation cannot be applied.
    #[error("invalid mutation: {message}")]
    InvalidMutation {
        /// Why the mutation was refused.
        message: String,
    },

    /// A stored value has an unknown encoding.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Operation not permitted for this store.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is not permitted.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid mutation error.
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an entity-not-found error.
    pub fn entity_not_found(project_id: &ProjectId, entity_id: &EntityId) -> Self {
        Self::EntityNotFound {
            project_id: project_id.clone(),
            entity_id: entity_id.clone(),
        }
    }

    /// Returns true if the error means the on-device data itself is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::ChecksumMismatch { .. } | Self::InvalidFormat { .. }
        )
    }
}
