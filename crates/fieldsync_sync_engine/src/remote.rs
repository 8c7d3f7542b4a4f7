//! Remote collaborators.

use crate::error::SyncResult;
use async_trait::async_trait;
use fieldsync_core::{Entity, EntityId, Mutation, ProjectId};
use futures::stream::BoxStream;

/// One change reported by the remote change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChangeEvent {
    /// Part of the initial snapshot.
    EntityLoaded(Entity),
    /// An entity was created or changed remotely.
    EntityModified(Entity),
    /// An entity was removed remotely.
    EntityRemoved {
        /// Project of the entity.
        project_id: ProjectId,
        /// Removed entity.
        entity_id: EntityId,
    },
    /// A remote record could not be read. Logged and skipped.
    Error(String),
}

/// Stream of remote changes. An `Err` item is a transport failure and
/// ends the subscription.
pub type RemoteEventStream = BoxStream<'static, SyncResult<RemoteChangeEvent>>;

/// The remote data store.
#[async_trait]
pub trait RemoteDataStore: Send + Sync {
    /// Subscribes to a project's entities.
    ///
    /// The stream first yields [`RemoteChangeEvent::EntityLoaded`] for every
    /// live entity, then incremental changes. It does not complete on its
    /// own.
    async fn subscribe(&self, project_id: &ProjectId) -> SyncResult<RemoteEventStream>;

    /// Delivers one mutation.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transport`](crate::SyncError::Transport) when delivery
    /// failed and may succeed later, [`SyncError::Rejected`](crate::SyncError::Rejected)
    /// when the remote refused the change.
    async fn push(&self, mutation: &Mutation) -> SyncResult<()>;
}

/// Remote blob storage for photos.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Uploads bytes at `offset` of the object at `remote_path`.
    async fn upload_chunk(&self, remote_path: &str, offset: u64, chunk: &[u8]) -> SyncResult<()>;

    /// Marks the upload complete with its final size.
    async fn finish_upload(&self, remote_path: &str, total_bytes: u64) -> SyncResult<()>;
}

/// Source of offline map tiles.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetches one tile.
    async fn fetch_tile(&self, tile_id: &str) -> SyncResult<Vec<u8>>;
}
