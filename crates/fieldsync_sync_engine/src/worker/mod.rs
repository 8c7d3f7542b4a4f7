//! Background workers.
//!
//! A worker is one schedulable unit of background work. It may be
//! stopped at any point and rerun from scratch, so all progress lives in
//! the local store (or on disk), never in the worker.

mod mutation_sync;
mod photo;
mod tile;

pub use mutation_sync::LocalMutationSyncWorker;
pub use photo::PhotoSyncWorker;
pub use tile::TileDownloadWorker;

use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::progress::{NotificationSink, TransferProgress};
use crate::remote::{RemoteStorage, TileSource};
use async_trait::async_trait;
use fieldsync_core::EntityId;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of one worker run, as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    /// Done; nothing left to do.
    Success,
    /// Failed in a way that may clear up; run again later.
    Retry,
    /// Failed in a way retrying will not fix.
    Failure,
}

/// Kinds of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Delivers one entity's queued mutations.
    LocalMutationSync,
    /// Uploads one photo.
    PhotoSync,
    /// Downloads offline map tiles.
    TileDownload,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LocalMutationSync => "local-mutation-sync",
            Self::PhotoSync => "photo-sync",
            Self::TileDownload => "tile-download",
        })
    }
}

/// Parameters of one piece of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkRequest {
    /// Deliver the queued mutations of an entity.
    SyncEntity {
        /// Entity to sync.
        entity_id: EntityId,
    },
    /// Upload a local photo.
    UploadPhoto {
        /// File on the device.
        local_path: PathBuf,
        /// Destination in remote storage.
        remote_path: String,
    },
    /// Download map tiles into a directory.
    DownloadTiles {
        /// Tiles to fetch.
        tile_ids: Vec<String>,
        /// Directory the tiles are written to.
        target_dir: PathBuf,
    },
}

impl WorkRequest {
    /// Kind of worker that handles this request.
    pub fn kind(&self) -> WorkerKind {
        match self {
            Self::SyncEntity { .. } => WorkerKind::LocalMutationSync,
            Self::UploadPhoto { .. } => WorkerKind::PhotoSync,
            Self::DownloadTiles { .. } => WorkerKind::TileDownload,
        }
    }
}

/// A unit of background work.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Kind of this worker.
    fn kind(&self) -> WorkerKind;

    /// Text shown in the progress notification.
    fn notification_title(&self) -> String;

    /// Runs the work once.
    async fn do_work(&self) -> WorkResult;
}

/// Runs `work`, reporting STARTING before it and COMPLETED or FAILED
/// after it.
pub async fn notify_transfer_state<T, F>(
    sink: &dyn NotificationSink,
    notification_id: i32,
    title: &str,
    work: F,
) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    sink.update(notification_id, title, &TransferProgress::starting());
    let result = work.await;
    let end = if result.is_ok() {
        TransferProgress::completed()
    } else {
        TransferProgress::failed()
    };
    sink.update(notification_id, title, &end);
    result
}

/// Maps an error to a scheduler outcome.
pub(crate) fn classify(err: &SyncError) -> WorkResult {
    match err {
        SyncError::Rejected { .. } | SyncError::InvalidRequest(_) | SyncError::UnknownWorker(_) => {
            WorkResult::Failure
        }
        other if other.is_retryable() => WorkResult::Retry,
        _ => WorkResult::Failure,
    }
}

/// Builds workers from requests.
pub struct WorkerRegistry {
    coordinator: Arc<SyncCoordinator>,
    sink: Arc<dyn NotificationSink>,
    remote_storage: Option<Arc<dyn RemoteStorage>>,
    tile_source: Option<Arc<dyn TileSource>>,
}

impl WorkerRegistry {
    /// Creates a registry that can build mutation sync workers.
    pub fn new(coordinator: Arc<SyncCoordinator>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            coordinator,
            sink,
            remote_storage: None,
            tile_source: None,
        }
    }

    /// Enables photo upload workers.
    pub fn with_remote_storage(mut self, storage: Arc<dyn RemoteStorage>) -> Self {
        self.remote_storage = Some(storage);
        self
    }

    /// Enables tile download workers.
    pub fn with_tile_source(mut self, source: Arc<dyn TileSource>) -> Self {
        self.tile_source = Some(source);
        self
    }

    fn config(&self) -> &SyncConfig {
        self.coordinator.config()
    }

    /// Builds the worker for a request.
    pub fn create(&self, request: &WorkRequest) -> SyncResult<Box<dyn Worker>> {
        match request {
            WorkRequest::SyncEntity { entity_id } => Ok(Box::new(LocalMutationSyncWorker::new(
                Arc::clone(&self.coordinator),
                entity_id.clone(),
                Arc::clone(&self.sink),
            ))),
            WorkRequest::UploadPhoto {
                local_path,
                remote_path,
            } => {
                let storage = self
                    .remote_storage
                    .clone()
                    .ok_or_else(|| SyncError::UnknownWorker("no remote storage registered".into()))?;
                Ok(Box::new(PhotoSyncWorker::new(
                    storage,
                    local_path.clone(),
                    remote_path.clone(),
                    Arc::clone(&self.sink),
                    self.config(),
                )))
            }
            WorkRequest::DownloadTiles {
                tile_ids,
                target_dir,
            } => {
                let source = self
                    .tile_source
                    .clone()
                    .ok_or_else(|| SyncError::UnknownWorker("no tile source registered".into()))?;
                Ok(Box::new(TileDownloadWorker::new(
                    source,
                    tile_ids.clone(),
                    target_dir.clone(),
                    Arc::clone(&self.sink),
                    self.config(),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{RecordingNotificationSink, TransferState};

    #[tokio::test]
    async fn notify_wraps_success_and_failure() {
        let sink = RecordingNotificationSink::new();
        let ok: SyncResult<u8> = notify_transfer_state(&sink, 7, "Work", async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        let err: SyncResult<u8> =
            notify_transfer_state(&sink, 7, "Work", async { Err(SyncError::Timeout) }).await;
        assert!(err.is_err());

        assert_eq!(
            sink.states(7),
            vec![
                TransferState::Starting,
                TransferState::Completed,
                TransferState::Starting,
                TransferState::Failed
            ]
        );
    }

    #[test]
    fn classification() {
        assert_eq!(classify(&SyncError::rejected("no")), WorkResult::Failure);
        assert_eq!(classify(&SyncError::transport_retryable("offline")), WorkResult::Retry);
        assert_eq!(classify(&SyncError::transport_fatal("tls")), WorkResult::Failure);
        assert_eq!(classify(&SyncError::Timeout), WorkResult::Retry);
    }

    #[test]
    fn request_kinds() {
        let request = WorkRequest::SyncEntity {
            entity_id: EntityId::from("e"),
        };
        assert_eq!(request.kind(), WorkerKind::LocalMutationSync);
        assert_eq!(WorkerKind::TileDownload.to_string(), "tile-download");
    }
}
