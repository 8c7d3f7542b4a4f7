//! Requests background work with the right uniqueness keys.

use crate::error::SyncResult;
use crate::scheduler::JobScheduler;
use crate::worker::WorkRequest;
use fieldsync_core::{EntityId, LocalStore};
use std::path::PathBuf;
use std::sync::Arc;

const TILE_DOWNLOAD_KEY: &str = "tile-download";

/// Enqueues sync, upload and download work.
pub struct DataSyncWorkManager {
    scheduler: Arc<dyn JobScheduler>,
    store: Arc<LocalStore>,
}

impl DataSyncWorkManager {
    /// Creates a work manager.
    pub fn new(scheduler: Arc<dyn JobScheduler>, store: Arc<LocalStore>) -> Self {
        Self { scheduler, store }
    }

    /// Uniqueness key of an entity's sync work.
    pub fn sync_key(entity_id: &EntityId) -> String {
        format!("sync:{entity_id}")
    }

    /// Requests delivery of an entity's queued mutations. Requests for an
    /// entity that is already syncing run after the current run.
    pub fn enqueue_sync_worker(&self, entity_id: &EntityId) -> SyncResult<()> {
        self.scheduler.enqueue_unique(
            &Self::sync_key(entity_id),
            WorkRequest::SyncEntity {
                entity_id: entity_id.clone(),
            },
        )
    }

    /// Requests upload of a photo.
    pub fn enqueue_photo_upload(&self, local_path: PathBuf, remote_path: impl Into<String>) -> SyncResult<()> {
        let remote_path = remote_path.into();
        self.scheduler.enqueue_unique(
            &format!("photo:{remote_path}"),
            WorkRequest::UploadPhoto {
                local_path,
                remote_path,
            },
        )
    }

    /// Requests download of map tiles.
    pub fn enqueue_tile_download(&self, tile_ids: Vec<String>, target_dir: PathBuf) -> SyncResult<()> {
        self.scheduler.enqueue_unique(
            TILE_DOWNLOAD_KEY,
            WorkRequest::DownloadTiles {
                tile_ids,
                target_dir,
            },
        )
    }

    /// Requests sync work for every entity with queued mutations. Call on
    /// start-up: scheduled work does not survive a restart, queued
    /// mutations do.
    pub fn reschedule_pending(&self) -> SyncResult<usize> {
        let entities = self.store.entities_with_pending_changes();
        for entity_id in &entities {
            self.enqueue_sync_worker(entity_id)?;
        }
        tracing::info!(entities = entities.len(), "rescheduled pending sync work");
        Ok(entities.len())
    }
}
