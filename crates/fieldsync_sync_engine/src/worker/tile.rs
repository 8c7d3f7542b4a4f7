//! Downloads offline map tiles.

use super::{classify, notify_transfer_state, WorkResult, Worker, WorkerKind};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{NotificationSink, TransferProgress};
use crate::remote::TileSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Downloads tiles into a directory, one file per tile.
///
/// Tiles already on disk are skipped, so a rerun after an interruption
/// only fetches what is missing. Each tile is written to a `.part` file
/// and renamed, so a partial download is never mistaken for a tile.
/// Total size is not known up front; progress reports bytes written with
/// a `byte_count` of 0.
pub struct TileDownloadWorker {
    source: Arc<dyn TileSource>,
    tile_ids: Vec<String>,
    target_dir: PathBuf,
    sink: Arc<dyn NotificationSink>,
    notification_id: i32,
}

impl TileDownloadWorker {
    /// Creates a download worker.
    pub fn new(
        source: Arc<dyn TileSource>,
        tile_ids: Vec<String>,
        target_dir: PathBuf,
        sink: Arc<dyn NotificationSink>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            tile_ids,
            target_dir,
            sink,
            notification_id: config.tile_download_notification_id,
        }
    }

    /// Path a tile is stored at.
    pub fn tile_path(target_dir: &Path, tile_id: &str) -> SyncResult<PathBuf> {
        let valid = !tile_id.is_empty()
            && tile_id != "."
            && tile_id != ".."
            && tile_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(SyncError::InvalidRequest(format!("invalid tile id {tile_id:?}")));
        }
        Ok(target_dir.join(tile_id))
    }

    /// Where a tile is staged before the rename. `~` never appears in a
    /// tile id, so no tile's staging path is another tile's final path.
    fn staging_path(target_dir: &Path, tile_id: &str) -> PathBuf {
        target_dir.join(format!("{tile_id}~part"))
    }

    async fn download(&self) -> SyncResult<u64> {
        tokio::fs::create_dir_all(&self.target_dir).await?;
        let title = self.notification_title();
        let mut written = 0u64;

        for tile_id in &self.tile_ids {
            let path = Self::tile_path(&self.target_dir, tile_id)?;
            if tokio::fs::try_exists(&path).await? {
                tracing::trace!(%tile_id, "tile already present");
                continue;
            }
            let bytes = self.source.fetch_tile(tile_id).await?;
            let part = Self::staging_path(&self.target_dir, tile_id);
            tokio::fs::write(&part, &bytes).await?;
            tokio::fs::rename(&part, &path).await?;

            written += bytes.len() as u64;
            self.sink.update(
                self.notification_id,
                &title,
                &TransferProgress::in_progress(0, written),
            );
        }
        Ok(written)
    }
}

#[async_trait]
impl Worker for TileDownloadWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::TileDownload
    }

    fn notification_title(&self) -> String {
        "Downloading offline map".to_string()
    }

    async fn do_work(&self) -> WorkResult {
        let title = self.notification_title();
        match notify_transfer_state(self.sink.as_ref(), self.notification_id, &title, self.download()).await {
            Ok(bytes) => {
                tracing::info!(tiles = self.tile_ids.len(), bytes, "tiles downloaded");
                WorkResult::Success
            }
            Err(err) => {
                tracing::warn!(error = %err, "tile download failed");
                classify(&err)
            }
        }
    }
}
