//! Uploads a photo taken on the device.

use super::{classify, notify_transfer_state, WorkResult, Worker, WorkerKind};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{NotificationSink, TransferProgress};
use crate::remote::RemoteStorage;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Uploads one local file to remote storage in chunks, reporting bytes
/// sent after each chunk.
pub struct PhotoSyncWorker {
    storage: Arc<dyn RemoteStorage>,
    local_path: PathBuf,
    remote_path: String,
    sink: Arc<dyn NotificationSink>,
    notification_id: i32,
    chunk_size: usize,
}

impl PhotoSyncWorker {
    /// Creates an upload worker.
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        local_path: PathBuf,
        remote_path: String,
        sink: Arc<dyn NotificationSink>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            storage,
            local_path,
            remote_path,
            sink,
            notification_id: config.photo_sync_notification_id,
            chunk_size: config.upload_chunk_size.max(1),
        }
    }

    async fn upload(&self) -> SyncResult<u64> {
        let mut file = match tokio::fs::File::open(&self.local_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SyncError::InvalidRequest(format!(
                    "photo not found: {}",
                    self.local_path.display()
                )))
            }
            Err(err) => return Err(err.into()),
        };
        let total = file.metadata().await?.len();
        let title = self.notification_title();

        let mut buf = vec![0u8; self.chunk_size];
        let mut sent = 0u64;
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            self.storage
                .upload_chunk(&self.remote_path, sent, &buf[..read])
                .await?;
            sent += read as u64;
            self.sink.update(
                self.notification_id,
                &title,
                &TransferProgress::in_progress(total, sent),
            );
        }
        self.storage.finish_upload(&self.remote_path, sent).await?;
        Ok(sent)
    }
}

#[async_trait]
impl Worker for PhotoSyncWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::PhotoSync
    }

    fn notification_title(&self) -> String {
        "Uploading photos".to_string()
    }

    async fn do_work(&self) -> WorkResult {
        let title = self.notification_title();
        match notify_transfer_state(self.sink.as_ref(), self.notification_id, &title, self.upload()).await {
            Ok(bytes) => {
                tracing::info!(remote_path = %self.remote_path, bytes, "photo uploaded");
                WorkResult::Success
            }
            Err(err) => {
                tracing::warn!(
                    local_path = %self.local_path.display(),
                    error = %err,
                    "photo upload failed"
                );
                classify(&err)
            }
        }
    }
}
