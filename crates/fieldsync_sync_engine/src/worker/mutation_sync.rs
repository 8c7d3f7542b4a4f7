//! Delivers one entity's queued mutations.

use super::{classify, notify_transfer_state, WorkResult, Worker, WorkerKind};
use crate::coordinator::SyncCoordinator;
use crate::error::SyncResult;
use crate::progress::NotificationSink;
use async_trait::async_trait;
use fieldsync_core::EntityId;
use std::sync::Arc;

/// Drains the mutation queue of one entity to the remote.
///
/// On the first failed push the remaining mutations are marked FAILED and
/// the run ends; the next run resumes from the first undelivered one.
pub struct LocalMutationSyncWorker {
    coordinator: Arc<SyncCoordinator>,
    entity_id: EntityId,
    sink: Arc<dyn NotificationSink>,
    notification_id: i32,
}

impl LocalMutationSyncWorker {
    /// Creates a worker for `entity_id`.
    pub fn new(coordinator: Arc<SyncCoordinator>, entity_id: EntityId, sink: Arc<dyn NotificationSink>) -> Self {
        let notification_id = coordinator.config().mutation_sync_notification_id;
        Self {
            coordinator,
            entity_id,
            sink,
            notification_id,
        }
    }

    async fn drain(&self) -> SyncResult<usize> {
        let report = self.coordinator.push_pending_mutations(&self.entity_id).await;
        let Some(err) = report.error else {
            return Ok(report.delivered);
        };

        if let Err(mark_err) = self
            .coordinator
            .store()
            .mark_failed(&report.undelivered, &err.to_string())
        {
            tracing::warn!(
                entity_id = %self.entity_id,
                error = %mark_err,
                "could not mark mutations failed"
            );
        }
        Err(err)
    }
}

#[async_trait]
impl Worker for LocalMutationSyncWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::LocalMutationSync
    }

    fn notification_title(&self) -> String {
        "Syncing local changes".to_string()
    }

    async fn do_work(&self) -> WorkResult {
        tracing::debug!(entity_id = %self.entity_id, "mutation sync started");
        let title = self.notification_title();
        match notify_transfer_state(self.sink.as_ref(), self.notification_id, &title, self.drain()).await {
            Ok(delivered) => {
                tracing::debug!(entity_id = %self.entity_id, delivered, "mutation sync completed");
                WorkResult::Success
            }
            Err(err) => classify(&err),
        }
    }
}
