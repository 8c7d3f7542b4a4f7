//! Sync coordinator: remote-to-local merge and local-to-remote push.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteChangeEvent, RemoteDataStore};
use fieldsync_core::{EntityId, LocalStore, MergeOutcome, Mutation, MutationType, ProjectId, RemovalOutcome};
use futures::StreamExt;
use std::slice;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What merging one remote event did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A snapshot was merged.
    Merged(MergeOutcome),
    /// A removal was handled.
    Removed(RemovalOutcome),
    /// The event carried an error and was skipped.
    Skipped,
}

/// Result of draining one entity's queue.
#[derive(Debug, Default)]
pub struct PushReport {
    /// Mutations accepted by the remote and dequeued.
    pub delivered: usize,
    /// Mutations still queued, oldest first, starting with the one that
    /// failed.
    pub undelivered: Vec<Mutation>,
    /// Why draining stopped, if it stopped early.
    pub error: Option<SyncError>,
}

impl PushReport {
    /// Returns true if the whole queue was delivered.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Moves changes between the remote data store and the local store.
pub struct SyncCoordinator {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteDataStore>,
    config: SyncConfig,
}

impl SyncCoordinator {
    /// Creates a coordinator.
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteDataStore>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
        }
    }

    /// The local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Applies one remote event to the local store.
    ///
    /// Each event commits as one local transaction. An
    /// [`RemoteChangeEvent::Error`] is logged and skipped.
    pub fn merge_event(&self, event: RemoteChangeEvent) -> SyncResult<EventOutcome> {
        match event {
            RemoteChangeEvent::EntityLoaded(entity) | RemoteChangeEvent::EntityModified(entity) => {
                Ok(EventOutcome::Merged(self.store.merge_remote(entity)?))
            }
            RemoteChangeEvent::EntityRemoved {
                project_id,
                entity_id,
            } => Ok(EventOutcome::Removed(
                self.store.remove_remote(&project_id, &entity_id)?,
            )),
            RemoteChangeEvent::Error(message) => {
                tracing::warn!(%message, "skipping unreadable remote record");
                Ok(EventOutcome::Skipped)
            }
        }
    }

    /// Mirrors a project's remote entities into the local store.
    ///
    /// Runs until the subscription fails and returns why. A stream that
    /// simply ends is reported as [`SyncError::SubscriptionClosed`].
    pub async fn sync_features(&self, project_id: &ProjectId) -> SyncError {
        self.run_subscription(project_id).await.0
    }

    /// One subscription; also returns how many events were merged.
    async fn run_subscription(&self, project_id: &ProjectId) -> (SyncError, usize) {
        let mut stream = match self.remote.subscribe(project_id).await {
            Ok(stream) => stream,
            Err(err) => return (err, 0),
        };
        tracing::info!(%project_id, "remote subscription started");

        let mut merged = 0usize;
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(err) => return (err, merged),
            };
            if let Err(err) = self.merge_event(event) {
                tracing::error!(%project_id, error = %err, "failed to merge remote event");
                return (err, merged);
            }
            merged += 1;
        }
        (SyncError::SubscriptionClosed, merged)
    }

    /// Starts [`sync_features`](Self::sync_features) on a background task,
    /// resubscribing after retryable failures when configured to.
    ///
    /// The resubscription budget counts consecutive failures: a
    /// subscription that merged at least one event starts the count over.
    pub fn start_remote_sync(self: &Arc<Self>, project_id: ProjectId) -> RemoteSyncHandle {
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                let (err, merged) = coordinator.run_subscription(&project_id).await;
                let Some(policy) = coordinator.config.resubscribe.as_ref() else {
                    return err;
                };
                if merged > 0 {
                    attempt = 0;
                }
                attempt += 1;
                if !err.is_retryable() || !policy.allows_retry_after(attempt) {
                    tracing::warn!(%project_id, error = %err, "remote sync stopped");
                    return err;
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(%project_id, error = %err, attempt, ?delay, "resubscribing");
                tokio::time::sleep(delay).await;
            }
        });
        RemoteSyncHandle { task }
    }

    /// Pushes the entity's queued mutations in change-id order.
    ///
    /// Each accepted mutation is dequeued before the next one is sent, so
    /// an interruption never causes an accepted change to be resent. The
    /// first failure stops the drain; later mutations are not attempted.
    pub async fn push_pending_mutations(&self, entity_id: &EntityId) -> PushReport {
        let pending = self.store.get_pending_changes(entity_id);
        let mut report = PushReport::default();

        for (index, mutation) in pending.iter().enumerate() {
            let result = if mutation.mutation_type == MutationType::Reload {
                Ok(())
            } else {
                self.push_one(mutation).await
            };

            let result = result.and_then(|()| {
                self.store
                    .dequeue(slice::from_ref(mutation))
                    .map_err(SyncError::from)
            });
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::debug!(%entity_id, change_id = %mutation.change_id, "mutation delivered");
                }
                Err(err) => {
                    tracing::warn!(
                        %entity_id,
                        change_id = %mutation.change_id,
                        error = %err,
                        "push stopped"
                    );
                    report.undelivered = pending[index..].to_vec();
                    report.error = Some(err);
                    break;
                }
            }
        }
        report
    }

    async fn push_one(&self, mutation: &Mutation) -> SyncResult<()> {
        match tokio::time::timeout(self.config.push_timeout, self.remote.push(mutation)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }
}

/// Handle to a running remote subscription.
#[derive(Debug)]
pub struct RemoteSyncHandle {
    task: JoinHandle<SyncError>,
}

impl RemoteSyncHandle {
    /// Stops the subscription. A merge in progress completes first; merges
    /// never yield mid-transaction.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns true once the subscription has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the subscription to stop and returns why.
    pub async fn join(self) -> SyncError {
        match self.task.await {
            Ok(err) => err,
            Err(join) if join.is_cancelled() => SyncError::Cancelled,
            Err(join) => SyncError::transport_fatal(format!("sync task panicked: {join}")),
        }
    }
}
