//! Job scheduling.
//!
//! Work is requested under a uniqueness key. At most one job per key runs
//! at a time; this is what keeps pushes for one entity strictly ordered.
//! Different keys run in parallel.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::worker::{WorkRequest, WorkResult, WorkerKind, WorkerRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;

/// Accepts background work.
pub trait JobScheduler: Send + Sync {
    /// Requests `request` under `key`.
    ///
    /// If work for `key` is already running, the request is queued to run
    /// once after it instead of in parallel; further requests replace the
    /// queued one.
    fn enqueue_unique(&self, key: &str, request: WorkRequest) -> SyncResult<()>;
}

/// Record of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Uniqueness key.
    pub key: String,
    /// Worker kind.
    pub kind: WorkerKind,
    /// Final result.
    pub result: WorkResult,
    /// Attempts made.
    pub attempts: u32,
}

#[derive(Default)]
struct Slot {
    follow_up: Option<WorkRequest>,
}

struct Inner {
    registry: WorkerRegistry,
    retry: RetryConfig,
    slots: Mutex<HashMap<String, Slot>>,
    history: Mutex<Vec<JobRecord>>,
    idle: Notify,
}

/// In-process scheduler running jobs as tokio tasks.
///
/// Jobs asking for [`WorkResult::Retry`] are rerun with exponential
/// backoff up to `max_attempts`. A worker that panics counts as asking for
/// a retry. Scheduler state is not durable; after a
/// restart, callers reschedule from the local store.
#[derive(Clone)]
pub struct TokioJobScheduler {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl TokioJobScheduler {
    /// Creates a scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn new(registry: WorkerRegistry, retry: RetryConfig) -> SyncResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| SyncError::InvalidRequest(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                retry,
                slots: Mutex::new(HashMap::new()),
                history: Mutex::new(Vec::new()),
                idle: Notify::new(),
            }),
            runtime,
        })
    }

    /// Number of keys with work running.
    pub fn active_jobs(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Finished jobs, oldest first.
    pub fn history(&self) -> Vec<JobRecord> {
        self.inner.history.lock().clone()
    }

    /// Waits until no work is running or queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.slots.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl JobScheduler for TokioJobScheduler {
    fn enqueue_unique(&self, key: &str, request: WorkRequest) -> SyncResult<()> {
        {
            let mut slots = self.inner.slots.lock();
            if let Some(slot) = slots.get_mut(key) {
                tracing::debug!(key, kind = %request.kind(), "work coalesced behind running job");
                slot.follow_up = Some(request);
                return Ok(());
            }
            slots.insert(key.to_string(), Slot::default());
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        self.runtime.spawn(run_key(inner, key, request));
        Ok(())
    }
}

async fn run_key(inner: Arc<Inner>, key: String, first: WorkRequest) {
    let mut request = first;
    loop {
        let kind = request.kind();
        let (result, attempts) = run_with_retry(&inner, &key, &request).await;
        tracing::debug!(%key, %kind, ?result, attempts, "job finished");
        inner.history.lock().push(JobRecord {
            key: key.clone(),
            kind,
            result,
            attempts,
        });

        let next = {
            let mut slots = inner.slots.lock();
            let follow_up = slots.get_mut(&key).and_then(|slot| slot.follow_up.take());
            if follow_up.is_none() {
                slots.remove(&key);
            }
            follow_up
        };
        match next {
            Some(next) => request = next,
            None => break,
        }
    }
    inner.idle.notify_waiters();
}

async fn run_with_retry(inner: &Inner, key: &str, request: &WorkRequest) -> (WorkResult, u32) {
    let mut attempts = 0u32;
    loop {
        let worker = match inner.registry.create(request) {
            Ok(worker) => worker,
            Err(err) => {
                tracing::error!(key, error = %err, "cannot build worker");
                return (WorkResult::Failure, attempts);
            }
        };
        attempts += 1;
        // Own task, so a panic comes back as a JoinError and is retried.
        let result = match tokio::spawn(async move { worker.do_work().await }).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(key, error = %err, "worker aborted");
                WorkResult::Retry
            }
        };
        if result != WorkResult::Retry || !inner.retry.allows_retry_after(attempts) {
            return (result, attempts);
        }
        let delay = inner.retry.backoff(attempts);
        tracing::debug!(key, attempts, ?delay, "retrying job");
        tokio::time::sleep(delay).await;
    }
}
