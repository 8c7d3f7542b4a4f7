//! Transfer progress notifications.
//!
//! Progress is informational only. Losing a notification never affects
//! sync state.

use parking_lot::Mutex;
use std::fmt;

/// Stage of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Work started.
    Starting,
    /// Bytes are moving.
    InProgress,
    /// Work finished successfully.
    Completed,
    /// Work stopped on an error.
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "STARTING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        })
    }
}

/// A progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Current stage.
    pub state: TransferState,
    /// Total bytes, or 0 when unknown.
    pub byte_count: u64,
    /// Bytes moved so far.
    pub bytes_transferred: u64,
}

impl TransferProgress {
    /// Work started.
    pub const fn starting() -> Self {
        Self::with_state(TransferState::Starting)
    }

    /// Work finished.
    pub const fn completed() -> Self {
        Self::with_state(TransferState::Completed)
    }

    /// Work failed.
    pub const fn failed() -> Self {
        Self::with_state(TransferState::Failed)
    }

    /// Bytes moved so far out of `byte_count`.
    pub const fn in_progress(byte_count: u64, bytes_transferred: u64) -> Self {
        Self {
            state: TransferState::InProgress,
            byte_count,
            bytes_transferred,
        }
    }

    const fn with_state(state: TransferState) -> Self {
        Self {
            state,
            byte_count: 0,
            bytes_transferred: 0,
        }
    }
}

/// Receiver of user-visible progress updates.
pub trait NotificationSink: Send + Sync {
    /// Shows or replaces the notification `notification_id`.
    fn update(&self, notification_id: i32, title: &str, progress: &TransferProgress);
}

/// Sink that logs every update through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn update(&self, notification_id: i32, title: &str, progress: &TransferProgress) {
        match progress.state {
            TransferState::InProgress => tracing::trace!(
                notification_id,
                title,
                bytes = progress.bytes_transferred,
                total = progress.byte_count,
                "transfer progress"
            ),
            TransferState::Failed => {
                tracing::warn!(notification_id, title, state = %progress.state, "transfer failed")
            }
            _ => tracing::info!(notification_id, title, state = %progress.state, "transfer state"),
        }
    }
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notification id.
    pub id: i32,
    /// Title shown.
    pub title: String,
    /// Progress shown.
    pub progress: TransferProgress,
}

/// Sink that keeps every update, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    updates: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All updates so far.
    pub fn updates(&self) -> Vec<Notification> {
        self.updates.lock().clone()
    }

    /// States of the updates for one notification id, in order.
    pub fn states(&self, notification_id: i32) -> Vec<TransferState> {
        self.updates
            .lock()
            .iter()
            .filter(|n| n.id == notification_id)
            .map(|n| n.progress.state)
            .collect()
    }

    /// Forgets recorded updates.
    pub fn clear(&self) {
        self.updates.lock().clear();
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn update(&self, notification_id: i32, title: &str, progress: &TransferProgress) {
        self.updates.lock().push(Notification {
            id: notification_id,
            title: title.to_string(),
            progress: *progress,
        });
    }
}
