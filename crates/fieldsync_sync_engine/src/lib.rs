//! # FieldSync Sync Engine
//!
//! Bidirectional sync between a [`fieldsync_core::LocalStore`] and a
//! remote data store.
//!
//! - [`SyncCoordinator`] merges remote change events into the local store
//!   and pushes queued mutations in change-id order.
//! - Background [`Worker`]s deliver mutations, upload photos and download
//!   map tiles, reporting progress to a [`NotificationSink`].
//! - [`TokioJobScheduler`] runs workers with at most one job per
//!   uniqueness key, so one entity's mutations are never pushed in
//!   parallel.
//! - [`FeatureRepository`] is the facade the application edits through.
//!
//! Nothing here holds state that must survive a restart: queued
//! mutations live in the local store and
//! [`DataSyncWorkManager::reschedule_pending`] recreates the work.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod memory_remote;
mod progress;
mod remote;
mod repository;
mod scheduler;
mod work_manager;
pub mod worker;

pub use config::{
    RetryConfig, SyncConfig, MUTATION_SYNC_NOTIFICATION_ID, PHOTO_SYNC_NOTIFICATION_ID,
    TILE_DOWNLOAD_NOTIFICATION_ID,
};
pub use coordinator::{EventOutcome, PushReport, RemoteSyncHandle, SyncCoordinator};
pub use error::{SyncError, SyncResult};
pub use memory_remote::{MemoryRemote, PushOutcome};
pub use progress::{
    Notification, NotificationSink, RecordingNotificationSink, TracingNotificationSink, TransferProgress,
    TransferState,
};
pub use remote::{RemoteChangeEvent, RemoteDataStore, RemoteEventStream, RemoteStorage, TileSource};
pub use repository::FeatureRepository;
pub use scheduler::{JobRecord, JobScheduler, TokioJobScheduler};
pub use work_manager::DataSyncWorkManager;
pub use worker::{WorkRequest, WorkResult, Worker, WorkerKind, WorkerRegistry};
