//! # FieldSync Core
//!
//! Local replica store and durable mutation log for offline-first field
//! data collection.
//!
//! This crate provides:
//! - the data model (entities, mutations, identifiers)
//! - explicit enum-to-code tables for everything persisted
//! - a checksummed, crash-safe journal
//! - [`LocalStore`], which keeps the replica tables and the mutation log
//!   behind one transactional boundary
//!
//! Every local edit goes through [`LocalStore::apply_and_enqueue`], which
//! updates the entity view and queues the mutation in a single journal
//! record. Either both survive a crash or neither does.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codes;
mod config;
mod dir;
mod entity;
mod error;
pub mod journal;
mod mutation;
mod store;
mod types;

pub use config::{RemovalPolicy, StoreConfig};
pub use dir::{journal_path_in, StoreDir};
pub use entity::{AuditInfo, Entity, EntityState, FieldValue, Point, User};
pub use error::{CoreError, CoreResult};
pub use journal::EntityRow;
pub use mutation::{FieldChange, LocationChange, Mutation, MutationPayload, MutationState, MutationType};
pub use store::{EntityKey, LocalStore, MergeOutcome, RemovalOutcome, StoreStats};
pub use types::{ChangeId, EntityId, LayerId, ProjectId, Timestamp, UserId};
