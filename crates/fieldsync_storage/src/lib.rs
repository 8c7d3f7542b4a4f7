//! # FieldSync Storage
//!
//! Byte-level storage backends for the FieldSync local store.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! journal records, entities or mutations; `fieldsync_core` owns all format
//! interpretation.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral store; clones share the same bytes so a
//!   test can drop a store and reopen it over what was "on disk"
//! - [`FileBackend`] - persistent storage through OS file APIs
//! - [`FaultyBackend`] - wrapper that injects write failures and torn writes
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod faulty;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use faulty::{FaultHandle, FaultyBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
