//! Fault-injecting backend wrapper.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultPlan {
    fail_appends: u32,
    tear_after: Option<usize>,
    fail_flush: bool,
}

/// Control handle for a [`FaultyBackend`].
///
/// The handle stays with the test while the backend is moved into a store.
#[derive(Debug, Clone, Default)]
pub struct FaultHandle {
    plan: Arc<Mutex<FaultPlan>>,
}

impl FaultHandle {
    /// Makes the next `count` appends fail without writing anything.
    pub fn fail_next_appends(&self, count: u32) {
        self.plan.lock().fail_appends = count;
    }

    /// Makes the next append write only its first `bytes` bytes and then
    /// fail, as if the process died mid-write.
    pub fn tear_next_append(&self, bytes: usize) {
        self.plan.lock().tear_after = Some(bytes);
    }

    /// Makes every flush fail until cleared.
    pub fn set_fail_flush(&self, fail: bool) {
        self.plan.lock().fail_flush = fail;
    }

    /// Clears all pending faults.
    pub fn clear(&self) {
        *self.plan.lock() = FaultPlan::default();
    }
}

/// A backend wrapper that injects write failures on demand.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    handle: FaultHandle,
}

impl FaultyBackend {
    /// Wraps `inner`, returning the backend and its control handle.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, FaultHandle) {
        let handle = FaultHandle::default();
        (
            Self {
                inner,
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let tear_after = {
            let mut plan = self.handle.plan.lock();
            if plan.fail_appends > 0 {
                plan.fail_appends -= 1;
                return Err(StorageError::Injected("append rejected".into()));
            }
            plan.tear_after.take()
        };

        match tear_after {
            Some(bytes) => {
                let cut = bytes.min(data.len());
                self.inner.append(&data[..cut])?;
                Err(StorageError::Injected(format!(
                    "append torn after {cut} of {} bytes",
                    data.len()
                )))
            }
            None => self.inner.append(data),
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.handle.plan.lock().fail_flush {
            return Err(StorageError::Injected("flush rejected".into()));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[test]
    fn failed_append_writes_nothing() {
        let memory = InMemoryBackend::new();
        let (mut backend, faults) = FaultyBackend::new(Box::new(memory.clone()));

        faults.fail_next_appends(1);
        assert!(matches!(backend.append(b"abc"), Err(StorageError::Injected(_))));
        assert_eq!(memory.size().unwrap(), 0);

        backend.append(b"abc").unwrap();
        assert_eq!(memory.data(), b"abc");
    }

    #[test]
    fn torn_append_leaves_prefix() {
        let memory = InMemoryBackend::new();
        let (mut backend, faults) = FaultyBackend::new(Box::new(memory.clone()));

        faults.tear_next_append(2);
        assert!(backend.append(b"abcdef").is_err());
        assert_eq!(memory.data(), b"ab");

        backend.append(b"gh").unwrap();
        assert_eq!(memory.data(), b"abgh");
    }

    #[test]
    fn flush_fault_can_be_cleared() {
        let (mut backend, faults) = FaultyBackend::new(Box::new(InMemoryBackend::new()));
        faults.set_fail_flush(true);
        assert!(backend.flush().is_err());
        faults.clear();
        assert!(backend.flush().is_ok());
    }
}
