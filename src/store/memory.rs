//! In-memory store.
//!
//! Clones share the same bytes and counters but keep their own pointer, so a
//! test can hand one clone to a cache and inspect the data through another.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::ByteRangeStore;
use crate::error::{Error, Result};

/// Call counters shared by all clones of a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct StoreCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl StoreCounters {
    /// Number of `read_bytes` calls
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `write_bytes` calls
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total bytes returned by reads
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Total bytes accepted by writes
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

/// [`ByteRangeStore`] over a shared in-memory buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<Vec<u8>>>,
    counters: Arc<StoreCounters>,
    fail_writes: Arc<AtomicBool>,
    position: u64,
    open: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `data`.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            ..Default::default()
        }
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Shared call counters.
    pub fn counters(&self) -> Arc<StoreCounters> {
        Arc::clone(&self.counters)
    }

    /// Make every subsequent write fail (shared by all clones).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(Error::GenericFailure("memory store is not open".into()));
        }
        Ok(())
    }
}

impl ByteRangeStore for MemoryStore {
    fn open_for_read(&mut self, _path: &Path) -> Result<()> {
        self.open = true;
        self.position = 0;
        Ok(())
    }

    fn open_for_read_write(&mut self, _path: &Path, create_or_truncate: bool) -> Result<()> {
        if create_or_truncate {
            self.data.write().clear();
        }
        self.open = true;
        self.position = 0;
        Ok(())
    }

    fn move_pointer_to(&mut self, offset: u64) -> Result<()> {
        self.ensure_open().map_err(|e| Error::FileMovePointer {
            offset,
            reason: e.to_string(),
        })?;
        self.position = offset;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let data = self.data.read();

        let start = usize::try_from(self.position)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        drop(data);

        self.position += count as u64;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_read
            .fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::FileWrite {
                offset: self.position,
                reason: "injected write failure".into(),
            });
        }

        let start = usize::try_from(self.position).map_err(|_| Error::FileWrite {
            offset: self.position,
            reason: "offset exceeds addressable memory".into(),
        })?;
        let end = start + buf.len();

        let mut data = self.data.write();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        drop(data);

        self.position += buf.len() as u64;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_written
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(buf.len())
    }

    fn file_size(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.data.read().len() as u64)
    }

    fn close(&mut self) {
        self.open = false;
        self.position = 0;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// =============================================================================
// Tests
// =============================================================================
