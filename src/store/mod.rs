//! Byte-Range Stores
//!
//! The cache moves bytes between opaque stores without inspecting them. Three
//! store handles back every cache instance:
//!
//! ```text
//! ┌──────────────┐   page fill    ┌──────────────┐   residency   ┌──────────────┐
//! │    Source    │ ─────────────▶ │  Cache File  │ ◀──────────── │ Status File  │
//! │ (slow/remote)│                │ (local disk) │   persisted   │   (bitmap)   │
//! └──────────────┘                └──────────────┘               └──────────────┘
//! ```
//!
//! Implementations are injected into the cache, so a remote transport only
//! needs to implement [`ByteRangeStore`].

mod file;
mod memory;

use std::path::Path;

pub use file::FileStore;
pub use memory::{MemoryStore, StoreCounters};

use crate::error::{Error, Result};

/// A positioned byte store (file-like handle).
pub trait ByteRangeStore: Send {
    /// Open an existing store for reading.
    fn open_for_read(&mut self, path: &Path) -> Result<()>;

    /// Open a store for reading and writing, creating or truncating it when
    /// `create_or_truncate` is set.
    fn open_for_read_write(&mut self, path: &Path, create_or_truncate: bool) -> Result<()>;

    /// Position the store pointer at `offset`.
    fn move_pointer_to(&mut self, offset: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes at the pointer, returning the count read.
    ///
    /// A count smaller than `buf.len()` means the end of the store was reached.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at the pointer, returning the count written.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize>;

    /// Current size of the store in bytes.
    fn file_size(&self) -> Result<u64>;

    /// Close the handle. Closing a closed store is a no-op.
    fn close(&mut self);

    /// Whether the handle is open.
    fn is_open(&self) -> bool;

    /// Push buffered writes to durable storage.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read at an absolute offset.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.move_pointer_to(offset)?;
        self.read_bytes(buf)
    }

    /// Read exactly `buf.len()` bytes at an absolute offset.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let read = self.read_at(offset, buf)?;
        if read != buf.len() {
            return Err(Error::FileRead {
                offset,
                reason: format!("short read: {} of {} bytes", read, buf.len()),
            });
        }
        Ok(())
    }

    /// Write all of `buf` at an absolute offset.
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.move_pointer_to(offset)?;
        let written = self.write_bytes(buf)?;
        if written != buf.len() {
            return Err(Error::FileWrite {
                offset,
                reason: format!("short write: {} of {} bytes", written, buf.len()),
            });
        }
        Ok(())
    }
}

impl<S: ByteRangeStore + ?Sized> ByteRangeStore for Box<S> {
    fn open_for_read(&mut self, path: &Path) -> Result<()> {
        (**self).open_for_read(path)
    }

    fn open_for_read_write(&mut self, path: &Path, create_or_truncate: bool) -> Result<()> {
        (**self).open_for_read_write(path, create_or_truncate)
    }

    fn move_pointer_to(&mut self, offset: u64) -> Result<()> {
        (**self).move_pointer_to(offset)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_bytes(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write_bytes(buf)
    }

    fn file_size(&self) -> Result<u64> {
        (**self).file_size()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
