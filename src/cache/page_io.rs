//! Page I/O - Page Transfer Between Source and Cache File
//!
//! Every transfer works on a span of pages that share one residency state, so
//! N consecutive pages cost one store call instead of N.
//!
//! # Fill Ordering
//!
//! 1. Bytes are written to the cache file
//! 2. Residency bits are flipped
//! 3. Resident and dirty-byte counters are updated
//! 4. The status file threshold is checked
//!
//! A crash between any two steps can only under-report residency.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::index::{PageIndex, PageState};
use super::metrics::CacheMetrics;
use super::status::StatusFile;
use crate::error::{Error, Result};
use crate::store::ByteRangeStore;

/// Allocate a zeroed buffer of `len` bytes, reporting failure as a value.
pub(crate) fn zeroed_buffer(len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    resize_zeroed(&mut buf, len)?;
    Ok(buf)
}

/// Resize `buf` to `len` zeroed bytes without aborting on allocation failure.
pub(crate) fn resize_zeroed(buf: &mut Vec<u8>, len: u64) -> Result<()> {
    let size = usize::try_from(len).map_err(|_| Error::MemoryAllocation { size: len })?;
    if size > buf.len() {
        buf.try_reserve_exact(size - buf.len())
            .map_err(|_| Error::MemoryAllocation { size: len })?;
    }
    buf.resize(size, 0);
    Ok(())
}

/// Which store a transfer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// The slow backing source
    Source,
    /// The local cache file
    CacheFile,
}

/// Mutable cache state guarded by the cache state lock.
///
/// Methods take `&mut self`, so holding the guard is the proof of ownership;
/// nothing here acquires the state lock again.
pub struct CacheState {
    pub(crate) index: PageIndex,
    pub(crate) source: Box<dyn ByteRangeStore>,
    pub(crate) cache_file: Box<dyn ByteRangeStore>,
    pub(crate) status: Arc<Mutex<StatusFile>>,
    pub(crate) metrics: Arc<CacheMetrics>,
    /// Bytes written to the cache file since the last status write
    pub(crate) dirty_bytes: u64,
    pub(crate) status_write_threshold: u64,
    pub(crate) completion_threshold: u64,
    /// Set once the owning cache is closed
    pub(crate) closed: bool,
}

impl CacheState {
    /// Residency index
    pub fn index(&self) -> &PageIndex {
        &self.index
    }

    /// Bytes written since the last status write
    pub fn dirty_bytes(&self) -> u64 {
        self.dirty_bytes
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn store_mut(&mut self, kind: StoreKind) -> &mut dyn ByteRangeStore {
        match kind {
            StoreKind::Source => self.source.as_mut(),
            StoreKind::CacheFile => self.cache_file.as_mut(),
        }
    }

    fn check_span(&self, first: u64, last: u64, buf_len: usize) -> Result<usize> {
        if first > last || last >= self.index.num_pages() {
            return Err(Error::BadParameter(format!(
                "page span [{}, {}] outside of {} pages",
                first,
                last,
                self.index.num_pages()
            )));
        }
        let len = self.index.span_len(first, last) as usize;
        if buf_len < len {
            return Err(Error::BadParameter(format!(
                "buffer of {} bytes cannot hold {} bytes of pages [{}, {}]",
                buf_len, len, first, last
            )));
        }
        Ok(len)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one page into `dest`, filling it from the source when absent.
    pub fn read_page(&mut self, page: u64, dest: &mut [u8]) -> Result<u64> {
        let state = self.index.state(page)?;
        let len = self.check_span(page, page, dest.len())?;
        let dest = &mut dest[..len];

        match state {
            PageState::NonResident => {
                self.transfer_from(StoreKind::Source, page, page, dest)?;
                self.write_page_range(dest, page, page)?;
            }
            PageState::Resident => {
                self.transfer_from(StoreKind::CacheFile, page, page, dest)?;
            }
        }
        Ok(len as u64)
    }

    /// Read a uniform-state span `[first, last]` with one store call.
    pub fn read_page_range(&mut self, first: u64, last: u64, dest: &mut [u8]) -> Result<u64> {
        let len = self.check_span(first, last, dest.len())?;
        let (end, state) = self.index.contiguous_state_range(first, last)?;
        if end != last {
            debug_assert!(false, "page range [{}, {}] is not uniform", first, last);
            return Err(Error::BadParameter(format!(
                "page range [{}, {}] mixes residency states",
                first, last
            )));
        }
        if first == last {
            return self.read_page(first, dest);
        }

        let dest = &mut dest[..len];
        match state {
            PageState::Resident => {
                self.read_page_range_from_store(first, last, dest, StoreKind::CacheFile)?;
            }
            PageState::NonResident => {
                self.read_page_range_from_store(first, last, dest, StoreKind::Source)?;
                self.write_page_range(dest, first, last)?;
            }
        }
        Ok(len as u64)
    }

    /// Read `[first, last]` from `kind` with one call; single pages go
    /// through [`read_page`](Self::read_page).
    pub fn read_page_range_from_store(
        &mut self,
        first: u64,
        last: u64,
        dest: &mut [u8],
        kind: StoreKind,
    ) -> Result<u64> {
        if first == last {
            return self.read_page(first, dest);
        }
        let len = self.check_span(first, last, dest.len())?;
        self.transfer_from(kind, first, last, &mut dest[..len])?;
        Ok(len as u64)
    }

    /// Read a span of any residency mix, one store call per uniform run.
    pub fn read_pages(&mut self, first: u64, last: u64, dest: &mut [u8]) -> Result<u64> {
        self.check_span(first, last, dest.len())?;

        let mut page = first;
        let mut written = 0usize;
        while page <= last {
            let (end, _) = self.index.contiguous_state_range(page, last)?;
            let len = self.read_page_range(page, end, &mut dest[written..])?;
            written += len as usize;
            page = end + 1;
        }
        Ok(written as u64)
    }

    /// Fetch every non-resident page in `[first, last]`, moving at most
    /// `chunk_pages` pages per source read. Returns the bytes fetched.
    pub fn fill_missing(&mut self, first: u64, last: u64, chunk_pages: u64) -> Result<u64> {
        self.check_span(first, last, usize::MAX)?;
        let chunk_pages = chunk_pages.max(1);

        let mut buf = Vec::new();
        let mut fetched = 0;
        let mut page = first;
        while page <= last {
            let (end, state) = self.index.contiguous_state_range(page, last)?;
            if state == PageState::NonResident {
                let mut run_start = page;
                while run_start <= end {
                    let run_end = end.min(run_start.saturating_add(chunk_pages - 1));
                    resize_zeroed(&mut buf, self.index.span_len(run_start, run_end))?;
                    fetched += self.read_page_range(run_start, run_end, &mut buf)?;
                    run_start = run_end + 1;
                }
            }
            page = end + 1;
        }
        Ok(fetched)
    }

    fn transfer_from(
        &mut self,
        kind: StoreKind,
        first: u64,
        last: u64,
        dest: &mut [u8],
    ) -> Result<()> {
        let offset = self.index.page_start(first);
        let expected = dest.len();

        let read = self.store_mut(kind).read_at(offset, dest)?;
        if read != expected {
            return Err(Error::FileRead {
                offset,
                reason: format!(
                    "short read from {:?} for pages [{}, {}]: {} of {} bytes",
                    kind, first, last, read, expected
                ),
            });
        }

        match kind {
            StoreKind::Source => self.metrics.record_source_read(read as u64),
            StoreKind::CacheFile => self.metrics.record_cache_read(read as u64),
        }
        trace!(?kind, first, last, bytes = read, "Read page span");
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write `buf` as pages `[first, last]` of the cache file with one call
    /// and mark them resident.
    pub fn write_page_range(&mut self, buf: &[u8], first: u64, last: u64) -> Result<u64> {
        let len = self.check_span(first, last, buf.len())?;
        let offset = self.index.page_start(first);

        self.cache_file.write_all_at(offset, &buf[..len])?;
        self.metrics.record_cache_write(len as u64);

        let newly = self.index.mark_resident(first, last)?;
        self.dirty_bytes += len as u64;
        debug!(
            first,
            last,
            bytes = len,
            newly_resident = newly,
            resident = self.index.num_resident(),
            "Filled cache pages"
        );

        self.maybe_write_status()?;
        Ok(len as u64)
    }

    // =========================================================================
    // Status
    // =========================================================================

    fn maybe_write_status(&mut self) -> Result<()> {
        if self.dirty_bytes >= self.status_write_threshold {
            self.write_status()?;
        }
        Ok(())
    }

    /// Persist the residency bitmap and reset the dirty-byte counter.
    pub fn write_status(&mut self) -> Result<()> {
        let status = Arc::clone(&self.status);
        let mut status = status.lock();
        status.write(&self.index, self.cache_file.as_mut())?;
        self.dirty_bytes = 0;
        self.metrics.record_status_write();
        Ok(())
    }

    /// Whether the remaining bytes are small enough to fetch in one go.
    pub fn is_completable(&self) -> bool {
        !self.index.is_complete() && self.index.non_resident_bytes() <= self.completion_threshold
    }

    /// Close the source and cache file.
    pub fn close_stores(&mut self) {
        self.source.close();
        self.cache_file.close();
    }
}

// =============================================================================
// Tests
// =============================================================================
