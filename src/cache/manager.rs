//! Page Cache - Public Facade
//!
//! Orchestrates the page index, page I/O, windowed reader, scheduler and
//! status file behind three locks:
//!
//! | Lock | Guards |
//! |------|--------|
//! | scratch | WindowedReader scratch page |
//! | state | page index, counters, source and cache-file handles |
//! | status | status file handle and its read-once gate |
//!
//! Locks are always taken in that order. Inner paths receive `&mut CacheState`
//! from their caller instead of locking again.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::index::{PageIndex, PageState};
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::page_io::{zeroed_buffer, CacheState};
use super::read_set::{merge_pages, ReadSet};
use super::scheduler::{plan_budget_round, BudgetRound, OutOfCachePageSet, ParallelRead};
use super::status::StatusFile;
use super::window::WindowedReader;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::store::{ByteRangeStore, FileStore};

// =============================================================================
// Types
// =============================================================================

/// The three stores a cache is assembled from.
pub struct CacheStores {
    /// Backing source (read only)
    pub source: Box<dyn ByteRangeStore>,
    /// Local cache file
    pub cache_file: Box<dyn ByteRangeStore>,
    /// Status file
    pub status: Box<dyn ByteRangeStore>,
}

impl CacheStores {
    /// Bundle three stores.
    pub fn new(
        source: impl ByteRangeStore + 'static,
        cache_file: impl ByteRangeStore + 'static,
        status: impl ByteRangeStore + 'static,
    ) -> Self {
        Self {
            source: Box::new(source),
            cache_file: Box::new(cache_file),
            status: Box::new(status),
        }
    }

    /// Local files for all three stores.
    pub fn files() -> Self {
        Self::new(FileStore::new(), FileStore::new(), FileStore::new())
    }
}

/// Byte totals of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Bytes held in the cache file
    pub bytes_full: u64,
    /// Bytes still to be fetched from the source
    pub bytes_empty: u64,
    /// Resident pages
    pub pages_resident: u64,
    /// Total pages
    pub num_pages: u64,
}

/// Page layout of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheGeometry {
    pub full_file_size: u64,
    pub page_size: u64,
    pub num_pages: u64,
}

// =============================================================================
// Page Cache
// =============================================================================

/// Paged demand cache over a slow byte source.
pub struct PageCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    status: Arc<Mutex<StatusFile>>,
    window: WindowedReader,
    metrics: Arc<CacheMetrics>,
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PageCache {
    /// Open an existing cache on local files.
    pub fn open(
        config: CacheConfig,
        source_path: impl AsRef<Path>,
        cache_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::open_with(config, CacheStores::files(), source_path, cache_path)
    }

    /// Create (or truncate) a cache on local files.
    pub fn create(
        config: CacheConfig,
        source_path: impl AsRef<Path>,
        cache_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::create_with(config, CacheStores::files(), source_path, cache_path)
    }

    /// Open an existing cache over injected stores.
    ///
    /// Fails if the cache or status file is missing or does not describe the
    /// source. Falling back to [`create_with`](Self::create_with) is the
    /// caller's decision.
    pub fn open_with(
        config: CacheConfig,
        mut stores: CacheStores,
        source_path: impl AsRef<Path>,
        cache_path: impl AsRef<Path>,
    ) -> Result<Self> {
        config.validate()?;
        let cache_path = cache_path.as_ref();
        let status_path = config.status_path(cache_path);

        stores.source.open_for_read(source_path.as_ref())?;
        let source_size = stores.source.file_size()?;
        stores.cache_file.open_for_read_write(cache_path, false)?;
        stores.status.open_for_read_write(&status_path, false)?;

        let mut status = StatusFile::new(stores.status);
        let (metadata, index) = status.read()?.ok_or_else(|| {
            Error::GenericFailure("status file was already read".into())
        })?;
        if metadata.full_file_size != source_size {
            return Err(Error::SourceSizeMismatch {
                status_size: metadata.full_file_size,
                source_size,
            });
        }
        if metadata.page_size != config.page_size {
            warn!(
                configured = config.page_size,
                persisted = metadata.page_size,
                "Using page size from status file"
            );
        }

        info!(
            cache = %cache_path.display(),
            size = source_size,
            pages = index.num_pages(),
            resident = index.num_resident(),
            "Opened page cache"
        );
        Self::assemble(config, index, stores.source, stores.cache_file, status)
    }

    /// Create a fresh cache over injected stores, truncating any previous
    /// cache and status file.
    pub fn create_with(
        config: CacheConfig,
        mut stores: CacheStores,
        source_path: impl AsRef<Path>,
        cache_path: impl AsRef<Path>,
    ) -> Result<Self> {
        config.validate()?;
        let cache_path = cache_path.as_ref();
        let status_path = config.status_path(cache_path);

        stores.source.open_for_read(source_path.as_ref())?;
        let source_size = stores.source.file_size()?;
        stores.cache_file.open_for_read_write(cache_path, true)?;
        stores.status.open_for_read_write(&status_path, true)?;

        let index = PageIndex::new(source_size, config.page_size)?;
        let mut status = StatusFile::new(stores.status);
        status.mark_read();

        let cache = Self::assemble(config, index, stores.source, stores.cache_file, status)?;
        cache.state.lock().write_status()?;

        info!(
            cache = %cache_path.display(),
            size = source_size,
            pages = cache.num_pages(),
            "Created page cache"
        );
        Ok(cache)
    }

    fn assemble(
        config: CacheConfig,
        index: PageIndex,
        source: Box<dyn ByteRangeStore>,
        cache_file: Box<dyn ByteRangeStore>,
        status: StatusFile,
    ) -> Result<Self> {
        let metrics = Arc::new(CacheMetrics::new());
        let status = Arc::new(Mutex::new(status));
        let window = WindowedReader::new(index.page_size().min(index.full_file_size()))?;
        let state = CacheState {
            index,
            source,
            cache_file,
            status: Arc::clone(&status),
            metrics: Arc::clone(&metrics),
            dirty_bytes: 0,
            status_write_threshold: config.status_write_threshold,
            completion_threshold: config.completion_threshold,
            closed: false,
        };
        Ok(Self {
            config,
            state: Mutex::new(state),
            status,
            window,
            metrics,
        })
    }

    /// Lock the cache state, failing once the cache is closed.
    fn lock_open(&self) -> Result<MutexGuard<'_, CacheState>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state)
    }

    /// Persist the status file and close every store. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let result = state.write_status();
        state.close_stores();
        self.status.lock().close();

        info!(
            resident = state.index.num_resident(),
            pages = state.index.num_pages(),
            "Closed page cache"
        );
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read bytes starting at `start` into `dest`. Reads are clamped to the
    /// end of the source; the returned count says how many bytes were read.
    pub fn read_bytes(&self, start: u64, dest: &mut [u8]) -> Result<usize> {
        self.window.read(&self.state, start, dest)
    }

    /// Plan a budgeted round over `cursors`.
    #[instrument(skip(self, cursors), fields(cursors = cursors.len()))]
    pub fn get_budget_parallel_read(
        &self,
        budget: u64,
        cursors: &[ParallelRead],
    ) -> Result<BudgetRound> {
        let state = self.lock_open()?;
        let round = plan_budget_round(&state.index, budget, cursors)?;
        self.metrics.record_schedule_round(round.pages.len() as u64);
        Ok(round)
    }

    /// Fetch the pages selected by a round with one batched source read,
    /// write them to the cache file run by run, then execute `read_set`
    /// against the cache file. Clears `pages`.
    #[instrument(skip(self, pages, read_set, dest), fields(pages = pages.len()))]
    pub fn read_out_of_cache_pages(
        &self,
        pages: &mut OutOfCachePageSet,
        read_set: &ReadSet,
        dest: &mut [u8],
    ) -> Result<u64> {
        let mut state = self.lock_open()?;

        let num_pages = state.index.num_pages();
        if let Some(page) = pages.last().filter(|&page| page >= num_pages) {
            return Err(Error::InvalidPageIndex { page, num_pages });
        }

        // Pages may have been filled since the round was planned
        let missing = pages.iter().filter(|&p| !state.index.is_resident(p));
        let runs = merge_pages(missing);
        pages.clear();

        if !runs.is_empty() {
            let fetch = ReadSet::from_page_runs(
                &runs,
                state.index.page_size(),
                state.index.full_file_size(),
            )?;
            let len = fetch.total_len();
            let mut buf = zeroed_buffer(len)?;

            fetch.execute(state.source.as_mut(), &mut buf)?;
            self.metrics.record_source_read(len);

            for (run, d) in runs.iter().zip(fetch.descriptors()) {
                let start = d.dest_offset as usize;
                state.write_page_range(&buf[start..start + d.length as usize], run.first, run.last)?;
            }
        }

        self.execute_read_set(&mut state, read_set, dest)
    }

    /// Execute `read_set` against the cache file, fetching any page it covers
    /// that is not yet resident.
    pub fn read_bytes_read_set(&self, read_set: &ReadSet, dest: &mut [u8]) -> Result<u64> {
        let mut state = self.lock_open()?;
        self.execute_read_set(&mut state, read_set, dest)
    }

    fn execute_read_set(
        &self,
        state: &mut CacheState,
        read_set: &ReadSet,
        dest: &mut [u8],
    ) -> Result<u64> {
        let size = state.index.full_file_size();
        for d in read_set.descriptors() {
            if d.length == 0 {
                continue;
            }
            let end = d.offset.checked_add(d.length).filter(|&end| end <= size);
            let Some(end) = end else {
                return Err(Error::ReadSetFailed(format!(
                    "descriptor [{}, +{}) is past the {} byte source",
                    d.offset, d.length, size
                )));
            };
            let first = state.index.page_index_of(d.offset);
            let last = state.index.page_index_of(end - 1);
            state.fill_missing(first, last, self.config.complete_chunk_pages)?;
        }

        let read = read_set.execute(state.cache_file.as_mut(), dest)?;
        self.metrics.record_cache_read(read);
        Ok(read)
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Whether every page is resident
    pub fn is_cache_complete(&self) -> bool {
        self.state.lock().index.is_complete()
    }

    /// Whether the cache is incomplete but close enough to finish in one go.
    pub fn is_cache_completable(&self) -> bool {
        self.state.lock().is_completable()
    }

    /// Fetch every remaining page and persist the status. Returns the bytes
    /// fetched.
    #[instrument(skip(self))]
    pub fn complete_cache(&self) -> Result<u64> {
        let mut state = self.lock_open()?;
        let num_pages = state.index.num_pages();
        if num_pages == 0 || state.index.is_complete() {
            return Ok(0);
        }

        let fetched = state.fill_missing(0, num_pages - 1, self.config.complete_chunk_pages)?;
        state.write_status()?;
        info!(bytes = fetched, pages = num_pages, "Completed page cache");
        Ok(fetched)
    }

    /// Persist the status file now.
    pub fn flush_status(&self) -> Result<()> {
        self.lock_open()?.write_status()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Bytes held and bytes still missing
    pub fn get_cache_stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            bytes_full: state.index.resident_bytes(),
            bytes_empty: state.index.non_resident_bytes(),
            pages_resident: state.index.num_resident(),
            num_pages: state.index.num_pages(),
        }
    }

    /// Residency of `page`
    pub fn page_state(&self, page: u64) -> Result<PageState> {
        self.state.lock().index.state(page)
    }

    /// Source size, page size and page count
    pub fn geometry(&self) -> CacheGeometry {
        let state = self.state.lock();
        CacheGeometry {
            full_file_size: state.index.full_file_size(),
            page_size: state.index.page_size(),
            num_pages: state.index.num_pages(),
        }
    }

    /// Size of the source in bytes
    pub fn full_file_size(&self) -> u64 {
        self.state.lock().index.full_file_size()
    }

    /// Page size in bytes
    pub fn page_size(&self) -> u64 {
        self.state.lock().index.page_size()
    }

    /// Number of pages
    pub fn num_pages(&self) -> u64 {
        self.state.lock().index.num_pages()
    }

    /// Bytes written since the last status write
    pub fn dirty_bytes(&self) -> u64 {
        self.state.lock().dirty_bytes()
    }

    /// I/O counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Configuration in effect
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Drop for PageCache {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close page cache: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
