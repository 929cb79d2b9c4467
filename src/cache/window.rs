//! Windowed Reader - Arbitrary Byte Ranges Through a Shared Scratch Page
//!
//! ```text
//!            start                                              end
//!              │                                                 │
//! ┌────────────┼───┬────────────┬────────────┬────────────┬──────┼─────┐
//! │  page p    │###│  page p+1  │  page p+2  │  page p+3  │######│     │
//! └────────────┴───┴────────────┴────────────┴────────────┴──────┴─────┘
//!   scratch ──▶ tail   └──── direct into destination ────┘   head ◀── scratch
//! ```
//!
//! The scratch buffer holds a single page and remembers which one, so
//! repeated small reads from the same page touch no store at all. All reads
//! serialize on the scratch lock.

use parking_lot::Mutex;
use tracing::trace;

use super::page_io::{zeroed_buffer, CacheState};
use crate::error::{Error, Result};

struct Scratch {
    buf: Vec<u8>,
    /// Page currently held in `buf`
    page: Option<u64>,
}

/// Byte-range reader over the page cache.
pub struct WindowedReader {
    scratch: Mutex<Scratch>,
}

impl WindowedReader {
    /// Create a reader whose scratch buffer holds `scratch_len` bytes.
    ///
    /// No page is longer than `min(page_size, full_file_size)`, so that is
    /// all the scratch buffer ever needs.
    pub fn new(scratch_len: u64) -> Result<Self> {
        Ok(Self {
            scratch: Mutex::new(Scratch {
                buf: zeroed_buffer(scratch_len)?,
                page: None,
            }),
        })
    }

    /// Page currently held in the scratch buffer
    pub fn buffered_page(&self) -> Option<u64> {
        self.scratch.lock().page
    }

    /// Read bytes starting at `start` into `dest`, clamped to the end of the
    /// file. Returns the number of bytes read.
    pub fn read(&self, state: &Mutex<CacheState>, start: u64, dest: &mut [u8]) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }

        let mut scratch = self.scratch.lock();
        let mut state = state.lock();
        state.ensure_open()?;

        let size = state.index.full_file_size();
        if start >= size {
            return Err(Error::BadParameter(format!(
                "read offset {} is past the end of a {} byte file",
                start, size
            )));
        }
        let end = (start + dest.len() as u64).min(size) - 1;
        let total = (end - start + 1) as usize;

        let first = state.index.page_index_of(start);
        let last = state.index.page_index_of(end);
        let offset = state.index.page_offset_of(start) as usize;

        if first == last {
            Self::load(&mut scratch, &mut state, first)?;
            dest[..total].copy_from_slice(&scratch.buf[offset..offset + total]);
            trace!(start, end, page = first, "Windowed read within one page");
            return Ok(total);
        }

        // Trailing window of the first page
        Self::load(&mut scratch, &mut state, first)?;
        let head = state.index.page_len(first) as usize - offset;
        dest[..head].copy_from_slice(&scratch.buf[offset..offset + head]);

        // Fully covered middle pages go straight into the destination
        let mut written = head;
        if last > first + 1 {
            let middle = state.read_pages(first + 1, last - 1, &mut dest[written..])?;
            written += middle as usize;
        }

        // Leading window of the last page
        Self::load(&mut scratch, &mut state, last)?;
        let tail = total - written;
        dest[written..total].copy_from_slice(&scratch.buf[..tail]);

        trace!(start, end, first, last, "Windowed read across pages");
        Ok(total)
    }

    fn load(scratch: &mut Scratch, state: &mut CacheState, page: u64) -> Result<()> {
        if scratch.page == Some(page) {
            state.metrics.record_scratch_hit();
            return Ok(());
        }

        scratch.page = None;
        state.read_page(page, &mut scratch.buf)?;
        scratch.page = Some(page);
        state.metrics.record_scratch_load();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::index::PageState;
    use crate::cache::page_io::tests::{fixture, source_bytes, Fixture};
    use crate::store::{MemoryStore, StoreCounters};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    struct Harness {
        reader: WindowedReader,
        state: Mutex<CacheState>,
        source: Arc<StoreCounters>,
        cache: MemoryStore,
    }

    fn setup(size: u64, page_size: u64) -> Harness {
        let Fixture {
            state,
            source,
            cache,
            ..
        } = fixture(size, page_size, u64::MAX);
        Harness {
            reader: WindowedReader::new(page_size.min(size)).unwrap(),
            state: Mutex::new(state),
            source,
            cache,
        }
    }

    #[test]
    fn test_same_page_fast_path() {
        let Harness {
            reader,
            state,
            source,
            ..
        } = setup(1000, 100);
        let mut buf = [0u8; 10];

        assert_eq!(reader.read(&state, 210, &mut buf).unwrap(), 10);
        assert_eq!(&buf, &source_bytes(1000)[210..220]);
        assert_eq!(reader.buffered_page(), Some(2));

        reader.read(&state, 250, &mut buf).unwrap();
        assert_eq!(&buf, &source_bytes(1000)[250..260]);
        assert_eq!(source.reads(), 1);

        let snapshot = state.lock().metrics.snapshot();
        assert_eq!(snapshot.scratch_loads, 1);
        assert_eq!(snapshot.scratch_hits, 1);
        assert_eq!(snapshot.cache_reads, 0);
    }

    #[test]
    fn test_spanning_read_fetches_only_covered_pages() {
        let Harness { reader, state, .. } = setup(1000, 100);
        let mut buf = vec![0u8; 120];

        assert_eq!(reader.read(&state, 250, &mut buf).unwrap(), 120);
        assert_eq!(buf, source_bytes(1000)[250..370]);

        let state = state.lock();
        assert_eq!(state.index.state(2).unwrap(), PageState::Resident);
        assert_eq!(state.index.state(3).unwrap(), PageState::Resident);
        assert_eq!(state.index.num_resident(), 2);
    }

    #[test]
    fn test_middle_pages_bypass_scratch() {
        let Harness {
            reader,
            state,
            source,
            ..
        } = setup(1000, 100);
        let mut buf = vec![0u8; 650];

        assert_eq!(reader.read(&state, 150, &mut buf).unwrap(), 650);
        assert_eq!(buf, source_bytes(1000)[150..800]);
        // Page 1, pages [2,6] in one call, page 7
        assert_eq!(source.reads(), 3);
        assert_eq!(reader.buffered_page(), Some(7));
    }

    #[test]
    fn test_read_clamped_to_file_end() {
        let Harness { reader, state, .. } = setup(100, 40);
        let mut buf = vec![0u8; 64];

        assert_eq!(reader.read(&state, 70, &mut buf).unwrap(), 30);
        assert_eq!(&buf[..30], &source_bytes(100)[70..100]);
    }

    #[test]
    fn test_read_past_end_rejected() {
        let Harness { reader, state, .. } = setup(100, 40);
        let mut buf = vec![0u8; 4];
        assert_matches!(reader.read(&state, 100, &mut buf), Err(Error::BadParameter(_)));
        assert_eq!(reader.read(&state, 100, &mut []).unwrap(), 0);
    }

    #[test]
    fn test_closed_state_rejects_reads() {
        let Harness { reader, state, .. } = setup(1000, 100);
        state.lock().closed = true;

        let mut buf = [0u8; 4];
        assert_matches!(reader.read(&state, 0, &mut buf), Err(Error::Closed));
        assert_eq!(reader.buffered_page(), None);
    }

    #[test]
    fn test_scratch_sized_to_short_file() {
        let Harness { reader, state, .. } = setup(30, 1 << 40);
        let mut buf = [0u8; 30];

        assert_eq!(reader.read(&state, 0, &mut buf).unwrap(), 30);
        assert_eq!(&buf[..], &source_bytes(30)[..]);
    }

    #[test]
    fn test_failed_load_clears_marker() {
        let Harness {
            reader,
            state,
            cache,
            ..
        } = setup(1000, 100);
        let mut buf = [0u8; 4];
        reader.read(&state, 0, &mut buf).unwrap();
        assert_eq!(reader.buffered_page(), Some(0));

        cache.set_fail_writes(true);
        assert!(reader.read(&state, 500, &mut buf).is_err());
        assert_eq!(reader.buffered_page(), None);
    }
}
