//! Read Sets - Batched Byte-Range Reads
//!
//! A read set is an ordered list of `(offset, length, dest_offset)`
//! descriptors executed together against one store. Page sets selected by the
//! scheduler are coalesced into read sets so that adjacent pages move in one
//! descriptor.

use tracing::trace;

use super::scheduler::ParallelRead;
use crate::error::{Error, Result};
use crate::store::ByteRangeStore;

/// One byte range of a read set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadDescriptor {
    /// Offset in the store
    pub offset: u64,
    /// Bytes to read
    pub length: u64,
    /// Offset in the destination buffer
    pub dest_offset: u64,
}

/// A maximal run of adjacent page indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRun {
    pub first: u64,
    pub last: u64,
}

impl PageRun {
    /// Number of pages in the run
    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Collapse ascending page indices into runs of adjacent pages.
pub fn merge_pages(pages: impl IntoIterator<Item = u64>) -> Vec<PageRun> {
    let mut runs: Vec<PageRun> = Vec::new();
    for page in pages {
        match runs.last_mut() {
            Some(run) if run.last + 1 == page => run.last = page,
            Some(run) if run.last >= page => {
                debug_assert!(false, "page indices must be ascending and unique");
            }
            _ => runs.push(PageRun {
                first: page,
                last: page,
            }),
        }
    }
    runs
}

/// Ordered collection of read descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSet {
    descriptors: Vec<ReadDescriptor>,
}

impl ReadSet {
    /// Create an empty read set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a range, placed right after the previous one in the destination.
    pub fn push(&mut self, offset: u64, length: u64) {
        let dest_offset = self.total_len();
        self.descriptors.push(ReadDescriptor {
            offset,
            length,
            dest_offset,
        });
    }

    /// Build the read set that moves `runs` of pages, one descriptor per run.
    ///
    /// Runs ending on the final page are clipped to the file size. Runs whose
    /// byte offsets do not fit in a `u64` are rejected.
    pub fn from_page_runs(runs: &[PageRun], page_size: u64, file_size: u64) -> Result<Self> {
        let mut set = Self::new();
        for run in runs {
            let offset = run.first.checked_mul(page_size);
            let end = run
                .last
                .checked_add(1)
                .and_then(|pages| pages.checked_mul(page_size));
            let (Some(offset), Some(end)) = (offset, end) else {
                return Err(Error::BadParameter(format!(
                    "page run [{}, {}] overflows with {} byte pages",
                    run.first, run.last, page_size
                )));
            };
            set.push(offset, end.min(file_size).saturating_sub(offset));
        }
        Ok(set)
    }

    /// Build the read set covering `items` whole items of every cursor, laid
    /// out back to back in cursor order.
    pub fn for_items(cursors: &[ParallelRead], items: u64) -> Self {
        let mut set = Self::new();
        for cursor in cursors {
            let length = items.saturating_mul(cursor.item_size).min(cursor.total_size);
            set.push(cursor.start, length);
        }
        set
    }

    /// Descriptors in order
    pub fn descriptors(&self) -> &[ReadDescriptor] {
        &self.descriptors
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the set holds no descriptors
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Destination bytes needed to hold every descriptor
    pub fn total_len(&self) -> u64 {
        self.descriptors
            .iter()
            .map(|d| d.dest_offset + d.length)
            .max()
            .unwrap_or(0)
    }

    /// Execute every descriptor against `store`, returning the bytes read.
    pub fn execute(&self, store: &mut dyn ByteRangeStore, dest: &mut [u8]) -> Result<u64> {
        let needed = self.total_len();
        if (dest.len() as u64) < needed {
            return Err(Error::ReadSetFailed(format!(
                "destination holds {} bytes, read set needs {}",
                dest.len(),
                needed
            )));
        }

        let mut total = 0;
        for d in &self.descriptors {
            if d.length == 0 {
                continue;
            }
            let start = d.dest_offset as usize;
            let window = &mut dest[start..start + d.length as usize];
            store.read_exact_at(d.offset, window).map_err(|e| {
                Error::ReadSetFailed(format!(
                    "descriptor at offset {} ({} bytes): {}",
                    d.offset, d.length, e
                ))
            })?;
            total += d.length;
        }

        trace!(descriptors = self.descriptors.len(), bytes = total, "Executed read set");
        Ok(total)
    }
}

// =============================================================================
// Tests
// =============================================================================
