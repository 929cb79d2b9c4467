//! Page Index - Residency Bitmap and Page Geometry
//!
//! One bit per page records whether the page is present in the cache file.
//! Bits are packed into `u8` blocks; bits in the last block that lie past the
//! final page are always zero, so the blocks can be persisted verbatim.

use super::page_io::zeroed_buffer;
use crate::error::{Error, Result};

/// Number of bits in a bitmap block.
const BITS_PER_BLOCK: u64 = u8::BITS as u64;

/// Residency state of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Page bytes are present in the cache file
    Resident,
    /// Page bytes must be fetched from the source
    NonResident,
}

impl PageState {
    fn from_bit(bit: bool) -> Self {
        if bit {
            PageState::Resident
        } else {
            PageState::NonResident
        }
    }
}

/// Number of pages needed to hold `file_size` bytes.
pub fn calculate_num_pages(file_size: u64, page_size: u64) -> u64 {
    if file_size == 0 || page_size == 0 {
        return 0;
    }
    file_size.div_ceil(page_size)
}

/// Residency bitmap plus the page geometry of the cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIndex {
    full_file_size: u64,
    page_size: u64,
    num_pages: u64,
    num_resident: u64,
    blocks: Vec<u8>,
}

impl PageIndex {
    /// Create an index with every page non-resident.
    pub fn new(full_file_size: u64, page_size: u64) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::BadParameter("page size must be > 0".into()));
        }
        let num_pages = calculate_num_pages(full_file_size, page_size);
        let blocks = zeroed_buffer(num_pages.div_ceil(BITS_PER_BLOCK))?;
        Ok(Self {
            full_file_size,
            page_size,
            num_pages,
            num_resident: 0,
            blocks,
        })
    }

    /// Rebuild an index from persisted bitmap blocks.
    ///
    /// Rejects bitmaps whose length or population disagrees with the geometry.
    pub fn from_blocks(
        full_file_size: u64,
        page_size: u64,
        num_bits: u64,
        num_resident: u64,
        blocks: Vec<u8>,
    ) -> Result<Self> {
        let mut index = Self::new(full_file_size, page_size)?;
        if num_bits != index.num_pages || blocks.len() != index.blocks.len() {
            return Err(Error::FileRead {
                offset: 0,
                reason: format!(
                    "bitmap holds {} bits in {} bytes, geometry needs {} pages",
                    num_bits,
                    blocks.len(),
                    index.num_pages
                ),
            });
        }

        index.blocks = blocks;
        let tail_bits = index.num_pages % BITS_PER_BLOCK;
        if tail_bits != 0 {
            if let Some(last) = index.blocks.last() {
                if last >> tail_bits != 0 {
                    return Err(Error::FileRead {
                        offset: 0,
                        reason: "bitmap has bits set past the final page".into(),
                    });
                }
            }
        }

        let population: u64 = index.blocks.iter().map(|b| b.count_ones() as u64).sum();
        if population != num_resident {
            return Err(Error::FileRead {
                offset: 0,
                reason: format!(
                    "bitmap has {} resident pages, header claims {}",
                    population, num_resident
                ),
            });
        }
        index.num_resident = num_resident;
        Ok(index)
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    /// Size of the cached file in bytes
    pub fn full_file_size(&self) -> u64 {
        self.full_file_size
    }

    /// Size of a page in bytes
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of pages
    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    /// Number of resident pages
    pub fn num_resident(&self) -> u64 {
        self.num_resident
    }

    /// Page containing byte `pos`
    pub fn page_index_of(&self, pos: u64) -> u64 {
        pos / self.page_size
    }

    /// Offset of byte `pos` within its page
    pub fn page_offset_of(&self, pos: u64) -> u64 {
        pos % self.page_size
    }

    /// Bytes from `pos` to the end of its page (ignores the file end)
    pub fn page_remainder(&self, pos: u64) -> u64 {
        self.page_size - self.page_offset_of(pos)
    }

    /// Byte offset of the first byte of `page`
    pub fn page_start(&self, page: u64) -> u64 {
        page * self.page_size
    }

    /// Effective length of `page`; the last page may be short.
    pub fn page_len(&self, page: u64) -> u64 {
        debug_assert!(page < self.num_pages, "page {} out of range", page);
        if page + 1 == self.num_pages {
            self.full_file_size - page * self.page_size
        } else if page < self.num_pages {
            self.page_size
        } else {
            0
        }
    }

    /// Aggregate byte length of pages `[first, last]`.
    pub fn span_len(&self, first: u64, last: u64) -> u64 {
        debug_assert!(first <= last);
        if first > last || last >= self.num_pages {
            return 0;
        }
        (last - first) * self.page_size + self.page_len(last)
    }

    // =========================================================================
    // Residency
    // =========================================================================

    fn check_page(&self, page: u64) -> Result<()> {
        if page >= self.num_pages {
            return Err(Error::InvalidPageIndex {
                page,
                num_pages: self.num_pages,
            });
        }
        Ok(())
    }

    fn bit(&self, page: u64) -> bool {
        let block = self.blocks[(page / BITS_PER_BLOCK) as usize];
        block & (1 << (page % BITS_PER_BLOCK)) != 0
    }

    /// Residency state of `page`.
    pub fn state(&self, page: u64) -> Result<PageState> {
        self.check_page(page)?;
        Ok(PageState::from_bit(self.bit(page)))
    }

    /// Whether `page` is resident; out-of-range pages report `false`.
    pub fn is_resident(&self, page: u64) -> bool {
        page < self.num_pages && self.bit(page)
    }

    /// Last page `end <= max` such that every page in `[start, end]` shares
    /// the state of `start`.
    pub fn contiguous_state_range(&self, start: u64, max: u64) -> Result<(u64, PageState)> {
        self.check_page(start)?;
        let max = max.min(self.num_pages - 1);
        let state = self.bit(start);

        let mut end = start;
        while end < max && self.bit(end + 1) == state {
            end += 1;
        }
        Ok((end, PageState::from_bit(state)))
    }

    /// Mark pages `[first, last]` resident, returning how many were newly set.
    pub fn mark_resident(&mut self, first: u64, last: u64) -> Result<u64> {
        self.check_page(first)?;
        self.check_page(last)?;

        let mut newly = 0;
        for page in first..=last {
            if !self.bit(page) {
                self.blocks[(page / BITS_PER_BLOCK) as usize] |= 1 << (page % BITS_PER_BLOCK);
                newly += 1;
            }
        }
        self.num_resident += newly;
        debug_assert!(self.num_resident <= self.num_pages);
        Ok(newly)
    }

    /// Whether every page is resident
    pub fn is_complete(&self) -> bool {
        self.num_resident == self.num_pages
    }

    /// Bytes of the file held in the cache
    pub fn resident_bytes(&self) -> u64 {
        if self.num_pages == 0 {
            return 0;
        }
        let last = self.num_pages - 1;
        if self.bit(last) {
            (self.num_resident - 1) * self.page_size + self.page_len(last)
        } else {
            self.num_resident * self.page_size
        }
    }

    /// Bytes of the file still to be fetched
    pub fn non_resident_bytes(&self) -> u64 {
        self.full_file_size - self.resident_bytes()
    }

    /// Packed bitmap blocks, one bit per page
    pub fn blocks(&self) -> &[u8] {
        &self.blocks
    }

    /// Iterate over the non-resident pages in ascending order
    pub fn non_resident_pages(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_pages).filter(move |&page| !self.bit(page))
    }
}

// =============================================================================
// Tests
// =============================================================================
