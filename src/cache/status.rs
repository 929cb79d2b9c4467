//! Status File - Persisted Cache Metadata and Residency Bitmap
//!
//! # Layout
//!
//! All fields are little-endian:
//!
//! ```text
//! ┌──────────┬─────────┬────────────────┬───────────┬──────────────────┬──────────┬────────────┐
//! │ magic u64│ ver u32 │ full_size u64  │ page u64  │ resident_pgs u64 │ bits u64 │ bitmap ... │
//! └──────────┴─────────┴────────────────┴───────────┴──────────────────┴──────────┴────────────┘
//! ```
//!
//! The bitmap is `ceil(bits / 8)` bytes, one bit per page, least significant
//! bit first.

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, info};

use super::index::PageIndex;
use super::page_io::zeroed_buffer;
use crate::error::{Error, Result};
use crate::store::ByteRangeStore;

// =============================================================================
// Constants
// =============================================================================

/// Magic number identifying a status file ("PGSTATUS")
pub const STATUS_MAGIC: u64 = u64::from_le_bytes(*b"PGSTATUS");

/// Current status file format version
pub const STATUS_VERSION: u32 = 1;

/// Size of the fixed header (magic, version, sizes, resident count, bit length)
pub const STATUS_HEADER_LEN: usize = 8 + 4 + 8 + 8 + 8 + 8;

// =============================================================================
// Metadata
// =============================================================================

/// Header fields of a status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetadata {
    /// Format version the file was written with
    pub version: u32,
    /// Size of the cached file in bytes
    pub full_file_size: u64,
    /// Page size in bytes
    pub page_size: u64,
    /// Number of resident pages
    pub num_pages_resident: u64,
}

impl CacheMetadata {
    /// Metadata describing `index` in the current format version.
    pub fn of(index: &PageIndex) -> Self {
        Self {
            version: STATUS_VERSION,
            full_file_size: index.full_file_size(),
            page_size: index.page_size(),
            num_pages_resident: index.num_resident(),
        }
    }
}

/// Serialize `index` into status file bytes.
pub fn encode_status(index: &PageIndex) -> BytesMut {
    let blocks = index.blocks();
    let mut buf = BytesMut::with_capacity(STATUS_HEADER_LEN + blocks.len());
    buf.put_u64_le(STATUS_MAGIC);
    buf.put_u32_le(STATUS_VERSION);
    buf.put_u64_le(index.full_file_size());
    buf.put_u64_le(index.page_size());
    buf.put_u64_le(index.num_resident());
    buf.put_u64_le(index.num_pages());
    buf.put_slice(blocks);
    buf
}

/// Parse status file bytes into metadata and a residency index.
pub fn decode_status(mut buf: &[u8]) -> Result<(CacheMetadata, PageIndex)> {
    let truncated = |what: &str| Error::FileRead {
        offset: 0,
        reason: format!("status file truncated before {}", what),
    };

    if buf.remaining() < 8 {
        return Err(truncated("magic"));
    }
    let magic = buf.get_u64_le();
    if magic != STATUS_MAGIC {
        return Err(Error::FileTypeIncorrect { found: magic });
    }

    if buf.remaining() < 4 {
        return Err(truncated("version"));
    }
    let version = buf.get_u32_le();
    if version > STATUS_VERSION {
        return Err(Error::FileNewerVersion {
            found: version,
            supported: STATUS_VERSION,
        });
    }

    if buf.remaining() < STATUS_HEADER_LEN - 12 {
        return Err(truncated("header"));
    }
    let full_file_size = buf.get_u64_le();
    let page_size = buf.get_u64_le();
    let num_pages_resident = buf.get_u64_le();
    let num_bits = buf.get_u64_le();

    let num_bytes = usize::try_from(num_bits.div_ceil(8)).map_err(|_| truncated("bitmap"))?;
    if buf.remaining() < num_bytes {
        return Err(truncated("bitmap"));
    }
    if buf.remaining() > num_bytes {
        return Err(Error::FileRead {
            offset: (STATUS_HEADER_LEN + num_bytes) as u64,
            reason: format!(
                "{} unexpected bytes after the bitmap",
                buf.remaining() - num_bytes
            ),
        });
    }
    let blocks = buf[..num_bytes].to_vec();

    let index = PageIndex::from_blocks(
        full_file_size,
        page_size,
        num_bits,
        num_pages_resident,
        blocks,
    )?;
    let metadata = CacheMetadata {
        version,
        full_file_size,
        page_size,
        num_pages_resident,
    };
    Ok((metadata, index))
}

// =============================================================================
// Status File
// =============================================================================

/// Status file handle with the read-once gate.
pub struct StatusFile {
    store: Box<dyn ByteRangeStore>,
    status_read: bool,
    writes: u64,
}

impl StatusFile {
    /// Wrap an opened status store.
    pub fn new(store: Box<dyn ByteRangeStore>) -> Self {
        Self {
            store,
            status_read: false,
            writes: 0,
        }
    }

    /// Whether the status file has already been read
    pub fn status_read(&self) -> bool {
        self.status_read
    }

    /// Mark the status as read without reading (freshly created caches).
    pub fn mark_read(&mut self) {
        self.status_read = true;
    }

    /// Number of successful writes
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Read the status file. Returns `None` once it has already been read.
    pub fn read(&mut self) -> Result<Option<(CacheMetadata, PageIndex)>> {
        if self.status_read {
            return Ok(None);
        }

        let mut buf = zeroed_buffer(self.store.file_size()?)?;
        self.store.read_exact_at(0, &mut buf)?;

        let (metadata, index) = decode_status(&buf)?;
        self.status_read = true;
        info!(
            full_file_size = metadata.full_file_size,
            page_size = metadata.page_size,
            resident = metadata.num_pages_resident,
            "Read cache status"
        );
        Ok(Some((metadata, index)))
    }

    /// Persist `index`, flushing `cache_file` first so that the status never
    /// claims pages whose bytes are still buffered.
    pub fn write(&mut self, index: &PageIndex, cache_file: &mut dyn ByteRangeStore) -> Result<()> {
        cache_file.flush()?;

        let buf = encode_status(index);
        self.store.write_all_at(0, &buf)?;
        self.store.flush()?;
        self.writes += 1;

        debug!(
            resident = index.num_resident(),
            pages = index.num_pages(),
            bytes = buf.len(),
            "Wrote cache status"
        );
        Ok(())
    }

    /// Close the underlying store
    pub fn close(&mut self) {
        self.store.close();
    }
}

// =============================================================================
// Tests
// =============================================================================
