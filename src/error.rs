//! Error types for the paged demand-cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the paged demand-cache engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Caller supplied an invalid argument
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Store could not be opened for reading
    #[error("Failed to open {path} for read: {reason}")]
    FileOpenForRead { path: String, reason: String },

    /// Store could not be opened for reading and writing
    #[error("Failed to open {path} for read/write: {reason}")]
    FileOpenForReadWrite { path: String, reason: String },

    /// Store pointer could not be positioned
    #[error("Failed to move file pointer to offset {offset}: {reason}")]
    FileMovePointer { offset: u64, reason: String },

    /// Read failed or returned fewer bytes than required
    #[error("Read failed at offset {offset}: {reason}")]
    FileRead { offset: u64, reason: String },

    /// Write failed or wrote fewer bytes than required
    #[error("Write failed at offset {offset}: {reason}")]
    FileWrite { offset: u64, reason: String },

    // =========================================================================
    // Status File Errors
    // =========================================================================
    /// Status file magic does not match
    #[error("Status file type incorrect: magic {found:#018x}")]
    FileTypeIncorrect { found: u64 },

    /// Status file was written by a newer format version
    #[error("Status file version {found} is newer than supported version {supported}")]
    FileNewerVersion { found: u32, supported: u32 },

    /// Status file describes a different source than the one opened
    #[error("Status file describes {status_size} bytes but source has {source_size} bytes")]
    SourceSizeMismatch { status_size: u64, source_size: u64 },

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Page index outside of the cached file
    #[error("Invalid page index {page} (file has {num_pages} pages)")]
    InvalidPageIndex { page: u64, num_pages: u64 },

    /// Buffer allocation failed
    #[error("Memory allocation of {size} bytes failed")]
    MemoryAllocation { size: u64 },

    /// Read set execution failed
    #[error("Read set failed: {0}")]
    ReadSetFailed(String),

    /// Cache used after it was closed
    #[error("Cache is closed")]
    Closed,

    /// Unclassified failure
    #[error("Generic failure: {0}")]
    GenericFailure(String),
}
