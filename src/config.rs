//! Cache Configuration
//!
//! Tunables for the page cache, loadable from YAML and overridable from the
//! command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Constants
// =============================================================================

/// Default page size (64KB)
pub const DEFAULT_PAGE_SIZE: u64 = 64 * 1024;

/// Default dirty bytes between status file writes (16MB)
pub const DEFAULT_STATUS_WRITE_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default completion threshold (256MB)
pub const DEFAULT_COMPLETION_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Default pages fetched per read while completing a cache
pub const DEFAULT_COMPLETE_CHUNK_PAGES: u64 = 64;

/// Default status file suffix
pub const DEFAULT_STATUS_SUFFIX: &str = ".status";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a [`PageCache`](crate::cache::PageCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Size of a page in bytes
    pub page_size: u64,

    /// Dirty bytes written to the cache file before the status file is rewritten
    pub status_write_threshold: u64,

    /// Maximum non-resident bytes for which completing the cache is offered
    pub completion_threshold: u64,

    /// Maximum pages moved per source read while completing the cache
    pub complete_chunk_pages: u64,

    /// Suffix appended to the cache path to locate the status file
    pub status_suffix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            status_write_threshold: DEFAULT_STATUS_WRITE_THRESHOLD,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            complete_chunk_pages: DEFAULT_COMPLETE_CHUNK_PAGES,
            status_suffix: DEFAULT_STATUS_SUFFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with the given page size and defaults elsewhere.
    pub fn with_page_size(page_size: u64) -> Self {
        Self {
            page_size,
            ..Default::default()
        }
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be > 0".into()));
        }
        if usize::try_from(self.page_size).is_err() {
            return Err(Error::Config(
                "page_size must fit in addressable memory".into(),
            ));
        }
        if self.complete_chunk_pages == 0 {
            return Err(Error::Config("complete_chunk_pages must be > 0".into()));
        }
        if self.status_suffix.is_empty() {
            return Err(Error::Config("status_suffix must not be empty".into()));
        }
        Ok(())
    }

    /// Path of the status file that accompanies `cache_path`.
    pub fn status_path(&self, cache_path: impl AsRef<Path>) -> PathBuf {
        let mut name = cache_path.as_ref().as_os_str().to_owned();
        name.push(&self.status_suffix);
        PathBuf::from(name)
    }
}

// =============================================================================
// Tests
// =============================================================================
