//! pagestor - Paged Local Cache for Slow Byte Sources
//!
//! Keeps a local copy of a large, slow-to-read file (a remote image, a
//! network share) one page at a time. Pages are fetched on first touch,
//! written to a local cache file and served locally afterwards. Residency is
//! persisted in a status file so a cache survives restarts.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ PageCache ──▶ CacheState ──┬──▶ source store   (slow)
//!                                       ├──▶ cache file     (local)
//!                                       └──▶ status file    (bitmap)
//! ```
//!
//! # Features
//!
//! - Byte-range reads through a one-page scratch window
//! - Budgeted, fair prefetch planning across many read cursors
//! - Batched read sets with adjacent-page coalescing
//! - Crash-safe status ordering (cache file flushed before status)
//! - Completion of nearly-full caches in bounded chunks
//!
//! # Modules
//!
//! - [`cache`] - Page index, page I/O, scheduler and the `PageCache` facade
//! - [`config`] - Cache tunables
//! - [`error`] - Error types
//! - [`store`] - Byte-range store abstraction with file and memory backends

pub mod cache;
pub mod config;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use cache::{
    BudgetRound, CacheStats, CacheStores, OutOfCachePageSet, PageCache, PageState, ParallelRead,
    ReadSet,
};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use store::{ByteRangeStore, FileStore, MemoryStore};
