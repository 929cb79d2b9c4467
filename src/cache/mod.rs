//! Page Cache Module
//!
//! A local, fill-only cache of a slow byte source. The source is divided into
//! fixed-size pages; a page is fetched at most once, written to the cache
//! file, and served locally from then on. A status file persists which pages
//! are resident so a reopened cache picks up where it left off.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              PageCache                                │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │  ┌────────────────┐   ┌────────────────┐   ┌──────────────────────┐  │
//! │  │ WindowedReader │   │   Scheduler    │   │      Read Sets       │  │
//! │  │ (scratch page) │   │ (budget round) │   │ (batched descriptors)│  │
//! │  └───────┬────────┘   └───────┬────────┘   └──────────┬───────────┘  │
//! │          └────────────────────┼───────────────────────┘              │
//! │                      ┌────────┴────────┐                              │
//! │                      │   CacheState    │── PageIndex (bitmap)         │
//! │                      │   (page I/O)    │                              │
//! │                      └──┬─────────┬────┘                              │
//! │                         │         │                                   │
//! │                  source store   cache file ──▶ StatusFile             │
//! │                                                                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Page Index** (`index.rs`): residency bitmap and page geometry
//! - **Status File** (`status.rs`): little-endian persisted bitmap with a
//!   magic and version header
//! - **Page I/O** (`page_io.rs`): reads page spans from whichever store holds
//!   them and fills the cache file on a miss
//! - **Windowed Reader** (`window.rs`): arbitrary byte ranges through one
//!   scratch page
//! - **Scheduler** (`scheduler.rs`): fair budgeted prefetch planning across
//!   many cursors
//! - **Read Sets** (`read_set.rs`): batched descriptor execution and page-run
//!   coalescing
//! - **Metrics** (`metrics.rs`): I/O counters
//!
//! # Usage
//!
//! ```rust,ignore
//! use pagestor::cache::PageCache;
//! use pagestor::config::CacheConfig;
//!
//! let cache = PageCache::create(CacheConfig::default(), "remote.img", "local.cache")?;
//! let mut buf = vec![0u8; 4096];
//! let n = cache.read_bytes(1 << 20, &mut buf)?;
//! cache.close()?;
//! ```

pub mod index;
pub mod manager;
pub mod metrics;
pub mod page_io;
pub mod read_set;
pub mod scheduler;
pub mod status;
pub mod window;

#[cfg(test)]
mod proptest;

pub use index::{calculate_num_pages, PageIndex, PageState};
pub use manager::{CacheGeometry, CacheStats, CacheStores, PageCache};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use read_set::{merge_pages, PageRun, ReadDescriptor, ReadSet};
pub use scheduler::{
    plan_budget_round, BudgetRound, CursorProgress, OutOfCachePageSet, ParallelRead,
};
pub use status::{CacheMetadata, StatusFile, STATUS_MAGIC, STATUS_VERSION};
