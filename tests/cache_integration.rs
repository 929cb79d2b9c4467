//! Page Cache Integration Tests
//!
//! End-to-end tests over real files and shared in-memory stores.

use std::fs;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use tempfile::TempDir;

use pagestor::cache::{PageCache, PageState, ParallelRead, ReadSet};
use pagestor::config::CacheConfig;
use pagestor::error::Error;
use pagestor::store::MemoryStore;
use pagestor::CacheStores;

// =============================================================================
// Helpers
// =============================================================================

struct Workspace {
    _dir: TempDir,
    source: PathBuf,
    cache: PathBuf,
}

impl Workspace {
    fn new(size: usize) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("source.img");
        let cache = dir.path().join("source.cache");
        fs::write(&source, pattern(size)).expect("Failed to write source");
        Self {
            _dir: dir,
            source,
            cache,
        }
    }

    fn status(&self) -> PathBuf {
        CacheConfig::default().status_path(&self.cache)
    }
}

fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 256) as u8).collect()
}

fn small_config() -> CacheConfig {
    CacheConfig {
        page_size: 100,
        completion_threshold: 500,
        complete_chunk_pages: 3,
        ..Default::default()
    }
}

fn read(cache: &PageCache, start: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let n = cache.read_bytes(start, &mut buf).expect("Read failed");
    buf.truncate(n);
    buf
}

// =============================================================================
// File-Backed Tests
// =============================================================================

#[test]
fn test_spanning_read_fills_two_pages() {
    let ws = Workspace::new(1000);
    let cache = PageCache::create(small_config(), &ws.source, &ws.cache).expect("create");

    assert_eq!(read(&cache, 250, 120), pattern(1000)[250..370]);

    let stats = cache.get_cache_stats();
    assert_eq!(stats.bytes_full, 200);
    assert_eq!(stats.bytes_empty, 800);
    assert_eq!(cache.page_state(2).unwrap(), PageState::Resident);
    assert_eq!(cache.page_state(3).unwrap(), PageState::Resident);
    assert_eq!(cache.page_state(4).unwrap(), PageState::NonResident);
    assert!(ws.status().exists());
}

#[test]
fn test_reopen_serves_resident_pages_locally() {
    let ws = Workspace::new(1000);
    {
        let cache = PageCache::create(small_config(), &ws.source, &ws.cache).expect("create");
        read(&cache, 0, 300);
        cache.close().expect("close");
    }

    // Same size, different bytes: resident pages must still come from the cache
    fs::write(&ws.source, vec![0xAA; 1000]).expect("Failed to rewrite source");

    let cache = PageCache::open(small_config(), &ws.source, &ws.cache).expect("open");
    assert_eq!(cache.get_cache_stats().bytes_full, 300);
    assert_eq!(read(&cache, 250, 100)[..50], pattern(1000)[250..300]);
    assert_eq!(read(&cache, 300, 100), vec![0xAA; 100]);
}

#[test]
fn test_open_missing_cache_fails() {
    let ws = Workspace::new(1000);
    assert_matches!(
        PageCache::open(small_config(), &ws.source, &ws.cache),
        Err(Error::FileOpenForReadWrite { .. })
    );
}

#[test]
fn test_open_missing_source_fails() {
    let ws = Workspace::new(10);
    let missing = ws.source.with_extension("missing");
    assert_matches!(
        PageCache::create(small_config(), &missing, &ws.cache),
        Err(Error::FileOpenForRead { .. })
    );
}

#[test]
fn test_corrupt_status_rejected() {
    let ws = Workspace::new(1000);
    PageCache::create(small_config(), &ws.source, &ws.cache)
        .expect("create")
        .close()
        .expect("close");

    let mut status = fs::read(ws.status()).expect("read status");
    status[0] ^= 0xFF;
    fs::write(ws.status(), status).expect("write status");

    assert_matches!(
        PageCache::open(small_config(), &ws.source, &ws.cache),
        Err(Error::FileTypeIncorrect { .. })
    );
}

#[test]
fn test_grown_source_rejected() {
    let ws = Workspace::new(1000);
    PageCache::create(small_config(), &ws.source, &ws.cache)
        .expect("create")
        .close()
        .expect("close");
    fs::write(&ws.source, pattern(1200)).expect("rewrite source");

    assert_matches!(
        PageCache::open(small_config(), &ws.source, &ws.cache),
        Err(Error::SourceSizeMismatch {
            status_size: 1000,
            source_size: 1200
        })
    );
}

#[test]
fn test_complete_cache_copies_source() {
    let ws = Workspace::new(1234);
    let cache = PageCache::create(small_config(), &ws.source, &ws.cache).expect("create");
    read(&cache, 400, 50);

    assert_eq!(cache.complete_cache().expect("complete"), 1134);
    assert!(cache.is_cache_complete());
    cache.close().expect("close");

    assert_eq!(fs::read(&ws.cache).expect("read cache"), pattern(1234));

    let cache = PageCache::open(small_config(), &ws.source, &ws.cache).expect("reopen");
    assert!(cache.is_cache_complete());
    assert_eq!(cache.get_cache_stats().bytes_empty, 0);
}

#[test]
fn test_yaml_config_drives_geometry() {
    let ws = Workspace::new(1000);
    let path = ws.cache.with_extension("yaml");
    fs::write(&path, "page_size: 250\nstatus_suffix: .bitmap\n").expect("write config");

    let config = CacheConfig::from_yaml_file(&path).expect("load config");
    let cache = PageCache::create(config, &ws.source, &ws.cache).expect("create");

    assert_eq!(cache.num_pages(), 4);
    assert!(Path::new(&format!("{}.bitmap", ws.cache.display())).exists());
}

#[test]
fn test_concurrent_readers_see_source_bytes() {
    let ws = Workspace::new(5000);
    let cache = PageCache::create(small_config(), &ws.source, &ws.cache).expect("create");
    let expected = pattern(5000);

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let cache = &cache;
            let expected = &expected;
            s.spawn(move || {
                for i in 0..40u64 {
                    let start = (t * 1231 + i * 97) % 4900;
                    let got = read(cache, start, 150);
                    let end = (start as usize + 150).min(5000);
                    assert_eq!(got, expected[start as usize..end]);
                }
            });
        }
    });

    let stats = cache.get_cache_stats();
    assert_eq!(stats.bytes_full + stats.bytes_empty, 5000);
}

// =============================================================================
// Scheduling Tests
// =============================================================================

#[test]
fn test_polling_rounds_until_cursors_finish() {
    let source = MemoryStore::with_data(pattern(2000));
    let stores = CacheStores::new(source.clone(), MemoryStore::new(), MemoryStore::new());
    let cache = PageCache::create_with(small_config(), stores, "source", "cache").expect("create");

    let cursors = [
        ParallelRead::new(0, 600, 40),
        ParallelRead::new(1000, 600, 40),
        ParallelRead::new(1700, 300, 20),
    ];

    let mut rounds = 0;
    let mut last_items = 0;
    loop {
        let mut round = cache.get_budget_parallel_read(300, &cursors).expect("plan");
        assert!(round.budget_used <= round.budget);
        assert!(round.guaranteed_items >= last_items);
        last_items = round.guaranteed_items;

        let read_set = ReadSet::for_items(&cursors, round.guaranteed_items);
        let mut dest = vec![0u8; read_set.total_len() as usize];
        cache
            .read_out_of_cache_pages(&mut round.pages, &read_set, &mut dest)
            .expect("materialize");

        for (cursor, d) in cursors.iter().zip(read_set.descriptors()) {
            let start = cursor.start as usize;
            let got = &dest[d.dest_offset as usize..(d.dest_offset + d.length) as usize];
            assert_eq!(got, &pattern(2000)[start..start + d.length as usize]);
        }

        rounds += 1;
        if round.progress.iter().all(|p| p.complete) {
            break;
        }
        assert!(rounds < 20, "scheduler stopped making progress");
    }

    assert!(rounds > 1);
    // Pages between the cursors were never needed
    assert_eq!(cache.page_state(7).unwrap(), PageState::NonResident);
    assert_eq!(cache.page_state(16).unwrap(), PageState::NonResident);
}
