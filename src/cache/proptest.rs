//! Property-Based Tests for the Page Cache
//!
//! # Test Properties
//!
//! 1. **Read Fidelity**: any byte range read through the cache equals the
//!    same range of the source, before and after it becomes resident
//! 2. **Fill Only**: residency never shrinks
//! 3. **Range Uniformity**: a contiguous state range is uniform and maximal
//! 4. **Budget**: a round never charges more than its budget, and only for
//!    pages that are not resident
//! 5. **Persistence**: a decoded status file reproduces the residency bitmap

#![cfg(test)]

use parking_lot::Mutex;
use proptest::prelude::*;

use super::index::{PageIndex, PageState};
use super::page_io::tests::{fixture, source_bytes};
use super::read_set::merge_pages;
use super::scheduler::{plan_budget_round, ParallelRead};
use super::status::{decode_status, encode_status};
use super::window::WindowedReader;

// =============================================================================
// Property Strategies
// =============================================================================

/// File size and page size, with sizes that do not divide evenly.
fn geometry_strategy() -> impl Strategy<Value = (u64, u64)> {
    (1u64..4000, 1u64..300)
}

/// Page spans to mark resident, as `(first, len)` fractions of the file.
fn spans_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.0f64..1.0, 0.0f64..0.3), 0..8)
}

fn index_with(size: u64, page_size: u64, spans: &[(f64, f64)]) -> PageIndex {
    let mut index = PageIndex::new(size, page_size).unwrap();
    let n = index.num_pages();
    for &(first, len) in spans {
        let first = ((first * n as f64) as u64).min(n - 1);
        let last = (first + (len * n as f64) as u64).min(n - 1);
        index.mark_resident(first, last).unwrap();
    }
    index
}

// =============================================================================
// Read Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: windowed reads return source bytes and only ever add residency.
    #[test]
    fn prop_reads_match_source(
        (size, page_size) in geometry_strategy(),
        reads in prop::collection::vec((0.0f64..1.0, 1usize..700), 1..12),
    ) {
        let f = fixture(size, page_size, 512);
        let reader = WindowedReader::new(page_size.min(size))?;
        let state = Mutex::new(f.state);
        let expected = source_bytes(size);

        let mut resident = 0;
        for (frac, len) in reads {
            let start = ((frac * size as f64) as u64).min(size - 1);
            let mut dest = vec![0u8; len];
            let n = reader.read(&state, start, &mut dest)?;

            let end = (start as usize + len).min(size as usize);
            prop_assert_eq!(n, end - start as usize);
            prop_assert_eq!(&dest[..n], &expected[start as usize..end]);

            let now = state.lock().index().num_resident();
            prop_assert!(now >= resident);
            resident = now;
        }

        // Everything resident must already sit in the cache file
        let guard = state.lock();
        let cached = f.cache.contents();
        for page in 0..guard.index().num_pages() {
            if guard.index().is_resident(page) {
                let start = guard.index().page_start(page) as usize;
                let end = start + guard.index().page_len(page) as usize;
                prop_assert_eq!(&cached[start..end], &expected[start..end]);
            }
        }
    }

    /// Property: contiguous state ranges are uniform and cannot be extended.
    #[test]
    fn prop_contiguous_range_is_maximal(
        (size, page_size) in geometry_strategy(),
        spans in spans_strategy(),
        start_frac in 0.0f64..1.0,
    ) {
        let index = index_with(size, page_size, &spans);
        let n = index.num_pages();
        let start = ((start_frac * n as f64) as u64).min(n - 1);

        let (end, state) = index.contiguous_state_range(start, n - 1)?;
        prop_assert!(end >= start && end < n);
        for page in start..=end {
            prop_assert_eq!(index.state(page)?, state);
        }
        if end + 1 < n {
            prop_assert_ne!(index.state(end + 1)?, state);
        }
    }

    /// Property: resident and missing bytes always add up to the file size.
    #[test]
    fn prop_byte_totals_cover_file(
        (size, page_size) in geometry_strategy(),
        spans in spans_strategy(),
    ) {
        let index = index_with(size, page_size, &spans);
        prop_assert_eq!(index.resident_bytes() + index.non_resident_bytes(), size);
        prop_assert_eq!(index.is_complete(), index.non_resident_bytes() == 0);
    }
}

// =============================================================================
// Scheduling Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a round stays within budget and charges only missing pages.
    #[test]
    fn prop_round_respects_budget(
        spans in spans_strategy(),
        budget in 0u64..2000,
        cursors in prop::collection::vec((0u64..900, 1u64..100, 1u64..50), 1..6),
    ) {
        let index = index_with(1000, 100, &spans);
        let cursors: Vec<_> = cursors
            .into_iter()
            .map(|(start, total, item)| ParallelRead::new(start, total.min(1000 - start), item))
            .collect();

        let round = plan_budget_round(&index, budget, &cursors)?;
        prop_assert!(round.budget >= budget);
        prop_assert!(round.budget >= 100 * cursors.len() as u64);
        prop_assert!(round.budget_used <= round.budget);
        prop_assert_eq!(round.budget_used, round.pages.len() as u64 * 100);

        for page in round.pages.iter() {
            prop_assert_eq!(index.state(page)?, PageState::NonResident);
        }
        for (cursor, progress) in cursors.iter().zip(&round.progress) {
            prop_assert!(progress.bytes_advanced <= cursor.total_size);
            prop_assert!(round.guaranteed_items <= progress.bytes_advanced / cursor.item_size);
        }
    }

    /// Property: merged runs cover exactly the input pages.
    #[test]
    fn prop_merge_covers_input(pages in prop::collection::btree_set(0u64..200, 0..60)) {
        let runs = merge_pages(pages.iter().copied());
        let expanded: Vec<u64> = runs.iter().flat_map(|r| r.first..=r.last).collect();
        prop_assert_eq!(expanded, pages.into_iter().collect::<Vec<_>>());

        for pair in runs.windows(2) {
            prop_assert!(pair[0].last + 1 < pair[1].first);
        }
    }
}

// =============================================================================
// Persistence Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: decoding an encoded status reproduces the index.
    #[test]
    fn prop_status_preserves_residency(
        (size, page_size) in geometry_strategy(),
        spans in spans_strategy(),
    ) {
        let index = index_with(size, page_size, &spans);
        let (metadata, decoded) = decode_status(&encode_status(&index))?;

        prop_assert_eq!(metadata.full_file_size, size);
        prop_assert_eq!(metadata.page_size, page_size);
        prop_assert_eq!(metadata.num_pages_resident, index.num_resident());
        prop_assert_eq!(decoded.blocks(), index.blocks());
    }
}
