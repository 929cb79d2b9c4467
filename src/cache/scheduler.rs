//! Parallel Read Scheduler - Budgeted Multi-Cursor Prefetch Planning
//!
//! Many independent read cursors share one I/O budget per round. The least
//! advanced cursor always moves next, so no cursor can starve while another
//! races ahead.
//!
//! # Round
//!
//! 1. Seed a min-queue ordered by items read so far
//! 2. Raise the budget to at least one page per cursor
//! 3. Pop the least advanced cursor and price the page holding its next byte:
//!    a non-resident page not yet claimed this round costs one page, anything
//!    else is free
//! 4. Advance the cursor to the end of that page (or its end) and requeue it
//! 5. Stop when the queue drains or the next page no longer fits the budget
//!
//! Progress is not remembered between rounds. Callers poll: every round
//! starts from the cursor origins, and pages fetched by earlier rounds are
//! free, so each round reaches further.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

use tracing::debug;

use super::index::PageIndex;
use super::read_set::{merge_pages, PageRun};
use crate::error::{Error, Result};

// =============================================================================
// Types
// =============================================================================

/// One logical read stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelRead {
    /// First byte of the stream
    pub start: u64,
    /// Bytes the stream wants in total
    pub total_size: u64,
    /// Size of one item; progress is reported in whole items
    pub item_size: u64,
}

impl ParallelRead {
    /// Create a new cursor description.
    pub fn new(start: u64, total_size: u64, item_size: u64) -> Self {
        Self {
            start,
            total_size,
            item_size,
        }
    }
}

/// Where a cursor got to in a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorProgress {
    /// Bytes advanced from the cursor start
    pub bytes_advanced: u64,
    /// Whether the cursor reached its total size
    pub complete: bool,
}

/// Pages selected for fetch in one round, in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutOfCachePageSet {
    pages: BTreeSet<u64>,
}

impl OutOfCachePageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: u64) -> bool {
        self.pages.insert(page)
    }

    pub fn contains(&self, page: u64) -> bool {
        self.pages.contains(&page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Highest page in the set
    pub fn last(&self) -> Option<u64> {
        self.pages.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.pages.iter().copied()
    }

    /// Adjacent pages collapsed into runs
    pub fn runs(&self) -> Vec<PageRun> {
        merge_pages(self.iter())
    }
}

/// Result of one scheduling round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetRound {
    /// Whole items every cursor has been advanced through
    pub guaranteed_items: u64,
    /// Progress per cursor, in input order
    pub progress: Vec<CursorProgress>,
    /// Pages to fetch before the guaranteed items can be read
    pub pages: OutOfCachePageSet,
    /// Effective budget after the per-cursor floor
    pub budget: u64,
    /// Budget charged for claimed pages
    pub budget_used: u64,
}

// =============================================================================
// Cursor State
// =============================================================================

/// Transient per-round state of a cursor.
#[derive(Debug, Clone, Copy)]
struct ParallelReadState {
    cursor: usize,
    start: u64,
    total_size: u64,
    item_size: u64,
    advanced: u64,
    complete: bool,
}

impl ParallelReadState {
    fn new(cursor: usize, read: &ParallelRead) -> Self {
        Self {
            cursor,
            start: read.start,
            total_size: read.total_size,
            item_size: read.item_size,
            advanced: 0,
            complete: read.total_size == 0,
        }
    }

    fn items_read(&self) -> u64 {
        self.advanced / self.item_size
    }

    fn position(&self) -> u64 {
        self.start + self.advanced
    }
}

impl PartialEq for ParallelReadState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParallelReadState {}

impl PartialOrd for ParallelReadState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParallelReadState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed throughout: BinaryHeap is a max heap and the least advanced
        // cursor must come out first
        other
            .items_read()
            .cmp(&self.items_read())
            .then_with(|| other.advanced.cmp(&self.advanced))
            .then_with(|| other.cursor.cmp(&self.cursor))
    }
}

// =============================================================================
// Planning
// =============================================================================

fn validate(index: &PageIndex, cursors: &[ParallelRead]) -> Result<()> {
    if cursors.is_empty() {
        return Err(Error::BadParameter("no cursors to schedule".into()));
    }
    for (i, c) in cursors.iter().enumerate() {
        if c.item_size == 0 {
            return Err(Error::BadParameter(format!("cursor {} has zero item size", i)));
        }
        let end = c.start.checked_add(c.total_size);
        if end.map_or(true, |end| end > index.full_file_size()) {
            return Err(Error::BadParameter(format!(
                "cursor {} reads [{}, +{}) past the {} byte file",
                i,
                c.start,
                c.total_size,
                index.full_file_size()
            )));
        }
    }
    Ok(())
}

/// Plan one budgeted round over `cursors` against the residency in `index`.
pub fn plan_budget_round(
    index: &PageIndex,
    budget: u64,
    cursors: &[ParallelRead],
) -> Result<BudgetRound> {
    validate(index, cursors)?;

    let page_size = index.page_size();
    let budget = budget.max(page_size.saturating_mul(cursors.len() as u64));

    let mut queue = BinaryHeap::with_capacity(cursors.len());
    let mut completed = Vec::new();
    for (i, c) in cursors.iter().enumerate() {
        let state = ParallelReadState::new(i, c);
        if state.complete {
            completed.push(state);
        } else {
            queue.push(state);
        }
    }

    let mut pages = OutOfCachePageSet::new();
    let mut used = 0u64;

    while used < budget {
        let Some(mut state) = queue.pop() else {
            break;
        };

        let pos = state.position();
        let page = index.page_index_of(pos);
        let cost = if !index.is_resident(page) && !pages.contains(page) {
            page_size
        } else {
            0
        };

        if used + cost > budget {
            completed.push(state);
            break;
        }
        if cost > 0 {
            pages.insert(page);
            used += cost;
        }

        let step = index
            .page_remainder(pos)
            .min(state.total_size - state.advanced);
        state.advanced += step;
        if state.advanced == state.total_size {
            state.complete = true;
            completed.push(state);
        } else {
            queue.push(state);
        }
    }

    let guaranteed_items = queue
        .iter()
        .chain(completed.iter())
        .map(ParallelReadState::items_read)
        .min()
        .ok_or_else(|| Error::GenericFailure("scheduling round lost every cursor".into()))?;

    let mut progress = vec![CursorProgress::default(); cursors.len()];
    for state in queue.iter().chain(completed.iter()) {
        progress[state.cursor] = CursorProgress {
            bytes_advanced: state.advanced,
            complete: state.complete,
        };
    }

    debug!(
        cursors = cursors.len(),
        budget,
        used,
        pages = pages.len(),
        guaranteed_items,
        "Planned budgeted parallel read"
    );

    Ok(BudgetRound {
        guaranteed_items,
        progress,
        pages,
        budget,
        budget_used: used,
    })
}

// =============================================================================
// Tests
// =============================================================================
