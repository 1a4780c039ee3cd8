//! Transaction page cursor tracking
//!
//! The worker's transaction source can return overlapping records across
//! consecutive page requests. Each fetched page is deduplicated before it
//! reaches the UI and the cursor map remembers where the next page should
//! really start.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use tracing::debug;

/// Records shown per page in the transaction list.
pub const WALLET_TXN_PAGE_SIZE: usize = 10;
/// Page size sent for the first page and for any remapped page.
pub const REDUCED_PAGE_SIZE: usize = 10;
/// `kept_count` reported when a page contained no duplicates at all.
pub const NO_DUPLICATES_KEPT_COUNT: i64 = 5;

/// Identity used for deduplication.
pub trait RecordKey {
    type Key: Eq + Hash + Clone;

    fn record_key(&self) -> Self::Key;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupResult<T> {
    pub kept_count: i64,
    pub selected: Vec<T>,
}

/// Deduplicate `raw` by key (first occurrence wins), keep the first
/// `page_size` records and compute the cursor compensation.
pub fn dedup_page<T>(raw: &[T], page_size: usize) -> DedupResult<T>
where
    T: RecordKey + Clone,
{
    let mut occurrences: HashMap<T::Key, usize> = HashMap::with_capacity(raw.len());
    for record in raw {
        *occurrences.entry(record.record_key()).or_default() += 1;
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let distinct: Vec<&T> = raw
        .iter()
        .filter(|record| seen.insert(record.record_key()))
        .collect();

    let selected = distinct
        .iter()
        .take(page_size)
        .map(|record| (*record).clone())
        .collect();

    let kept_count = if distinct.len() == raw.len() {
        NO_DUPLICATES_KEPT_COUNT
    } else if distinct.len() * 2 > raw.len() {
        distinct
            .iter()
            .skip(page_size)
            .map(|record| {
                let repeated = occurrences
                    .get(&record.record_key())
                    .is_some_and(|count| *count > 1);
                if repeated {
                    2
                } else {
                    1
                }
            })
            .sum::<i64>()
    } else {
        0
    };

    DedupResult {
        kept_count,
        selected,
    }
}

/// What to actually ask the worker for when the UI wants a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    /// Page number the UI asked for.
    pub requested_page: u32,
    /// Page number sent to the worker.
    pub page: u32,
    pub size: usize,
    /// True when `page` came from the cursor map.
    pub remapped: bool,
}

/// Page number -> adjusted page number, for one listing session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorMap {
    entries: BTreeMap<u32, i64>,
}

impl CursorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page: u32) -> Option<i64> {
        self.entries.get(&page).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn plan(&self, requested_page: u32, page_size: usize) -> PagePlan {
        let mut plan = PagePlan {
            requested_page,
            page: requested_page,
            size: page_size,
            remapped: false,
        };

        if let Some(adjusted) = requested_page
            .checked_sub(1)
            .and_then(|previous| self.get(previous))
        {
            plan.page = clamp_page(adjusted);
            plan.size = REDUCED_PAGE_SIZE;
            plan.remapped = true;
        }
        if requested_page == 1 {
            plan.size = REDUCED_PAGE_SIZE;
        }
        plan
    }

    /// Deduplicate a fetched page and record where the following page starts.
    pub fn apply<T>(&mut self, plan: &PagePlan, raw: &[T], page_size: usize) -> DedupResult<T>
    where
        T: RecordKey + Clone,
    {
        let result = dedup_page(raw, page_size);
        let adjusted = plan.size as i64 + i64::from(plan.page) - result.kept_count;
        self.entries.insert(plan.requested_page, adjusted);

        debug!(
            requested_page = plan.requested_page,
            fetched_page = plan.page,
            raw = raw.len(),
            selected = result.selected.len(),
            kept_count = result.kept_count,
            adjusted,
            "Page deduplicated"
        );
        result
    }
}

fn clamp_page(adjusted: i64) -> u32 {
    adjusted.clamp(1, i64::from(u32::MAX)) as u32
}
