//! Per-block visitation counts accumulated across rounds and replays.
//!
//! The tracker stores hit counts only; the observed set is exactly the set
//! of blocks with a non-zero count, so the two can never disagree.

use std::collections::{BTreeMap, BTreeSet};
use symcov_engine::{BlockId, BlockUniverse};

/// Coverage state of one session: which blocks were reached and how often.
///
/// Single writer: only the controller mutates it, between engine calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageTracker {
    hits: BTreeMap<BlockId, u64>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tracker from stored counts. Zero counts are skipped.
    pub fn from_counts(counts: impl IntoIterator<Item = (BlockId, u64)>) -> Self {
        let mut tracker = Self::new();
        for (block, count) in counts {
            tracker.record_observation(block, count);
        }
        tracker
    }

    /// Add `count` hits for `block`. Saturates at `u64::MAX`.
    ///
    /// A zero count records nothing.
    pub fn record_observation(&mut self, block: BlockId, count: u64) {
        if count == 0 {
            return;
        }
        let hits = self.hits.entry(block).or_insert(0);
        *hits = hits.saturating_add(count);
    }

    /// Record one hit per occurrence in an execution trace.
    ///
    /// Returns the blocks seen for the first time.
    pub fn record_trace(&mut self, trace: &[BlockId]) -> BTreeSet<BlockId> {
        let mut new_blocks = BTreeSet::new();
        for &block in trace {
            if !self.is_covered(block) {
                new_blocks.insert(block);
            }
            self.record_observation(block, 1);
        }
        new_blocks
    }

    pub fn is_covered(&self, block: BlockId) -> bool {
        self.hits.contains_key(&block)
    }

    pub fn hits(&self, block: BlockId) -> u64 {
        self.hits.get(&block).copied().unwrap_or(0)
    }

    /// Blocks of `universe` never observed, in ascending order.
    pub fn uncovered(&self, universe: &BlockUniverse) -> BTreeSet<BlockId> {
        universe.iter().filter(|b| !self.is_covered(*b)).collect()
    }

    /// Observed blocks that lie outside `universe`.
    pub fn foreign(&self, universe: &BlockUniverse) -> BTreeSet<BlockId> {
        self.observed().filter(|b| !universe.contains(*b)).collect()
    }

    /// Number of observed blocks inside `universe`.
    pub fn covered_in(&self, universe: &BlockUniverse) -> usize {
        universe.iter().filter(|b| self.is_covered(*b)).count()
    }

    /// Observed blocks in ascending order.
    pub fn observed(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.hits.keys().copied()
    }

    pub fn observed_set(&self) -> BTreeSet<BlockId> {
        self.observed().collect()
    }

    /// All `(block, hits)` pairs in ascending block order.
    pub fn counts(&self) -> &BTreeMap<BlockId, u64> {
        &self.hits
    }

    pub fn total_hits(&self) -> u64 {
        self.hits.values().fold(0u64, |acc, h| acc.saturating_add(*h))
    }

    /// Number of observed blocks.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
