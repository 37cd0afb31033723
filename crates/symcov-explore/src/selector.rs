//! Target selection: which uncovered blocks to explore next.
//!
//! Selection is a pure function of the universe, the tracker and (for
//! [`SelectionPolicy::FewestAttempts`]) the attempt history, so the same
//! inputs always give the same ordered targets. Ties are broken by
//! ascending block address.

use crate::coverage::CoverageTracker;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use symcov_engine::{BlockId, BlockUniverse};

/// Ordering applied to uncovered blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Ascending block address.
    #[default]
    Ascending,
    /// Fewest earlier exploration attempts first, then ascending address.
    /// Keeps targets that keep failing from crowding out fresh ones.
    FewestAttempts,
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ascending" | "asc" => Ok(SelectionPolicy::Ascending),
            "fewest-attempts" | "fewest" => Ok(SelectionPolicy::FewestAttempts),
            other => Err(format!(
                "unknown selection policy '{}'. Use 'ascending' or 'fewest-attempts'.",
                other
            )),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::Ascending => f.write_str("ascending"),
            SelectionPolicy::FewestAttempts => f.write_str("fewest-attempts"),
        }
    }
}

/// How many times each block has been handed to the path explorer.
#[derive(Debug, Clone, Default)]
pub struct AttemptHistory {
    attempts: BTreeMap<BlockId, u32>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, block: BlockId) {
        let n = self.attempts.entry(block).or_insert(0);
        *n = n.saturating_add(1);
    }

    pub fn attempts(&self, block: BlockId) -> u32 {
        self.attempts.get(&block).copied().unwrap_or(0)
    }
}

/// Up to `max_count` uncovered blocks in ascending address order.
pub fn select_targets(
    universe: &BlockUniverse,
    tracker: &CoverageTracker,
    max_count: usize,
) -> Vec<BlockId> {
    TargetSelector::default().select(universe, tracker, &AttemptHistory::new(), max_count)
}

/// Picks exploration targets according to a [`SelectionPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetSelector {
    policy: SelectionPolicy,
}

impl TargetSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Up to `max_count` uncovered blocks, ordered by the policy.
    ///
    /// Returns an empty list when `max_count == 0` or nothing is left.
    pub fn select(
        &self,
        universe: &BlockUniverse,
        tracker: &CoverageTracker,
        history: &AttemptHistory,
        max_count: usize,
    ) -> Vec<BlockId> {
        if max_count == 0 {
            return Vec::new();
        }

        // `uncovered` is already in ascending order; a stable sort keeps it
        // as the tie-break.
        let mut candidates: Vec<BlockId> = tracker.uncovered(universe).into_iter().collect();
        if self.policy == SelectionPolicy::FewestAttempts {
            candidates.sort_by_key(|b| history.attempts(*b));
        }
        candidates.truncate(max_count);
        candidates
    }
}
