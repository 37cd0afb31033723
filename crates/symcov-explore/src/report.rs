//! Coverage summaries and exploration reports for human consumption.

use crate::controller::{ExplorationReport, TargetOutcome};
use crate::coverage::CoverageTracker;
use serde::Serialize;
use symcov_engine::{BlockId, BlockUniverse};

/// Default number of most-hit blocks listed in a report.
pub const DEFAULT_TOP_HIT: usize = 10;
/// Default number of uncovered blocks listed in a report.
pub const DEFAULT_SAMPLE_UNCOVERED: usize = 10;

/// One block and its hit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHits {
    pub block: BlockId,
    pub hits: u64,
}

/// Coverage of one universe by one tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub scope: String,
    pub total: usize,
    pub covered_count: usize,
    pub uncovered_count: usize,
    /// `covered_count / total * 100`, or 0 for an empty universe.
    pub percentage: f64,
    /// Most-hit blocks: descending count, ties by ascending address.
    pub top_hit: Vec<BlockHits>,
    /// Uncovered blocks in ascending address order.
    pub sample_uncovered: Vec<BlockId>,
    /// Observed blocks outside the universe.
    pub foreign: Vec<BlockId>,
}

/// Summarize `tracker` against `universe`, listing at most `top_n` hit
/// blocks and `sample_m` uncovered blocks.
pub fn summarize(
    universe: &BlockUniverse,
    tracker: &CoverageTracker,
    top_n: usize,
    sample_m: usize,
) -> CoverageReport {
    let total = universe.len();
    let covered_count = tracker.covered_in(universe);
    let uncovered = tracker.uncovered(universe);
    let percentage = if total == 0 {
        0.0
    } else {
        covered_count as f64 / total as f64 * 100.0
    };

    let mut top_hit: Vec<BlockHits> = tracker
        .counts()
        .iter()
        .map(|(block, hits)| BlockHits {
            block: *block,
            hits: *hits,
        })
        .collect();
    top_hit.sort_by(|a, b| b.hits.cmp(&a.hits).then(a.block.cmp(&b.block)));
    top_hit.truncate(top_n);

    CoverageReport {
        scope: universe.scope().to_string(),
        total,
        covered_count,
        uncovered_count: uncovered.len(),
        percentage,
        top_hit,
        sample_uncovered: uncovered.into_iter().take(sample_m).collect(),
        foreign: tracker.foreign(universe).into_iter().collect(),
    }
}

/// Format a coverage report for human consumption.
pub fn format_coverage_report(report: &CoverageReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  Coverage Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Scope:                  {}\n", report.scope));
    output.push_str(&format!("Total blocks:           {}\n", report.total));
    output.push_str(&format!("Covered blocks:         {}\n", report.covered_count));
    output.push_str(&format!("Uncovered blocks:       {}\n", report.uncovered_count));
    output.push_str(&format!("Coverage percentage:    {:.2}%\n", report.percentage));
    output.push('\n');

    if !report.sample_uncovered.is_empty() {
        output.push_str(&format!(
            "─── Uncovered Blocks (first {}) ────────────────────────────────────────\n",
            report.sample_uncovered.len()
        ));
        for block in &report.sample_uncovered {
            output.push_str(&format!("  {}\n", block));
        }
        if report.uncovered_count > report.sample_uncovered.len() {
            output.push_str(&format!(
                "  ... and {} more\n",
                report.uncovered_count - report.sample_uncovered.len()
            ));
        }
        output.push('\n');
    }

    if !report.top_hit.is_empty() {
        output.push_str("─── Most Executed Blocks ──────────────────────────────────────────────\n");
        for entry in &report.top_hit {
            output.push_str(&format!("  {}: {} times\n", entry.block, entry.hits));
        }
        output.push('\n');
    }

    if !report.foreign.is_empty() {
        output.push_str("─── Blocks Outside Recovered CFG ──────────────────────────────────────\n");
        for block in &report.foreign {
            output.push_str(&format!("  {}\n", block));
        }
        output.push('\n');
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output
}

/// Format a whole exploration session.
pub fn format_exploration_report(report: &ExplorationReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  Exploration Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Exploration rounds:     {}\n", report.rounds.len()));
    output.push_str(&format!("Stop reason:            {}\n", report.stop_reason));
    output.push_str(&format!("Targets attempted:      {}\n", report.targets_attempted()));
    output.push_str(&format!("Paths found:            {}\n", report.paths_found()));
    output.push_str(&format!("Not found:              {}\n", report.not_found()));
    output.push_str(&format!("Engine errors:          {}\n", report.error_count()));
    output.push_str(&format!("Replay failures:        {}\n", report.replay_failures()));
    output.push_str(&format!(
        "Targets hit on replay:  {}\n",
        report.targets_reached_on_replay()
    ));
    output.push_str(&format!(
        "Coverage:               {:.2}% -> {:.2}%\n",
        report.initial.percentage, report.coverage.percentage
    ));
    if let Some(ref reason) = report.bootstrap_error {
        output.push_str(&format!("Bootstrap error:        {}\n", reason));
    }
    output.push('\n');

    for round in &report.rounds {
        output.push_str(&format!(
            "─── Round {} ({} targets, {} new blocks{}) ───\n",
            round.round,
            round.targets.len(),
            round.new_blocks.len(),
            if round.interrupted { ", interrupted" } else { "" }
        ));
        if let Some(ref reason) = round.error {
            output.push_str(&format!("  engine error: {}\n", reason));
        }
        for target in &round.targets {
            let line = match &target.outcome {
                TargetOutcome::Found {
                    case_id,
                    reached_on_replay,
                    new_blocks,
                } => format!(
                    "found, case #{}, {} on replay, {} new blocks",
                    case_id,
                    if *reached_on_replay { "reached" } else { "missed" },
                    new_blocks
                ),
                TargetOutcome::ReplayFailed {
                    case_id,
                    reason,
                    new_blocks,
                } => format!(
                    "found, case #{}, replay failed after {} new blocks: {}",
                    case_id, new_blocks, reason
                ),
                TargetOutcome::NotFound { budget_exhausted } => {
                    if *budget_exhausted {
                        "not found (step budget exhausted)".to_string()
                    } else {
                        "not found".to_string()
                    }
                }
                TargetOutcome::Error { reason } => format!("error: {}", reason),
            };
            output.push_str(&format!("  {}: {}\n", target.target, line));
        }
        output.push('\n');
    }

    if !report.test_cases.is_empty() {
        output.push_str("─── Test Cases ────────────────────────────────────────────────────────\n");
        for case in &report.test_cases {
            output.push_str(&format!("  {}\n", case));
        }
        output.push('\n');
    }

    output.push_str(&format_coverage_report(&report.coverage));
    output
}
