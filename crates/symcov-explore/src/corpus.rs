//! Corpus: generated test cases and what replaying them showed.

use crate::testcase::TestCase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use symcov_engine::BlockId;

/// Name of the index written next to the case files.
pub const INDEX_FILE: &str = "cases.json";

/// A test case plus its replay outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub case: TestCase,
    /// Round that generated the case (1-based).
    pub round: u64,
    /// Replay passed through the case's target.
    pub target_reached: bool,
    /// Blocks seen for the first time during replay.
    pub new_blocks: Vec<BlockId>,
}

/// All test cases generated during a session.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
    next_id: u64,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after `count` cases from an earlier session.
    pub fn resume_from(&mut self, count: u64) {
        self.next_id = self.next_id.max(count);
    }

    /// Assign the next ID to `case` without storing it.
    pub fn assign_id(&mut self, case: &mut TestCase) {
        case.id = self.next_id;
        self.next_id += 1;
    }

    /// Store an entry whose case already carries an ID.
    pub fn push(&mut self, entry: CorpusEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.entries.iter().map(|e| &e.case)
    }

    /// IDs handed out so far, including earlier sessions.
    pub fn ids_assigned(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            total_cases: self.entries.len(),
            reached_on_replay: self.entries.iter().filter(|e| e.target_reached).count(),
            without_input: self.entries.iter().filter(|e| e.case.input.is_none()).count(),
            new_blocks: self.entries.iter().map(|e| e.new_blocks.len()).sum(),
        }
    }

    /// Write one `case_<id>_<target>.bin` per case with an input, plus a
    /// `cases.json` index of every entry.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> io::Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        for entry in &self.entries {
            if let Some(input) = &entry.case.input {
                fs::write(dir.join(entry.case.file_name()), input)?;
            }
        }

        let index = serde_json::to_string_pretty(&self.entries)?;
        fs::write(dir.join(INDEX_FILE), index)?;
        Ok(())
    }
}

/// Corpus statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusStats {
    pub total_cases: usize,
    /// Cases whose replay passed through their target.
    pub reached_on_replay: usize,
    /// Cases for programs without an input channel.
    pub without_input: usize,
    /// Blocks first observed through these cases.
    pub new_blocks: usize,
}
