//! Coverage checkpoints: save/load tracker state across sessions.
//!
//! A checkpoint is a versioned JSON document:
//!
//! ```json
//! {
//!   "format": "symcov-coverage",
//!   "version": 1,
//!   "binary_identity": "<sha256 of the analyzed binary>",
//!   "observed": ["0x100", "0x108"],
//!   "hit_count": { "0x100": 3, "0x108": 1 },
//!   "progress": { "rounds_completed": 2, "test_cases": 4 }
//! }
//! ```
//!
//! Loading checks, in order: the format tag, the schema version, the
//! binary identity, and that `observed` is exactly the set of blocks with a
//! positive `hit_count`. Any failure is an error; a bad file never turns
//! into an empty tracker.
//!
//! One session owns a checkpoint file at a time. Concurrent writers are not
//! detected.

use crate::coverage::CoverageTracker;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use symcov_engine::{BinaryIdentity, BlockId};

pub const FORMAT_TAG: &str = "symcov-coverage";
pub const FORMAT_VERSION: u32 = 1;

/// Errors from checkpoint operations.
#[derive(Debug, Snafu)]
pub enum PersistError {
    #[snafu(display("corrupt coverage state: {reason}"))]
    CorruptState { reason: String },

    #[snafu(display("coverage state belongs to binary {found}, expected {expected}"))]
    MismatchedBinary {
        expected: BinaryIdentity,
        found: BinaryIdentity,
    },

    #[snafu(display("unsupported coverage state version {found} (supported: {supported})"))]
    UnsupportedVersion { found: u32, supported: u32 },

    #[snafu(display("I/O error"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("JSON encoding error"), context(false))]
    Encode { source: serde_json::Error },
}

/// Session counters carried alongside coverage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointProgress {
    pub rounds_completed: u64,
    pub test_cases: u64,
}

/// Everything persisted for one binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCheckpoint {
    pub format: String,
    pub version: u32,
    pub binary_identity: BinaryIdentity,
    pub observed: BTreeSet<BlockId>,
    pub hit_count: BTreeMap<BlockId, u64>,
    #[serde(default)]
    pub progress: CheckpointProgress,
}

/// Just enough to decide whether the rest of the document can be trusted.
#[derive(Deserialize)]
struct Header {
    format: String,
    version: u32,
}

impl CoverageCheckpoint {
    pub fn new(tracker: &CoverageTracker, identity: &BinaryIdentity) -> Self {
        Self {
            format: FORMAT_TAG.to_string(),
            version: FORMAT_VERSION,
            binary_identity: identity.clone(),
            observed: tracker.observed_set(),
            hit_count: tracker.counts().clone(),
            progress: CheckpointProgress::default(),
        }
    }

    pub fn with_progress(mut self, progress: CheckpointProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn encode(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a checkpoint recorded for `expected`.
    pub fn decode(serialized: &str, expected: &BinaryIdentity) -> Result<Self, PersistError> {
        let header: Header =
            serde_json::from_str(serialized).map_err(|e| PersistError::CorruptState {
                reason: e.to_string(),
            })?;
        if header.format != FORMAT_TAG {
            return Err(PersistError::CorruptState {
                reason: format!("unknown format tag {:?}", header.format),
            });
        }
        if header.version != FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: header.version,
                supported: FORMAT_VERSION,
            });
        }

        let checkpoint: CoverageCheckpoint =
            serde_json::from_str(serialized).map_err(|e| PersistError::CorruptState {
                reason: e.to_string(),
            })?;
        if &checkpoint.binary_identity != expected {
            return Err(PersistError::MismatchedBinary {
                expected: expected.clone(),
                found: checkpoint.binary_identity,
            });
        }
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    fn validate(&self) -> Result<(), PersistError> {
        if let Some((block, _)) = self.hit_count.iter().find(|(_, hits)| **hits == 0) {
            return Err(PersistError::CorruptState {
                reason: format!("block {} has a zero hit count", block),
            });
        }
        let counted: BTreeSet<BlockId> = self.hit_count.keys().copied().collect();
        if counted != self.observed {
            let stray = self
                .observed
                .symmetric_difference(&counted)
                .next()
                .copied();
            return Err(PersistError::CorruptState {
                reason: match stray {
                    Some(block) => format!("observed set and hit counts disagree at {}", block),
                    None => "observed set and hit counts disagree".to_string(),
                },
            });
        }
        Ok(())
    }

    /// Rebuild the tracker this checkpoint describes.
    pub fn tracker(&self) -> CoverageTracker {
        CoverageTracker::from_counts(self.hit_count.iter().map(|(b, h)| (*b, *h)))
    }
}

/// Serialize a tracker together with the identity of its binary.
pub fn save(tracker: &CoverageTracker, identity: &BinaryIdentity) -> Result<String, PersistError> {
    CoverageCheckpoint::new(tracker, identity).encode()
}

/// Restore a tracker, rejecting state recorded for any other binary.
pub fn load(serialized: &str, expected: &BinaryIdentity) -> Result<CoverageTracker, PersistError> {
    Ok(CoverageCheckpoint::decode(serialized, expected)?.tracker())
}

/// Save a checkpoint to a JSON file.
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    checkpoint: &CoverageCheckpoint,
) -> Result<(), PersistError> {
    fs::write(path, checkpoint.encode()?)?;
    Ok(())
}

/// Load a checkpoint from a JSON file.
pub fn load_checkpoint<P: AsRef<Path>>(
    path: P,
    expected: &BinaryIdentity,
) -> Result<CoverageCheckpoint, PersistError> {
    let json = fs::read_to_string(path)?;
    CoverageCheckpoint::decode(&json, expected)
}
