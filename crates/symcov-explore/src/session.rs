//! Coverage session: the explicitly owned state of one analysis.
//!
//! A session ties a tracker to the binary it was recorded for and to the
//! block universe currently in scope. Nothing here is global: two sessions
//! for two binaries can live side by side.

use crate::checkpoint::{load_checkpoint, save_checkpoint, CheckpointProgress, CoverageCheckpoint};
use crate::controller::ExploreError;
use crate::coverage::CoverageTracker;
use crate::report::{summarize, CoverageReport};
use crate::selector::select_targets;
use log::{info, warn};
use std::path::Path;
use symcov_engine::{BinaryIdentity, BlockId, BlockUniverse};

#[derive(Debug, Clone)]
pub struct CoverageSession {
    identity: BinaryIdentity,
    universe: Option<BlockUniverse>,
    tracker: CoverageTracker,
    progress: CheckpointProgress,
}

impl CoverageSession {
    /// Empty session for the binary identified by `identity`.
    pub fn new(identity: BinaryIdentity) -> Self {
        Self {
            identity,
            universe: None,
            tracker: CoverageTracker::new(),
            progress: CheckpointProgress::default(),
        }
    }

    pub fn from_checkpoint(checkpoint: &CoverageCheckpoint) -> Self {
        Self {
            identity: checkpoint.binary_identity.clone(),
            universe: None,
            tracker: checkpoint.tracker(),
            progress: checkpoint.progress,
        }
    }

    /// Restore a session saved for `identity`.
    pub fn load<P: AsRef<Path>>(path: P, identity: &BinaryIdentity) -> Result<Self, ExploreError> {
        let checkpoint = load_checkpoint(path, identity)?;
        Ok(Self::from_checkpoint(&checkpoint))
    }

    /// Restore from `path` if it exists, otherwise start empty.
    pub fn open<P: AsRef<Path>>(path: P, identity: BinaryIdentity) -> Result<Self, ExploreError> {
        let path = path.as_ref();
        if path.exists() {
            let session = Self::load(path, &identity)?;
            info!(
                "Resumed coverage state from {}: {} blocks observed, {} rounds completed",
                path.display(),
                session.tracker.len(),
                session.progress.rounds_completed
            );
            Ok(session)
        } else {
            Ok(Self::new(identity))
        }
    }

    pub fn checkpoint(&self) -> CoverageCheckpoint {
        CoverageCheckpoint::new(&self.tracker, &self.identity).with_progress(self.progress)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ExploreError> {
        save_checkpoint(path, &self.checkpoint())?;
        Ok(())
    }

    /// Replace the universe in scope. Coverage is kept: blocks outside the
    /// new universe stay recorded and are reported as foreign.
    pub fn bind_universe(&mut self, universe: BlockUniverse) -> Option<BlockUniverse> {
        let foreign = self.tracker.foreign(&universe);
        if !foreign.is_empty() {
            warn!(
                "{} observed blocks lie outside scope '{}'",
                foreign.len(),
                universe.scope()
            );
        }
        info!(
            "Bound scope '{}' with {} blocks",
            universe.scope(),
            universe.len()
        );
        self.universe.replace(universe)
    }

    /// The bound universe; [`ExploreError::NoUniverseBound`] before any
    /// control flow has been recovered.
    pub fn universe(&self) -> Result<&BlockUniverse, ExploreError> {
        self.universe.as_ref().ok_or(ExploreError::NoUniverseBound)
    }

    /// Universe and tracker together, for recording against the scope.
    pub fn bound_mut(&mut self) -> Result<(&BlockUniverse, &mut CoverageTracker), ExploreError> {
        match &self.universe {
            Some(universe) => Ok((universe, &mut self.tracker)),
            None => Err(ExploreError::NoUniverseBound),
        }
    }

    pub fn identity(&self) -> &BinaryIdentity {
        &self.identity
    }

    pub fn tracker(&self) -> &CoverageTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut CoverageTracker {
        &mut self.tracker
    }

    pub fn progress(&self) -> CheckpointProgress {
        self.progress
    }

    pub fn progress_mut(&mut self) -> &mut CheckpointProgress {
        &mut self.progress
    }

    /// Up to `max_count` uncovered blocks of the bound universe, ascending.
    pub fn select_targets(&self, max_count: usize) -> Result<Vec<BlockId>, ExploreError> {
        Ok(select_targets(self.universe()?, &self.tracker, max_count))
    }

    pub fn summarize(&self, top_n: usize, sample_m: usize) -> Result<CoverageReport, ExploreError> {
        Ok(summarize(self.universe()?, &self.tracker, top_n, sample_m))
    }
}
