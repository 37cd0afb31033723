//! Path explorer: uniform "find a path to block B" over an exploration engine.
//!
//! Every call is bounded by a step budget. Running out of budget is a plain
//! [`ExplorationResult::NotFound`]; anything the engine reports as a fault
//! (unsupported state, failed concretization, ...) becomes
//! [`ExplorationResult::Error`] so one bad target never takes down a round.

use crate::testcase::TestCase;
use log::debug;
use symcov_engine::{BlockId, Concretized, EngineError, ExplorationEngine, InputChannel};

/// Outcome of one exploration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorationResult {
    /// A path reaches the target; the case holds its concrete input.
    Found(TestCase),
    /// No path was found within the step budget.
    NotFound { budget_exhausted: bool },
    /// The engine failed while exploring this target.
    Error(String),
}

impl ExplorationResult {
    pub fn is_found(&self) -> bool {
        matches!(self, ExplorationResult::Found(_))
    }
}

/// Blocks reached by re-running a test case from the entry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Every block occurrence, in execution order.
    pub visited: Vec<BlockId>,
    /// Whether the replay actually passed through the case's target.
    pub target_reached: bool,
    /// The replay budget ran out before the program terminated.
    pub exhausted: bool,
    /// The engine faulted part way; `visited` holds the blocks run so far.
    pub fault: Option<String>,
}

/// Blocks reached by an untargeted run from the symbolic entry state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub visited: Vec<BlockId>,
    pub fault: Option<String>,
}

/// Adapter turning an [`ExplorationEngine`] into per-target requests.
pub struct PathExplorer<E: ExplorationEngine> {
    engine: E,
    channel: InputChannel,
}

impl<E: ExplorationEngine> PathExplorer<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            channel: InputChannel::Stdin,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Entry state with a symbolic input channel.
    pub fn initial_state(&mut self) -> Result<E::State, EngineError> {
        self.engine.create_initial_state(None)
    }

    /// Search from `start` for a path to `target` and extract its input.
    pub fn explore(
        &mut self,
        start: &E::State,
        target: BlockId,
        step_budget: u64,
    ) -> ExplorationResult {
        match self.try_explore(start, target, step_budget) {
            Ok(result) => result,
            Err(e) => ExplorationResult::Error(e.to_string()),
        }
    }

    fn try_explore(
        &mut self,
        start: &E::State,
        target: BlockId,
        step_budget: u64,
    ) -> Result<ExplorationResult, EngineError> {
        let search = self
            .engine
            .explore_path(start.clone(), Some(target), step_budget)?;
        if let Some(reason) = search.fault {
            return Ok(ExplorationResult::Error(reason));
        }

        let Some(state) = search.found else {
            debug!(
                "No path to {} after {} steps{}",
                target,
                search.steps,
                if search.exhausted { " (budget exhausted)" } else { "" }
            );
            return Ok(ExplorationResult::NotFound {
                budget_exhausted: search.exhausted,
            });
        };

        let input = match self.engine.concretize(&state, self.channel)? {
            Concretized::Bytes(bytes) => Some(bytes),
            Concretized::NoChannel => None,
        };
        debug!("Path to {} found in {} steps", target, search.steps);
        Ok(ExplorationResult::Found(TestCase::new(target, input)))
    }

    /// Re-execute a test case from the entry state with no target,
    /// collecting every block it reaches.
    pub fn replay(
        &mut self,
        case: &TestCase,
        step_budget: u64,
    ) -> Result<ReplayOutcome, EngineError> {
        let state = self.engine.create_initial_state(case.input.as_deref())?;
        let search = self.engine.explore_path(state, None, step_budget)?;
        Ok(ReplayOutcome {
            target_reached: search.visited.contains(&case.target),
            visited: search.visited,
            exhausted: search.exhausted,
            fault: search.fault,
        })
    }

    /// Untargeted exploration from the symbolic entry state.
    pub fn sweep(&mut self, step_budget: u64) -> Result<SweepOutcome, EngineError> {
        let state = self.engine.create_initial_state(None)?;
        let search = self.engine.explore_path(state, None, step_budget)?;
        Ok(SweepOutcome {
            visited: search.visited,
            fault: search.fault,
        })
    }
}
