//! The exploration loop: coverage-guided target search.
//!
//! One round walks the phases
//! `Idle → SelectingTargets → Exploring(target) → Replaying(case) → … →
//! Reporting → Idle`. Every target is handled on its own: an engine fault or
//! an exhausted step budget is logged, counted in the [`RoundReport`] and
//! skipped. A found path is concretized into a [`TestCase`], which is then
//! replayed from the entry state with no target so that every block the
//! concrete run reaches lands in the tracker.
//!
//! [`Controller::run`] repeats rounds until the round limit, the test case
//! limit or the time budget is used up, or until no uncovered target is
//! left. The time budget is only checked between targets. An engine that
//! cannot even produce an entry state ends the run with
//! [`StopReason::EngineFailure`]; what earlier rounds found is still
//! reported and written out.

use crate::checkpoint::PersistError;
use crate::corpus::{Corpus, CorpusEntry};
use crate::explorer::{ExplorationResult, PathExplorer};
use crate::report::{CoverageReport, DEFAULT_SAMPLE_UNCOVERED, DEFAULT_TOP_HIT};
use crate::selector::{AttemptHistory, SelectionPolicy, TargetSelector};
use crate::session::CoverageSession;
use crate::testcase::TestCase;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use symcov_engine::{BlockId, EngineError, ExplorationEngine};
use thiserror::Error;

/// Errors from the exploration controller.
#[derive(Error, Debug)]
pub enum ExploreError {
    #[error("No block universe bound: recover a control-flow graph first")]
    NoUniverseBound,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Coverage state error: {0}")]
    Persist(#[from] PersistError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for an exploration session.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Max rounds per [`Controller::run`].
    pub max_rounds: u64,
    /// Max targets selected per round.
    pub cases_per_round: usize,
    /// Max test cases generated per [`Controller::run`].
    pub max_total_cases: usize,
    /// Engine steps allowed per target search.
    pub step_budget: u64,
    /// Engine steps allowed per replay.
    pub replay_budget: u64,
    /// Steps for the untargeted pass before the first round; `None` skips it.
    pub bootstrap_budget: Option<u64>,
    pub policy: SelectionPolicy,
    /// Wall-clock budget per run, checked between targets.
    pub time_budget: Option<Duration>,
    /// Coverage state file, saved after every round.
    pub state_path: Option<PathBuf>,
    /// Directory receiving the generated test cases.
    pub output_dir: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            cases_per_round: 10,
            max_total_cases: 100,
            step_budget: 1000,
            replay_budget: 10_000,
            bootstrap_budget: Some(1000),
            policy: SelectionPolicy::Ascending,
            time_budget: None,
            state_path: None,
            output_dir: None,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ExploreError> {
        if self.cases_per_round == 0 {
            return Err(ExploreError::Config(
                "cases_per_round must be at least 1".to_string(),
            ));
        }
        if self.step_budget == 0 || self.replay_budget == 0 {
            return Err(ExploreError::Config(
                "step and replay budgets must be at least 1".to_string(),
            ));
        }
        if self.bootstrap_budget == Some(0) {
            return Err(ExploreError::Config(
                "bootstrap budget must be at least 1 (use None to skip)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the controller is in the round state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SelectingTargets,
    Exploring(BlockId),
    /// Replaying the test case with this ID.
    Replaying(u64),
    Reporting,
    Done,
}

/// What happened to one selected target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// A path was found and the generated case replayed.
    Found {
        case_id: u64,
        /// The replay itself passed through the target.
        reached_on_replay: bool,
        /// Blocks first observed by the replay.
        new_blocks: usize,
    },
    /// A path was found but replaying its case failed. Blocks the replay
    /// reached before failing are still recorded.
    ReplayFailed {
        case_id: u64,
        reason: String,
        new_blocks: usize,
    },
    NotFound { budget_exhausted: bool },
    Error { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: BlockId,
    pub outcome: TargetOutcome,
}

/// Report from a single exploration round.
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    /// Round number within the session (1-based, continues across resumes).
    pub round: u64,
    /// Selected targets in exploration order.
    pub targets: Vec<TargetReport>,
    /// Blocks first observed during this round.
    pub new_blocks: BTreeSet<BlockId>,
    /// Newly observed blocks outside the bound universe.
    pub foreign: BTreeSet<BlockId>,
    /// The time budget ran out before every target was explored.
    pub interrupted: bool,
    /// Engine error that ended the round before any target was explored.
    pub error: Option<String>,
}

impl RoundReport {
    /// Targets for which a path was found, whether or not replay succeeded.
    pub fn found(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| {
                matches!(
                    t.outcome,
                    TargetOutcome::Found { .. } | TargetOutcome::ReplayFailed { .. }
                )
            })
            .count()
    }

    pub fn not_found(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::NotFound { .. }))
            .count()
    }

    /// Engine errors with their reasons.
    pub fn errors(&self) -> Vec<(BlockId, &str)> {
        self.targets
            .iter()
            .filter_map(|t| match &t.outcome {
                TargetOutcome::Error { reason } => Some((t.target, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn replay_failures(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::ReplayFailed { .. }))
            .count()
    }

    /// Cases whose replay actually passed through their target.
    pub fn reached_on_replay(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| {
                matches!(
                    t.outcome,
                    TargetOutcome::Found {
                        reached_on_replay: true,
                        ..
                    }
                )
            })
            .count()
    }
}

/// Why [`Controller::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxRounds,
    MaxCases,
    TimeBudget,
    /// Target selection came back empty.
    NoTargets,
    /// The engine could not create an entry state.
    EngineFailure,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::MaxRounds => f.write_str("round limit reached"),
            StopReason::MaxCases => f.write_str("test case limit reached"),
            StopReason::TimeBudget => f.write_str("time budget exhausted"),
            StopReason::NoTargets => f.write_str("no uncovered targets left"),
            StopReason::EngineFailure => f.write_str("engine failure"),
        }
    }
}

/// Result of the untargeted pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Blocks first observed by the pass.
    pub new_blocks: BTreeSet<BlockId>,
    /// Engine error or fault that cut the pass short.
    pub error: Option<String>,
}

/// Final report from [`Controller::run`].
#[derive(Debug, Clone)]
pub struct ExplorationReport {
    pub rounds: Vec<RoundReport>,
    pub stop_reason: StopReason,
    /// Blocks first observed by the bootstrap pass.
    pub bootstrap_blocks: usize,
    pub bootstrap_error: Option<String>,
    /// Coverage before the run started.
    pub initial: CoverageReport,
    /// Coverage when the run stopped.
    pub coverage: CoverageReport,
    pub test_cases: Vec<TestCase>,
}

impl ExplorationReport {
    pub fn targets_attempted(&self) -> usize {
        self.rounds.iter().map(|r| r.targets.len()).sum()
    }

    pub fn paths_found(&self) -> usize {
        self.rounds.iter().map(RoundReport::found).sum()
    }

    pub fn not_found(&self) -> usize {
        self.rounds.iter().map(RoundReport::not_found).sum()
    }

    /// `(round, target, reason)` for every per-target engine error.
    pub fn errors(&self) -> Vec<(u64, BlockId, String)> {
        self.rounds
            .iter()
            .flat_map(|r| {
                r.errors()
                    .into_iter()
                    .map(move |(target, reason)| (r.round, target, reason.to_string()))
            })
            .collect()
    }

    /// `(round, reason)` for rounds the engine could not start.
    pub fn round_errors(&self) -> Vec<(u64, &str)> {
        self.rounds
            .iter()
            .filter_map(|r| r.error.as_deref().map(|reason| (r.round, reason)))
            .collect()
    }

    /// Every engine error: per target, per round and in the bootstrap pass.
    pub fn error_count(&self) -> usize {
        self.errors().len()
            + self.round_errors().len()
            + usize::from(self.bootstrap_error.is_some())
    }

    pub fn replay_failures(&self) -> usize {
        self.rounds.iter().map(RoundReport::replay_failures).sum()
    }

    pub fn targets_reached_on_replay(&self) -> usize {
        self.rounds.iter().map(RoundReport::reached_on_replay).sum()
    }
}

/// Drives rounds of select → explore → replay over one engine.
pub struct Controller<E: ExplorationEngine> {
    config: ControllerConfig,
    explorer: PathExplorer<E>,
    selector: TargetSelector,
    history: AttemptHistory,
    corpus: Corpus,
    phase: Phase,
    deadline: Option<Instant>,
}

impl<E: ExplorationEngine> Controller<E> {
    pub fn new(engine: E, config: ControllerConfig) -> Result<Self, ExploreError> {
        config.validate()?;
        Ok(Self {
            selector: TargetSelector::new(config.policy),
            config,
            explorer: PathExplorer::new(engine),
            history: AttemptHistory::new(),
            corpus: Corpus::new(),
            phase: Phase::Idle,
            deadline: None,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn explorer_mut(&mut self) -> &mut PathExplorer<E> {
        &mut self.explorer
    }

    /// Untargeted exploration from the entry state with a symbolic input,
    /// recording every block it reaches.
    ///
    /// Engine failures are reported in [`BootstrapReport::error`]; only a
    /// missing universe is an `Err`.
    pub fn bootstrap(&mut self, session: &mut CoverageSession) -> Result<BootstrapReport, ExploreError> {
        let budget = self.config.bootstrap_budget.unwrap_or(self.config.step_budget);
        session.universe()?;

        info!("Bootstrap: untargeted exploration ({} steps)...", budget);
        let (visited, error) = match self.explorer.sweep(budget) {
            Ok(sweep) => (sweep.visited, sweep.fault),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        if let Some(ref reason) = error {
            warn!("Bootstrap failed: {}", reason);
        }

        let (universe, tracker) = session.bound_mut()?;
        let new_blocks = tracker.record_trace(&visited);
        for block in new_blocks.iter().filter(|b| !universe.contains(**b)) {
            warn!("Bootstrap reached {} outside scope '{}'", block, universe.scope());
        }
        info!(
            "Bootstrap: {} block visits, {} new blocks",
            visited.len(),
            new_blocks.len()
        );
        Ok(BootstrapReport { new_blocks, error })
    }

    /// Run a single round against `session`.
    ///
    /// An empty selection ends in [`Phase::Done`] and does not count as a
    /// round. Neither does a round whose entry state cannot be created: it
    /// comes back with [`RoundReport::error`] set.
    pub fn run_round(&mut self, session: &mut CoverageSession) -> Result<RoundReport, ExploreError> {
        self.phase = Phase::SelectingTargets;
        self.corpus.resume_from(session.progress().test_cases);

        let round = session.progress().rounds_completed + 1;
        let remaining_cases = self
            .config
            .max_total_cases
            .saturating_sub(self.corpus.len());
        let max_count = self.config.cases_per_round.min(remaining_cases);
        let targets = self.selector.select(
            session.universe()?,
            session.tracker(),
            &self.history,
            max_count,
        );

        let mut report = RoundReport {
            round,
            ..RoundReport::default()
        };
        if targets.is_empty() {
            info!("Round {}: no targets selected", round);
            self.phase = Phase::Done;
            return Ok(report);
        }
        debug!("Round {}: selected {} targets", round, targets.len());

        let start = match self.explorer.initial_state() {
            Ok(start) => start,
            Err(e) => {
                warn!("Round {}: creating the entry state failed: {}", round, e);
                report.error = Some(e.to_string());
                self.phase = Phase::Idle;
                return Ok(report);
            }
        };

        for (i, target) in targets.into_iter().enumerate() {
            if i > 0 && self.out_of_time() {
                info!("Round {}: time budget exhausted before {}", round, target);
                report.interrupted = true;
                break;
            }

            self.phase = Phase::Exploring(target);
            self.history.record(target);

            let outcome = match self.explorer.explore(&start, target, self.config.step_budget) {
                ExplorationResult::Found(case) => self.replay_case(session, &mut report, case)?,
                ExplorationResult::NotFound { budget_exhausted } => {
                    debug!(
                        "No path to {}{}",
                        target,
                        if budget_exhausted { " within step budget" } else { "" }
                    );
                    TargetOutcome::NotFound { budget_exhausted }
                }
                ExplorationResult::Error(reason) => {
                    warn!("Exploring {} failed: {}", target, reason);
                    TargetOutcome::Error { reason }
                }
            };
            report.targets.push(TargetReport { target, outcome });
        }

        self.phase = Phase::Reporting;
        let progress = session.progress_mut();
        progress.rounds_completed = round;
        progress.test_cases = self.corpus.ids_assigned();

        let coverage = session.summarize(0, 0)?;
        info!(
            "Round {}: {} targets, {} found, {} not found, {} errors, {} new blocks, coverage {:.2}%",
            round,
            report.targets.len(),
            report.found(),
            report.not_found(),
            report.errors().len(),
            report.new_blocks.len(),
            coverage.percentage
        );

        if let Some(path) = &self.config.state_path {
            session.save(path)?;
        }

        self.phase = Phase::Idle;
        Ok(report)
    }

    /// Replay a freshly found case and fold its visits into the tracker.
    fn replay_case(
        &mut self,
        session: &mut CoverageSession,
        report: &mut RoundReport,
        mut case: TestCase,
    ) -> Result<TargetOutcome, ExploreError> {
        self.corpus.assign_id(&mut case);
        let case_id = case.id;
        debug!("Found {}", case);

        self.phase = Phase::Replaying(case_id);
        let (outcome, entry) = match self.explorer.replay(&case, self.config.replay_budget) {
            Ok(replay) => {
                let (universe, tracker) = session.bound_mut()?;
                let new_blocks = tracker.record_trace(&replay.visited);
                for block in new_blocks.iter().filter(|b| !universe.contains(**b)) {
                    warn!(
                        "Replay of case #{} reached {} outside scope '{}'",
                        case_id,
                        block,
                        universe.scope()
                    );
                    report.foreign.insert(*block);
                }
                if !replay.target_reached {
                    debug!("Replay of case #{} did not reach {}", case_id, case.target);
                }
                report.new_blocks.extend(new_blocks.iter().copied());

                let outcome = match replay.fault {
                    Some(reason) => {
                        warn!("Replay of case #{} faulted: {}", case_id, reason);
                        TargetOutcome::ReplayFailed {
                            case_id,
                            reason,
                            new_blocks: new_blocks.len(),
                        }
                    }
                    None => TargetOutcome::Found {
                        case_id,
                        reached_on_replay: replay.target_reached,
                        new_blocks: new_blocks.len(),
                    },
                };
                (
                    outcome,
                    CorpusEntry {
                        case,
                        round: report.round,
                        target_reached: replay.target_reached,
                        new_blocks: new_blocks.into_iter().collect(),
                    },
                )
            }
            Err(e) => {
                warn!("Replaying case #{} failed: {}", case_id, e);
                (
                    TargetOutcome::ReplayFailed {
                        case_id,
                        reason: e.to_string(),
                        new_blocks: 0,
                    },
                    CorpusEntry {
                        case,
                        round: report.round,
                        target_reached: false,
                        new_blocks: Vec::new(),
                    },
                )
            }
        };
        self.corpus.push(entry);
        Ok(outcome)
    }

    /// Bootstrap, then run rounds until a stop condition holds.
    pub fn run(&mut self, session: &mut CoverageSession) -> Result<ExplorationReport, ExploreError> {
        session.universe()?;
        self.deadline = self.config.time_budget.map(|budget| Instant::now() + budget);

        let initial = session.summarize(DEFAULT_TOP_HIT, DEFAULT_SAMPLE_UNCOVERED)?;
        info!(
            "Starting exploration of '{}': {} blocks, {:.2}% covered, up to {} rounds of {} targets",
            initial.scope,
            initial.total,
            initial.percentage,
            self.config.max_rounds,
            self.config.cases_per_round
        );

        let bootstrap = match self.config.bootstrap_budget {
            Some(_) => self.bootstrap(session)?,
            None => BootstrapReport::default(),
        };

        let mut rounds = Vec::new();
        let stop_reason = loop {
            if rounds.len() as u64 >= self.config.max_rounds {
                break StopReason::MaxRounds;
            }
            if self.corpus.len() >= self.config.max_total_cases {
                break StopReason::MaxCases;
            }
            if self.out_of_time() {
                break StopReason::TimeBudget;
            }

            let report = self.run_round(session)?;
            if self.phase == Phase::Done {
                break StopReason::NoTargets;
            }
            let failed = report.error.is_some();
            let interrupted = report.interrupted;
            rounds.push(report);
            if failed {
                break StopReason::EngineFailure;
            }
            if interrupted {
                break StopReason::TimeBudget;
            }
        };
        self.phase = Phase::Done;

        if let Some(dir) = &self.config.output_dir {
            self.corpus.write_to_dir(dir)?;
            info!(
                "Wrote {} test cases to {}",
                self.corpus.len(),
                dir.display()
            );
        }

        let coverage = session.summarize(DEFAULT_TOP_HIT, DEFAULT_SAMPLE_UNCOVERED)?;
        info!(
            "Exploration stopped ({}): coverage improved from {:.2}% to {:.2}%",
            stop_reason, initial.percentage, coverage.percentage
        );

        Ok(ExplorationReport {
            rounds,
            stop_reason,
            bootstrap_blocks: bootstrap.new_blocks.len(),
            bootstrap_error: bootstrap.error,
            initial,
            coverage,
            test_cases: self.corpus.cases().cloned().collect(),
        })
    }

    fn out_of_time(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::load_checkpoint;
    use std::collections::BTreeMap;
    use symcov_engine::{BinaryIdentity, BlockUniverse, Concretized, InputChannel, PathSearch};

    /// How the fake engine answers a search for one target.
    #[derive(Clone)]
    enum Script {
        Found(Vec<u8>),
        NoChannel,
        Exhausted,
        Fault(&'static str),
        ConcretizeFails,
    }

    #[derive(Clone, Debug)]
    struct FakeState {
        input: Option<Vec<u8>>,
        at: Option<BlockId>,
    }

    /// Engine answering from fixed tables instead of executing anything.
    #[derive(Default)]
    struct ScriptedEngine {
        searches: BTreeMap<BlockId, Script>,
        /// Blocks visited by a full run and the fault that ended it, keyed
        /// by concrete input (`None` = symbolic entry state).
        runs: BTreeMap<Option<Vec<u8>>, (Vec<BlockId>, Option<&'static str>)>,
        /// Entry states handed out before `create_initial_state` fails.
        initial_state_limit: Option<usize>,
        initial_states: usize,
        /// Wall-clock cost of every targeted search.
        search_delay: Option<Duration>,
        explored: Vec<BlockId>,
    }

    impl ScriptedEngine {
        fn search(mut self, target: u64, script: Script) -> Self {
            self.searches.insert(BlockId(target), script);
            self
        }

        fn run(mut self, input: Option<&[u8]>, visited: &[u64]) -> Self {
            self.runs.insert(
                input.map(|i| i.to_vec()),
                (visited.iter().copied().map(BlockId).collect(), None),
            );
            self
        }

        fn faulting_run(mut self, input: Option<&[u8]>, visited: &[u64], fault: &'static str) -> Self {
            self.runs.insert(
                input.map(|i| i.to_vec()),
                (visited.iter().copied().map(BlockId).collect(), Some(fault)),
            );
            self
        }

        fn initial_states(mut self, limit: usize) -> Self {
            self.initial_state_limit = Some(limit);
            self
        }

        fn slow_searches(mut self, delay: Duration) -> Self {
            self.search_delay = Some(delay);
            self
        }
    }

    impl ExplorationEngine for ScriptedEngine {
        type State = FakeState;

        fn create_initial_state(&mut self, input: Option<&[u8]>) -> Result<FakeState, EngineError> {
            if self
                .initial_state_limit
                .is_some_and(|limit| self.initial_states >= limit)
            {
                return Err(EngineError::Unsupported("loader crashed".to_string()));
            }
            self.initial_states += 1;
            Ok(FakeState {
                input: input.map(|i| i.to_vec()),
                at: None,
            })
        }

        fn explore_path(
            &mut self,
            state: FakeState,
            target: Option<BlockId>,
            budget: u64,
        ) -> Result<PathSearch<FakeState>, EngineError> {
            let Some(target) = target else {
                let (visited, fault) = self
                    .runs
                    .get(&state.input)
                    .cloned()
                    .ok_or_else(|| EngineError::Model("unscripted run".to_string()))?;
                return Ok(PathSearch {
                    found: None,
                    steps: visited.len() as u64,
                    visited,
                    exhausted: false,
                    fault: fault.map(str::to_string),
                });
            };

            self.explored.push(target);
            if let Some(delay) = self.search_delay {
                std::thread::sleep(delay);
            }
            match self.searches.get(&target) {
                Some(Script::Exhausted) | None => Ok(PathSearch {
                    found: None,
                    visited: Vec::new(),
                    steps: budget,
                    exhausted: true,
                    fault: None,
                }),
                Some(Script::Fault(reason)) => Err(EngineError::Unsupported(reason.to_string())),
                Some(_) => Ok(PathSearch {
                    found: Some(FakeState {
                        input: None,
                        at: Some(target),
                    }),
                    visited: vec![target],
                    steps: 1,
                    exhausted: false,
                    fault: None,
                }),
            }
        }

        fn concretize(
            &mut self,
            state: &FakeState,
            _channel: InputChannel,
        ) -> Result<Concretized, EngineError> {
            let block = state.at.unwrap_or(BlockId(0));
            match self.searches.get(&block) {
                Some(Script::Found(bytes)) => Ok(Concretized::Bytes(bytes.clone())),
                Some(Script::NoChannel) => Ok(Concretized::NoChannel),
                _ => Err(EngineError::Concretize {
                    block,
                    reason: "unsatisfiable".to_string(),
                }),
            }
        }
    }

    fn session() -> CoverageSession {
        let mut session = CoverageSession::new(BinaryIdentity::of_bytes(b"fake"));
        session.bind_universe(BlockUniverse::new("main", [0x100, 0x104, 0x108].map(BlockId)));
        session
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            bootstrap_budget: None,
            ..ControllerConfig::default()
        }
    }

    fn hits(session: &CoverageSession, addr: u64) -> u64 {
        session.tracker().hits(BlockId(addr))
    }

    #[test]
    fn test_found_case_replay_updates_coverage() {
        // The symbolic path goes straight to 0x108; the concrete replay
        // also passes through the entry block.
        let engine = ScriptedEngine::default()
            .search(0x108, Script::Found(b"\x41\x00".to_vec()))
            .run(Some(b"\x41\x00"), &[0x100, 0x108]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(report.targets.len(), 3);
        assert_eq!(report.found(), 1);
        assert_eq!(report.not_found(), 2);
        assert_eq!(
            session.tracker().uncovered(session.universe().unwrap()),
            BTreeSet::from([BlockId(0x104)])
        );
        assert_eq!(hits(&session, 0x100), 1);
        assert_eq!(hits(&session, 0x108), 1);
        assert_eq!(report.new_blocks, BTreeSet::from([BlockId(0x100), BlockId(0x108)]));

        let case = &controller.corpus().entries()[0].case;
        assert_eq!(case.target, BlockId(0x108));
        assert_eq!(case.input.as_deref(), Some(&b"\x41\x00"[..]));
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[test]
    fn test_budget_exceeded_is_not_found_and_round_continues() {
        let engine = ScriptedEngine::default()
            .search(0x100, Script::Exhausted)
            .search(0x104, Script::Found(vec![0]))
            .run(Some(&[0]), &[0x100, 0x104]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(
            report.targets[0],
            TargetReport {
                target: BlockId(0x100),
                outcome: TargetOutcome::NotFound {
                    budget_exhausted: true
                },
            }
        );
        assert!(matches!(
            report.targets[1].outcome,
            TargetOutcome::Found { case_id: 0, .. }
        ));
        // 0x108 has no script: also exhausted.
        assert_eq!(report.not_found(), 2);
        assert_eq!(report.errors().len(), 0);
    }

    #[test]
    fn test_engine_errors_are_counted_and_skipped() {
        let engine = ScriptedEngine::default()
            .search(0x100, Script::Fault("symbolic jump target"))
            .search(0x104, Script::ConcretizeFails)
            .search(0x108, Script::Found(b"B".to_vec()))
            .run(Some(b"B"), &[0x100, 0x108]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        let errors = report.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].0, BlockId(0x100));
        assert!(errors[0].1.contains("symbolic jump target"));
        assert_eq!(errors[1].0, BlockId(0x104));
        assert!(errors[1].1.contains("unsatisfiable"));
        assert_eq!(report.found(), 1);
        assert!(session.tracker().is_covered(BlockId(0x108)));
    }

    #[test]
    fn test_no_retries_within_a_round() {
        let mut session = session();
        let mut controller = Controller::new(ScriptedEngine::default(), config()).unwrap();

        controller.run_round(&mut session).unwrap();

        assert_eq!(
            controller.explorer_mut().engine().explored,
            vec![BlockId(0x100), BlockId(0x104), BlockId(0x108)]
        );
    }

    #[test]
    fn test_found_and_reached_are_separate() {
        // Replay takes the other branch and never reaches 0x108.
        let engine = ScriptedEngine::default()
            .search(0x108, Script::Found(b"A".to_vec()))
            .run(Some(b"A"), &[0x100, 0x104]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(report.found(), 1);
        assert_eq!(report.reached_on_replay(), 0);
        assert!(!session.tracker().is_covered(BlockId(0x108)));
        assert!(session.tracker().is_covered(BlockId(0x104)));
        assert!(!controller.corpus().entries()[0].target_reached);
    }

    #[test]
    fn test_replay_failure_is_counted() {
        // No run scripted for this input, so the replay errors out.
        let engine = ScriptedEngine::default().search(0x104, Script::Found(b"C".to_vec()));
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(report.replay_failures(), 1);
        assert_eq!(report.found(), 1);
        assert!(session.tracker().is_empty());
        assert_eq!(controller.corpus().len(), 1);
    }

    #[test]
    fn test_replay_fault_keeps_blocks_reached() {
        let engine = ScriptedEngine::default()
            .search(0x104, Script::Found(vec![2]))
            .faulting_run(Some(&[2]), &[0x100], "unmodelled syscall");
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(
            report.targets[1].outcome,
            TargetOutcome::ReplayFailed {
                case_id: 0,
                reason: "unmodelled syscall".to_string(),
                new_blocks: 1,
            }
        );
        assert_eq!(report.replay_failures(), 1);
        assert!(session.tracker().is_covered(BlockId(0x100)));
        assert!(!session.tracker().is_covered(BlockId(0x104)));
        assert_eq!(controller.corpus().entries()[0].new_blocks, vec![BlockId(0x100)]);
    }

    #[test]
    fn test_no_input_channel_case() {
        let engine = ScriptedEngine::default()
            .search(0x100, Script::NoChannel)
            .run(None, &[0x100]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(report.reached_on_replay(), 1);
        assert_eq!(controller.corpus().entries()[0].case.input, None);
    }

    #[test]
    fn test_foreign_blocks_are_flagged_not_dropped() {
        let engine = ScriptedEngine::default()
            .search(0x100, Script::Found(vec![1]))
            .run(Some(&[1]), &[0x100, 0x9000]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(report.foreign, BTreeSet::from([BlockId(0x9000)]));
        assert!(session.tracker().is_covered(BlockId(0x9000)));
        assert_eq!(session.summarize(10, 10).unwrap().covered_count, 1);
    }

    #[test]
    fn test_unbound_session() {
        let mut session = CoverageSession::new(BinaryIdentity::of_bytes(b"fake"));
        let mut controller = Controller::new(ScriptedEngine::default(), config()).unwrap();

        assert!(matches!(
            controller.run_round(&mut session),
            Err(ExploreError::NoUniverseBound)
        ));
        assert!(matches!(
            controller.run(&mut session),
            Err(ExploreError::NoUniverseBound)
        ));
        assert!(matches!(
            controller.bootstrap(&mut session),
            Err(ExploreError::NoUniverseBound)
        ));
    }

    #[test]
    fn test_run_stops_when_fully_covered() {
        let engine = ScriptedEngine::default()
            .search(0x100, Script::Found(vec![1]))
            .run(Some(&[1]), &[0x100, 0x104, 0x108]);
        let mut session = session();
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::NoTargets);
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.initial.percentage, 0.0);
        assert_eq!(report.coverage.percentage, 100.0);
        assert_eq!(controller.phase(), Phase::Done);
        assert_eq!(session.progress().rounds_completed, 1);
    }

    #[test]
    fn test_run_stops_at_round_limit() {
        let mut session = session();
        let mut controller = Controller::new(
            ScriptedEngine::default(),
            ControllerConfig {
                max_rounds: 3,
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::MaxRounds);
        assert_eq!(report.rounds.len(), 3);
        assert_eq!(report.not_found(), 9);
        // Unreached targets are reselected by later rounds.
        assert_eq!(controller.explorer_mut().engine().explored.len(), 9);
    }

    #[test]
    fn test_run_stops_at_case_limit() {
        let engine = ScriptedEngine::default()
            .search(0x100, Script::Found(vec![1]))
            .search(0x104, Script::Found(vec![2]))
            .run(Some(&[1]), &[0x100])
            .run(Some(&[2]), &[0x104]);
        let mut session = session();
        let mut controller = Controller::new(
            engine,
            ControllerConfig {
                max_total_cases: 1,
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::MaxCases);
        assert_eq!(report.test_cases.len(), 1);
        assert_eq!(report.targets_attempted(), 1);
        assert!(!session.tracker().is_covered(BlockId(0x104)));
    }

    #[test]
    fn test_run_stops_on_time_budget() {
        let mut session = session();
        let mut controller = Controller::new(
            ScriptedEngine::default(),
            ControllerConfig {
                time_budget: Some(Duration::ZERO),
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::TimeBudget);
        assert!(report.rounds.is_empty());
    }

    #[test]
    fn test_time_budget_interrupts_round_between_targets() {
        let engine = ScriptedEngine::default().slow_searches(Duration::from_millis(300));
        let mut session = session();
        let mut controller = Controller::new(
            engine,
            ControllerConfig {
                time_budget: Some(Duration::from_millis(200)),
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::TimeBudget);
        assert_eq!(report.rounds.len(), 1);
        let round = &report.rounds[0];
        assert!(round.interrupted);
        // The search in flight finishes; the remaining two are never started.
        assert_eq!(round.targets.len(), 1);
        assert_eq!(round.targets[0].target, BlockId(0x100));
        assert_eq!(
            controller.explorer_mut().engine().explored,
            vec![BlockId(0x100)]
        );
        assert_eq!(session.progress().rounds_completed, 1);
    }

    #[test]
    fn test_entry_state_failure_ends_run_and_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cases");

        // Round 1 uses two entry states (search and replay); round 2 gets none.
        let engine = ScriptedEngine::default()
            .search(0x100, Script::Found(vec![1]))
            .run(Some(&[1]), &[0x100])
            .initial_states(2);
        let mut session = session();
        let mut controller = Controller::new(
            engine,
            ControllerConfig {
                max_rounds: 5,
                output_dir: Some(out.clone()),
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::EngineFailure);
        assert_eq!(report.rounds.len(), 2);
        assert!(report.rounds[1].targets.is_empty());
        assert!(report.rounds[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("loader crashed")));
        assert_eq!(report.round_errors(), vec![(2, "Unsupported state: loader crashed")]);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.test_cases.len(), 1);
        assert!(out.join("case_0_100.bin").exists());
        assert_eq!(controller.phase(), Phase::Done);
        assert_eq!(session.progress().rounds_completed, 1);
    }

    #[test]
    fn test_fewest_attempts_rotates_targets() {
        let mut session = session();
        let mut controller = Controller::new(
            ScriptedEngine::default(),
            ControllerConfig {
                max_rounds: 3,
                cases_per_round: 1,
                policy: SelectionPolicy::FewestAttempts,
                ..config()
            },
        )
        .unwrap();

        controller.run(&mut session).unwrap();

        assert_eq!(
            controller.explorer_mut().engine().explored,
            vec![BlockId(0x100), BlockId(0x104), BlockId(0x108)]
        );
    }

    #[test]
    fn test_bootstrap_records_initial_coverage() {
        let engine = ScriptedEngine::default().run(None, &[0x100, 0x104, 0x100]);
        let mut session = session();
        let mut controller = Controller::new(
            engine,
            ControllerConfig {
                bootstrap_budget: Some(500),
                max_rounds: 1,
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.bootstrap_blocks, 2);
        assert_eq!(hits(&session, 0x100), 2);
        // Only 0x108 was left to target.
        assert_eq!(report.targets_attempted(), 1);
    }

    #[test]
    fn test_bootstrap_failure_does_not_abort_run() {
        // No symbolic run scripted: the sweep fails.
        let mut session = session();
        let mut controller = Controller::new(
            ScriptedEngine::default(),
            ControllerConfig {
                bootstrap_budget: Some(500),
                max_rounds: 1,
                ..config()
            },
        )
        .unwrap();

        let report = controller.run(&mut session).unwrap();
        assert_eq!(report.bootstrap_blocks, 0);
        assert!(report
            .bootstrap_error
            .as_deref()
            .is_some_and(|e| e.contains("unscripted run")));
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.rounds.len(), 1);
    }

    #[test]
    fn test_bootstrap_fault_keeps_partial_coverage() {
        let engine = ScriptedEngine::default().faulting_run(None, &[0x100, 0x104], "bad opcode");
        let mut session = session();
        let mut controller = Controller::new(
            engine,
            ControllerConfig {
                bootstrap_budget: Some(500),
                ..config()
            },
        )
        .unwrap();

        let bootstrap = controller.bootstrap(&mut session).unwrap();

        assert_eq!(
            bootstrap.new_blocks,
            BTreeSet::from([BlockId(0x100), BlockId(0x104)])
        );
        assert_eq!(bootstrap.error.as_deref(), Some("bad opcode"));
        assert!(session.tracker().is_covered(BlockId(0x104)));
    }

    #[test]
    fn test_state_and_cases_written() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let out = dir.path().join("cases");

        let engine = ScriptedEngine::default()
            .search(0x108, Script::Found(b"\x41\x00".to_vec()))
            .run(Some(b"\x41\x00"), &[0x100, 0x108]);
        let mut session = session();
        let mut controller = Controller::new(
            engine,
            ControllerConfig {
                max_rounds: 2,
                state_path: Some(state.clone()),
                output_dir: Some(out.clone()),
                ..config()
            },
        )
        .unwrap();
        controller.run(&mut session).unwrap();

        let checkpoint = load_checkpoint(&state, session.identity()).unwrap();
        assert_eq!(&checkpoint.tracker(), session.tracker());
        assert_eq!(checkpoint.progress.rounds_completed, 2);
        assert_eq!(checkpoint.progress.test_cases, 1);
        assert!(out.join("case_0_108.bin").exists());
        assert!(out.join(crate::corpus::INDEX_FILE).exists());
    }

    #[test]
    fn test_resumed_session_continues_numbering() {
        let engine = ScriptedEngine::default()
            .search(0x104, Script::Found(vec![4]))
            .run(Some(&[4]), &[0x104]);
        let mut session = session();
        session.progress_mut().rounds_completed = 5;
        session.progress_mut().test_cases = 7;
        let mut controller = Controller::new(engine, config()).unwrap();

        let report = controller.run_round(&mut session).unwrap();

        assert_eq!(report.round, 6);
        assert_eq!(controller.corpus().entries()[0].case.id, 7);
        assert_eq!(session.progress().test_cases, 8);
    }

    #[test]
    fn test_model_engine_covers_function() {
        use symcov_engine::{BinaryImage, CfgRecovery, ModelEngine, ModelRecovery, RecoveryOptions};

        let image = BinaryImage::from_bytes(
            "check_input.json",
            include_bytes!("../../../demos/check_input.json").to_vec(),
        );
        let flow = ModelRecovery
            .recover_control_flow(&image, &RecoveryOptions::default())
            .unwrap();
        let mut session = CoverageSession::new(image.identity().clone());
        session.bind_universe(flow.function_universe("check").unwrap());

        let engine = ModelEngine::from_binary(&image).unwrap();
        let mut controller = Controller::new(engine, config()).unwrap();
        let report = controller.run(&mut session).unwrap();

        assert_eq!(report.stop_reason, StopReason::NoTargets);
        assert_eq!(report.coverage.percentage, 100.0);
        assert!(report
            .test_cases
            .iter()
            .any(|c| c.target == BlockId(0x2020) && c.input.as_deref() == Some(&b"KEY"[..])));
        // Blocks of `main` reached on replay are kept but flagged.
        assert!(report.coverage.foreign.contains(&BlockId(0x1000)));
        assert_eq!(report.errors().len(), 0);
    }

    #[test]
    fn test_invalid_config() {
        let bad = ControllerConfig {
            step_budget: 0,
            ..ControllerConfig::default()
        };
        assert!(matches!(
            Controller::new(ScriptedEngine::default(), bad),
            Err(ExploreError::Config(_))
        ));
    }
}
