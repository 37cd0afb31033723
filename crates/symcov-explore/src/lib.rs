//! Coverage-guided block exploration.
//!
//! This crate drives automated test generation for a binary: it tracks
//! which basic blocks have been observed, picks unreached blocks as
//! targets, asks an exploration engine for a path to each one, turns found
//! paths into concrete inputs and replays them to fold their full coverage
//! back into the tracker.
//!
//! # Architecture
//!
//! ```text
//! 1. Recover the control-flow graph → bind a block universe (program or function)
//! 2. Optional bootstrap: one untargeted run from the entry state
//! 3. Select up to N uncovered blocks as targets
//! 4. For each target: bounded path search → concretize input → TestCase
//! 5. Replay each TestCase from the entry state, recording every block it reaches
//! 6. Summarize, save coverage state, repeat until a budget runs out
//!    or nothing is left uncovered
//! ```
//!
//! The engine is reached only through [`symcov_engine::ExplorationEngine`],
//! so everything here can be driven by a scripted fake in tests.
//!
//! # Example Usage
//!
//! ```no_run
//! use symcov_engine::{BinaryImage, CfgRecovery, ModelEngine, ModelRecovery, RecoveryOptions};
//! use symcov_explore::controller::{Controller, ControllerConfig};
//! use symcov_explore::report::format_exploration_report;
//! use symcov_explore::session::CoverageSession;
//!
//! let binary = BinaryImage::load("demos/check_input.json").unwrap();
//! let flow = ModelRecovery
//!     .recover_control_flow(&binary, &RecoveryOptions::default())
//!     .unwrap();
//!
//! let mut session = CoverageSession::new(binary.identity().clone());
//! session.bind_universe(flow.universe());
//!
//! let engine = ModelEngine::from_binary(&binary).unwrap();
//! let mut controller = Controller::new(engine, ControllerConfig::default()).unwrap();
//! let report = controller.run(&mut session).unwrap();
//!
//! println!("{}", format_exploration_report(&report));
//! ```
//!
//! # Module Structure
//!
//! - [`coverage`]: per-block hit counts
//! - [`selector`]: deterministic choice of the next targets
//! - [`explorer`]: "find a path to block B" over an exploration engine
//! - [`testcase`]: generated inputs
//! - [`corpus`]: test cases with their replay outcomes
//! - [`session`]: tracker, universe and binary identity owned together
//! - [`controller`]: the round state machine
//! - [`checkpoint`]: versioned coverage state files
//! - [`report`]: coverage and exploration reports
//!
//! # Determinism
//!
//! Given the same engine and state, a run is reproducible: target selection
//! breaks ties by ascending block address and all state uses `BTreeMap`/
//! `BTreeSet`.

pub mod checkpoint;
pub mod controller;
pub mod corpus;
pub mod coverage;
pub mod explorer;
pub mod report;
pub mod selector;
pub mod session;
pub mod testcase;

// Re-export main types for convenience
pub use checkpoint::{CheckpointProgress, CoverageCheckpoint, PersistError};
pub use controller::{
    BootstrapReport, Controller, ControllerConfig, ExplorationReport, ExploreError, Phase,
    RoundReport, StopReason, TargetOutcome, TargetReport,
};
pub use corpus::{Corpus, CorpusEntry, CorpusStats};
pub use coverage::CoverageTracker;
pub use explorer::{ExplorationResult, PathExplorer, ReplayOutcome, SweepOutcome};
pub use report::{summarize, CoverageReport};
pub use selector::{select_targets, AttemptHistory, SelectionPolicy, TargetSelector};
pub use session::CoverageSession;
pub use testcase::TestCase;
