//! Collaborators for coverage-guided block exploration.
//!
//! The exploration controller in `symcov-explore` never looks inside a
//! binary or an execution state. It talks to three narrow interfaces
//! defined here:
//!
//! - [`CfgRecovery`]: binary → control-flow graph and block universe
//! - [`ExplorationEngine`]: opaque states, bounded path search, input
//!   concretization
//! - [`Visualizer`]: coverage over a graph → file
//!
//! # Backends
//!
//! - [`model`]: a synthetic program model (JSON control-flow graph with
//!   byte-guarded edges) implementing both recovery and exploration. Used
//!   by the CLI and by tests as a small, fully deterministic engine.
//! - [`dot`]: Graphviz DOT rendering of covered/uncovered blocks.
//!
//! # Module Structure
//!
//! - [`block`]: `BlockId` and `BlockUniverse`
//! - [`binary`]: loaded binaries and their content identity
//! - [`engine`]: collaborator traits and their data types

pub mod binary;
pub mod block;
pub mod dot;
pub mod engine;
pub mod model;

pub use binary::{BinaryIdentity, BinaryImage};
pub use block::{BlockId, BlockUniverse, ParseBlockIdError};
pub use dot::DotRenderer;
pub use engine::{
    CfgRecovery, Concretized, ControlFlow, EngineError, ExplorationEngine, FunctionGraph,
    InputChannel, PathSearch, RecoveryOptions, Visualizer, PROGRAM_SCOPE,
};
pub use model::{ModelEngine, ModelRecovery, ModelState, ProgramModel};
