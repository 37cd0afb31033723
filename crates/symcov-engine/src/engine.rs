//! Collaborator interfaces consumed by the exploration controller.
//!
//! Three narrow seams:
//!
//! - [`CfgRecovery`] turns a binary into a [`ControlFlow`] (blocks, edges,
//!   per-function sub-graphs).
//! - [`ExplorationEngine`] is a stateful black box handing out opaque
//!   execution states, searching paths and concretizing inputs.
//! - [`Visualizer`] renders coverage over a control-flow graph to a file.
//!
//! Every operation is bounded and returns a `Result`; nothing here is
//! allowed to panic on engine-side failures.

use crate::binary::BinaryImage;
use crate::block::{BlockId, BlockUniverse};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

/// Scope label used for the whole-program universe.
pub const PROGRAM_SCOPE: &str = "<program>";

/// Errors raised by an engine collaborator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Program model error: {0}")]
    Model(String),

    #[error("Unsupported state: {0}")]
    Unsupported(String),

    #[error("Input concretization failed at {block}: {reason}")]
    Concretize { block: BlockId, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Options passed to CFG recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOptions {
    pub resolve_indirect_jumps: bool,
    pub normalize: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            resolve_indirect_jumps: true,
            normalize: true,
        }
    }
}

/// Control-flow graph of a single function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionGraph {
    pub name: String,
    pub entry: BlockId,
    pub blocks: BTreeSet<BlockId>,
    pub edges: BTreeSet<(BlockId, BlockId)>,
}

/// Result of CFG recovery over a whole binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlow {
    pub entry: BlockId,
    pub blocks: BTreeSet<BlockId>,
    pub edges: BTreeSet<(BlockId, BlockId)>,
    pub functions: BTreeMap<String, FunctionGraph>,
}

impl ControlFlow {
    /// Universe covering every recovered block.
    pub fn universe(&self) -> BlockUniverse {
        BlockUniverse::new(PROGRAM_SCOPE, self.blocks.iter().copied())
    }

    /// Universe restricted to one function, if the function is known.
    pub fn function_universe(&self, name: &str) -> Option<BlockUniverse> {
        self.functions
            .get(name)
            .map(|f| BlockUniverse::new(f.name.clone(), f.blocks.iter().copied()))
    }

    /// Edges whose endpoints both lie in `universe`.
    pub fn edges_within<'a>(
        &'a self,
        universe: &'a BlockUniverse,
    ) -> impl Iterator<Item = (BlockId, BlockId)> + 'a {
        self.edges
            .iter()
            .copied()
            .filter(move |(src, dst)| universe.contains(*src) && universe.contains(*dst))
    }
}

/// Channel through which a program consumes external input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChannel {
    Stdin,
}

/// Outcome of concretizing a state's input channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Concretized {
    /// Concrete bytes satisfying the state's path constraints.
    Bytes(Vec<u8>),
    /// The program has no such channel; the path needs no external input.
    NoChannel,
}

/// Result of one bounded path search.
#[derive(Debug, Clone)]
pub struct PathSearch<S> {
    /// State positioned at the target, when one was reached.
    pub found: Option<S>,
    /// Every block occurrence reached by the search, in execution order.
    pub visited: Vec<BlockId>,
    /// Engine steps consumed.
    pub steps: u64,
    /// The step budget ran out before the search completed.
    pub exhausted: bool,
    /// The engine hit a state it cannot execute and stopped there;
    /// `visited` still holds everything reached before it.
    pub fault: Option<String>,
}

/// Recovers a control-flow graph from a binary.
pub trait CfgRecovery {
    fn recover_control_flow(
        &self,
        binary: &BinaryImage,
        options: &RecoveryOptions,
    ) -> Result<ControlFlow, EngineError>;
}

/// Stateful symbolic/concolic execution engine.
///
/// States are opaque to callers; they are only ever handed back to the
/// engine that produced them.
pub trait ExplorationEngine {
    type State: Clone;

    /// Entry state of the program. `Some(input)` pins the input channel to
    /// concrete bytes; `None` leaves it symbolic.
    fn create_initial_state(&mut self, input: Option<&[u8]>) -> Result<Self::State, EngineError>;

    /// Search from `state` for a path reaching `target`, doing at most
    /// `budget` steps. A `None` target explores every path until the
    /// program terminates or the budget runs out. Faults met during the
    /// search are reported in [`PathSearch::fault`]; `Err` is for failures
    /// that leave no trace at all.
    fn explore_path(
        &mut self,
        state: Self::State,
        target: Option<BlockId>,
        budget: u64,
    ) -> Result<PathSearch<Self::State>, EngineError>;

    /// Solve the state's constraints for concrete channel contents.
    fn concretize(
        &mut self,
        state: &Self::State,
        channel: InputChannel,
    ) -> Result<Concretized, EngineError>;
}

/// Renders coverage over a control-flow graph into a file.
pub trait Visualizer {
    fn render(
        &self,
        flow: &ControlFlow,
        universe: &BlockUniverse,
        observed: &BTreeSet<BlockId>,
        output: &Path,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_flow() -> ControlFlow {
        let blocks: BTreeSet<_> = [0x100, 0x104, 0x108, 0x200].map(BlockId).into();
        let edges: BTreeSet<_> = [
            (BlockId(0x100), BlockId(0x104)),
            (BlockId(0x100), BlockId(0x108)),
            (BlockId(0x108), BlockId(0x200)),
        ]
        .into();
        let mut functions = BTreeMap::new();
        functions.insert(
            "main".to_string(),
            FunctionGraph {
                name: "main".to_string(),
                entry: BlockId(0x100),
                blocks: [0x100, 0x104, 0x108].map(BlockId).into(),
                edges: [
                    (BlockId(0x100), BlockId(0x104)),
                    (BlockId(0x100), BlockId(0x108)),
                ]
                .into(),
            },
        );
        ControlFlow {
            entry: BlockId(0x100),
            blocks,
            edges,
            functions,
        }
    }

    #[test]
    fn test_program_universe() {
        let flow = sample_flow();
        let universe = flow.universe();
        assert_eq!(universe.scope(), PROGRAM_SCOPE);
        assert_eq!(universe.len(), 4);
    }

    #[test]
    fn test_function_universe() {
        let flow = sample_flow();
        let main = flow.function_universe("main").unwrap();
        assert_eq!(main.scope(), "main");
        assert_eq!(main.len(), 3);
        assert!(!main.contains(BlockId(0x200)));
        assert!(flow.function_universe("missing").is_none());
    }

    #[test]
    fn test_edges_within_scope() {
        let flow = sample_flow();
        let main = flow.function_universe("main").unwrap();
        let edges: Vec<_> = flow.edges_within(&main).collect();
        assert_eq!(edges.len(), 2);
        assert!(!edges.contains(&(BlockId(0x108), BlockId(0x200))));
    }

    #[test]
    fn test_recovery_options_default() {
        let options = RecoveryOptions::default();
        assert!(options.resolve_indirect_jumps);
        assert!(options.normalize);
    }
}
