//! Synthetic program models: a JSON control-flow graph the engine can run.
//!
//! A model lists basic blocks and their exits. Each exit may be guarded by a
//! predicate over one byte of the program's input; an unguarded exit is
//! always taken. This is enough to drive CFG recovery, symbolic path search
//! and concrete replay without a real binary:
//!
//! ```json
//! {
//!   "entry": "0x100",
//!   "stdin": true,
//!   "functions": [{ "name": "main", "entry": "0x100" }],
//!   "blocks": [
//!     { "addr": "0x100", "function": "main", "exits": [
//!         { "to": "0x104", "when": { "op": "ne", "offset": 0, "value": 65 } },
//!         { "to": "0x108", "when": { "op": "eq", "offset": 0, "value": 65 } } ] },
//!     { "addr": "0x104", "function": "main" },
//!     { "addr": "0x108", "function": "main" }
//!   ]
//! }
//! ```
//!
//! # Execution
//!
//! With concrete input only the first exit whose guard holds is followed.
//! Bytes past the end of a concrete input read as zero. With symbolic input
//! every feasible exit forks a new state; the fork for exit `k` also carries
//! the negation of every guard before it, so a solved input takes the same
//! exit when replayed. Guards may test offsets up to [`MAX_INPUT_OFFSET`].
//!
//! The search is breadth-first over a worklist, one block per step. A block
//! the model marks unsupported ends the search with a fault, keeping the
//! blocks already visited.

use crate::binary::BinaryImage;
use crate::block::BlockId;
use crate::engine::{
    CfgRecovery, Concretized, ControlFlow, EngineError, ExplorationEngine, FunctionGraph,
    InputChannel, PathSearch, RecoveryOptions,
};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Largest input offset a guard may test.
pub const MAX_INPUT_OFFSET: usize = 64 * 1024;

/// Predicate over a single input byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Guard {
    Eq { offset: usize, value: u8 },
    Ne { offset: usize, value: u8 },
}

impl Guard {
    fn offset(&self) -> usize {
        match *self {
            Guard::Eq { offset, .. } | Guard::Ne { offset, .. } => offset,
        }
    }

    fn negated(&self) -> Guard {
        match *self {
            Guard::Eq { offset, value } => Guard::Ne { offset, value },
            Guard::Ne { offset, value } => Guard::Eq { offset, value },
        }
    }

    fn holds(&self, byte: u8) -> bool {
        match *self {
            Guard::Eq { value, .. } => byte == value,
            Guard::Ne { value, .. } => byte != value,
        }
    }
}

/// A control transfer out of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub to: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Guard>,
    /// Computed jump: only visible to CFG recovery when indirect jumps
    /// are resolved.
    #[serde(default)]
    pub indirect: bool,
}

/// One basic block of the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBlock {
    pub addr: BlockId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default)]
    pub exits: Vec<Exit>,
    /// Executing this block is an engine fault (e.g. an unmodelled syscall).
    #[serde(default)]
    pub unsupported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFunction {
    pub name: String,
    pub entry: BlockId,
}

/// A complete program model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramModel {
    pub entry: BlockId,
    /// Whether the program reads stdin. Without it there is nothing to
    /// concretize.
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub functions: Vec<ModelFunction>,
    pub blocks: Vec<ModelBlock>,
}

impl ProgramModel {
    /// Parse and validate a model from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EngineError> {
        let model: ProgramModel = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let mut seen = BTreeSet::new();
        for block in &self.blocks {
            if !seen.insert(block.addr) {
                return Err(EngineError::Model(format!(
                    "duplicate block {}",
                    block.addr
                )));
            }
        }
        if !seen.contains(&self.entry) {
            return Err(EngineError::Model(format!(
                "entry {} is not a block",
                self.entry
            )));
        }

        let names: BTreeSet<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        for function in &self.functions {
            if !seen.contains(&function.entry) {
                return Err(EngineError::Model(format!(
                    "function {} entry {} is not a block",
                    function.name, function.entry
                )));
            }
        }

        for block in &self.blocks {
            if let Some(ref name) = block.function {
                if !names.contains(name.as_str()) {
                    return Err(EngineError::Model(format!(
                        "block {} belongs to undeclared function {}",
                        block.addr, name
                    )));
                }
            }
            for exit in &block.exits {
                if !seen.contains(&exit.to) {
                    return Err(EngineError::Model(format!(
                        "block {} exits to unknown block {}",
                        block.addr, exit.to
                    )));
                }
                if let Some(guard) = exit.when {
                    if guard.offset() > MAX_INPUT_OFFSET {
                        return Err(EngineError::Model(format!(
                            "block {} tests input offset {} (max {})",
                            block.addr,
                            guard.offset(),
                            MAX_INPUT_OFFSET
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn block(&self, addr: BlockId) -> Option<&ModelBlock> {
        self.blocks.iter().find(|b| b.addr == addr)
    }

    /// Recover the control-flow graph the way a static analysis would see it.
    ///
    /// Without indirect-jump resolution, computed exits are dropped and
    /// blocks only reachable through them are missing from the result.
    /// Model blocks never overlap, so normalization has nothing to split.
    pub fn control_flow(&self, options: &RecoveryOptions) -> ControlFlow {
        let mut edges = BTreeSet::new();
        let mut targeted_directly = BTreeSet::new();
        let mut targeted_indirectly = BTreeSet::new();

        for block in &self.blocks {
            for exit in &block.exits {
                if exit.indirect {
                    targeted_indirectly.insert(exit.to);
                    if !options.resolve_indirect_jumps {
                        continue;
                    }
                } else {
                    targeted_directly.insert(exit.to);
                }
                edges.insert((block.addr, exit.to));
            }
        }

        let roots: BTreeSet<BlockId> = std::iter::once(self.entry)
            .chain(self.functions.iter().map(|f| f.entry))
            .collect();

        let blocks: BTreeSet<BlockId> = self
            .blocks
            .iter()
            .map(|b| b.addr)
            .filter(|addr| {
                options.resolve_indirect_jumps
                    || roots.contains(addr)
                    || targeted_directly.contains(addr)
                    || !targeted_indirectly.contains(addr)
            })
            .collect();
        edges.retain(|(src, dst)| blocks.contains(src) && blocks.contains(dst));

        let functions = self
            .functions
            .iter()
            .map(|f| {
                let members: BTreeSet<BlockId> = self
                    .blocks
                    .iter()
                    .filter(|b| b.function.as_deref() == Some(f.name.as_str()))
                    .map(|b| b.addr)
                    .filter(|addr| blocks.contains(addr))
                    .collect();
                let local_edges = edges
                    .iter()
                    .copied()
                    .filter(|(src, dst)| members.contains(src) && members.contains(dst))
                    .collect();
                (
                    f.name.clone(),
                    FunctionGraph {
                        name: f.name.clone(),
                        entry: f.entry,
                        blocks: members,
                        edges: local_edges,
                    },
                )
            })
            .collect();

        ControlFlow {
            entry: self.entry,
            blocks,
            edges,
            functions,
        }
    }
}

/// CFG recovery for binaries that are program-model JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelRecovery;

impl CfgRecovery for ModelRecovery {
    fn recover_control_flow(
        &self,
        binary: &BinaryImage,
        options: &RecoveryOptions,
    ) -> Result<ControlFlow, EngineError> {
        let model = ProgramModel::from_json(binary.bytes())?;
        let flow = model.control_flow(options);
        debug!(
            "Recovered {} blocks, {} edges, {} functions from {}",
            flow.blocks.len(),
            flow.edges.len(),
            flow.functions.len(),
            binary.path().display()
        );
        Ok(flow)
    }
}

/// What is known about one symbolic input byte.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ByteConstraint {
    Fixed(u8),
    Excluded(BTreeSet<u8>),
}

/// Execution state of the model engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelState {
    block: BlockId,
    input: Option<Vec<u8>>,
    constraints: BTreeMap<usize, ByteConstraint>,
}

impl ModelState {
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Add `guard` to the path constraints. Returns `false` when the path
    /// becomes infeasible.
    fn constrain(&mut self, guard: Guard) -> bool {
        use ByteConstraint::{Excluded, Fixed};

        let offset = guard.offset();
        let next = match (guard, self.constraints.remove(&offset)) {
            (Guard::Eq { value, .. }, None) => Some(Fixed(value)),
            (Guard::Eq { value, .. }, Some(Fixed(fixed))) => (fixed == value).then_some(Fixed(fixed)),
            (Guard::Eq { value, .. }, Some(Excluded(set))) => {
                (!set.contains(&value)).then_some(Fixed(value))
            }
            (Guard::Ne { value, .. }, None) => Some(Excluded(BTreeSet::from([value]))),
            (Guard::Ne { value, .. }, Some(Fixed(fixed))) => (fixed != value).then_some(Fixed(fixed)),
            (Guard::Ne { value, .. }, Some(Excluded(mut set))) => {
                set.insert(value);
                (set.len() <= usize::from(u8::MAX)).then_some(Excluded(set))
            }
        };

        match next {
            Some(constraint) => {
                self.constraints.insert(offset, constraint);
                true
            }
            None => false,
        }
    }
}

/// Exploration engine interpreting a [`ProgramModel`].
pub struct ModelEngine {
    model: ProgramModel,
}

impl ModelEngine {
    pub fn new(model: ProgramModel) -> Self {
        Self { model }
    }

    pub fn from_binary(binary: &BinaryImage) -> Result<Self, EngineError> {
        Ok(Self::new(ProgramModel::from_json(binary.bytes())?))
    }

    pub fn model(&self) -> &ProgramModel {
        &self.model
    }

    /// Successor states of `state` after executing its block.
    fn successors(&self, state: &ModelState) -> Result<Vec<ModelState>, EngineError> {
        let block = self.model.block(state.block).ok_or_else(|| {
            EngineError::Unsupported(format!("no block at {}", state.block))
        })?;
        if block.unsupported {
            return Err(EngineError::Unsupported(format!(
                "block {} is not modelled",
                block.addr
            )));
        }

        let mut next = Vec::new();
        match state.input {
            Some(ref input) => {
                let taken = block.exits.iter().find(|exit| match exit.when {
                    None => true,
                    Some(guard) => guard.holds(input.get(guard.offset()).copied().unwrap_or(0)),
                });
                if let Some(exit) = taken {
                    let mut succ = state.clone();
                    succ.block = exit.to;
                    next.push(succ);
                }
            }
            None => {
                // Constraints under which none of the exits seen so far is taken.
                let mut fallthrough = state.clone();
                for exit in &block.exits {
                    let mut succ = fallthrough.clone();
                    succ.block = exit.to;
                    let Some(guard) = exit.when else {
                        next.push(succ);
                        break;
                    };
                    if succ.constrain(guard) {
                        next.push(succ);
                    } else {
                        trace!("Pruned infeasible edge {} -> {}", block.addr, exit.to);
                    }
                    if !fallthrough.constrain(guard.negated()) {
                        break;
                    }
                }
            }
        }
        Ok(next)
    }
}

impl ExplorationEngine for ModelEngine {
    type State = ModelState;

    fn create_initial_state(&mut self, input: Option<&[u8]>) -> Result<ModelState, EngineError> {
        Ok(ModelState {
            block: self.model.entry,
            input: input.map(|bytes| bytes.to_vec()),
            constraints: BTreeMap::new(),
        })
    }

    fn explore_path(
        &mut self,
        state: ModelState,
        target: Option<BlockId>,
        budget: u64,
    ) -> Result<PathSearch<ModelState>, EngineError> {
        let mut worklist = VecDeque::from([state]);
        let mut visited = Vec::new();
        let mut steps = 0;

        while let Some(current) = worklist.pop_front() {
            if steps >= budget {
                return Ok(PathSearch {
                    found: None,
                    visited,
                    steps,
                    exhausted: true,
                    fault: None,
                });
            }
            steps += 1;
            visited.push(current.block);

            if target == Some(current.block) {
                return Ok(PathSearch {
                    found: Some(current),
                    visited,
                    steps,
                    exhausted: false,
                    fault: None,
                });
            }

            match self.successors(&current) {
                Ok(next) => worklist.extend(next),
                Err(e) => {
                    debug!("Search stopped at {}: {}", current.block, e);
                    return Ok(PathSearch {
                        found: None,
                        visited,
                        steps,
                        exhausted: false,
                        fault: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(PathSearch {
            found: None,
            visited,
            steps,
            exhausted: false,
            fault: None,
        })
    }

    fn concretize(
        &mut self,
        state: &ModelState,
        channel: InputChannel,
    ) -> Result<Concretized, EngineError> {
        match channel {
            InputChannel::Stdin if !self.model.stdin => return Ok(Concretized::NoChannel),
            InputChannel::Stdin => {}
        }

        if let Some(ref input) = state.input {
            return Ok(Concretized::Bytes(input.clone()));
        }

        let len = match state.constraints.keys().next_back() {
            None => 0,
            Some(&last) => last
                .checked_add(1)
                .filter(|len| *len <= MAX_INPUT_OFFSET + 1)
                .ok_or_else(|| EngineError::Concretize {
                    block: state.block,
                    reason: format!("input offset {} is out of range", last),
                })?,
        };
        let mut bytes = vec![0u8; len];
        for (&offset, constraint) in &state.constraints {
            bytes[offset] = match constraint {
                ByteConstraint::Fixed(value) => *value,
                ByteConstraint::Excluded(set) => (0..=u8::MAX)
                    .find(|candidate| !set.contains(candidate))
                    .ok_or_else(|| EngineError::Concretize {
                        block: state.block,
                        reason: format!("byte {} has no admissible value", offset),
                    })?,
            };
        }
        Ok(Concretized::Bytes(bytes))
    }
}
