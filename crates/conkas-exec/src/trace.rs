// SPDX-License-Identifier: AGPL-3.0

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use z3::ast::Bool;

use conkas_ssa::BlockId;
use conkas_state::State;

/// Immutable record of one executed block: the block handle, a deep
/// snapshot of the machine state right after the block ran, and the path
/// constraints accumulated up to that point.
///
/// Records are shared by `Rc` across the traces forked from a common
/// prefix, so record identity coincides with equality of all three
/// components; the analyses dedup on it.
#[derive(Debug)]
pub struct AnalyzedBlock<'ctx> {
    id: usize,
    pub block: BlockId,
    pub state: State<'ctx>,
    pub constraints: Vec<Bool<'ctx>>,
}

impl<'ctx> AnalyzedBlock<'ctx> {
    pub fn new(id: usize, block: BlockId, state: State<'ctx>, constraints: Vec<Bool<'ctx>>) -> Self {
        Self {
            id,
            block,
            state,
            constraints,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

impl<'ctx> PartialEq for AnalyzedBlock<'ctx> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<'ctx> Eq for AnalyzedBlock<'ctx> {}

impl<'ctx> Hash for AnalyzedBlock<'ctx> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One explored control-flow path: the pending block, the executed-block
/// history, the live state, and the accumulated path condition.
#[derive(Debug)]
pub struct Trace<'ctx> {
    pub block_to_analyse: Option<BlockId>,
    pub analyzed_blocks: Vec<Rc<AnalyzedBlock<'ctx>>>,
    pub state: State<'ctx>,
    pub depth: usize,
    pub constraints: Vec<Bool<'ctx>>,
    pub current_constraint: Option<Bool<'ctx>>,
}

impl<'ctx> Trace<'ctx> {
    pub fn new(state: State<'ctx>) -> Self {
        Self {
            block_to_analyse: None,
            analyzed_blocks: Vec::new(),
            state,
            depth: 0,
            constraints: Vec::new(),
            current_constraint: None,
        }
    }

    /// Record the constraint of the edge just taken; `Some` appends to
    /// the path condition, `None` clears the pending slot.
    pub fn set_current_constraint(&mut self, constraint: Option<Bool<'ctx>>) {
        if let Some(ref c) = constraint {
            self.constraints.push(c.clone());
        }
        self.current_constraint = constraint;
    }

    /// Append a finished block record and clear the pending block.
    pub fn add_analyzed_block(&mut self, record: Rc<AnalyzedBlock<'ctx>>) {
        self.analyzed_blocks.push(record);
        self.block_to_analyse = None;
    }

    /// Fork for an alternative edge: deep-clone the state, copy the
    /// constraint list, share the history records and the environment.
    pub fn fork(&self) -> Self {
        Self {
            block_to_analyse: self.block_to_analyse,
            analyzed_blocks: self.analyzed_blocks.clone(),
            state: self.state.clone(),
            depth: self.depth,
            constraints: self.constraints.clone(),
            current_constraint: self.current_constraint.clone(),
        }
    }

    /// Constraints appended after the given record: its snapshot is a
    /// prefix of this trace's constraint list.
    pub fn constraints_after<'a>(&'a self, record: &AnalyzedBlock<'ctx>) -> &'a [Bool<'ctx>] {
        &self.constraints[record.constraints.len().min(self.constraints.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conkas_state::Environment;
    use z3::{Config, Context};

    fn state<'ctx>() -> State<'ctx> {
        State::new(Rc::new(Environment::default()))
    }

    #[test]
    fn test_current_constraint_appends() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut trace = Trace::new(state());
        let c = Bool::new_const(&ctx, "c");
        trace.set_current_constraint(Some(c.clone()));
        assert_eq!(trace.constraints.len(), 1);
        trace.set_current_constraint(None);
        assert_eq!(trace.constraints.len(), 1);
        assert!(trace.current_constraint.is_none());
    }

    #[test]
    fn test_fork_shares_history_but_not_constraints() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut trace = Trace::new(state());
        trace.add_analyzed_block(Rc::new(AnalyzedBlock::new(
            0,
            BlockId(0),
            state(),
            Vec::new(),
        )));

        let mut fork = trace.fork();
        fork.set_current_constraint(Some(Bool::new_const(&ctx, "c")));

        assert_eq!(trace.constraints.len(), 0);
        assert_eq!(fork.constraints.len(), 1);
        assert!(Rc::ptr_eq(
            &trace.analyzed_blocks[0],
            &fork.analyzed_blocks[0]
        ));
    }

    #[test]
    fn test_constraints_after_is_suffix() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut trace = Trace::new(state());
        let a = Bool::new_const(&ctx, "a");
        let b = Bool::new_const(&ctx, "b");
        trace.set_current_constraint(Some(a));
        let record = AnalyzedBlock::new(0, BlockId(0), state(), trace.constraints.clone());
        trace.set_current_constraint(Some(b.clone()));

        let remaining = trace.constraints_after(&record);
        assert_eq!(remaining, &[b]);
    }

    #[test]
    fn test_record_identity() {
        let a = AnalyzedBlock::new(1, BlockId(0), state(), Vec::new());
        let b = AnalyzedBlock::new(1, BlockId(0), state(), Vec::new());
        let c = AnalyzedBlock::new(2, BlockId(0), state(), Vec::new());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
