// SPDX-License-Identifier: AGPL-3.0

//! Symbolic trace exploration over a lifted contract.
//!
//! Starting from the dispatch entry block, [`SymExec`] drives per-block
//! execution, forks a trace at every conditional edge, accumulates the
//! path condition, and bounds each trace by a basic-block depth limit.
//! The result is the full collection of finished traces, including those
//! cut off at the bound; the vulnerability analyses consume them
//! read-only.

use std::rc::Rc;

use tracing::warn;
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::{BlockId, Program};
use conkas_state::{Environment, State};

pub mod instructions;
mod trace;

pub use instructions::{arg_value, execute_instruction, Successor};
pub use trace::{AnalyzedBlock, Trace};

/// Default cap on analysed basic blocks per trace.
pub const MAX_DEPTH: usize = 25;

pub struct SymExec<'p, 'ctx> {
    ctx: &'ctx Context,
    program: &'p Program,
    max_depth: usize,
}

impl<'p, 'ctx> SymExec<'p, 'ctx> {
    pub fn new(ctx: &'ctx Context, program: &'p Program) -> Self {
        Self::with_max_depth(ctx, program, MAX_DEPTH)
    }

    pub fn with_max_depth(ctx: &'ctx Context, program: &'p Program, max_depth: usize) -> Self {
        Self {
            ctx,
            program,
            max_depth,
        }
    }

    /// Explore every path from the dispatch entry and return the
    /// finished traces.
    pub fn execute(&self) -> ExecResult<Vec<Trace<'ctx>>> {
        let entry = match self.program.entry_block() {
            Some(entry) => entry,
            None => {
                if self.program.functions.is_empty() {
                    warn!("no functions to analyse");
                } else {
                    warn!("no blocks to analyse");
                }
                return Ok(Vec::new());
            }
        };

        let environment = Rc::new(Environment::new(self.program.code.clone()));
        let mut dispatch = Trace::new(State::new(environment));
        dispatch.block_to_analyse = Some(entry);

        let mut traces = Vec::new();
        let mut to_execute = vec![dispatch];
        let mut next_record_id = 0usize;

        loop {
            let new_traces = self.execute_traces(&mut to_execute, &mut next_record_id)?;
            traces.append(&mut to_execute);
            if new_traces.is_empty() {
                break;
            }
            to_execute = new_traces;
        }

        Ok(traces)
    }

    fn execute_traces(
        &self,
        traces: &mut [Trace<'ctx>],
        next_record_id: &mut usize,
    ) -> ExecResult<Vec<Trace<'ctx>>> {
        let mut new_traces = Vec::new();

        for trace in traces.iter_mut() {
            while let Some(block) = trace.block_to_analyse {
                let successors = self.execute_block(block, &mut trace.state)?;

                let record = AnalyzedBlock::new(
                    *next_record_id,
                    block,
                    trace.state.clone(),
                    trace.constraints.clone(),
                );
                *next_record_id += 1;
                trace.add_analyzed_block(Rc::new(record));

                trace.depth += 1;
                if trace.depth >= self.max_depth {
                    // The bound drops any pending edges with it.
                    break;
                }
                if successors.is_empty() {
                    break;
                }

                // The first edge continues this trace; the rest fork.
                for edge in &successors[1..] {
                    let mut forked = trace.fork();
                    forked.block_to_analyse = Some(edge.block);
                    forked.set_current_constraint(edge.constraint.clone());
                    new_traces.push(forked);
                }
                trace.block_to_analyse = Some(successors[0].block);
                trace.set_current_constraint(successors[0].constraint.clone());
            }

            trace.block_to_analyse = None;
            trace.current_constraint = None;
        }

        Ok(new_traces)
    }

    /// Run one block's instructions in order, collecting every edge set
    /// they produce. A fallthrough successor is synthesised only when no
    /// instruction produced edges and the state is still live.
    fn execute_block(
        &self,
        block: BlockId,
        state: &mut State<'ctx>,
    ) -> ExecResult<Vec<Successor<'ctx>>> {
        let mut collected = Vec::new();
        for instr in &self.program.block(block).insns {
            let edges = execute_instruction(self.ctx, self.program, block, instr, state)?;
            collected.extend(edges);
            if state.terminated() {
                break;
            }
        }

        if collected.is_empty() && !state.terminated() {
            if let Some(fallthrough) = self.program.block(block).fallthrough {
                collected.push(Successor::unconditional(fallthrough));
            }
        }
        Ok(collected)
    }
}
