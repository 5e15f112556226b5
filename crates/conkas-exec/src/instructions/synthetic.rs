// SPDX-License-Identifier: AGPL-3.0

//! Lifter-synthetic operations: constant pushes, SSA merges and the
//! inter-function edges.

use tracing::warn;
use z3::ast::Bool;
use z3::Context;

use conkas_errors::{ExecError, ExecResult};
use conkas_ssa::{BlockId, FuncId, Instruction, Opcode, Program};
use conkas_state::State;

use super::{arg_value, require_args, require_return_value, Successor};

pub(super) fn push<'ctx>(instr: &Instruction, state: &mut State<'ctx>) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let value = arg_value(instr, 0, &state.registers)
        .ok_or_else(|| ExecError::Internal("PUSH instruction needs a concrete argument".into()))?;
    if value.is_symbolic() {
        return Err(ExecError::Internal(
            "PUSH instruction needs a concrete argument".into(),
        ));
    }
    state.registers.set(rv, value);
    Ok(())
}

/// Pick the first argument, in descending SSA order, whose register holds
/// a value.
pub(super) fn phi<'ctx>(instr: &Instruction, state: &mut State<'ctx>) -> ExecResult<()> {
    if instr.arguments.is_empty() {
        return Err(ExecError::BadArity {
            mnemonic: instr.opcode.mnemonic(),
            expected: 1,
            given: 0,
        });
    }
    let rv = require_return_value(instr)?;

    let mut ordered = instr.arguments.clone();
    ordered.sort_by(|a, b| b.phi_key().cmp(&a.phi_key()));

    let mut probe = instr.clone();
    probe.arguments = ordered;
    for idx in 0..probe.arguments.len() {
        if let Some(value) = arg_value(&probe, idx, &state.registers) {
            state.registers.set(rv, value);
            return Ok(());
        }
    }

    warn!("could not find any value for PHI instruction arguments");
    Ok(())
}

/// Unconditional transfer to a callee's entry block. If the block's
/// second-to-last instruction is the JUMPI that guarded the way here, its
/// negated condition is attached as an edge hint.
pub(super) fn internal_call<'ctx>(
    ctx: &'ctx Context,
    program: &Program,
    block: BlockId,
    target: FuncId,
    state: &mut State<'ctx>,
) -> ExecResult<Vec<Successor<'ctx>>> {
    let insns = &program.block(block).insns;
    let mut condition: Option<Bool<'ctx>> = None;
    if insns.len() >= 2 {
        let guard = &insns[insns.len() - 2];
        if guard.opcode == Opcode::JumpI {
            condition = Some(match arg_value(guard, 1, &state.registers) {
                Some(cond) => cond.eq_zero(ctx).to_z3(ctx),
                None => Bool::from_bool(ctx, false),
            });
        }
    }

    let entry = program.function(target).entry;
    Ok(vec![Successor {
        block: entry,
        constraint: condition,
    }])
}

/// Conditional transfer between function entries, shaped like JUMPI.
pub(super) fn conditional_internal_call<'ctx>(
    ctx: &'ctx Context,
    program: &Program,
    block: BlockId,
    target: FuncId,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<Vec<Successor<'ctx>>> {
    require_args(instr, 1)?;
    let condition = arg_value(instr, 0, &state.registers)
        .ok_or_else(|| ExecError::Internal("CONDICALL condition register is unset".into()))?;

    let jump_to = program.function(target).entry;
    let fallthrough = match program.block(block).fallthrough {
        Some(ft) => ft,
        None => {
            warn!("could not find the fallthrough block to jump");
            return Ok(Vec::new());
        }
    };

    if condition.is_concrete() {
        let target = if condition.is_concrete_zero() {
            fallthrough
        } else {
            jump_to
        };
        return Ok(vec![Successor::unconditional(target)]);
    }

    Ok(vec![
        Successor::conditional(fallthrough, condition.eq_zero(ctx).to_z3(ctx)),
        Successor::conditional(jump_to, condition.eq_zero(ctx).not().to_z3(ctx)),
    ])
}
