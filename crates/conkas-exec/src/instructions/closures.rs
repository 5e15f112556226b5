// SPDX-License-Identifier: AGPL-3.0

//! External calls, contract creation and trace termination.
//!
//! Calls never recurse into the callee: the result register becomes a
//! fresh symbol and a concrete return buffer is overwritten with a fresh
//! blob of the right length.

use tracing::warn;
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::Instruction;
use conkas_state::State;
use conkas_word::{Word, WORD_SIZE};

use super::{require_arg, require_args, require_return_value};

pub(super) fn create<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
    arity: usize,
) -> ExecResult<()> {
    require_args(instr, arity)?;
    let rv = require_return_value(instr)?;
    state
        .registers
        .set(rv, Word::symbol(ctx, &rv.to_string(), WORD_SIZE));
    Ok(())
}

pub(super) fn call<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
    arity: usize,
    ret_offset_idx: usize,
) -> ExecResult<()> {
    require_args(instr, arity)?;
    let rv = require_return_value(instr)?;
    let ret_offset = require_arg(instr, ret_offset_idx, &state.registers)?;
    let ret_length = require_arg(instr, ret_offset_idx + 1, &state.registers)?;

    if ret_offset.is_symbolic() || ret_length.is_symbolic() {
        warn!(
            "return buffer is symbolic in {} instruction, skipping the write",
            instr.opcode
        );
    } else {
        let offset = ret_offset.as_u64()?;
        let length = ret_length.as_usize()?;
        state.memory.extend(offset, length as u64);
        if length > 0 {
            let blob = Word::symbol(ctx, &format!("ret_code_{}", rv), (length * 8) as u32);
            state
                .memory
                .store(&Word::from_u64(offset, WORD_SIZE), &blob, length, ctx)?;
        }
    }

    state
        .registers
        .set(rv, Word::symbol(ctx, &rv.to_string(), WORD_SIZE));
    Ok(())
}

fn load_return_range<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
    fresh_name: &str,
) -> ExecResult<Word<'ctx>> {
    let offset = require_arg(instr, 0, &state.registers)?;
    let length = require_arg(instr, 1, &state.registers)?;

    if length.is_symbolic() {
        warn!("{} instruction has symbolic length", instr.opcode);
        return Ok(Word::symbol(ctx, fresh_name, WORD_SIZE));
    }
    let length = length.as_usize()?;
    if offset.is_concrete() {
        state.memory.extend(offset.as_u64()?, length as u64);
    }
    Ok(state.memory.load(&offset, length, ctx))
}

pub(super) fn ret<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let data = load_return_range(ctx, instr, state, "ret_data")?;
    state.return_data = Some(data);
    state.stopped = true;
    Ok(())
}

pub(super) fn revert<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    state.reverted = true;
    let data = load_return_range(ctx, instr, state, "rev_data")?;
    state.return_data = Some(data);
    Ok(())
}

pub(super) fn selfdestruct<'ctx>(instr: &Instruction, state: &mut State<'ctx>) -> ExecResult<()> {
    require_args(instr, 1)?;
    state.destructed = true;
    Ok(())
}
