// SPDX-License-Identifier: AGPL-3.0

//! Blockchain and contract context: quantities the engine does not model
//! become fresh symbolic words. Identity values carry fixed names that the
//! analyses key on; per-result values are named after their SSA index.

use tracing::warn;
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::Instruction;
use conkas_state::State;
use conkas_word::{Word, WORD_SIZE};

use super::{require_arg, require_args, require_return_value};

/// A fresh symbol with a fixed, well-known name (`caller`, `timestamp`,
/// ...). The names are load-bearing: the time-dependence analysis matches
/// them literally.
pub(super) fn named_symbol<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
    name: &str,
) -> ExecResult<()> {
    let rv = require_return_value(instr)?;
    state.registers.set(rv, Word::symbol(ctx, name, WORD_SIZE));
    Ok(())
}

/// A fresh symbol named after the result's SSA index, for per-result
/// quantities such as BALANCE or GAS.
pub(super) fn fresh_symbol<'ctx>(
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

pub(super) fn blockhash<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let number = require_arg(instr, 0, &state.registers)?;
    let name = match &number {
        Word::Concrete { value, .. } => format!("block_number_{}", value),
        Word::Symbolic { expr, .. } => format!("block_number_sym_{}", expr),
    };
    state.registers.set(rv, Word::symbol(ctx, &name, WORD_SIZE));
    Ok(())
}

pub(super) fn calldataload<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let offset = require_arg(instr, 0, &state.registers)?;
    let name = match &offset {
        Word::Concrete { value, .. } => format!("calldataload_{}", value),
        Word::Symbolic { expr, .. } => format!("calldataload_sym_{}", expr),
    };
    state.registers.set(rv, Word::symbol(ctx, &name, WORD_SIZE));
    Ok(())
}

/// Shared tail of the copy family: install a fresh blob of the right
/// length, degrading softly on symbolic destinations and lengths.
fn copy_blob<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
    dest: Word<'ctx>,
    length: Word<'ctx>,
    content: Option<Word<'ctx>>,
) -> ExecResult<()> {
    let name = format!(
        "{}_{}",
        instr.opcode.mnemonic().to_lowercase(),
        instr.offset
    );

    if dest.is_symbolic() {
        warn!("symbolic memory index in {} instruction", instr.opcode);
        return Ok(());
    }
    let dest = dest.as_u64()?;

    if length.is_symbolic() {
        warn!("symbolic length in {} instruction", instr.opcode);
        state.memory.extend(dest, 1);
        let byte = Word::symbol(ctx, &name, 8);
        state
            .memory
            .store(&Word::from_u64(dest, WORD_SIZE), &byte, 1, ctx)?;
        return Ok(());
    }

    let length = length.as_usize()?;
    if length == 0 {
        return Ok(());
    }
    state.memory.extend(dest, length as u64);
    let value = content.unwrap_or_else(|| Word::symbol(ctx, &name, (length * 8) as u32));
    state
        .memory
        .store(&Word::from_u64(dest, WORD_SIZE), &value, length, ctx)?;
    Ok(())
}

pub(super) fn calldatacopy<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 3)?;
    let dest = require_arg(instr, 0, &state.registers)?;
    let length = require_arg(instr, 2, &state.registers)?;
    copy_blob(ctx, instr, state, dest, length, None)
}

pub(super) fn codesize<'ctx>(instr: &Instruction, state: &mut State<'ctx>) -> ExecResult<()> {
    let rv = require_return_value(instr)?;
    let size = state.environment.code_size();
    state
        .registers
        .set(rv, Word::from_u64(size as u64, WORD_SIZE));
    Ok(())
}

pub(super) fn codecopy<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 3)?;
    let dest = require_arg(instr, 0, &state.registers)?;
    let offset = require_arg(instr, 1, &state.registers)?;
    let length = require_arg(instr, 2, &state.registers)?;

    // With a concrete window the real code bytes are copied; an
    // undecodable or symbolic source degrades to a fresh blob.
    let content = if dest.is_concrete() && length.is_concrete() && offset.is_concrete() {
        let off = offset.as_usize()?;
        let len = length.as_usize()?;
        state
            .environment
            .code_slice(off, len)
            .map(|value| Word::from_biguint(value, (len * 8) as u32))
    } else {
        None
    };
    copy_blob(ctx, instr, state, dest, length, content)
}

pub(super) fn extcodecopy<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 4)?;
    let dest = require_arg(instr, 1, &state.registers)?;
    let length = require_arg(instr, 3, &state.registers)?;
    copy_blob(ctx, instr, state, dest, length, None)
}

pub(super) fn returndatacopy<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 3)?;
    let dest = require_arg(instr, 0, &state.registers)?;
    let length = require_arg(instr, 2, &state.registers)?;
    copy_blob(ctx, instr, state, dest, length, None)
}
