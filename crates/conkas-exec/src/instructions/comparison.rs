// SPDX-License-Identifier: AGPL-3.0

//! Comparison and bitwise transfer functions: results are 0/1 words or
//! `If(pred, 1, 0)` expressions.

use num_traits::ToPrimitive;
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::Instruction;
use conkas_state::State;
use conkas_word::{Word, WORD_SIZE};

use super::{require_arg, require_args, require_return_value};

pub(super) fn lt<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.ult(&b, ctx).to_word(ctx));
    Ok(())
}

pub(super) fn gt<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.ugt(&b, ctx).to_word(ctx));
    Ok(())
}

pub(super) fn slt<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.slt(&b, ctx).to_word(ctx));
    Ok(())
}

pub(super) fn sgt<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.sgt(&b, ctx).to_word(ctx));
    Ok(())
}

pub(super) fn eq<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.eq(&b, ctx).to_word(ctx));
    Ok(())
}

pub(super) fn iszero<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    state.registers.set(rv, a.eq_zero(ctx).to_word(ctx));
    Ok(())
}

pub(super) fn and<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.bitand(&b, ctx));
    Ok(())
}

pub(super) fn or<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.bitor(&b, ctx));
    Ok(())
}

pub(super) fn xor<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.bitxor(&b, ctx));
    Ok(())
}

pub(super) fn not<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    state.registers.set(rv, a.not(ctx));
    Ok(())
}

pub(super) fn byte<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let i = require_arg(instr, 0, &state.registers)?;
    let x = require_arg(instr, 1, &state.registers)?;

    let expr = if i.is_symbolic() {
        Word::symbol(ctx, &rv.to_string(), WORD_SIZE)
    } else {
        match i.as_biguint()?.to_u32() {
            Some(index) if index < 32 => {
                let low = 248 - index * 8;
                match &x {
                    Word::Concrete { .. } => {
                        let shifted = x.lshr(&Word::from_u64(low as u64, WORD_SIZE), ctx);
                        shifted.bitand(&Word::from_u64(0xff, WORD_SIZE), ctx)
                    }
                    Word::Symbolic { expr, .. } => {
                        Word::from_bv(expr.extract(low + 7, low).zero_ext(WORD_SIZE - 8))
                    }
                }
            }
            _ => Word::zero(WORD_SIZE),
        }
    };
    state.registers.set(rv, expr);
    Ok(())
}
