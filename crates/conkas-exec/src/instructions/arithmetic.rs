// SPDX-License-Identifier: AGPL-3.0

//! Arithmetic transfer functions: wrap-around 256-bit math with the EVM
//! rules for zero divisors and symbolic fallbacks for the operators the
//! engine approximates (EXP, SIGNEXTEND).

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::Instruction;
use conkas_state::State;
use conkas_word::{Word, WORD_SIZE};

use super::{require_arg, require_args, require_return_value};

pub(super) fn add<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.add(&b, ctx));
    Ok(())
}

pub(super) fn mul<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.mul(&b, ctx));
    Ok(())
}

pub(super) fn sub<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, a.sub(&b, ctx));
    Ok(())
}

pub(super) fn div<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    let expr = if b.is_concrete_zero() {
        Word::zero(WORD_SIZE)
    } else {
        a.udiv(&b, ctx)
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn sdiv<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    let expr = if b.is_concrete_zero() {
        Word::zero(WORD_SIZE)
    } else {
        a.sdiv(&b, ctx)
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn umod<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    let expr = if b.is_concrete_zero() {
        Word::zero(WORD_SIZE)
    } else {
        a.urem(&b, ctx)
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn smod<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    let expr = if b.is_concrete_zero() {
        Word::zero(WORD_SIZE)
    } else {
        a.srem(&b, ctx)
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn addmod<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 3)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    let n = require_arg(instr, 2, &state.registers)?;

    let expr = if n.is_concrete_zero() {
        Word::zero(WORD_SIZE)
    } else if Word::all_concrete(&[&a, &b, &n]) {
        let sum = a.as_biguint()? + b.as_biguint()?;
        Word::from_biguint(sum % n.as_biguint()?, WORD_SIZE)
    } else {
        a.urem(&n, ctx)
            .add(&b.urem(&n, ctx), ctx)
            .urem(&n, ctx)
            .simplify()
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn mulmod<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 3)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;
    let n = require_arg(instr, 2, &state.registers)?;

    let expr = if n.is_concrete_zero() {
        Word::zero(WORD_SIZE)
    } else if Word::all_concrete(&[&a, &b, &n]) {
        let product = a.as_biguint()? * b.as_biguint()?;
        Word::from_biguint(product % n.as_biguint()?, WORD_SIZE)
    } else {
        a.urem(&n, ctx)
            .mul(&b.urem(&n, ctx), ctx)
            .urem(&n, ctx)
            .simplify()
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn exp<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;

    let expr = if Word::all_concrete(&[&a, &b]) {
        let modulus = BigUint::one() << WORD_SIZE as usize;
        Word::from_biguint(a.as_biguint()?.modpow(&b.as_biguint()?, &modulus), WORD_SIZE)
    } else {
        // A symbolic exponent is approximated by a fresh word.
        Word::symbol(ctx, &rv.to_string(), WORD_SIZE)
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn signextend<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let a = require_arg(instr, 0, &state.registers)?;
    let b = require_arg(instr, 1, &state.registers)?;

    let expr = if Word::all_concrete(&[&a, &b]) {
        let a = a.as_biguint()?;
        let b = b.as_biguint()?;
        if a <= BigUint::from(31u32) {
            let testbit = a.to_u32().expect("bounded above") * 8 + 7;
            let signbit = BigUint::one() << testbit as usize;
            if (&b & &signbit) != BigUint::zero() {
                let extension = (BigUint::one() << WORD_SIZE as usize) - &signbit;
                Word::from_biguint(b | extension, WORD_SIZE)
            } else {
                Word::from_biguint(b & (signbit - BigUint::one()), WORD_SIZE)
            }
        } else {
            Word::from_biguint(b, WORD_SIZE)
        }
    } else {
        Word::symbol(ctx, &rv.to_string(), WORD_SIZE)
    };
    state.registers.set(rv, expr);
    Ok(())
}

pub(super) fn shl<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let shift = require_arg(instr, 0, &state.registers)?;
    let value = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, value.shl(&shift, ctx));
    Ok(())
}

pub(super) fn shr<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let shift = require_arg(instr, 0, &state.registers)?;
    let value = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, value.lshr(&shift, ctx));
    Ok(())
}

pub(super) fn sar<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let shift = require_arg(instr, 0, &state.registers)?;
    let value = require_arg(instr, 1, &state.registers)?;
    state.registers.set(rv, value.ashr(&shift, ctx));
    Ok(())
}
