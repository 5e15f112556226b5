// SPDX-License-Identifier: AGPL-3.0

//! LOG0..LOG4: the payload range touches memory, nothing else is
//! modelled.

use conkas_errors::ExecResult;
use conkas_ssa::Instruction;
use conkas_state::State;
use conkas_word::Word;

use super::{require_arg, require_args};

pub(super) fn log<'ctx>(
    instr: &Instruction,
    state: &mut State<'ctx>,
    arity: usize,
) -> ExecResult<()> {
    require_args(instr, arity)?;
    let offset = require_arg(instr, 0, &state.registers)?;
    let length = require_arg(instr, 1, &state.registers)?;

    if Word::all_concrete(&[&offset, &length]) {
        state.memory.extend(offset.as_u64()?, length.as_u64()?);
    }
    Ok(())
}
