// SPDX-License-Identifier: AGPL-3.0

//! Per-mnemonic transfer functions.
//!
//! Each instruction reads and writes the symbolic state and returns its
//! successor edges: an ordered list of `(block, constraint)` pairs. An
//! empty list means "fall through if possible, otherwise the trace ends".

use z3::ast::Bool;
use z3::Context;

use conkas_errors::{ExecError, ExecResult};
use conkas_ssa::{BlockId, Instruction, Opcode, Program, StackValue};
use conkas_state::{Registers, State};
use conkas_word::{Word, WORD_SIZE};

mod arithmetic;
mod closures;
mod comparison;
mod context;
mod crypto;
mod logging;
mod storage_control;
mod synthetic;

/// One successor edge: the block to run next and the branch constraint
/// under which it is taken, if any.
#[derive(Debug, Clone)]
pub struct Successor<'ctx> {
    pub block: BlockId,
    pub constraint: Option<Bool<'ctx>>,
}

impl<'ctx> Successor<'ctx> {
    pub fn unconditional(block: BlockId) -> Self {
        Self {
            block,
            constraint: None,
        }
    }

    pub fn conditional(block: BlockId, constraint: Bool<'ctx>) -> Self {
        Self {
            block,
            constraint: Some(constraint),
        }
    }
}

/// Resolve an operand: constants carry their value, SSA references read
/// the register file (absence propagates as `None`).
pub fn arg_value<'ctx>(
    instr: &Instruction,
    idx: usize,
    registers: &Registers<'ctx>,
) -> Option<Word<'ctx>> {
    match instr.arguments.get(idx)? {
        StackValue::Concrete(value) => Some(Word::from_biguint(value.clone(), WORD_SIZE)),
        StackValue::Ssa(ssa) => registers.get(*ssa),
    }
}

pub(crate) fn require_args(instr: &Instruction, expected: usize) -> ExecResult<()> {
    let given = instr.arguments.len();
    if given != expected {
        return Err(ExecError::BadArity {
            mnemonic: instr.opcode.mnemonic(),
            expected,
            given,
        });
    }
    Ok(())
}

pub(crate) fn require_return_value(instr: &Instruction) -> ExecResult<usize> {
    instr
        .return_value
        .ok_or(ExecError::MissingReturnValue(instr.opcode.mnemonic()))
}

pub(crate) fn require_arg<'ctx>(
    instr: &Instruction,
    idx: usize,
    registers: &Registers<'ctx>,
) -> ExecResult<Word<'ctx>> {
    match instr.arguments.get(idx) {
        Some(StackValue::Concrete(value)) => Ok(Word::from_biguint(value.clone(), WORD_SIZE)),
        Some(StackValue::Ssa(ssa)) => registers
            .get(*ssa)
            .ok_or(ExecError::UndefinedRegister(*ssa)),
        None => Err(ExecError::BadArity {
            mnemonic: instr.opcode.mnemonic(),
            expected: idx + 1,
            given: instr.arguments.len(),
        }),
    }
}

fn no_edges<'ctx>(result: ExecResult<()>) -> ExecResult<Vec<Successor<'ctx>>> {
    result.map(|_| Vec::new())
}

/// Dispatch a single instruction against the state.
pub fn execute_instruction<'ctx>(
    ctx: &'ctx Context,
    program: &Program,
    block: BlockId,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<Vec<Successor<'ctx>>> {
    match &instr.opcode {
        // Arithmetic
        Opcode::Stop => {
            state.stopped = true;
            Ok(Vec::new())
        }
        Opcode::Add => no_edges(arithmetic::add(ctx, instr, state)),
        Opcode::Mul => no_edges(arithmetic::mul(ctx, instr, state)),
        Opcode::Sub => no_edges(arithmetic::sub(ctx, instr, state)),
        Opcode::Div => no_edges(arithmetic::div(ctx, instr, state)),
        Opcode::SDiv => no_edges(arithmetic::sdiv(ctx, instr, state)),
        Opcode::Mod => no_edges(arithmetic::umod(ctx, instr, state)),
        Opcode::SMod => no_edges(arithmetic::smod(ctx, instr, state)),
        Opcode::AddMod => no_edges(arithmetic::addmod(ctx, instr, state)),
        Opcode::MulMod => no_edges(arithmetic::mulmod(ctx, instr, state)),
        Opcode::Exp => no_edges(arithmetic::exp(ctx, instr, state)),
        Opcode::SignExtend => no_edges(arithmetic::signextend(ctx, instr, state)),
        Opcode::Shl => no_edges(arithmetic::shl(ctx, instr, state)),
        Opcode::Shr => no_edges(arithmetic::shr(ctx, instr, state)),
        Opcode::Sar => no_edges(arithmetic::sar(ctx, instr, state)),

        // Comparison and bitwise logic
        Opcode::Lt => no_edges(comparison::lt(ctx, instr, state)),
        Opcode::Gt => no_edges(comparison::gt(ctx, instr, state)),
        Opcode::Slt => no_edges(comparison::slt(ctx, instr, state)),
        Opcode::Sgt => no_edges(comparison::sgt(ctx, instr, state)),
        Opcode::Eq => no_edges(comparison::eq(ctx, instr, state)),
        Opcode::IsZero => no_edges(comparison::iszero(ctx, instr, state)),
        Opcode::And => no_edges(comparison::and(ctx, instr, state)),
        Opcode::Or => no_edges(comparison::or(ctx, instr, state)),
        Opcode::Xor => no_edges(comparison::xor(ctx, instr, state)),
        Opcode::Not => no_edges(comparison::not(ctx, instr, state)),
        Opcode::Byte => no_edges(comparison::byte(ctx, instr, state)),

        // Blockchain and contract context
        Opcode::Address => no_edges(context::named_symbol(ctx, instr, state, "address")),
        Opcode::Origin => no_edges(context::named_symbol(ctx, instr, state, "origin")),
        Opcode::Caller => no_edges(context::named_symbol(ctx, instr, state, "caller")),
        Opcode::CallValue => no_edges(context::named_symbol(ctx, instr, state, "callvalue")),
        Opcode::Coinbase => no_edges(context::named_symbol(ctx, instr, state, "coinbase")),
        Opcode::Timestamp => no_edges(context::named_symbol(ctx, instr, state, "timestamp")),
        Opcode::Number => no_edges(context::named_symbol(ctx, instr, state, "number")),
        Opcode::Difficulty => no_edges(context::named_symbol(ctx, instr, state, "difficulty")),
        Opcode::GasLimit => no_edges(context::named_symbol(ctx, instr, state, "gaslimit")),
        Opcode::ChainId => no_edges(context::named_symbol(ctx, instr, state, "chainid")),
        Opcode::GasPrice => no_edges(context::named_symbol(ctx, instr, state, "gasprice")),
        Opcode::CallDataSize => no_edges(context::named_symbol(ctx, instr, state, "calldatasize")),
        Opcode::Balance => no_edges(context::fresh_symbol(ctx, instr, state, 1)),
        Opcode::SelfBalance => no_edges(context::fresh_symbol(ctx, instr, state, 0)),
        Opcode::ExtCodeSize => no_edges(context::fresh_symbol(ctx, instr, state, 1)),
        Opcode::ExtCodeHash => no_edges(context::fresh_symbol(ctx, instr, state, 1)),
        Opcode::ReturnDataSize => no_edges(context::fresh_symbol(ctx, instr, state, 0)),
        Opcode::BlockHash => no_edges(context::blockhash(ctx, instr, state)),
        Opcode::CallDataLoad => no_edges(context::calldataload(ctx, instr, state)),
        Opcode::CallDataCopy => no_edges(context::calldatacopy(ctx, instr, state)),
        Opcode::CodeSize => no_edges(context::codesize(instr, state)),
        Opcode::CodeCopy => no_edges(context::codecopy(ctx, instr, state)),
        Opcode::ExtCodeCopy => no_edges(context::extcodecopy(ctx, instr, state)),
        Opcode::ReturnDataCopy => no_edges(context::returndatacopy(ctx, instr, state)),

        // Memory, storage, control flow
        Opcode::MLoad => no_edges(storage_control::mload(ctx, instr, state)),
        Opcode::MStore => no_edges(storage_control::mstore(ctx, instr, state)),
        Opcode::MStore8 => no_edges(storage_control::mstore8(ctx, instr, state)),
        Opcode::SLoad => no_edges(storage_control::sload(ctx, instr, state)),
        Opcode::SStore => no_edges(storage_control::sstore(ctx, instr, state)),
        Opcode::Jump => storage_control::jump(ctx, program, block, instr, state),
        Opcode::JumpI => storage_control::jumpi(ctx, program, block, instr, state),
        Opcode::Pc => no_edges(storage_control::pc(instr, state)),
        Opcode::MSize => no_edges(storage_control::msize(instr, state)),
        Opcode::Gas => no_edges(context::fresh_symbol(ctx, instr, state, 0)),
        Opcode::JumpDest => Err(ExecError::Internal(
            "JUMPDEST instruction should not be reached".to_string(),
        )),

        // Hashing
        Opcode::Sha3 => no_edges(crypto::sha3(ctx, instr, state)),

        // Logging
        Opcode::Log0 => no_edges(logging::log(instr, state, 2)),
        Opcode::Log1 => no_edges(logging::log(instr, state, 3)),
        Opcode::Log2 => no_edges(logging::log(instr, state, 4)),
        Opcode::Log3 => no_edges(logging::log(instr, state, 5)),
        Opcode::Log4 => no_edges(logging::log(instr, state, 6)),

        // Calls, creation, termination
        Opcode::Create => no_edges(closures::create(ctx, instr, state, 3)),
        Opcode::Create2 => no_edges(closures::create(ctx, instr, state, 4)),
        Opcode::Call => no_edges(closures::call(ctx, instr, state, 7, 5)),
        Opcode::CallCode => no_edges(closures::call(ctx, instr, state, 7, 5)),
        Opcode::DelegateCall => no_edges(closures::call(ctx, instr, state, 6, 4)),
        Opcode::StaticCall => no_edges(closures::call(ctx, instr, state, 6, 4)),
        Opcode::Return => no_edges(closures::ret(ctx, instr, state)),
        Opcode::Revert => no_edges(closures::revert(ctx, instr, state)),
        Opcode::Invalid => {
            state.invalid = true;
            Ok(Vec::new())
        }
        Opcode::SelfDestruct => no_edges(closures::selfdestruct(instr, state)),

        // Lifter-synthetic operations
        Opcode::Push => no_edges(synthetic::push(instr, state)),
        Opcode::Phi => no_edges(synthetic::phi(instr, state)),
        Opcode::InternalCall(target) => {
            synthetic::internal_call(ctx, program, block, *target, state)
        }
        Opcode::ConditionalInternalCall(target) => {
            synthetic::conditional_internal_call(ctx, program, block, *target, instr, state)
        }
    }
}
