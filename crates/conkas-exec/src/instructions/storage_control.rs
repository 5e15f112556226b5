// SPDX-License-Identifier: AGPL-3.0

//! Memory, storage and intra-function control flow.

use tracing::warn;
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::{BlockId, Instruction, Program};
use conkas_state::State;
use conkas_word::{Word, WORD_SIZE};

use super::{require_arg, require_args, require_return_value, Successor};

pub(super) fn mload<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let offset = require_arg(instr, 0, &state.registers)?;
    if offset.is_concrete() {
        state.memory.extend(offset.as_u64()?, 32);
    }
    let value = state.memory.load(&offset, 32, ctx);
    state.registers.set(rv, value);
    Ok(())
}

pub(super) fn mstore<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let offset = require_arg(instr, 0, &state.registers)?;
    let value = require_arg(instr, 1, &state.registers)?;
    if offset.is_concrete() {
        state.memory.extend(offset.as_u64()?, 32);
    }
    state.memory.store(&offset, &value, 32, ctx)
}

pub(super) fn mstore8<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let offset = require_arg(instr, 0, &state.registers)?;
    let value = require_arg(instr, 1, &state.registers)?;
    if offset.is_concrete() {
        state.memory.extend(offset.as_u64()?, 1);
    }
    state.memory.store(&offset, &value, 1, ctx)
}

pub(super) fn sload<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 1)?;
    let rv = require_return_value(instr)?;
    let key = require_arg(instr, 0, &state.registers)?;

    let value = match state.storage.get(&key, -1) {
        Some(value) => value,
        None => {
            // First read of the slot: a fresh symbol whose name encodes
            // the key. Analyses parse this format back.
            let name = match &key {
                Word::Concrete { value, .. } => format!("storage,{},conc", value),
                Word::Symbolic { .. } => match instr.arguments[0].ssa_index() {
                    Some(ssa) => format!("storage,{},sym", ssa),
                    None => format!("storage,{},sym", rv),
                },
            };
            let value = Word::symbol(ctx, &name, WORD_SIZE);
            state.storage.set(&key, value.clone());
            value
        }
    };
    state.registers.set(rv, value);
    Ok(())
}

pub(super) fn sstore<'ctx>(
    _ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let key = require_arg(instr, 0, &state.registers)?;
    let value = require_arg(instr, 1, &state.registers)?;
    state.storage.set(&key, value);
    Ok(())
}

fn fallthrough_block(program: &Program, block: BlockId) -> Option<BlockId> {
    program.block(block).fallthrough
}

pub(super) fn jump<'ctx>(
    _ctx: &'ctx Context,
    program: &Program,
    block: BlockId,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<Vec<Successor<'ctx>>> {
    require_args(instr, 1)?;
    let destination = require_arg(instr, 0, &state.registers)?;

    if destination.is_symbolic() {
        warn!("destination argument is symbolic in JUMP instruction");
        return Ok(Vec::new());
    }
    let destination = destination.as_usize()?;

    if let Some(ft) = fallthrough_block(program, block) {
        if program.block(ft).offset == destination {
            warn!("JUMP should not have fallthrough block, taking it anyway");
            return Ok(vec![Successor::unconditional(ft)]);
        }
    }

    match program.jump_target(block, destination) {
        Some(target) => Ok(vec![Successor::unconditional(target)]),
        None => {
            warn!("cannot find a block to jump to");
            Ok(Vec::new())
        }
    }
}

pub(super) fn jumpi<'ctx>(
    ctx: &'ctx Context,
    program: &Program,
    block: BlockId,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<Vec<Successor<'ctx>>> {
    require_args(instr, 2)?;
    let destination = require_arg(instr, 0, &state.registers)?;
    let condition = require_arg(instr, 1, &state.registers)?;

    if destination.is_symbolic() {
        warn!("JUMPI needs destination to be concrete");
        return Ok(Vec::new());
    }
    let destination = destination.as_usize()?;

    if condition.is_concrete() {
        let target = if condition.is_concrete_zero() {
            fallthrough_block(program, block)
        } else {
            program.jump_target(block, destination)
        };
        return Ok(match target {
            Some(target) => vec![Successor::unconditional(target)],
            None => {
                warn!("cannot find a block to jump to");
                Vec::new()
            }
        });
    }

    // Symbolic condition: both edges, the fallthrough first.
    let mut successors = Vec::new();
    if let Some(ft) = fallthrough_block(program, block) {
        successors.push(Successor::conditional(
            ft,
            condition.eq_zero(ctx).to_z3(ctx),
        ));
    }
    if let Some(target) = program.jump_target(block, destination) {
        successors.push(Successor::conditional(
            target,
            condition.eq_zero(ctx).not().to_z3(ctx),
        ));
    }
    Ok(successors)
}

pub(super) fn pc<'ctx>(instr: &Instruction, state: &mut State<'ctx>) -> ExecResult<()> {
    let rv = require_return_value(instr)?;
    state
        .registers
        .set(rv, Word::from_u64(instr.offset as u64, WORD_SIZE));
    Ok(())
}

pub(super) fn msize<'ctx>(instr: &Instruction, state: &mut State<'ctx>) -> ExecResult<()> {
    let rv = require_return_value(instr)?;
    let size = state.memory.size();
    state.registers.set(rv, Word::from_u64(size, WORD_SIZE));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::execute_instruction;
    use conkas_ssa::{BlockId, Opcode, ProgramBuilder, StackValue};
    use conkas_state::{Environment, State};
    use conkas_solver::{free_vars_of_word, var_name};
    use std::rc::Rc;
    use z3::{Config, Context};

    fn branch_program() -> ProgramBuilder {
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b0 = builder.add_block(f, 0);
        let b1 = builder.add_block(f, 10);
        let b2 = builder.add_block(f, 20);
        builder.set_fallthrough(b0, b1);
        builder.add_jump_edge(b0, b2);
        builder
    }

    #[test]
    fn test_jumpi_concrete_true_takes_jump_edge() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = branch_program();
        builder.push_insn(
            BlockId(0),
            0,
            Opcode::JumpI,
            vec![StackValue::concrete(20), StackValue::concrete(1)],
            None,
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        let edges = execute_instruction(
            &ctx,
            &program,
            BlockId(0),
            &program.block(BlockId(0)).insns[0],
            &mut state,
        )
        .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].block, BlockId(2));
        assert!(edges[0].constraint.is_none());
    }

    #[test]
    fn test_jumpi_concrete_false_takes_fallthrough() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = branch_program();
        builder.push_insn(
            BlockId(0),
            0,
            Opcode::JumpI,
            vec![StackValue::concrete(20), StackValue::concrete(0)],
            None,
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        let edges = execute_instruction(
            &ctx,
            &program,
            BlockId(0),
            &program.block(BlockId(0)).insns[0],
            &mut state,
        )
        .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].block, BlockId(1));
    }

    #[test]
    fn test_jumpi_symbolic_returns_both_edges() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = branch_program();
        builder.push_insn(BlockId(0), 0, Opcode::CallValue, vec![], Some(1));
        builder.push_insn(
            BlockId(0),
            1,
            Opcode::JumpI,
            vec![StackValue::concrete(20), StackValue::Ssa(1)],
            None,
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        let block = BlockId(0);
        execute_instruction(&ctx, &program, block, &program.block(block).insns[0], &mut state)
            .unwrap();
        let edges = execute_instruction(
            &ctx,
            &program,
            block,
            &program.block(block).insns[1],
            &mut state,
        )
        .unwrap();
        assert_eq!(edges.len(), 2);
        // Fallthrough first, carrying cond == 0; jump second with cond != 0.
        assert_eq!(edges[0].block, BlockId(1));
        assert_eq!(edges[1].block, BlockId(2));
        assert!(edges[0].constraint.is_some());
        assert!(edges[1].constraint.is_some());
    }

    #[test]
    fn test_jump_symbolic_destination_stops() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = branch_program();
        builder.push_insn(BlockId(0), 0, Opcode::CallValue, vec![], Some(1));
        builder.push_insn(BlockId(0), 1, Opcode::Jump, vec![StackValue::Ssa(1)], None);
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        let block = BlockId(0);
        execute_instruction(&ctx, &program, block, &program.block(block).insns[0], &mut state)
            .unwrap();
        let edges = execute_instruction(
            &ctx,
            &program,
            block,
            &program.block(block).insns[1],
            &mut state,
        )
        .unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn test_sload_fresh_symbol_name_and_memoisation() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(b, 0, Opcode::SLoad, vec![StackValue::concrete(0)], Some(1));
        builder.push_insn(b, 1, Opcode::SLoad, vec![StackValue::concrete(0)], Some(2));
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        for instr in &program.block(b).insns {
            execute_instruction(&ctx, &program, b, instr, &mut state).unwrap();
        }
        let first = state.registers.get(1).unwrap();
        let names: Vec<String> = free_vars_of_word(&first).iter().map(var_name).collect();
        assert_eq!(names, vec!["storage,0,conc".to_string()]);
        // The second load observes the stored symbol, not a new one.
        assert_eq!(state.registers.get(2).unwrap(), first);
    }

    #[test]
    fn test_sstore_then_sload_round_trip() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(
            b,
            0,
            Opcode::SStore,
            vec![StackValue::concrete(5), StackValue::concrete(77)],
            None,
        );
        builder.push_insn(b, 1, Opcode::SLoad, vec![StackValue::concrete(5)], Some(1));
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        for instr in &program.block(b).insns {
            execute_instruction(&ctx, &program, b, instr, &mut state).unwrap();
        }
        assert_eq!(state.registers.get(1).unwrap().as_u64().unwrap(), 77);
    }

    #[test]
    fn test_mstore_mload_round_trip() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(
            b,
            0,
            Opcode::MStore,
            vec![StackValue::concrete(0), StackValue::concrete(0xbeef)],
            None,
        );
        builder.push_insn(b, 1, Opcode::MLoad, vec![StackValue::concrete(0)], Some(1));
        builder.push_insn(b, 2, Opcode::MSize, vec![], Some(2));
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        for instr in &program.block(b).insns {
            execute_instruction(&ctx, &program, b, instr, &mut state).unwrap();
        }
        assert_eq!(state.registers.get(1).unwrap().as_u64().unwrap(), 0xbeef);
        assert_eq!(state.registers.get(2).unwrap().as_u64().unwrap(), 32);
    }

    #[test]
    fn test_mstore8_stores_low_byte() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(
            b,
            0,
            Opcode::MStore8,
            vec![StackValue::concrete(0), StackValue::concrete(0x1234)],
            None,
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        execute_instruction(&ctx, &program, b, &program.block(b).insns[0], &mut state).unwrap();
        let loaded = state.memory.load(&conkas_word::Word::zero(256), 1, &ctx);
        assert_eq!(loaded.as_u64().unwrap(), 0x34);
    }

    #[test]
    fn test_pc_returns_offset() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(b, 42, Opcode::Pc, vec![], Some(1));
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        execute_instruction(&ctx, &program, b, &program.block(b).insns[0], &mut state).unwrap();
        assert_eq!(state.registers.get(1).unwrap().as_u64().unwrap(), 42);
    }
}
