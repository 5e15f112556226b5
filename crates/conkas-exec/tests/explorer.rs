// SPDX-License-Identifier: AGPL-3.0

//! Exploration behaviour: forking, constraint accumulation, the depth
//! bound, and the shape of recorded histories.

use conkas_exec::SymExec;
use conkas_ssa::{Opcode, Program, ProgramBuilder, StackValue};
use z3::{Config, Context};

/// entry -- JUMPI --> left (STOP) / right (STOP)
fn diamond() -> Program {
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    let left = builder.add_block(f, 10);
    let right = builder.add_block(f, 20);
    builder.set_fallthrough(b0, left);
    builder.add_jump_edge(b0, right);
    builder.push_insn(b0, 0, Opcode::CallValue, vec![], Some(1));
    builder.push_insn(
        b0,
        1,
        Opcode::JumpI,
        vec![StackValue::concrete(20), StackValue::Ssa(1)],
        None,
    );
    builder.push_insn(left, 10, Opcode::Stop, vec![], None);
    builder.push_insn(right, 20, Opcode::Stop, vec![], None);
    builder.build()
}

#[test]
fn test_symbolic_branch_forks_two_traces() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let program = diamond();
    let traces = SymExec::new(&ctx, &program).execute().unwrap();

    assert_eq!(traces.len(), 2);
    // Both traces carry exactly one branch constraint.
    for trace in &traces {
        assert_eq!(trace.constraints.len(), 1);
        assert_eq!(trace.analyzed_blocks.len(), 2);
        assert!(trace.state.stopped);
        assert!(trace.block_to_analyse.is_none());
    }
}

#[test]
fn test_record_constraints_are_prefixes() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let program = diamond();
    let traces = SymExec::new(&ctx, &program).execute().unwrap();

    for trace in &traces {
        for record in &trace.analyzed_blocks {
            assert!(record.constraints.len() <= trace.constraints.len());
            assert_eq!(
                record.constraints[..],
                trace.constraints[..record.constraints.len()]
            );
        }
    }
}

#[test]
fn test_histories_share_the_common_prefix() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let program = diamond();
    let traces = SymExec::new(&ctx, &program).execute().unwrap();

    // The entry block record is the same object in both traces.
    assert_eq!(
        traces[0].analyzed_blocks[0].id(),
        traces[1].analyzed_blocks[0].id()
    );
    assert_ne!(
        traces[0].analyzed_blocks[1].id(),
        traces[1].analyzed_blocks[1].id()
    );
}

#[test]
fn test_depth_bound_stops_loops() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    // A single block that jumps back to itself forever.
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    builder.add_jump_edge(b0, b0);
    builder.push_insn(b0, 0, Opcode::Jump, vec![StackValue::concrete(0)], None);
    let program = builder.build();

    let traces = SymExec::with_max_depth(&ctx, &program, 7).execute().unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].depth, 7);
    assert_eq!(traces[0].analyzed_blocks.len(), 7);
}

#[test]
fn test_fallthrough_synthesised_for_plain_blocks() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    let b1 = builder.add_block(f, 10);
    builder.set_fallthrough(b0, b1);
    builder.push_insn(
        b0,
        0,
        Opcode::Add,
        vec![StackValue::concrete(1), StackValue::concrete(2)],
        Some(1),
    );
    builder.push_insn(b1, 10, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = SymExec::new(&ctx, &program).execute().unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].analyzed_blocks.len(), 2);
    assert!(traces[0].state.stopped);
}

#[test]
fn test_terminated_block_does_not_fall_through() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    // STOP with a (bogus) fallthrough edge: the trace must end.
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    let b1 = builder.add_block(f, 10);
    builder.set_fallthrough(b0, b1);
    builder.push_insn(b0, 0, Opcode::Stop, vec![], None);
    builder.push_insn(b1, 10, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = SymExec::new(&ctx, &program).execute().unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].analyzed_blocks.len(), 1);
}

#[test]
fn test_empty_program_yields_no_traces() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let program = Program::default();
    let traces = SymExec::new(&ctx, &program).execute().unwrap();
    assert!(traces.is_empty());
}

#[test]
fn test_concrete_branch_takes_single_edge() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    let left = builder.add_block(f, 10);
    let right = builder.add_block(f, 20);
    builder.set_fallthrough(b0, left);
    builder.add_jump_edge(b0, right);
    builder.push_insn(
        b0,
        0,
        Opcode::JumpI,
        vec![StackValue::concrete(20), StackValue::concrete(1)],
        None,
    );
    builder.push_insn(left, 10, Opcode::Stop, vec![], None);
    builder.push_insn(right, 20, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = SymExec::new(&ctx, &program).execute().unwrap();
    assert_eq!(traces.len(), 1);
    assert!(traces[0].constraints.is_empty());
    assert_eq!(traces[0].analyzed_blocks[1].block, right);
}
