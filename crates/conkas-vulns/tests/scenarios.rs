// SPDX-License-Identifier: AGPL-3.0

//! End-to-end detection scenarios: small hand-lifted contracts run
//! through the explorer and the analyses.

use conkas_exec::{SymExec, Trace};
use conkas_solver::SolverFacade;
use conkas_ssa::{Opcode, Program, ProgramBuilder, StackValue};
use conkas_vulns::{VulnClass, VulnKind, Vulnerability, VulnerabilityFinder};
use conkas_word::mask;
use num_bigint::BigUint;
use z3::{Config, Context};

fn explore<'ctx>(ctx: &'ctx Context, program: &Program) -> Vec<Trace<'ctx>> {
    SymExec::new(ctx, program).execute().unwrap()
}

fn analyse<'ctx>(
    ctx: &'ctx Context,
    program: &Program,
    traces: &[Trace<'ctx>],
    classes: &[VulnClass],
    find_all: bool,
) -> Vec<Vulnerability> {
    let solver = SolverFacade::new(ctx, 1000);
    let finder = VulnerabilityFinder::new(
        traces, program, "Test", None, &solver, find_all, 25, 1000,
    );
    finder.analyse_only(classes)
}

fn call_args(value: StackValue) -> Vec<StackValue> {
    vec![
        StackValue::concrete(2300),
        StackValue::concrete(0xdead),
        value,
        StackValue::concrete(0),
        StackValue::concrete(0),
        StackValue::concrete(0),
        StackValue::concrete(0),
    ]
}

#[test]
fn test_scenario_add_overflow_concrete() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    builder.push_insn(
        b0,
        0,
        Opcode::Add,
        vec![StackValue::Concrete(mask(256)), StackValue::concrete(2)],
        Some(1),
    );
    builder.push_insn(b0, 1, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(&ctx, &program, &traces, &[VulnClass::Arithmetic], false);

    assert_eq!(vulns.len(), 1);
    assert_eq!(vulns[0].kind, VulnKind::IntegerOverflow);
    assert_eq!(vulns[0].pc, 0);
    assert_eq!(
        vulns[0].model,
        vec![
            ("a".to_string(), mask(256)),
            ("b".to_string(), BigUint::from(2u32)),
        ]
    );
}

#[test]
fn test_scenario_sub_underflow_symbolic() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    builder.push_insn(b0, 0, Opcode::CallValue, vec![], Some(1));
    builder.push_insn(
        b0,
        1,
        Opcode::Sub,
        vec![StackValue::Ssa(1), StackValue::concrete(1000)],
        Some(2),
    );
    builder.push_insn(b0, 2, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(&ctx, &program, &traces, &[VulnClass::Arithmetic], false);

    assert_eq!(vulns.len(), 1);
    assert_eq!(vulns[0].kind, VulnKind::IntegerUnderflow);
    // The witness makes callvalue smaller than the subtrahend.
    let a = vulns
        .iter()
        .flat_map(|v| v.model.iter())
        .find(|(name, _)| name == "a")
        .map(|(_, value)| value.clone())
        .expect("witness for a");
    let b = vulns[0]
        .model
        .iter()
        .find(|(name, _)| name == "b")
        .map(|(_, value)| value.clone())
        .expect("witness for b");
    assert_eq!(b, BigUint::from(1000u32));
    assert!(a < b);
}

/// Balance check, CALL, then the storage write: the callee can re-enter
/// while the stale balance still passes the guard.
#[test]
fn test_scenario_reentrancy_positive() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("withdraw()", 0);
    let b0 = builder.add_block(f, 0);
    let b1 = builder.add_block(f, 10);
    let b2 = builder.add_block(f, 30);
    builder.set_fallthrough(b0, b1);
    builder.add_jump_edge(b0, b2);

    builder.push_insn(b0, 0, Opcode::SLoad, vec![StackValue::concrete(0)], Some(1));
    builder.push_insn(
        b0,
        1,
        Opcode::Lt,
        vec![StackValue::Ssa(1), StackValue::concrete(1000)],
        Some(2),
    );
    builder.push_insn(
        b0,
        2,
        Opcode::JumpI,
        vec![StackValue::concrete(30), StackValue::Ssa(2)],
        None,
    );

    builder.push_insn(b1, 10, Opcode::Call, call_args(StackValue::concrete(1000)), Some(3));
    builder.push_insn(
        b1,
        11,
        Opcode::Sub,
        vec![StackValue::Ssa(1), StackValue::concrete(1000)],
        Some(4),
    );
    builder.push_insn(
        b1,
        12,
        Opcode::SStore,
        vec![StackValue::concrete(0), StackValue::Ssa(4)],
        None,
    );
    builder.push_insn(b1, 13, Opcode::Stop, vec![], None);
    builder.push_insn(b2, 30, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(&ctx, &program, &traces, &[VulnClass::Reentrancy], false);

    assert_eq!(vulns.len(), 1);
    assert_eq!(vulns[0].kind, VulnKind::Reentrancy);
    assert_eq!(vulns[0].pc, 10);
    assert_eq!(vulns[0].function_name, "withdraw()");
}

/// Checks-effects-interactions: the storage write precedes the CALL, so
/// the versioned lookup sees the updated balance and the guard system is
/// unsatisfiable.
#[test]
fn test_scenario_reentrancy_negative() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("withdraw()", 0);
    let b0 = builder.add_block(f, 0);
    let b1 = builder.add_block(f, 10);
    let b2 = builder.add_block(f, 30);
    builder.set_fallthrough(b0, b1);
    builder.add_jump_edge(b0, b2);

    builder.push_insn(b0, 0, Opcode::SLoad, vec![StackValue::concrete(0)], Some(1));
    builder.push_insn(
        b0,
        1,
        Opcode::Lt,
        vec![StackValue::Ssa(1), StackValue::concrete(1000)],
        Some(2),
    );
    builder.push_insn(
        b0,
        2,
        Opcode::JumpI,
        vec![StackValue::concrete(30), StackValue::Ssa(2)],
        None,
    );

    builder.push_insn(
        b1,
        10,
        Opcode::Sub,
        vec![StackValue::Ssa(1), StackValue::concrete(1000)],
        Some(3),
    );
    builder.push_insn(
        b1,
        11,
        Opcode::SStore,
        vec![StackValue::concrete(0), StackValue::Ssa(3)],
        None,
    );
    builder.push_insn(b1, 12, Opcode::Call, call_args(StackValue::concrete(1000)), Some(4));
    builder.push_insn(b1, 13, Opcode::Stop, vec![], None);
    builder.push_insn(b2, 30, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(&ctx, &program, &traces, &[VulnClass::Reentrancy], false);

    assert!(vulns.is_empty());
}

#[test]
fn test_scenario_time_manipulation() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("lottery()", 0);
    let b0 = builder.add_block(f, 0);
    let b1 = builder.add_block(f, 10);
    let b2 = builder.add_block(f, 30);
    builder.set_fallthrough(b0, b1);
    builder.add_jump_edge(b0, b2);

    builder.push_insn(b0, 0, Opcode::Timestamp, vec![], Some(1));
    builder.push_insn(
        b0,
        1,
        Opcode::Lt,
        vec![StackValue::Ssa(1), StackValue::concrete(100_000)],
        Some(2),
    );
    builder.push_insn(
        b0,
        2,
        Opcode::JumpI,
        vec![StackValue::concrete(30), StackValue::Ssa(2)],
        None,
    );
    builder.push_insn(
        b1,
        10,
        Opcode::SStore,
        vec![StackValue::concrete(7), StackValue::Ssa(1)],
        None,
    );
    builder.push_insn(b1, 11, Opcode::Stop, vec![], None);
    builder.push_insn(b2, 30, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(
        &ctx,
        &program,
        &traces,
        &[VulnClass::TimeManipulation],
        true,
    );

    // One finding on the time-dependent branch, one on the store.
    assert_eq!(vulns.len(), 2);
    assert!(vulns
        .iter()
        .all(|v| v.kind == VulnKind::TimeManipulation));
    let pcs: Vec<usize> = vulns.iter().map(|v| v.pc).collect();
    assert!(pcs.contains(&2));
    assert!(pcs.contains(&10));
}

#[test]
fn test_scenario_unchecked_low_level_call() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("pay()", 0);
    let b0 = builder.add_block(f, 0);
    builder.push_insn(b0, 0, Opcode::Call, call_args(StackValue::concrete(1)), Some(1));
    builder.push_insn(b0, 1, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(
        &ctx,
        &program,
        &traces,
        &[VulnClass::UncheckedLowLevelCalls],
        false,
    );

    assert_eq!(vulns.len(), 1);
    assert_eq!(vulns[0].kind, VulnKind::UncheckedLowLevelCall);
    assert_eq!(vulns[0].pc, 0);
}

/// The call result feeds a later branch: not unchecked.
#[test]
fn test_unchecked_call_with_guard_is_clean() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("pay()", 0);
    let b0 = builder.add_block(f, 0);
    let b1 = builder.add_block(f, 10);
    let b2 = builder.add_block(f, 30);
    builder.set_fallthrough(b0, b1);
    builder.add_jump_edge(b0, b2);
    builder.push_insn(b0, 0, Opcode::Call, call_args(StackValue::concrete(1)), Some(1));
    builder.push_insn(
        b0,
        1,
        Opcode::JumpI,
        vec![StackValue::concrete(30), StackValue::Ssa(1)],
        None,
    );
    builder.push_insn(b1, 10, Opcode::Stop, vec![], None);
    builder.push_insn(b2, 30, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(
        &ctx,
        &program,
        &traces,
        &[VulnClass::UncheckedLowLevelCalls],
        true,
    );
    assert!(vulns.is_empty());
}

#[test]
fn test_transaction_ordering_dependence() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("payout()", 0);
    let b0 = builder.add_block(f, 0);
    builder.push_insn(b0, 0, Opcode::SLoad, vec![StackValue::concrete(1)], Some(1));
    builder.push_insn(b0, 1, Opcode::Call, call_args(StackValue::Ssa(1)), Some(2));
    builder.push_insn(
        b0,
        2,
        Opcode::SStore,
        vec![StackValue::concrete(1), StackValue::concrete(123)],
        None,
    );
    builder.push_insn(b0, 3, Opcode::Stop, vec![], None);
    let program = builder.build();

    let traces = explore(&ctx, &program);
    let vulns = analyse(
        &ctx,
        &program,
        &traces,
        &[VulnClass::TransactionOrderingDependence],
        false,
    );

    assert_eq!(vulns.len(), 1);
    assert_eq!(vulns[0].kind, VulnKind::TransactionOrderingDependence);
    assert_eq!(vulns[0].pc, 1);
}

/// Reverted traces are invisible to every analysis.
#[test]
fn test_reverted_traces_are_skipped() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut builder = ProgramBuilder::new();
    let f = builder.add_function("_dispatch", 0);
    let b0 = builder.add_block(f, 0);
    builder.push_insn(
        b0,
        0,
        Opcode::Sub,
        vec![StackValue::concrete(1), StackValue::concrete(2)],
        Some(1),
    );
    builder.push_insn(
        b0,
        1,
        Opcode::Revert,
        vec![StackValue::concrete(0), StackValue::concrete(0)],
        None,
    );
    let program = builder.build();

    let traces = explore(&ctx, &program);
    assert!(traces[0].state.reverted);
    let vulns = analyse(&ctx, &program, &traces, &[VulnClass::Arithmetic], true);
    assert!(vulns.is_empty());
}
