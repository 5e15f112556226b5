// SPDX-License-Identifier: AGPL-3.0

//! Integer overflow and underflow detection.
//!
//! ADD/MUL results are checked for wrap-around, SUB for underflow;
//! concrete operands are decided directly, symbolic ones through the
//! solver with the trace's path condition asserted. A small heuristic
//! recognises the `(1 << 8k) - 1` bitmask idiom (`MUL`/`EXP` by 256
//! followed by `SUB` of 1) and skips the rest of that trace.

use std::collections::HashSet;

use num_bigint::BigUint;

use conkas_exec::{arg_value, AnalyzedBlock, Trace};
use conkas_solver::{free_vars_of_word, CheckResult, SolvedModel};
use conkas_ssa::{Instruction, Opcode};
use conkas_word::Word;

use crate::{AnalysisContext, VulnKind, Vulnerability};

fn witness_value<'ctx>(model: &SolvedModel<'ctx>, word: &Word<'ctx>) -> Option<BigUint> {
    if word.is_concrete() {
        return word.as_biguint().ok();
    }
    // Report the first free variable of the operand, as the finding
    // output names single variables.
    let vars = free_vars_of_word(word);
    if let Some(first) = vars.first() {
        if let Some(bv) = first.as_bv() {
            return model.eval_bv(&bv);
        }
    }
    model.eval_word(word)
}

fn witness_model<'ctx>(
    model: &SolvedModel<'ctx>,
    a: &Word<'ctx>,
    b: &Word<'ctx>,
) -> Vec<(String, BigUint)> {
    let mut out = Vec::new();
    if let Some(value) = witness_value(model, a) {
        out.push(("a".to_string(), value));
    }
    if let Some(value) = witness_value(model, b) {
        out.push(("b".to_string(), value));
    }
    out
}

fn concrete_model<'ctx>(a: &Word<'ctx>, b: &Word<'ctx>) -> Vec<(String, BigUint)> {
    vec![
        ("a".to_string(), a.as_biguint().unwrap_or_default()),
        ("b".to_string(), b.as_biguint().unwrap_or_default()),
    ]
}

fn add_overflow<'ctx>(
    instr: &Instruction,
    record: &AnalyzedBlock<'ctx>,
    constraints: &[z3::ast::Bool<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let ctx = actx.solver.context();
    let regs = &record.state.registers;
    let a = arg_value(instr, 0, regs)?;
    let b = arg_value(instr, 1, regs)?;
    let c = a.add(&b, ctx);

    if c.is_concrete() {
        if c.as_biguint().ok()? < a.as_biguint().ok()? {
            return Some(
                Vulnerability::new(
                    VulnKind::IntegerOverflow,
                    actx.function_name(record),
                    instr.offset,
                    instr.instruction_offset,
                )
                .with_model(concrete_model(&a, &b)),
            );
        }
        return None;
    }

    let mut query: Vec<z3::ast::Bool> = constraints.to_vec();
    query.push(c.ult(&a, ctx).to_z3(ctx));
    match actx.solver.check(&query) {
        CheckResult::Sat(model) => Some(
            Vulnerability::new(
                VulnKind::IntegerOverflow,
                actx.function_name(record),
                instr.offset,
                instr.instruction_offset,
            )
            .with_model(witness_model(&model, &a, &b)),
        ),
        _ => None,
    }
}

fn mul_overflow<'ctx>(
    instr: &Instruction,
    record: &AnalyzedBlock<'ctx>,
    constraints: &[z3::ast::Bool<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let ctx = actx.solver.context();
    let regs = &record.state.registers;
    let a = arg_value(instr, 0, regs)?;
    let b = arg_value(instr, 1, regs)?;
    let c = a.mul(&b, ctx);

    if c.is_concrete() {
        let a_value = a.as_biguint().ok()?;
        let b_value = b.as_biguint().ok()?;
        let c_value = c.as_biguint().ok()?;
        if a_value != BigUint::default() && c_value / &a_value != b_value {
            return Some(
                Vulnerability::new(
                    VulnKind::IntegerOverflow,
                    actx.function_name(record),
                    instr.offset,
                    instr.instruction_offset,
                )
                .with_model(concrete_model(&a, &b)),
            );
        }
        return None;
    }

    let mut query: Vec<z3::ast::Bool> = constraints.to_vec();
    let no_overflow = a.to_bv(ctx).bvmul_no_overflow(&b.to_bv(ctx), false);
    query.push(no_overflow.not());

    // Multiplication overflow is the hardest query class; it runs with an
    // enlarged budget.
    let timeout = actx
        .solver
        .timeout_ms()
        .saturating_mul(actx.mul_timeout_factor);
    match actx.solver.check_with_timeout(&query, timeout) {
        CheckResult::Sat(model) => Some(
            Vulnerability::new(
                VulnKind::IntegerOverflow,
                actx.function_name(record),
                instr.offset,
                instr.instruction_offset,
            )
            .with_model(witness_model(&model, &a, &b)),
        ),
        _ => None,
    }
}

fn sub_underflow<'ctx>(
    instr: &Instruction,
    record: &AnalyzedBlock<'ctx>,
    constraints: &[z3::ast::Bool<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let ctx = actx.solver.context();
    let regs = &record.state.registers;
    let a = arg_value(instr, 0, regs)?;
    let b = arg_value(instr, 1, regs)?;

    if Word::all_concrete(&[&a, &b]) {
        if b.as_biguint().ok()? > a.as_biguint().ok()? {
            return Some(
                Vulnerability::new(
                    VulnKind::IntegerUnderflow,
                    actx.function_name(record),
                    instr.offset,
                    instr.instruction_offset,
                )
                .with_model(concrete_model(&a, &b)),
            );
        }
        return None;
    }

    let mut query: Vec<z3::ast::Bool> = constraints.to_vec();
    query.push(b.ugt(&a, ctx).to_z3(ctx));
    match actx.solver.check(&query) {
        CheckResult::Sat(model) => Some(
            Vulnerability::new(
                VulnKind::IntegerUnderflow,
                actx.function_name(record),
                instr.offset,
                instr.instruction_offset,
            )
            .with_model(witness_model(&model, &a, &b)),
        ),
        _ => None,
    }
}

fn concrete_arg_is<'ctx>(
    instr: &Instruction,
    idx: usize,
    record: &AnalyzedBlock<'ctx>,
    expected: u64,
) -> bool {
    matches!(
        arg_value(instr, idx, &record.state.registers),
        Some(word) if word.is_concrete() && word.as_u64().ok() == Some(expected)
    )
}

pub fn arithmetic_analyse<'ctx>(
    traces: &[Trace<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> HashSet<Vulnerability> {
    let mut all_vulns = HashSet::new();
    let mut seen_records: HashSet<usize> = HashSet::new();
    let mut was_mul_with_256 = false;
    let mut was_exp_with_256 = false;

    'traces: for trace in traces {
        if trace.state.reverted {
            continue;
        }
        let all_constraints = &trace.constraints;

        for record in &trace.analyzed_blocks {
            if !seen_records.insert(record.id()) {
                continue;
            }

            for instr in &actx.program.block(record.block).insns {
                match instr.opcode {
                    Opcode::Add | Opcode::Mul => {
                        if instr.opcode == Opcode::Mul && concrete_arg_is(instr, 0, record, 256) {
                            was_mul_with_256 = true;
                        }
                        let vuln = if instr.opcode == Opcode::Add {
                            add_overflow(instr, record, all_constraints, actx)
                        } else {
                            mul_overflow(instr, record, all_constraints, actx)
                        };
                        if let Some(vuln) = vuln {
                            all_vulns.insert(vuln);
                            if !actx.find_all {
                                return all_vulns;
                            }
                        }
                    }
                    Opcode::Sub => {
                        if was_mul_with_256 || was_exp_with_256 {
                            was_mul_with_256 = false;
                            was_exp_with_256 = false;
                            if concrete_arg_is(instr, 1, record, 1) {
                                // Bitmask idiom, not an underflow: skip
                                // the rest of this trace.
                                continue 'traces;
                            }
                        }
                        if let Some(vuln) = sub_underflow(instr, record, all_constraints, actx) {
                            all_vulns.insert(vuln);
                            if !actx.find_all {
                                return all_vulns;
                            }
                        }
                    }
                    Opcode::Exp => {
                        if concrete_arg_is(instr, 0, record, 256) {
                            was_exp_with_256 = true;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    all_vulns
}
