// SPDX-License-Identifier: AGPL-3.0

//! Reentrancy detection around external CALLs.
//!
//! Two complementary checks per CALL. The post-call check inspects the
//! constraints added after the call's block: a guard re-reading storage
//! that the callee could have rewritten marks the path protected or
//! impossible. The pre-call check rebuilds the guard constraints against
//! the storage values as they stood *before* the call (using the version
//! stacks to see through later same-block SSTOREs); if that system is
//! satisfiable, the contract let an external callee observe stale state.

use std::collections::HashSet;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use z3::ast::{Ast, Bool, Dynamic};

use conkas_exec::{arg_value, AnalyzedBlock, Trace};
use conkas_solver::{free_vars_of_bool, is_leaf_var, var_name};
use conkas_ssa::{Instruction, Opcode};
use conkas_state::State;
use conkas_word::{Word, WORD_SIZE};

use crate::{block_with_constraint, AnalysisContext, VulnKind, Vulnerability};

/// Instructions of the block with the given opcode, in order.
fn find_instructions<'p>(
    insns: &'p [Instruction],
    opcode: &Opcode,
) -> Vec<&'p Instruction> {
    insns.iter().filter(|i| &i.opcode == opcode).collect()
}

/// Decode a `storage,<pos>,<conc|sym>` variable name into the slot key it
/// refers to. Symbolic positions name the SSA register holding the key.
fn storage_position<'ctx>(info: &[&str], state: &State<'ctx>) -> Option<Word<'ctx>> {
    if !info.first()?.contains("storage") {
        return None;
    }
    let position = BigUint::parse_bytes(info.get(1)?.as_bytes(), 10)?;
    let symbolic_position = *info.get(2)? == "sym";
    if symbolic_position {
        state.registers.get(position.to_usize()?)
    } else {
        Some(Word::from_biguint(position, WORD_SIZE))
    }
}

/// The storage value the named variable refers to, observed at the
/// version that precedes any of the given later SSTOREs to the same slot.
fn storage_var<'ctx>(
    name: &str,
    state: &State<'ctx>,
    sstores: &[&Instruction],
) -> Option<Word<'ctx>> {
    let info: Vec<&str> = name.split(',').collect();
    let position = storage_position(&info, state)?;

    let mut version = -1i64;
    for sstore in sstores {
        if let Some(idx) = arg_value(sstore, 0, &state.registers) {
            if idx == position {
                version -= 1;
            }
        }
    }
    state.storage.get(&position, version)
}

/// Post-call verdict, encoded as a constraint list the caller feeds to
/// the solver: empty means "no verdict, try the pre-call check", a
/// literal `false` means the path is protected or impossible, a literal
/// `true` means a finding.
fn reentrancy_post_call<'ctx>(
    trace: &Trace<'ctx>,
    record: &AnalyzedBlock<'ctx>,
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Vec<Bool<'ctx>> {
    let ctx = actx.solver.context();
    let remaining = trace.constraints_after(record);

    for constraint in remaining.iter().rev() {
        let Some(block) = block_with_constraint(trace, constraint) else {
            continue;
        };
        for var in free_vars_of_bool(constraint) {
            let name = var_name(&var);
            let Some(value) = storage_var(&name, &block.state, &[]) else {
                continue;
            };
            let Some(var_bv) = var.as_bv() else {
                continue;
            };

            let differs = var_bv._eq(&value.to_bv(ctx)).not();
            let is_sat = actx.solver.check(&[differs]).is_sat();
            let simplified = constraint.simplify();

            if !is_sat {
                if simplified.as_bool() == Some(false) {
                    // Impossible path.
                    return vec![Bool::from_bool(ctx, false)];
                }
                // No verdict here; the pre-call check decides.
                return Vec::new();
            }
            if simplified.as_bool() == Some(true) {
                // Guard re-reads storage and still holds: protected.
                return vec![Bool::from_bool(ctx, false)];
            }
            if simplified.as_bool() == Some(false) {
                return vec![Bool::from_bool(ctx, true)];
            }
            // Could be a false positive, but report it.
            return vec![Bool::from_bool(ctx, true)];
        }
    }
    Vec::new()
}

/// Build the pre-call constraint system: every path constraint that
/// mentions a storage cell, an equality pinning the variable to the
/// cell's pre-call value, and a non-zero requirement when the transferred
/// value itself comes from storage.
fn reentrancy_pre_call<'ctx>(
    record: &AnalyzedBlock<'ctx>,
    sstores: &[&Instruction],
    call_value: Option<Word<'ctx>>,
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Vec<Bool<'ctx>> {
    let ctx = actx.solver.context();
    let mut constraints = Vec::new();

    for constraint in &record.constraints {
        let simplified = constraint.simplify();
        for var in free_vars_of_bool(&simplified) {
            let name = var_name(&var);
            let Some(value) = storage_var(&name, &record.state, sstores) else {
                continue;
            };
            let Some(var_bv) = var.as_bv() else {
                continue;
            };
            constraints.push(simplified.clone());
            constraints.push(var_bv._eq(&value.to_bv(ctx)));
        }
    }

    if let Some(Word::Symbolic { expr, .. }) = &call_value {
        let term = Dynamic::from_ast(expr);
        if !is_leaf_var(&term) {
            // A computed transfer amount: nothing to pin down, treat the
            // system as trivially satisfiable.
            constraints.push(Bool::from_bool(ctx, true));
            return constraints;
        }
        let name = var_name(&term);
        if let Some(value) = storage_var(&name, &record.state, sstores) {
            let zero = Word::zero(WORD_SIZE);
            constraints.push(value.eq(&zero, ctx).to_z3(ctx).not());
        }
    }

    constraints
}

pub fn reentrancy_analyse<'ctx>(
    traces: &[Trace<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> HashSet<Vulnerability> {
    let mut all_vulns = HashSet::new();
    let mut seen_records: HashSet<usize> = HashSet::new();

    for trace in traces {
        if trace.state.reverted {
            continue;
        }

        let mut analyzed_any_call = false;
        let mut exist_constraints = false;
        let mut last_call: Option<(String, usize, usize)> = None;

        for record in &trace.analyzed_blocks {
            if !seen_records.insert(record.id()) {
                continue;
            }

            for instr in find_instructions(
                &actx.program.block(record.block).insns,
                &Opcode::Call,
            ) {
                analyzed_any_call = true;
                last_call = Some((
                    actx.function_name(record),
                    instr.offset,
                    instr.instruction_offset,
                ));

                let constraints = reentrancy_post_call(trace, record, actx);
                if !constraints.is_empty() {
                    exist_constraints = true;
                    if actx.solver.check(&constraints).is_sat() {
                        all_vulns.insert(Vulnerability::new(
                            VulnKind::Reentrancy,
                            actx.function_name(record),
                            instr.offset,
                            instr.instruction_offset,
                        ));
                        if !actx.find_all {
                            return all_vulns;
                        }
                    }
                    continue;
                }

                // Only stores that happen after the call shadow the
                // values the callee could have observed.
                let sstores: Vec<&Instruction> = find_instructions(
                    &actx.program.block(record.block).insns,
                    &Opcode::SStore,
                )
                .into_iter()
                .filter(|s| s.offset > instr.offset)
                .collect();
                let call_value = arg_value(instr, 2, &record.state.registers);

                let constraints = reentrancy_pre_call(record, &sstores, call_value, actx);
                if !constraints.is_empty() {
                    exist_constraints = true;
                    if actx.solver.check(&constraints).is_sat() {
                        all_vulns.insert(Vulnerability::new(
                            VulnKind::Reentrancy,
                            actx.function_name(record),
                            instr.offset,
                            instr.instruction_offset,
                        ));
                        if !actx.find_all {
                            return all_vulns;
                        }
                    }
                }
            }
        }

        // A CALL was reached but neither check produced a constraint
        // system: report it as unguarded.
        if analyzed_any_call && !exist_constraints {
            if let Some((function_name, offset, instruction_offset)) = last_call {
                all_vulns.insert(Vulnerability::new(
                    VulnKind::Reentrancy,
                    function_name,
                    offset,
                    instruction_offset,
                ));
                if !actx.find_all {
                    return all_vulns;
                }
            }
        }
    }
    all_vulns
}
