// SPDX-License-Identifier: AGPL-3.0

//! Time-dependence detection: anything influenced by a free variable
//! literally named `timestamp` (branch constraints, return data, hashed
//! memory, stored values) is reported.

use std::collections::HashSet;

use z3::ast::Bool;

use conkas_exec::{arg_value, AnalyzedBlock, Trace};
use conkas_solver::{free_vars_of_bool, free_vars_of_word, var_name};
use conkas_ssa::{Instruction, Opcode};
use conkas_state::MemRead;
use conkas_word::Word;

use crate::{block_with_constraint, AnalysisContext, VulnKind, Vulnerability};

const TIME_VARIABLE: &str = "timestamp";

fn constraint_based_on_time(constraint: &Bool<'_>) -> bool {
    free_vars_of_bool(constraint)
        .iter()
        .any(|var| var_name(var) == TIME_VARIABLE)
}

fn word_based_on_time(word: &Word<'_>) -> bool {
    free_vars_of_word(word)
        .iter()
        .any(|var| var_name(var) == TIME_VARIABLE)
}

fn vuln_at_last_insn<'ctx>(
    record: &AnalyzedBlock<'ctx>,
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let instr = actx.program.block(record.block).insns.last()?;
    Some(Vulnerability::new(
        VulnKind::TimeManipulation,
        actx.function_name(record),
        instr.offset,
        instr.instruction_offset,
    ))
}

/// Findings for time-dependent path constraints, anchored to the block
/// whose branch introduced them.
fn check_constraints<'ctx>(
    trace: &Trace<'ctx>,
    actx: &AnalysisContext<'_, '_, 'ctx>,
    vulns: &mut HashSet<Vulnerability>,
) -> bool {
    for constraint in &trace.constraints {
        if !constraint_based_on_time(constraint) {
            continue;
        }
        let Some(record) = block_with_constraint(trace, constraint) else {
            continue;
        };
        if let Some(vuln) = vuln_at_last_insn(record, actx) {
            vulns.insert(vuln);
            if !actx.find_all {
                return true;
            }
        }
    }
    false
}

fn check_return_data<'ctx>(
    trace: &Trace<'ctx>,
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let return_data = trace.state.return_data.as_ref()?;
    if return_data.is_concrete() || !word_based_on_time(return_data) {
        return None;
    }
    let record = trace.analyzed_blocks.last()?;
    vuln_at_last_insn(record, actx)
}

fn check_sha3<'ctx>(
    record: &AnalyzedBlock<'ctx>,
    instr: &Instruction,
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let ctx = actx.solver.context();
    let regs = &record.state.registers;
    let offset = arg_value(instr, 0, regs)?;
    let length = arg_value(instr, 1, regs)?;
    if !Word::all_concrete(&[&offset, &length]) {
        return None;
    }
    let length = length.as_usize().ok()?;
    if length == 0 {
        return None;
    }
    match record.state.memory.read(&offset, length, -1, ctx) {
        MemRead::Symbolic(word) if word_based_on_time(&word) => Some(Vulnerability::new(
            VulnKind::TimeManipulation,
            actx.function_name(record),
            instr.offset,
            instr.instruction_offset,
        )),
        _ => None,
    }
}

fn check_sstore<'ctx>(
    record: &AnalyzedBlock<'ctx>,
    instr: &Instruction,
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> Option<Vulnerability> {
    let value = arg_value(instr, 1, &record.state.registers)?;
    if value.is_concrete() || !word_based_on_time(&value) {
        return None;
    }
    Some(Vulnerability::new(
        VulnKind::TimeManipulation,
        actx.function_name(record),
        instr.offset,
        instr.instruction_offset,
    ))
}

pub fn time_manipulation_analyse<'ctx>(
    traces: &[Trace<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> HashSet<Vulnerability> {
    let mut all_vulns = HashSet::new();
    let mut seen_records: HashSet<usize> = HashSet::new();

    for trace in traces {
        if trace.state.reverted {
            continue;
        }

        if check_constraints(trace, actx, &mut all_vulns) {
            return all_vulns;
        }
        if let Some(vuln) = check_return_data(trace, actx) {
            all_vulns.insert(vuln);
            if !actx.find_all {
                return all_vulns;
            }
        }

        for record in &trace.analyzed_blocks {
            if !seen_records.insert(record.id()) {
                continue;
            }
            for instr in &actx.program.block(record.block).insns {
                let vuln = match instr.opcode {
                    Opcode::Sha3 => check_sha3(record, instr, actx),
                    Opcode::SStore => check_sstore(record, instr, actx),
                    _ => None,
                };
                if let Some(vuln) = vuln {
                    all_vulns.insert(vuln);
                    if !actx.find_all {
                        return all_vulns;
                    }
                }
            }
        }
    }
    all_vulns
}
