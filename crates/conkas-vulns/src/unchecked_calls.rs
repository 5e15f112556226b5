// SPDX-License-Identifier: AGPL-3.0

//! Unchecked low-level calls: the call family's success flag must be
//! consulted by some later path constraint, or the contract is ignoring
//! failures. Traces cut off at the depth bound are skipped; their
//! remaining-constraint window is not trustworthy, which under-reports.

use std::collections::HashSet;

use conkas_exec::Trace;
use conkas_solver::{free_vars_of_bool, var_name};
use conkas_ssa::Opcode;

use crate::{AnalysisContext, VulnKind, Vulnerability};

pub fn unchecked_low_level_calls_analyse<'ctx>(
    traces: &[Trace<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> HashSet<Vulnerability> {
    let mut all_vulns = HashSet::new();
    let mut seen_records: HashSet<usize> = HashSet::new();

    for trace in traces {
        if trace.state.reverted {
            continue;
        }
        if trace.depth >= actx.max_depth {
            continue;
        }

        for record in &trace.analyzed_blocks {
            if !seen_records.insert(record.id()) {
                continue;
            }

            for instr in &actx.program.block(record.block).insns {
                if !matches!(
                    instr.opcode,
                    Opcode::Call | Opcode::CallCode | Opcode::DelegateCall | Opcode::StaticCall
                ) {
                    continue;
                }
                let Some(return_value) = instr.return_value else {
                    continue;
                };

                let remaining = trace.constraints_after(record);
                if remaining.is_empty() {
                    all_vulns.insert(Vulnerability::new(
                        VulnKind::UncheckedLowLevelCall,
                        actx.function_name(record),
                        instr.offset,
                        instr.instruction_offset,
                    ));
                    if !actx.find_all {
                        return all_vulns;
                    }
                    continue;
                }

                let rv_name = return_value.to_string();
                let checked = remaining.iter().any(|constraint| {
                    free_vars_of_bool(constraint)
                        .iter()
                        .any(|var| var_name(var) == rv_name)
                });
                if !checked {
                    all_vulns.insert(Vulnerability::new(
                        VulnKind::UncheckedLowLevelCall,
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
    all_vulns
}
