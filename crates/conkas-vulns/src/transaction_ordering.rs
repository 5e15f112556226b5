// SPDX-License-Identifier: AGPL-3.0

//! Transaction-ordering dependence: a CALL whose transferred value comes
//! straight out of storage, when some other path leaves a different
//! value in that slot; the amount paid depends on which transaction
//! lands first.

use std::collections::HashSet;

use num_bigint::BigUint;
use z3::ast::Dynamic;

use conkas_exec::{arg_value, Trace};
use conkas_solver::{is_leaf_var, var_name};
use conkas_ssa::Opcode;
use conkas_state::Storage;
use conkas_word::Word;

use crate::{AnalysisContext, VulnKind, Vulnerability};

struct StorageBackedCall<'ctx> {
    position: BigUint,
    value: Word<'ctx>,
    function_name: String,
    pc: usize,
    instruction_offset: usize,
}

/// The slot position when the call's value operand is a bare
/// `storage,<pos>,…` symbol.
fn storage_position_of_value(value: &Word<'_>) -> Option<BigUint> {
    let Word::Symbolic { expr, .. } = value else {
        return None;
    };
    let term = Dynamic::from_ast(expr);
    if !is_leaf_var(&term) {
        return None;
    }
    let name = var_name(&term);
    let info: Vec<&str> = name.split(',').collect();
    if !info.first()?.contains("storage") {
        return None;
    }
    BigUint::parse_bytes(info.get(1)?.as_bytes(), 10)
}

pub fn tod_analyse<'ctx>(
    traces: &[Trace<'ctx>],
    actx: &AnalysisContext<'_, '_, 'ctx>,
) -> HashSet<Vulnerability> {
    let mut all_vulns = HashSet::new();
    let mut seen_records: HashSet<usize> = HashSet::new();
    let mut interesting_calls: Vec<StorageBackedCall<'ctx>> = Vec::new();
    let mut final_storages: Vec<&Storage<'ctx>> = Vec::new();

    for trace in traces {
        if trace.state.reverted {
            continue;
        }
        for record in &trace.analyzed_blocks {
            if !seen_records.insert(record.id()) {
                continue;
            }
            for instr in &actx.program.block(record.block).insns {
                if !matches!(instr.opcode, Opcode::Call | Opcode::CallCode) {
                    continue;
                }
                let Some(value) = arg_value(instr, 2, &record.state.registers) else {
                    continue;
                };
                if let Some(position) = storage_position_of_value(&value) {
                    interesting_calls.push(StorageBackedCall {
                        position,
                        value,
                        function_name: actx.function_name(record),
                        pc: instr.offset,
                        instruction_offset: instr.instruction_offset,
                    });
                }
            }
        }
        final_storages.push(&trace.state.storage);
    }

    for call in &interesting_calls {
        for storage in &final_storages {
            let Some(other_value) = storage.get_concrete_key(&call.position) else {
                continue;
            };
            if other_value != call.value {
                all_vulns.insert(Vulnerability::new(
                    VulnKind::TransactionOrderingDependence,
                    call.function_name.clone(),
                    call.pc,
                    call.instruction_offset,
                ));
                if !actx.find_all {
                    return all_vulns;
                }
            }
        }
    }
    all_vulns
}
