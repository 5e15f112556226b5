// SPDX-License-Identifier: AGPL-3.0

//! A minimal bytecode-to-SSA lifter.
//!
//! The execution core is specified against the SSA interface an external
//! lifter provides; this crate is a small bundled stand-in so the tool
//! runs end-to-end on raw hex blobs. It decodes opcodes, splits basic
//! blocks at `JUMPDEST` and after terminators, folds `PUSH` constants
//! into operands, simulates the stack per block (materialising entry
//! slots as input registers), resolves static jump targets, and wires
//! `PHI` instructions at joins so values flow across block boundaries.
//! It recovers no function boundaries: everything lives in a single
//! `_dispatch` function. A production lifter replaces this crate behind
//! the same interface.

use num_bigint::BigUint;
use tracing::warn;

use conkas_errors::{ExecError, ExecResult};
use conkas_ssa::{Opcode, Program, ProgramBuilder, StackValue};

/// Rounds of cross-block value propagation before giving up on
/// pathological (stack-unbalanced) code.
const MAX_LINK_ROUNDS: usize = 64;

#[derive(Debug, Clone)]
struct RawInsn {
    pc: usize,
    byte: u8,
    push_data: Option<BigUint>,
}

#[derive(Debug, Clone)]
struct DraftInsn {
    offset: usize,
    opcode: Opcode,
    args: Vec<StackValue>,
    rv: Option<usize>,
}

#[derive(Debug, Default)]
struct DraftBlock {
    offset: usize,
    insns: Vec<DraftInsn>,
    /// Entry-stack registers, index 0 being the entry top.
    inputs: Vec<usize>,
    /// Values this block leaves on the stack, last being the top.
    exit_stack: Vec<StackValue>,
    /// How many inputs the in-block simulation itself consumed.
    simulated_inputs: usize,
    static_jump: Option<usize>,
    falls_through: bool,
}

/// Opcode table entry: the SSA mnemonic (when directly mapped), operand
/// count, and whether a result is produced.
fn opcode_info(byte: u8) -> Option<(Opcode, usize, bool)> {
    let info = match byte {
        0x00 => (Opcode::Stop, 0, false),
        0x01 => (Opcode::Add, 2, true),
        0x02 => (Opcode::Mul, 2, true),
        0x03 => (Opcode::Sub, 2, true),
        0x04 => (Opcode::Div, 2, true),
        0x05 => (Opcode::SDiv, 2, true),
        0x06 => (Opcode::Mod, 2, true),
        0x07 => (Opcode::SMod, 2, true),
        0x08 => (Opcode::AddMod, 3, true),
        0x09 => (Opcode::MulMod, 3, true),
        0x0a => (Opcode::Exp, 2, true),
        0x0b => (Opcode::SignExtend, 2, true),
        0x10 => (Opcode::Lt, 2, true),
        0x11 => (Opcode::Gt, 2, true),
        0x12 => (Opcode::Slt, 2, true),
        0x13 => (Opcode::Sgt, 2, true),
        0x14 => (Opcode::Eq, 2, true),
        0x15 => (Opcode::IsZero, 1, true),
        0x16 => (Opcode::And, 2, true),
        0x17 => (Opcode::Or, 2, true),
        0x18 => (Opcode::Xor, 2, true),
        0x19 => (Opcode::Not, 1, true),
        0x1a => (Opcode::Byte, 2, true),
        0x1b => (Opcode::Shl, 2, true),
        0x1c => (Opcode::Shr, 2, true),
        0x1d => (Opcode::Sar, 2, true),
        0x20 => (Opcode::Sha3, 2, true),
        0x30 => (Opcode::Address, 0, true),
        0x31 => (Opcode::Balance, 1, true),
        0x32 => (Opcode::Origin, 0, true),
        0x33 => (Opcode::Caller, 0, true),
        0x34 => (Opcode::CallValue, 0, true),
        0x35 => (Opcode::CallDataLoad, 1, true),
        0x36 => (Opcode::CallDataSize, 0, true),
        0x37 => (Opcode::CallDataCopy, 3, false),
        0x38 => (Opcode::CodeSize, 0, true),
        0x39 => (Opcode::CodeCopy, 3, false),
        0x3a => (Opcode::GasPrice, 0, true),
        0x3b => (Opcode::ExtCodeSize, 1, true),
        0x3c => (Opcode::ExtCodeCopy, 4, false),
        0x3d => (Opcode::ReturnDataSize, 0, true),
        0x3e => (Opcode::ReturnDataCopy, 3, false),
        0x3f => (Opcode::ExtCodeHash, 1, true),
        0x40 => (Opcode::BlockHash, 1, true),
        0x41 => (Opcode::Coinbase, 0, true),
        0x42 => (Opcode::Timestamp, 0, true),
        0x43 => (Opcode::Number, 0, true),
        0x44 => (Opcode::Difficulty, 0, true),
        0x45 => (Opcode::GasLimit, 0, true),
        0x46 => (Opcode::ChainId, 0, true),
        0x47 => (Opcode::SelfBalance, 0, true),
        0x51 => (Opcode::MLoad, 1, true),
        0x52 => (Opcode::MStore, 2, false),
        0x53 => (Opcode::MStore8, 2, false),
        0x54 => (Opcode::SLoad, 1, true),
        0x55 => (Opcode::SStore, 2, false),
        0x56 => (Opcode::Jump, 1, false),
        0x57 => (Opcode::JumpI, 2, false),
        0x58 => (Opcode::Pc, 0, true),
        0x59 => (Opcode::MSize, 0, true),
        0x5a => (Opcode::Gas, 0, true),
        0xa0 => (Opcode::Log0, 2, false),
        0xa1 => (Opcode::Log1, 3, false),
        0xa2 => (Opcode::Log2, 4, false),
        0xa3 => (Opcode::Log3, 5, false),
        0xa4 => (Opcode::Log4, 6, false),
        0xf0 => (Opcode::Create, 3, true),
        0xf1 => (Opcode::Call, 7, true),
        0xf2 => (Opcode::CallCode, 7, true),
        0xf3 => (Opcode::Return, 2, false),
        0xf4 => (Opcode::DelegateCall, 6, true),
        0xf5 => (Opcode::Create2, 4, true),
        0xfa => (Opcode::StaticCall, 6, true),
        0xfd => (Opcode::Revert, 2, false),
        0xfe => (Opcode::Invalid, 0, false),
        0xff => (Opcode::SelfDestruct, 1, false),
        _ => return None,
    };
    Some(info)
}

fn is_terminator(byte: u8) -> bool {
    matches!(byte, 0x00 | 0xf3 | 0xfd | 0xfe | 0xff)
}

fn decode(code: &[u8]) -> Vec<RawInsn> {
    let mut insns = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let byte = code[pc];
        if (0x5f..=0x7f).contains(&byte) {
            // PUSH0..PUSH32; truncated data is zero-padded.
            let width = (byte - 0x5f) as usize;
            let end = (pc + 1 + width).min(code.len());
            let mut data = code[pc + 1..end].to_vec();
            data.resize(width, 0);
            insns.push(RawInsn {
                pc,
                byte,
                push_data: Some(if width == 0 {
                    BigUint::default()
                } else {
                    BigUint::from_bytes_be(&data)
                }),
            });
            pc += 1 + width;
        } else {
            insns.push(RawInsn {
                pc,
                byte,
                push_data: None,
            });
            pc += 1;
        }
    }
    insns
}

struct Simulator<'a> {
    next_ssa: &'a mut usize,
    stack: Vec<StackValue>,
    inputs: Vec<usize>,
}

impl<'a> Simulator<'a> {
    fn alloc(&mut self) -> usize {
        let reg = *self.next_ssa;
        *self.next_ssa += 1;
        reg
    }

    fn pop(&mut self) -> StackValue {
        if let Some(value) = self.stack.pop() {
            value
        } else {
            let reg = self.alloc();
            self.inputs.push(reg);
            StackValue::Ssa(reg)
        }
    }

    /// Materialise deeper entry slots until the stack is at least
    /// `depth` values tall.
    fn ensure_depth(&mut self, depth: usize) {
        while self.stack.len() < depth {
            let reg = self.alloc();
            self.inputs.push(reg);
            self.stack.insert(0, StackValue::Ssa(reg));
        }
    }
}

fn simulate_block(raw: &[RawInsn], next_ssa: &mut usize) -> DraftBlock {
    let mut sim = Simulator {
        next_ssa,
        stack: Vec::new(),
        inputs: Vec::new(),
    };
    let mut block = DraftBlock {
        offset: raw.first().map(|i| i.pc).unwrap_or(0),
        falls_through: true,
        ..DraftBlock::default()
    };

    for insn in raw {
        match insn.byte {
            0x5b => {} // JUMPDEST carries no semantics in SSA form.
            0x50 => {
                sim.pop();
            }
            0x80..=0x8f => {
                let n = (insn.byte - 0x80 + 1) as usize;
                sim.ensure_depth(n);
                let value = sim.stack[sim.stack.len() - n].clone();
                sim.stack.push(value);
            }
            0x90..=0x9f => {
                let n = (insn.byte - 0x90 + 1) as usize;
                sim.ensure_depth(n + 1);
                let top = sim.stack.len() - 1;
                sim.stack.swap(top, top - n);
            }
            0x5f..=0x7f => {
                let value = insn.push_data.clone().unwrap_or_default();
                sim.stack.push(StackValue::Concrete(value));
            }
            byte => {
                let (opcode, pops, pushes) = match opcode_info(byte) {
                    Some(info) => info,
                    None => (Opcode::Invalid, 0, false),
                };
                let args: Vec<StackValue> = (0..pops).map(|_| sim.pop()).collect();
                let rv = if pushes {
                    let reg = sim.alloc();
                    sim.stack.push(StackValue::Ssa(reg));
                    Some(reg)
                } else {
                    None
                };

                if opcode == Opcode::Jump || opcode == Opcode::JumpI {
                    if let StackValue::Concrete(dest) = &args[0] {
                        block.static_jump = dest.try_into().ok().or_else(|| {
                            warn!("jump destination does not fit an address at pc {}", insn.pc);
                            None
                        });
                    }
                }
                if opcode == Opcode::Jump || is_terminator(byte) {
                    block.falls_through = false;
                }

                block.insns.push(DraftInsn {
                    offset: insn.pc,
                    opcode,
                    args,
                    rv,
                });
            }
        }
    }

    block.simulated_inputs = sim.inputs.len();
    block.inputs = sim.inputs;
    block.exit_stack = sim.stack;
    block
}

/// The value a block leaves at the given depth from its exit top,
/// materialising passthrough inputs for slots it never touched.
fn exit_value(block: &mut DraftBlock, depth: usize, next_ssa: &mut usize) -> StackValue {
    if depth < block.exit_stack.len() {
        return block.exit_stack[block.exit_stack.len() - 1 - depth].clone();
    }
    let entry_depth = block.simulated_inputs + (depth - block.exit_stack.len());
    while block.inputs.len() <= entry_depth {
        let reg = *next_ssa;
        *next_ssa += 1;
        block.inputs.push(reg);
    }
    StackValue::Ssa(block.inputs[entry_depth])
}

/// Constants flowing into a join are given a register via a synthetic
/// PUSH in the predecessor, so PHI arguments always name registers owned
/// by exactly one path.
fn materialize(block: &mut DraftBlock, value: StackValue, next_ssa: &mut usize) -> StackValue {
    match value {
        StackValue::Ssa(_) => value,
        StackValue::Concrete(constant) => {
            let reg = *next_ssa;
            *next_ssa += 1;
            let insert_at = match block.insns.last() {
                Some(last) if matches!(last.opcode, Opcode::Jump | Opcode::JumpI) => {
                    block.insns.len() - 1
                }
                _ => block.insns.len(),
            };
            block.insns.insert(
                insert_at,
                DraftInsn {
                    offset: block.offset,
                    opcode: Opcode::Push,
                    args: vec![StackValue::Concrete(constant)],
                    rv: Some(reg),
                },
            );
            StackValue::Ssa(reg)
        }
    }
}

/// Lift a hex-encoded runtime bytecode blob into an SSA program.
pub fn lift(hex_input: &[u8]) -> ExecResult<Program> {
    let text: String = std::str::from_utf8(hex_input)
        .map_err(|_| ExecError::Internal("bytecode is not valid ASCII hex".to_string()))?
        .split_whitespace()
        .collect();
    let text = text.strip_prefix("0x").unwrap_or(&text);
    let code = hex::decode(text)
        .map_err(|e| ExecError::Internal(format!("bytecode is not valid hex: {}", e)))?;

    let insns = decode(&code);

    // Block leaders: offset 0, every JUMPDEST, everything after a
    // terminator or jump.
    let mut leaders: Vec<usize> = vec![0];
    for (i, insn) in insns.iter().enumerate() {
        if insn.byte == 0x5b {
            leaders.push(i);
        }
        if (is_terminator(insn.byte) || insn.byte == 0x56 || insn.byte == 0x57) && i + 1 < insns.len()
        {
            leaders.push(i + 1);
        }
    }
    leaders.sort_unstable();
    leaders.dedup();

    let mut next_ssa = 0usize;
    let mut drafts: Vec<DraftBlock> = Vec::new();
    for (i, start) in leaders.iter().enumerate() {
        let end = leaders.get(i + 1).copied().unwrap_or(insns.len());
        if *start >= insns.len() {
            continue;
        }
        drafts.push(simulate_block(&insns[*start..end], &mut next_ssa));
    }

    // Edges by draft index.
    let offset_of: Vec<usize> = drafts.iter().map(|b| b.offset).collect();
    let block_at = |offset: usize| offset_of.iter().position(|o| *o == offset);

    let mut fallthrough_edges: Vec<Option<usize>> = vec![None; drafts.len()];
    let mut jump_edges: Vec<Option<usize>> = vec![None; drafts.len()];
    for i in 0..drafts.len() {
        if drafts[i].falls_through || ends_with_jumpi(&drafts[i]) {
            if i + 1 < drafts.len() {
                fallthrough_edges[i] = Some(i + 1);
            }
        }
        if let Some(dest) = drafts[i].static_jump {
            match block_at(dest) {
                Some(target) => jump_edges[i] = Some(target),
                None => warn!("jump destination {:#x} is not a block leader", dest),
            }
        }
    }

    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); drafts.len()];
    for i in 0..drafts.len() {
        if let Some(s) = fallthrough_edges[i] {
            predecessors[s].push(i);
        }
        if let Some(s) = jump_edges[i] {
            predecessors[s].push(i);
        }
    }

    // Cross-block value flow: one PHI per entry slot, fed by each
    // predecessor's exit value at that depth. New passthrough inputs can
    // appear while linking, so iterate to a fixed point.
    let mut phis: std::collections::HashMap<(usize, usize), Vec<StackValue>> =
        std::collections::HashMap::new();
    for round in 0..MAX_LINK_ROUNDS {
        let mut changed = false;
        for b in 0..drafts.len() {
            for j in 0..drafts[b].inputs.len() {
                if phis.contains_key(&(b, j)) || predecessors[b].is_empty() {
                    continue;
                }
                let mut args = Vec::new();
                for &p in &predecessors[b] {
                    let value = exit_value(&mut drafts[p], j, &mut next_ssa);
                    let value = materialize(&mut drafts[p], value, &mut next_ssa);
                    args.push(value);
                }
                phis.insert((b, j), args);
                changed = true;
            }
        }
        if !changed {
            break;
        }
        if round == MAX_LINK_ROUNDS - 1 {
            warn!("value propagation did not converge, some registers stay undefined");
        }
    }

    // Assemble the program.
    let mut builder = ProgramBuilder::new().with_code(text.as_bytes().to_vec());
    let function = builder.add_function("_dispatch", 0);
    let ids: Vec<_> = drafts
        .iter()
        .map(|d| builder.add_block(function, d.offset))
        .collect();

    for (i, draft) in drafts.iter().enumerate() {
        for (j, input) in draft.inputs.iter().enumerate() {
            if let Some(args) = phis.get(&(i, j)) {
                builder.push_insn(ids[i], draft.offset, Opcode::Phi, args.clone(), Some(*input));
            }
        }
        for insn in &draft.insns {
            builder.push_insn(
                ids[i],
                insn.offset,
                insn.opcode.clone(),
                insn.args.clone(),
                insn.rv,
            );
        }
        if let Some(s) = fallthrough_edges[i] {
            builder.set_fallthrough(ids[i], ids[s]);
        }
        if let Some(s) = jump_edges[i] {
            builder.add_jump_edge(ids[i], ids[s]);
        }
    }

    Ok(builder.build())
}

fn ends_with_jumpi(block: &DraftBlock) -> bool {
    matches!(block.insns.last(), Some(last) if last.opcode == Opcode::JumpI)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_push_folding() {
        // PUSH1 ff PUSH1 ee ADD STOP
        let program = lift(b"60ff60ee0100").unwrap();
        assert_eq!(program.blocks.len(), 1);
        let insns = &program.blocks[0].insns;
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[0].opcode, Opcode::Add);
        assert_eq!(
            insns[0].arguments,
            vec![StackValue::concrete(0xee), StackValue::concrete(0xff)]
        );
        assert_eq!(insns[1].opcode, Opcode::Stop);
    }

    #[test]
    fn test_hex_prefix_and_whitespace() {
        let program = lift(b"0x6001 6002 01 00").unwrap();
        assert_eq!(program.blocks.len(), 1);
        assert_eq!(program.code, b"600160020100".to_vec());
    }

    #[test]
    fn test_bad_hex_is_rejected() {
        assert!(lift(b"60zz").is_err());
    }

    #[test]
    fn test_branch_blocks_and_edges() {
        // CALLVALUE PUSH1 07 JUMPI STOP JUMPDEST STOP
        //   0        1      3     4    5(=0x05)... dest must be 5
        let program = lift(b"34600557005b00").unwrap();
        assert_eq!(program.blocks.len(), 3);

        let entry = &program.blocks[0];
        assert_eq!(entry.insns.last().unwrap().opcode, Opcode::JumpI);
        // Fallthrough to the STOP block, jump edge to the JUMPDEST block.
        assert_eq!(entry.fallthrough, Some(program.blocks[1].id));
        assert_eq!(program.jump_target(entry.id, 5), Some(program.blocks[2].id));
    }

    #[test]
    fn test_dup_and_swap() {
        // PUSH1 01 PUSH1 02 DUP2 SWAP1 SSTORE STOP:
        // stack: [1, 2, 1] -> swap -> [1, 1, 2]; SSTORE(key=2, value=1)
        let program = lift(b"6001600281905500").unwrap();
        let insns = &program.blocks[0].insns;
        let sstore = insns.iter().find(|i| i.opcode == Opcode::SStore).unwrap();
        assert_eq!(
            sstore.arguments,
            vec![StackValue::concrete(2), StackValue::concrete(1)]
        );
    }

    #[test]
    fn test_underflow_creates_inputs_and_phis() {
        // Two paths push different constants, the join stores the merged
        // value:
        //   CALLVALUE PUSH1 09 JUMPI          ; 0..3
        //   PUSH1 01 PUSH1 0c JUMP            ; 4..8
        //   JUMPDEST PUSH1 02                 ; 9..11
        //   JUMPDEST PUSH1 00 SSTORE STOP     ; 12..16
        let program = lift(b"346009576001600c565b60025b60005500").unwrap();
        assert_eq!(program.blocks.len(), 4);

        let join = &program.blocks[3];
        assert_eq!(join.insns[0].opcode, Opcode::Phi);
        assert_eq!(join.insns[0].arguments.len(), 2);
        // The SSTORE's value operand is the PHI result.
        let sstore = join
            .insns
            .iter()
            .find(|i| i.opcode == Opcode::SStore)
            .unwrap();
        assert_eq!(sstore.arguments[1], StackValue::Ssa(join.insns[0].return_value.unwrap()));
    }

    #[test]
    fn test_lifted_program_executes_end_to_end() {
        let program = lift(b"346009576001600c565b60025b60005500").unwrap();
        let cfg = z3::Config::new();
        let ctx = z3::Context::new(&cfg);
        let traces = conkas_exec::SymExec::new(&ctx, &program).execute().unwrap();
        assert_eq!(traces.len(), 2);

        // One path stores 1, the other stores 2, both through the PHI.
        let finals: Vec<u64> = traces
            .iter()
            .map(|t| {
                t.state
                    .storage
                    .get(&conkas_word::Word::from_u64(0, 256), -1)
                    .unwrap()
                    .as_u64()
                    .unwrap()
            })
            .collect();
        assert!(finals.contains(&1));
        assert!(finals.contains(&2));
    }

    #[test]
    fn test_unknown_opcode_becomes_invalid() {
        let program = lift(b"2100").unwrap();
        assert_eq!(program.blocks[0].insns[0].opcode, Opcode::Invalid);
    }

    #[test]
    fn test_truncated_push_is_zero_padded() {
        let program = lift(b"61ff").unwrap();
        // PUSH2 with only one data byte: 0xff00.
        assert!(program.blocks[0].insns.is_empty());
    }
}
