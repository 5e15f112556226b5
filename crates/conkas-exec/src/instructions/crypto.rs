// SPDX-License-Identifier: AGPL-3.0

//! Keccak-256 hashing. Concrete memory ranges are hashed for real;
//! anything symbolic degrades to a fresh word.

use num_bigint::BigUint;
use sha3::{Digest, Keccak256};
use z3::Context;

use conkas_errors::ExecResult;
use conkas_ssa::Instruction;
use conkas_state::{MemRead, State};
use conkas_word::{Word, WORD_SIZE};

use super::{require_arg, require_args, require_return_value};

/// Keccak-256 of the empty input.
const EMPTY_KECCAK_256: &str = "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470";

pub(super) fn sha3<'ctx>(
    ctx: &'ctx Context,
    instr: &Instruction,
    state: &mut State<'ctx>,
) -> ExecResult<()> {
    require_args(instr, 2)?;
    let rv = require_return_value(instr)?;
    let offset = require_arg(instr, 0, &state.registers)?;
    let length = require_arg(instr, 1, &state.registers)?;

    let expr = if Word::all_concrete(&[&offset, &length]) {
        let length = length.as_usize()?;
        if length == 0 {
            let empty = BigUint::parse_bytes(EMPTY_KECCAK_256.as_bytes(), 16)
                .expect("constant parses");
            Word::from_biguint(empty, WORD_SIZE)
        } else {
            state.memory.extend(offset.as_u64()?, length as u64);
            match state.memory.read(&offset, length, -1, ctx) {
                MemRead::Concrete(bytes) => {
                    let digest = Keccak256::digest(&bytes);
                    Word::from_bytes(&digest, WORD_SIZE)
                }
                // Hashing symbolic content is approximated by a fresh
                // word.
                MemRead::Symbolic(_) => Word::symbol(ctx, &rv.to_string(), WORD_SIZE),
            }
        }
    } else {
        Word::symbol(ctx, &rv.to_string(), WORD_SIZE)
    };
    state.registers.set(rv, expr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::execute_instruction;
    use conkas_ssa::{Opcode, ProgramBuilder, StackValue};
    use conkas_state::{Environment, State};
    use num_bigint::BigUint;
    use std::rc::Rc;
    use z3::{Config, Context};

    #[test]
    fn test_sha3_of_zero_length_is_empty_hash() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(
            b,
            0,
            Opcode::Sha3,
            vec![StackValue::concrete(0), StackValue::concrete(0)],
            Some(1),
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        execute_instruction(&ctx, &program, b, &program.block(b).insns[0], &mut state).unwrap();
        let expected = BigUint::parse_bytes(super::EMPTY_KECCAK_256.as_bytes(), 16).unwrap();
        assert_eq!(state.registers.get(1).unwrap().as_biguint().unwrap(), expected);
    }

    #[test]
    fn test_sha3_concrete_bytes() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(
            b,
            0,
            Opcode::MStore,
            vec![StackValue::concrete(0), StackValue::concrete(1)],
            None,
        );
        builder.push_insn(
            b,
            1,
            Opcode::Sha3,
            vec![StackValue::concrete(0), StackValue::concrete(32)],
            Some(1),
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        for instr in &program.block(b).insns {
            execute_instruction(&ctx, &program, b, instr, &mut state).unwrap();
        }
        // keccak256 of a 32-byte big-endian 1.
        use sha3::{Digest, Keccak256};
        let mut input = [0u8; 32];
        input[31] = 1;
        let expected = BigUint::from_bytes_be(&Keccak256::digest(input));
        assert_eq!(state.registers.get(1).unwrap().as_biguint().unwrap(), expected);
    }

    #[test]
    fn test_sha3_symbolic_range_is_fresh_symbol() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut builder = ProgramBuilder::new();
        let f = builder.add_function("_dispatch", 0);
        let b = builder.add_block(f, 0);
        builder.push_insn(b, 0, Opcode::CallValue, vec![], Some(1));
        builder.push_insn(
            b,
            1,
            Opcode::Sha3,
            vec![StackValue::Ssa(1), StackValue::concrete(32)],
            Some(2),
        );
        let program = builder.build();
        let mut state = State::new(Rc::new(Environment::default()));
        for instr in &program.block(b).insns {
            execute_instruction(&ctx, &program, b, instr, &mut state).unwrap();
        }
        assert!(state.registers.get(2).unwrap().is_symbolic());
    }
}
