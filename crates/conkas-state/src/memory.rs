// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use z3::ast::{Ast, BV};
use z3::Context;

use conkas_errors::{ExecError, ExecResult};
use conkas_word::{mask, Word, WORD_SIZE};

/// Round up to the next multiple of 32.
pub fn ceil32(value: u64) -> u64 {
    let remainder = value % 32;
    if remainder == 0 {
        value
    } else {
        value + 32 - remainder
    }
}

/// Result of a memory read: fully concrete bytes or a symbolic word.
#[derive(Debug, Clone, PartialEq)]
pub enum MemRead<'ctx> {
    Concrete(Vec<u8>),
    Symbolic(Word<'ctx>),
}

/// Byte-addressed memory with per-cell version stacks.
///
/// Every concrete store pushes a new version onto *every* cell below the
/// current size (written cells get the fresh byte, others re-push their
/// latest value), so a negative version offset observes the same point in
/// time across all cells. Size grows only through [`Memory::extend`], in
/// 32-byte steps. Writes at symbolic offsets live in a side table keyed by
/// the simplified offset expression and do not advance the size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Memory<'ctx> {
    cells: BTreeMap<u64, Vec<Word<'ctx>>>,
    sym_cells: Vec<(BV<'ctx>, Vec<Word<'ctx>>)>,
    size: u64,
}

impl<'ctx> Memory<'ctx> {
    pub fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
            sym_cells: Vec::new(),
            size: 0,
        }
    }

    /// Current size in bytes, always a multiple of 32.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Raise the size to `ceil32(start + len)`; never shrinks.
    pub fn extend(&mut self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        let new_size = ceil32(start + len);
        if new_size > self.size {
            self.size = new_size;
        }
    }

    /// Split a value into `size` big-endian byte words. Concrete values
    /// are masked to the window; symbolic values must be wide enough.
    fn value_bytes(value: &Word<'ctx>, size: usize) -> ExecResult<Vec<Word<'ctx>>> {
        match value {
            Word::Concrete { value, .. } => {
                let masked = value & mask((size * 8) as u32);
                let window = Word::from_biguint(masked, (size * 8) as u32);
                Ok((0..size).map(|i| window.be_byte(i, size)).collect())
            }
            Word::Symbolic { .. } => {
                if (value.size() as usize) / 8 < size {
                    return Err(ExecError::Internal(format!(
                        "store of {}-bit value into {} bytes",
                        value.size(),
                        size
                    )));
                }
                Ok((0..size).map(|i| value.be_byte(i, size)).collect())
            }
        }
    }

    /// Store `size` bytes of `value` at `offset`.
    pub fn store(
        &mut self,
        offset: &Word<'ctx>,
        value: &Word<'ctx>,
        size: usize,
        ctx: &'ctx Context,
    ) -> ExecResult<()> {
        if size == 0 {
            return Ok(());
        }

        let bytes = Self::value_bytes(value, size)?;

        if offset.is_symbolic() {
            for (i, byte) in bytes.into_iter().enumerate() {
                let position = offset
                    .to_bv(ctx)
                    .bvadd(&BV::from_u64(ctx, i as u64, WORD_SIZE))
                    .simplify();
                match self.sym_cells.iter_mut().find(|(p, _)| *p == position) {
                    Some((_, stack)) => stack.push(byte),
                    None => self.sym_cells.push((position, vec![byte])),
                }
            }
            return Ok(());
        }

        let start = offset.as_u64()?;
        if start >= self.size {
            // Out-of-range concrete store: dropped without growing.
            return Ok(());
        }

        let end = start + size as u64;
        let mut next_byte = bytes.into_iter();
        for i in 0..self.size {
            let stack = self.cells.entry(i).or_default();
            if start <= i && i < end {
                // A store may run off the end of memory; the overflow
                // bytes are dropped with the same silence as above.
                match next_byte.next() {
                    Some(byte) => stack.push(byte),
                    None => stack.push(Word::zero(8)),
                }
            } else {
                let repeat = stack.last().cloned().unwrap_or_else(|| Word::zero(8));
                stack.push(repeat);
            }
        }
        Ok(())
    }

    fn cell_at_version(stack: &[Word<'ctx>], version: i64) -> Word<'ctx> {
        let idx = stack.len() as i64 + version;
        if idx < 0 || idx >= stack.len() as i64 {
            Word::zero(8)
        } else {
            stack[idx as usize].clone()
        }
    }

    /// Read `size` bytes starting at `offset`, observing the given
    /// version (−1 is the latest write, −2 the one it shadowed).
    pub fn read(
        &self,
        offset: &Word<'ctx>,
        size: usize,
        version: i64,
        ctx: &'ctx Context,
    ) -> MemRead<'ctx> {
        let mut bytes: Vec<Word<'ctx>> = Vec::with_capacity(size);
        let concrete_start = offset.as_biguint().ok().and_then(|v| v.to_u64());

        for i in 0..size {
            let byte = match concrete_start {
                Some(start) => {
                    let position = start + i as u64;
                    if position >= self.size {
                        // Reads stop at the memory size.
                        break;
                    }
                    match self.cells.get(&position) {
                        Some(stack) => Self::cell_at_version(stack, version),
                        None => Word::zero(8),
                    }
                }
                None => {
                    let position = offset
                        .to_bv(ctx)
                        .bvadd(&BV::from_u64(ctx, i as u64, WORD_SIZE))
                        .simplify();
                    match self.sym_cells.iter().find(|(p, _)| *p == position) {
                        Some((_, stack)) => Self::cell_at_version(stack, version),
                        None => Word::zero(8),
                    }
                }
            };
            bytes.push(byte);
        }

        if bytes.iter().any(|b| b.is_symbolic()) {
            let mut iter = bytes.into_iter();
            let first = iter.next().expect("at least one byte when symbolic");
            let word = iter.fold(first, |acc, b| acc.concat(&b, ctx));
            MemRead::Symbolic(word.simplify())
        } else {
            let concrete = bytes
                .iter()
                .map(|b| b.as_u64().map(|v| v as u8))
                .collect::<ExecResult<Vec<u8>>>()
                .expect("concrete bytes");
            MemRead::Concrete(concrete)
        }
    }

    /// Read as a single word: a big-endian concrete integer when every
    /// byte is concrete, else the simplified concatenation.
    pub fn load(&self, offset: &Word<'ctx>, size: usize, ctx: &'ctx Context) -> Word<'ctx> {
        self.load_version(offset, size, -1, ctx)
    }

    pub fn load_version(
        &self,
        offset: &Word<'ctx>,
        size: usize,
        version: i64,
        ctx: &'ctx Context,
    ) -> Word<'ctx> {
        match self.read(offset, size, version, ctx) {
            MemRead::Concrete(bytes) => Word::from_biguint(BigUint::from_bytes_be(&bytes), WORD_SIZE),
            MemRead::Symbolic(word) => word,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::Config;

    fn ctx() -> Context {
        Context::new(&Config::new())
    }

    #[test]
    fn test_extend_rounds_to_32() {
        let mut memory: Memory = Memory::new();
        memory.extend(0, 1);
        assert_eq!(memory.size(), 32);
        memory.extend(30, 10);
        assert_eq!(memory.size(), 64);
        // Never shrinks.
        memory.extend(0, 4);
        assert_eq!(memory.size(), 64);
        // Zero-length extension is a no-op.
        memory.extend(1000, 0);
        assert_eq!(memory.size(), 64);
    }

    #[test]
    fn test_store_load_concrete_round_trip() {
        let ctx = ctx();
        let mut memory = Memory::new();
        memory.extend(0, 32);
        memory
            .store(&Word::zero(256), &Word::from_u64(0xdeadbeef, 256), 32, &ctx)
            .unwrap();
        let loaded = memory.load(&Word::zero(256), 32, &ctx);
        assert_eq!(loaded.as_u64().unwrap(), 0xdeadbeef);
    }

    #[test]
    fn test_store_load_symbolic_value() {
        let ctx = ctx();
        let mut memory = Memory::new();
        memory.extend(0, 32);
        let x = Word::symbol(&ctx, "x", 256);
        memory.store(&Word::zero(256), &x, 32, &ctx).unwrap();
        let loaded = memory.load(&Word::zero(256), 32, &ctx);
        assert_eq!(loaded, x.simplify());
    }

    #[test]
    fn test_symbolic_offset_round_trip() {
        let ctx = ctx();
        let mut memory = Memory::new();
        let offset = Word::symbol(&ctx, "p", 256);
        memory
            .store(&offset, &Word::from_u64(0xaabb, 256), 32, &ctx)
            .unwrap();
        // Symbolic writes do not advance the size.
        assert_eq!(memory.size(), 0);
        let loaded = memory.load(&offset, 32, &ctx);
        assert_eq!(loaded.as_u64().unwrap(), 0xaabb);
    }

    #[test]
    fn test_version_minus_two_sees_shadowed_write() {
        let ctx = ctx();
        let mut memory = Memory::new();
        memory.extend(0, 32);
        memory
            .store(&Word::zero(256), &Word::from_u64(1, 256), 32, &ctx)
            .unwrap();
        memory
            .store(&Word::zero(256), &Word::from_u64(2, 256), 32, &ctx)
            .unwrap();
        assert_eq!(memory.load(&Word::zero(256), 32, &ctx).as_u64().unwrap(), 2);
        assert_eq!(
            memory
                .load_version(&Word::zero(256), 32, -2, &ctx)
                .as_u64()
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_store_beyond_size_is_dropped() {
        let ctx = ctx();
        let mut memory = Memory::new();
        memory.extend(0, 32);
        memory
            .store(&Word::from_u64(64, 256), &Word::from_u64(7, 256), 32, &ctx)
            .unwrap();
        assert_eq!(memory.load(&Word::from_u64(64, 256), 32, &ctx).as_u64().unwrap(), 0);
    }

    #[test]
    fn test_single_byte_store_keeps_low_byte() {
        let ctx = ctx();
        let mut memory = Memory::new();
        memory.extend(0, 1);
        memory
            .store(&Word::zero(256), &Word::from_u64(0x1234, 256), 1, &ctx)
            .unwrap();
        match memory.read(&Word::zero(256), 1, -1, &ctx) {
            MemRead::Concrete(bytes) => assert_eq!(bytes, vec![0x34]),
            MemRead::Symbolic(_) => panic!("expected concrete byte"),
        };
    }

    #[test]
    fn test_versions_stay_aligned_across_cells() {
        let ctx = ctx();
        let mut memory = Memory::new();
        memory.extend(0, 64);
        memory
            .store(&Word::zero(256), &Word::from_u64(1, 256), 32, &ctx)
            .unwrap();
        // A store elsewhere pushes a version on the first cell range too.
        memory
            .store(&Word::from_u64(32, 256), &Word::from_u64(2, 256), 32, &ctx)
            .unwrap();
        assert_eq!(memory.load(&Word::zero(256), 32, &ctx).as_u64().unwrap(), 1);
        assert_eq!(
            memory
                .load_version(&Word::zero(256), 32, -2, &ctx)
                .as_u64()
                .unwrap(),
            1
        );
    }
}
