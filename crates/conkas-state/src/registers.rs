// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;

use conkas_word::{Word, WORD_SIZE};

/// SSA register file: one word per SSA index.
///
/// Writes replace the previous value; reads of unset indices propagate
/// absence. Concrete values are normalised to the canonical 256-bit form
/// on write, so no caller ever observes a narrower concrete register.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registers<'ctx> {
    regs: HashMap<usize, Word<'ctx>>,
}

impl<'ctx> Registers<'ctx> {
    pub fn new() -> Self {
        Self {
            regs: HashMap::new(),
        }
    }

    pub fn set(&mut self, idx: usize, value: Word<'ctx>) {
        let value = match value {
            Word::Concrete { value, .. } => Word::from_biguint(value, WORD_SIZE),
            symbolic => symbolic,
        };
        self.regs.insert(idx, value);
    }

    pub fn get(&self, idx: usize) -> Option<Word<'ctx>> {
        self.regs.get(&idx).cloned()
    }
}
