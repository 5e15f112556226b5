// SPDX-License-Identifier: AGPL-3.0

use num_bigint::BigUint;
use z3::ast::BV;

use conkas_word::{Word, WORD_SIZE};

/// A storage slot key: a concrete integer or a symbolic expression.
///
/// Symbolic keys compare by Z3 term identity, so two syntactically
/// different expressions are different slots even when semantically equal.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageKey<'ctx> {
    Concrete(BigUint),
    Symbolic(BV<'ctx>),
}

impl<'ctx> StorageKey<'ctx> {
    pub fn from_word(word: &Word<'ctx>) -> Self {
        match word {
            Word::Concrete { value, .. } => Self::Concrete(value.clone()),
            Word::Symbolic { expr, .. } => Self::Symbolic(expr.clone()),
        }
    }
}

/// Keyed storage with the same versioning discipline as memory: each slot
/// holds a stack of writes and negative version offsets time-travel
/// through them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Storage<'ctx> {
    slots: Vec<(StorageKey<'ctx>, Vec<Word<'ctx>>)>,
}

impl<'ctx> Storage<'ctx> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Append a new version for the slot, creating it on first write.
    /// Concrete values are normalised to the canonical word form.
    pub fn set(&mut self, key: &Word<'ctx>, value: Word<'ctx>) {
        let value = match value {
            Word::Concrete { value, .. } => Word::from_biguint(value, WORD_SIZE),
            symbolic => symbolic,
        };
        let key = StorageKey::from_word(key);
        match self.slots.iter_mut().find(|(k, _)| *k == key) {
            Some((_, stack)) => stack.push(value),
            None => self.slots.push((key, vec![value])),
        }
    }

    /// The value at the given version (−1 latest, −2 the write before
    /// it); `None` for unset slots or out-of-range versions.
    pub fn get(&self, key: &Word<'ctx>, version: i64) -> Option<Word<'ctx>> {
        let key = StorageKey::from_word(key);
        let (_, stack) = self.slots.iter().find(|(k, _)| *k == key)?;
        let idx = stack.len() as i64 + version;
        if idx < 0 || idx >= stack.len() as i64 {
            return None;
        }
        Some(stack[idx as usize].clone())
    }

    /// Latest value at a concrete slot position.
    pub fn get_concrete_key(&self, position: &BigUint) -> Option<Word<'ctx>> {
        self.get(&Word::from_biguint(position.clone(), WORD_SIZE), -1)
    }
}
