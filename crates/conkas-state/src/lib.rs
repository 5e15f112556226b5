// SPDX-License-Identifier: AGPL-3.0

//! Mutable symbolic machine state for one explored path.
//!
//! The aggregate owns its registers, memory and storage; the environment
//! is immutable and shared. Cloning a state for a trace fork is a genuine
//! deep copy of every version stack; aliased clones would let a fork
//! rewrite another trace's history.

use std::rc::Rc;

use conkas_word::Word;

mod environment;
mod memory;
mod registers;
mod storage;

pub use environment::Environment;
pub use memory::{ceil32, MemRead, Memory};
pub use registers::Registers;
pub use storage::{Storage, StorageKey};

#[derive(Debug, Clone)]
pub struct State<'ctx> {
    pub registers: Registers<'ctx>,
    pub memory: Memory<'ctx>,
    pub storage: Storage<'ctx>,
    pub environment: Rc<Environment>,
    pub return_data: Option<Word<'ctx>>,
    pub reverted: bool,
    pub stopped: bool,
    pub destructed: bool,
    pub invalid: bool,
}

impl<'ctx> State<'ctx> {
    pub fn new(environment: Rc<Environment>) -> Self {
        Self {
            registers: Registers::new(),
            memory: Memory::new(),
            storage: Storage::new(),
            environment,
            return_data: None,
            reverted: false,
            stopped: false,
            destructed: false,
            invalid: false,
        }
    }

    /// Whether any termination flag is set. At most one ever is.
    pub fn terminated(&self) -> bool {
        self.reverted || self.stopped || self.destructed || self.invalid
    }
}
