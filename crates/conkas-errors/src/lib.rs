// SPDX-License-Identifier: AGPL-3.0

//! Errors raised while symbolically executing EVM bytecode.
//!
//! Malformed instructions and unsupported opcodes are fatal for the
//! contract under analysis; the driver logs them and moves on to the next
//! contract. Soft conditions (symbolic jump destinations, symbolic copy
//! lengths) are not errors at all; the executor degrades and continues.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    /// An instruction was lifted with the wrong number of operands.
    #[error("{mnemonic} instruction needs {expected} arguments but {given} was given")]
    BadArity {
        mnemonic: &'static str,
        expected: usize,
        given: usize,
    },

    /// An instruction that produces a value has no result register.
    #[error("{0} needs return value")]
    MissingReturnValue(&'static str),

    /// An SSA operand referenced a register that was never written.
    #[error("register %{0} read before any write")]
    UndefinedRegister(usize),

    #[error("instruction {0} is not implemented")]
    UnsupportedOpcode(String),

    /// A concrete value was required where a symbolic one was found.
    #[error("value is not concrete: {0}")]
    NotConcrete(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
