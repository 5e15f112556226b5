// SPDX-License-Identifier: AGPL-3.0

use num_bigint::BigUint;

/// Immutable per-contract execution data: the deployed runtime code as the
/// ASCII-hex string the driver read. Shared by reference across traces,
/// never cloned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    code: Vec<u8>,
}

impl Environment {
    pub fn new(code: Vec<u8>) -> Self {
        Self { code }
    }

    /// Code size in bytes (two hex digits per byte).
    pub fn code_size(&self) -> usize {
        self.code.len() / 2
    }

    /// Decode `len` code bytes starting at byte `offset` into an integer;
    /// `None` when the slice is out of range or not valid hex.
    pub fn code_slice(&self, offset: usize, len: usize) -> Option<BigUint> {
        let start = offset.checked_mul(2)?;
        let end = start.checked_add(len.checked_mul(2)?)?;
        if end > self.code.len() {
            return None;
        }
        let text = std::str::from_utf8(&self.code[start..end]).ok()?;
        BigUint::parse_bytes(text.as_bytes(), 16)
    }
}
