// SPDX-License-Identifier: AGPL-3.0

//! Source-map resolution for compiler-emitted mappings.
//!
//! Consumes the `srcmap-runtime` strings out of `solc --combined-json`:
//! semicolon-separated `offset:length:fileIdx:jumpKind` entries where
//! empty fields inherit from the previous entry and a `-1` file index
//! skips the program counter. Byte offsets become 1-based line numbers
//! through per-source newline tables.

use std::collections::HashMap;
use std::fs;
use std::io;

use serde_json::Value;

/// Positions of every newline byte in a source file.
pub fn line_break_positions(source: &[u8]) -> Vec<usize> {
    source
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == b'\n')
        .map(|(i, _)| i)
        .collect()
}

/// Index of the last element `<= target`, or -1 when all are greater.
fn find_lower_bound(target: usize, array: &[usize]) -> isize {
    let mut start = 0usize;
    let mut length = array.len();
    while length > 0 {
        let half = length >> 1;
        let middle = start + half;
        if array[middle] <= target {
            length = length - 1 - half;
            start = middle + 1;
        } else {
            length = half;
        }
    }
    start as isize - 1
}

/// 0-based line of a byte position.
fn convert_from_char_position(pos: usize, line_breaks: &[usize]) -> usize {
    let line = find_lower_bound(pos, line_breaks);
    if line < 0 {
        return 0;
    }
    let line = line as usize;
    if line_breaks[line] != pos {
        line + 1
    } else {
        line
    }
}

/// Lookup from `(contract, pc)` to 1-based source line.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    mapping: HashMap<(String, usize), usize>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one contract's mapping string against the newline tables
    /// of all listed sources.
    pub fn add_contract(&mut self, contract: &str, srcmap: &str, all_line_breaks: &[Vec<usize>]) {
        let mut prev: Vec<String> = Vec::new();
        let mut pc = 0usize;

        for item in srcmap.split(';') {
            let mut fields: Vec<String> = item.split(':').map(str::to_string).collect();
            // Short entries inherit the previous entry's tail, empty
            // fields inherit positionally.
            while fields.len() < prev.len() {
                let inherited = prev[fields.len()].clone();
                fields.push(inherited);
            }
            for (i, field) in fields.iter_mut().enumerate() {
                if field.is_empty() {
                    if let Some(previous) = prev.get(i) {
                        *field = previous.clone();
                    }
                }
            }

            let file_idx = fields
                .get(2)
                .and_then(|f| f.parse::<i64>().ok())
                .unwrap_or(-1);
            if file_idx < 0 {
                prev = fields;
                pc += 1;
                continue;
            }

            let offset = fields
                .get(0)
                .and_then(|f| f.parse::<i64>().ok())
                .unwrap_or(-1);
            if offset >= 0 {
                if let Some(line_breaks) = all_line_breaks.get(file_idx as usize) {
                    let line = convert_from_char_position(offset as usize, line_breaks);
                    self.mapping.insert((contract.to_string(), pc), line + 1);
                }
            }

            prev = fields;
            pc += 1;
        }
    }

    /// Build the lookup from `solc --combined-json srcmap-runtime`
    /// output, reading the listed source files from disk.
    pub fn from_combined_json(combined: &Value) -> io::Result<Self> {
        let mut all_line_breaks = Vec::new();
        if let Some(sources) = combined.get("sourceList").and_then(Value::as_array) {
            for source in sources {
                let filename = source.as_str().unwrap_or_default();
                let code = fs::read(filename)?;
                all_line_breaks.push(line_break_positions(&code));
            }
        }

        let mut map = Self::new();
        if let Some(contracts) = combined.get("contracts").and_then(Value::as_object) {
            for (contract, entry) in contracts {
                let srcmap = entry
                    .get("srcmap-runtime")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if srcmap.is_empty() {
                    continue;
                }
                map.add_contract(contract, srcmap, &all_line_breaks);
            }
        }
        Ok(map)
    }

    pub fn line_number(&self, contract: &str, pc: usize) -> Option<usize> {
        self.mapping.get(&(contract.to_string(), pc)).copied()
    }
}
