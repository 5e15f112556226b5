// SPDX-License-Identifier: AGPL-3.0

//! Vulnerability analyses over finished traces.
//!
//! Five analyses walk the explorer's traces and discharge their queries
//! to the SMT facade: integer overflow/underflow, reentrancy, time
//! manipulation, transaction-ordering dependence, and unchecked low-level
//! calls. Verdicts are *maybe vulnerable* with witness models, never
//! proofs of absence.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use num_bigint::BigUint;
use z3::ast::Bool;

use conkas_exec::{AnalyzedBlock, Trace};
use conkas_solver::SolverFacade;
use conkas_srcmap::SourceMap;
use conkas_ssa::Program;

mod arithmetic;
mod reentrancy;
mod time_manipulation;
mod transaction_ordering;
mod unchecked_calls;

pub use arithmetic::arithmetic_analyse;
pub use reentrancy::reentrancy_analyse;
pub use time_manipulation::time_manipulation_analyse;
pub use transaction_ordering::tod_analyse;
pub use unchecked_calls::unchecked_low_level_calls_analyse;

/// Selectable analysis modules, named as on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VulnClass {
    Arithmetic,
    Reentrancy,
    TimeManipulation,
    TransactionOrderingDependence,
    UncheckedLowLevelCalls,
}

impl VulnClass {
    pub fn all() -> [VulnClass; 5] {
        [
            VulnClass::Arithmetic,
            VulnClass::Reentrancy,
            VulnClass::TimeManipulation,
            VulnClass::TransactionOrderingDependence,
            VulnClass::UncheckedLowLevelCalls,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            VulnClass::Arithmetic => "arithmetic",
            VulnClass::Reentrancy => "reentrancy",
            VulnClass::TimeManipulation => "time_manipulation",
            VulnClass::TransactionOrderingDependence => "transaction_ordering_dependence",
            VulnClass::UncheckedLowLevelCalls => "unchecked_ll_calls",
        }
    }
}

impl std::str::FromStr for VulnClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arithmetic" => Ok(VulnClass::Arithmetic),
            "reentrancy" => Ok(VulnClass::Reentrancy),
            "time_manipulation" => Ok(VulnClass::TimeManipulation),
            "transaction_ordering_dependence" => Ok(VulnClass::TransactionOrderingDependence),
            "unchecked_ll_calls" => Ok(VulnClass::UncheckedLowLevelCalls),
            other => Err(format!("unknown vulnerability type: {}", other)),
        }
    }
}

impl fmt::Display for VulnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The defect classes a finding can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VulnKind {
    IntegerOverflow,
    IntegerUnderflow,
    Reentrancy,
    TimeManipulation,
    TransactionOrderingDependence,
    UncheckedLowLevelCall,
}

impl fmt::Display for VulnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VulnKind::IntegerOverflow => "Integer Overflow",
            VulnKind::IntegerUnderflow => "Integer Underflow",
            VulnKind::Reentrancy => "Reentrancy",
            VulnKind::TimeManipulation => "Time Manipulation",
            VulnKind::TransactionOrderingDependence => "Transaction Ordering Dependence",
            VulnKind::UncheckedLowLevelCall => "Unchecked Low Level Call",
        };
        write!(f, "{}", text)
    }
}

/// One finding. Equality and hashing key on the kind and the source line
/// (falling back to the SSA offset), so several witnesses of the same
/// logical defect collapse into one report.
#[derive(Debug, Clone)]
pub struct Vulnerability {
    pub kind: VulnKind,
    pub function_name: String,
    pub pc: usize,
    pub instruction_offset: usize,
    pub model: Vec<(String, BigUint)>,
    pub line_number: Option<usize>,
}

impl Vulnerability {
    pub fn new(
        kind: VulnKind,
        function_name: String,
        pc: usize,
        instruction_offset: usize,
    ) -> Self {
        Self {
            kind,
            function_name,
            pc,
            instruction_offset,
            model: Vec::new(),
            line_number: None,
        }
    }

    pub fn with_model(mut self, model: Vec<(String, BigUint)>) -> Self {
        self.model = model;
        self
    }

    fn dedup_key(&self) -> (VulnKind, usize) {
        (self.kind, self.line_number.unwrap_or(self.instruction_offset))
    }
}

impl PartialEq for Vulnerability {
    fn eq(&self, other: &Self) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

impl Eq for Vulnerability {}

impl Hash for Vulnerability {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dedup_key().hash(state);
    }
}

/// Shared inputs of every analysis run.
pub struct AnalysisContext<'a, 'p, 'ctx> {
    pub program: &'p Program,
    pub solver: &'a SolverFacade<'ctx>,
    pub find_all: bool,
    /// The explorer's depth bound; analyses that distrust truncated
    /// traces skip any trace that reached it.
    pub max_depth: usize,
    /// Multiplier applied to the solver budget of MUL overflow queries.
    pub mul_timeout_factor: u32,
}

impl<'a, 'p, 'ctx> AnalysisContext<'a, 'p, 'ctx> {
    fn function_name(&self, record: &AnalyzedBlock<'ctx>) -> String {
        self.program.function_name(record.block).to_string()
    }
}

/// The record just before the given constraint was appended: scanning the
/// history backwards, skip the blocks whose snapshot still ends with the
/// constraint, then take the first block whose snapshot does not.
pub(crate) fn block_with_constraint<'a, 'ctx>(
    trace: &'a Trace<'ctx>,
    constraint: &Bool<'ctx>,
) -> Option<&'a std::rc::Rc<AnalyzedBlock<'ctx>>> {
    let mut found = false;
    for record in trace.analyzed_blocks.iter().rev() {
        let last = record.constraints.last();
        if found && last != Some(constraint) {
            return Some(record);
        }
        if !found && last == Some(constraint) {
            found = true;
        }
    }
    None
}

/// Runs the requested analyses over a contract's traces and renders the
/// deduplicated findings.
pub struct VulnerabilityFinder<'a, 'p, 'ctx> {
    traces: &'a [Trace<'ctx>],
    contract_name: String,
    source_map: Option<&'a SourceMap>,
    context: AnalysisContext<'a, 'p, 'ctx>,
}

impl<'a, 'p, 'ctx> VulnerabilityFinder<'a, 'p, 'ctx> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        traces: &'a [Trace<'ctx>],
        program: &'p Program,
        contract_name: impl Into<String>,
        source_map: Option<&'a SourceMap>,
        solver: &'a SolverFacade<'ctx>,
        find_all: bool,
        max_depth: usize,
        mul_timeout_factor: u32,
    ) -> Self {
        Self {
            traces,
            contract_name: contract_name.into(),
            source_map,
            context: AnalysisContext {
                program,
                solver,
                find_all,
                max_depth,
                mul_timeout_factor,
            },
        }
    }

    /// Run only the requested analysis classes.
    pub fn analyse_only(&self, classes: &[VulnClass]) -> Vec<Vulnerability> {
        let mut findings: HashSet<Vulnerability> = HashSet::new();

        for class in classes {
            let produced = match class {
                VulnClass::Arithmetic => arithmetic_analyse(self.traces, &self.context),
                VulnClass::Reentrancy => reentrancy_analyse(self.traces, &self.context),
                VulnClass::TimeManipulation => {
                    time_manipulation_analyse(self.traces, &self.context)
                }
                VulnClass::TransactionOrderingDependence => {
                    tod_analyse(self.traces, &self.context)
                }
                VulnClass::UncheckedLowLevelCalls => {
                    unchecked_low_level_calls_analyse(self.traces, &self.context)
                }
            };
            findings.extend(produced);
        }

        // Line annotation can merge findings that share a source line, so
        // rebuild the set afterwards.
        let mut annotated: HashSet<Vulnerability> = HashSet::new();
        for mut vuln in findings {
            if let Some(map) = self.source_map {
                vuln.line_number = map.line_number(&self.contract_name, vuln.pc);
            }
            annotated.insert(vuln);
        }

        let mut out: Vec<Vulnerability> = annotated.into_iter().collect();
        out.sort_by_key(|v| (v.pc, v.instruction_offset));
        out
    }

    /// Run every analysis.
    pub fn analyse_all(&self) -> Vec<Vulnerability> {
        self.analyse_only(&VulnClass::all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vuln_class_round_trip() {
        for class in VulnClass::all() {
            let parsed: VulnClass = class.name().parse().unwrap();
            assert_eq!(parsed, class);
        }
        assert!("nonsense".parse::<VulnClass>().is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(VulnKind::IntegerOverflow.to_string(), "Integer Overflow");
        assert_eq!(
            VulnKind::UncheckedLowLevelCall.to_string(),
            "Unchecked Low Level Call"
        );
    }

    #[test]
    fn test_vulnerability_dedup_by_offset() {
        let a = Vulnerability::new(VulnKind::Reentrancy, "f".into(), 10, 3);
        let b = Vulnerability::new(VulnKind::Reentrancy, "g".into(), 99, 3);
        let c = Vulnerability::new(VulnKind::Reentrancy, "f".into(), 10, 4);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_line_number_overrides_dedup_key() {
        let mut a = Vulnerability::new(VulnKind::TimeManipulation, "f".into(), 10, 3);
        let mut b = Vulnerability::new(VulnKind::TimeManipulation, "f".into(), 12, 7);
        a.line_number = Some(5);
        b.line_number = Some(5);
        assert_eq!(a, b);
    }
}
