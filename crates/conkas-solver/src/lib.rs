// SPDX-License-Identifier: AGPL-3.0

//! Timeout-bounded satisfiability checks over 256-bit bit-vectors.
//!
//! The analyses only ever need this narrow surface: assert a list of
//! boolean constraints, check with a millisecond budget, and on `sat`
//! read concrete values back out of the model. A timeout surfaces as
//! [`CheckResult::Unknown`] and is treated downstream as "no finding".

use std::collections::HashSet;

use num_bigint::BigUint;
use z3::ast::{Ast, Bool, Dynamic, BV};
use z3::{AstKind, Context, DeclKind, Params, SatResult, Solver};

use conkas_word::Word;

/// Outcome of one satisfiability query.
pub enum CheckResult<'ctx> {
    Sat(SolvedModel<'ctx>),
    Unsat,
    Unknown,
}

impl<'ctx> CheckResult<'ctx> {
    pub fn is_sat(&self) -> bool {
        matches!(self, CheckResult::Sat(_))
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, CheckResult::Unsat)
    }
}

/// A satisfying assignment, read lazily per variable.
pub struct SolvedModel<'ctx> {
    model: z3::Model<'ctx>,
}

impl<'ctx> SolvedModel<'ctx> {
    /// Evaluate a bit-vector term to its concrete model value.
    pub fn eval_bv(&self, term: &BV<'ctx>) -> Option<BigUint> {
        let value = self.model.eval(term, true)?;
        if let Some(small) = value.as_u64() {
            return Some(BigUint::from(small));
        }
        parse_numeral(&value.to_string())
    }

    /// Evaluate a word; concrete words are returned unchanged.
    pub fn eval_word(&self, word: &Word<'ctx>) -> Option<BigUint> {
        match word {
            Word::Concrete { value, .. } => Some(value.clone()),
            Word::Symbolic { expr, .. } => self.eval_bv(expr),
        }
    }
}

/// Satisfiability checks with a per-query millisecond budget.
pub struct SolverFacade<'ctx> {
    ctx: &'ctx Context,
    timeout_ms: u32,
}

impl<'ctx> SolverFacade<'ctx> {
    pub fn new(ctx: &'ctx Context, timeout_ms: u32) -> Self {
        Self { ctx, timeout_ms }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Check with the facade's default timeout.
    pub fn check(&self, constraints: &[Bool<'ctx>]) -> CheckResult<'ctx> {
        self.check_with_timeout(constraints, self.timeout_ms)
    }

    /// Check with an explicit timeout; used by the hard multiplication
    /// overflow queries that get an enlarged budget.
    pub fn check_with_timeout(
        &self,
        constraints: &[Bool<'ctx>],
        timeout_ms: u32,
    ) -> CheckResult<'ctx> {
        let solver = Solver::new(self.ctx);
        let mut params = Params::new(self.ctx);
        params.set_u32("timeout", timeout_ms);
        solver.set_params(&params);

        for constraint in constraints {
            solver.assert(constraint);
        }

        match solver.check() {
            SatResult::Sat => match solver.get_model() {
                Some(model) => CheckResult::Sat(SolvedModel { model }),
                None => CheckResult::Unknown,
            },
            SatResult::Unsat => CheckResult::Unsat,
            SatResult::Unknown => CheckResult::Unknown,
        }
    }
}

/// Parse a Z3 numeral rendering: `#x…` hex, `#b…` binary, or a decimal
/// (possibly inside a `(_ bvN width)` application).
pub fn parse_numeral(text: &str) -> Option<BigUint> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("#x") {
        return BigUint::parse_bytes(hex.as_bytes(), 16);
    }
    if let Some(bin) = text.strip_prefix("#b") {
        return BigUint::parse_bytes(bin.as_bytes(), 2);
    }
    if let Some(dec) = text.strip_prefix("bv") {
        return BigUint::parse_bytes(dec.as_bytes(), 10);
    }
    if text.contains("bv") {
        for token in text.split_whitespace() {
            if let Some(dec) = token.strip_prefix("bv") {
                return BigUint::parse_bytes(dec.as_bytes(), 10);
            }
        }
        return None;
    }
    BigUint::parse_bytes(text.as_bytes(), 10)
}

/// Free variables of a term: zero-arity uninterpreted applications,
/// deduplicated by name, in first-occurrence order.
pub fn free_vars<'ctx>(term: &Dynamic<'ctx>) -> Vec<Dynamic<'ctx>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    collect_vars(term, &mut out, &mut seen);
    out
}

/// Free variables of a boolean constraint.
pub fn free_vars_of_bool<'ctx>(term: &Bool<'ctx>) -> Vec<Dynamic<'ctx>> {
    free_vars(&Dynamic::from_ast(term))
}

/// Free variables of a word; concrete words have none.
pub fn free_vars_of_word<'ctx>(word: &Word<'ctx>) -> Vec<Dynamic<'ctx>> {
    match word {
        Word::Concrete { .. } => Vec::new(),
        Word::Symbolic { expr, .. } => free_vars(&Dynamic::from_ast(expr)),
    }
}

/// The declared name of a variable term.
pub fn var_name(var: &Dynamic<'_>) -> String {
    var.decl().name()
}

/// Whether the term is a single variable rather than a compound
/// expression.
pub fn is_leaf_var(term: &Dynamic<'_>) -> bool {
    term.kind() == AstKind::App
        && term.children().is_empty()
        && matches!(term.safe_decl(), Ok(decl) if decl.kind() == DeclKind::UNINTERPRETED)
}

fn collect_vars<'ctx>(
    term: &Dynamic<'ctx>,
    out: &mut Vec<Dynamic<'ctx>>,
    seen: &mut HashSet<String>,
) {
    if term.kind() != AstKind::App {
        return;
    }
    let children = term.children();
    if children.is_empty() {
        if let Ok(decl) = term.safe_decl() {
            if decl.kind() == DeclKind::UNINTERPRETED {
                let name = decl.name();
                if seen.insert(name) {
                    out.push(term.clone());
                }
            }
        }
        return;
    }
    for child in children {
        collect_vars(&child, out, seen);
    }
}
