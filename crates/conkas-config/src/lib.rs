// SPDX-License-Identifier: AGPL-3.0

//! Command-line configuration.

use clap::Parser;
use std::path::PathBuf;

/// Symbolic execution tool for EVM bytecode.
#[derive(Debug, Clone, Parser)]
#[clap(name = "conkas", version, about = "Symbolic execution tool for EVM")]
pub struct Config {
    /// File with an EVM bytecode hex string to analyse (or a Solidity
    /// source with --solidity-file).
    pub file: PathBuf,

    /// Treat the input as a Solidity source file and compile it first.
    #[clap(long = "solidity-file", short = 's')]
    pub solidity_file: bool,

    /// Log output verbosity (NotSet, Debug, Info, Warning, Error,
    /// Critical).
    #[clap(long, short = 'v', default_value = "Error")]
    pub verbosity: String,

    /// Vulnerability types to check; may be given several times.
    /// Defaults to all of arithmetic, reentrancy, time_manipulation,
    /// transaction_ordering_dependence, unchecked_ll_calls.
    #[clap(long = "vuln-type", alias = "vt")]
    pub vuln_type: Vec<String>,

    /// Max recursion depth, counted in analysed basic blocks per trace.
    #[clap(long = "max-depth", alias = "md", default_value_t = 25)]
    pub max_depth: usize,

    /// Keep looking after the first finding of each analysis.
    #[clap(long = "find-all-vulnerabilities", alias = "fav")]
    pub find_all_vulnerabilities: bool,

    /// SMT solver budget per query, in milliseconds.
    #[clap(long, short = 't', default_value_t = 100)]
    pub timeout: u32,

    /// Multiplier applied to the solver budget of multiplication
    /// overflow queries, the hardest query class.
    #[clap(long = "mul-timeout-factor", default_value_t = 1000)]
    pub mul_timeout_factor: u32,

    /// Path of the solc executable used with --solidity-file.
    #[clap(long = "solc-path", default_value = "solc")]
    pub solc_path: String,
}
