// SPDX-License-Identifier: AGPL-3.0

//! conkas: symbolic executor and vulnerability detector for EVM
//! bytecode.
//!
//! The driver assembles the pieces: read the input (raw hex blob or a
//! Solidity file lowered through solc), lift each contract, explore its
//! traces, run the requested analyses, and render the findings. A
//! contract that fails to analyse is logged and the next one continues;
//! only I/O and compilation failures are fatal.

use std::collections::BTreeMap;
use std::fs;
use std::process::Command;

use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use tracing::{error, info};
use z3::Context as Z3Context;

use conkas_config::Config;
use conkas_exec::SymExec;
use conkas_solver::SolverFacade;
use conkas_srcmap::SourceMap;
use conkas_vulns::{VulnClass, Vulnerability, VulnerabilityFinder};

fn main() -> Result<()> {
    let config = Config::parse();
    conkas_logs::init(&config.verbosity);

    let classes = requested_classes(&config)?;

    let mut source_map = None;
    let mut bytecodes: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    if config.solidity_file {
        let combined = compile_solidity(&config)?;
        source_map = Some(
            SourceMap::from_combined_json(&combined)
                .context("cannot build the source map from solc output")?,
        );
        if let Some(contracts) = combined.get("contracts").and_then(Value::as_object) {
            for (name, entry) in contracts {
                let runtime = entry
                    .get("bin-runtime")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                bytecodes.insert(name.clone(), runtime.as_bytes().to_vec());
            }
        }
    } else {
        let raw = fs::read(&config.file)
            .with_context(|| format!("cannot read {}", config.file.display()))?;
        bytecodes.insert(config.file.display().to_string(), raw);
    }

    for (name, bytecode) in &bytecodes {
        info!("analysing {}", name);
        println!("Analysing {}...", name);
        if bytecode.is_empty() {
            println!("Nothing to analyse");
            continue;
        }

        match analyse_contract(&config, &classes, name, bytecode, source_map.as_ref()) {
            Ok(findings) => {
                for vuln in findings {
                    print_finding(&vuln);
                }
            }
            Err(err) => {
                // Contract-level failures do not stop the run.
                error!("analysis of {} failed: {}", name, err);
                conkas_logs::warn_once(&format!("skipped {}: {}", name, err));
            }
        }
    }

    Ok(())
}

fn requested_classes(config: &Config) -> Result<Vec<VulnClass>> {
    if config.vuln_type.is_empty() {
        return Ok(VulnClass::all().to_vec());
    }
    config
        .vuln_type
        .iter()
        .map(|name| {
            name.parse::<VulnClass>()
                .map_err(|err| anyhow::anyhow!(err))
        })
        .collect()
}

fn compile_solidity(config: &Config) -> Result<Value> {
    let output = Command::new(&config.solc_path)
        .arg("--combined-json")
        .arg("srcmap-runtime,bin-runtime")
        .arg(&config.file)
        .output()
        .with_context(|| format!("cannot run {}", config.solc_path))?;

    if !output.status.success() {
        bail!(
            "solc failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    serde_json::from_slice(&output.stdout).context("solc produced unparsable combined-json")
}

fn analyse_contract(
    config: &Config,
    classes: &[VulnClass],
    name: &str,
    bytecode: &[u8],
    source_map: Option<&SourceMap>,
) -> Result<Vec<Vulnerability>> {
    let program = conkas_lifter::lift(bytecode)?;

    let z3_config = z3::Config::new();
    let ctx = Z3Context::new(&z3_config);

    let traces = SymExec::with_max_depth(&ctx, &program, config.max_depth).execute()?;
    info!("explored {} traces for {}", traces.len(), name);

    let solver = SolverFacade::new(&ctx, config.timeout);
    let finder = VulnerabilityFinder::new(
        &traces,
        &program,
        name,
        source_map,
        &solver,
        config.find_all_vulnerabilities,
        config.max_depth,
        config.mul_timeout_factor,
    );
    Ok(finder.analyse_only(classes))
}

fn print_finding(vuln: &Vulnerability) {
    let line = vuln
        .line_number
        .map(|l| l.to_string())
        .unwrap_or_default();
    println!(
        "{} {}. Maybe in function: {}. PC: {:#x}. Line number: {}.",
        "Vulnerability:".red().bold(),
        vuln.kind,
        vuln.function_name,
        vuln.pc,
        line
    );
    for (i, (variable, value)) in vuln.model.iter().enumerate() {
        if i == 0 {
            println!("If {} = {}", variable, value);
        } else {
            println!("and {} = {}", variable, value);
        }
    }
}
