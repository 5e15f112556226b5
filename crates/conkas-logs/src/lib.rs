// SPDX-License-Identifier: AGPL-3.0

//! Logging setup and once-only warning helpers.
//!
//! Findings go to stdout; everything else is diagnostics on stderr,
//! filtered by the configured verbosity.

use colored::Colorize;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Map the CLI verbosity word onto a tracing filter and install the
/// subscriber. Unknown words fall back to `error`.
pub fn init(verbosity: &str) {
    let level = match verbosity.to_ascii_lowercase().as_str() {
        "notset" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warning" => "warn",
        "error" => "error",
        "critical" => "error",
        _ => "error",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

static SEEN_MESSAGES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Print a warning to stderr once per distinct message.
pub fn warn_once(message: &str) {
    let mut seen = SEEN_MESSAGES.lock().unwrap();
    if seen.insert(message.to_string()) {
        eprintln!("{}", message.yellow());
    }
}

/// Forget previously seen messages (used by tests).
pub fn clear_seen_messages() {
    SEEN_MESSAGES.lock().unwrap().clear();
}
