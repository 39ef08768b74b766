//! Two logging surfaces that coexist on purpose: `tracing` for structured
//! development diagnostics, and a plain bracket-dated file logger matching
//! the format the original Python scripts wrote to `auto_remember.log` —
//! the out-of-scope status dashboard still parses lines of that shape.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber reading `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Append a single `[YYYY-MM-DD] <msg>` line to the configured log file.
///
/// Best-effort: a failure to write the file is logged via `tracing` but
/// never propagated, since this log is a convenience for an external
/// dashboard, not a source of truth.
pub fn log_line(log_file: &Path, msg: &str) {
    let date = Utc::now().format("%Y-%m-%d");
    let line = format!("[{date}] {msg}\n");

    if let Some(parent) = log_file.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("could not create log directory {}: {e}", parent.display());
            return;
        }
    }

    match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(mut f) => {
            if let Err(e) = f.write_all(line.as_bytes()) {
                tracing::warn!("could not append to log file {}: {e}", log_file.display());
            }
        }
        Err(e) => tracing::warn!("could not open log file {}: {e}", log_file.display()),
    }
}
