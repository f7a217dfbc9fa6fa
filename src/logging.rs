//! Logging configuration for the agent.
//!
//! Logs go to stderr by default, or are appended to a file when one is
//! configured. `RUST_LOG` overrides the configured level.

use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Longest SQL excerpt written to the per-iteration audit line.
const SQL_EXCERPT_CHARS: usize = 200;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes logging to stderr at `level`.
pub fn init_stderr_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Initializes logging that appends to `path`.
///
/// Parent directories are created as needed. Falls back to stderr if the
/// file cannot be opened.
pub fn init_file_logging(path: &Path, level: &str) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            init_stderr_logging(level);
            return;
        }
    }

    let log_file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {e}", path.display());
            init_stderr_logging(level);
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(log_file)
        .with_ansi(false)
        .try_init();
}

/// Writes the audit line for one finished iteration.
pub fn log_iteration(question: &str, iteration: u32, sql: Option<&str>, outcome: &str, next_step: &str) {
    let sql = sql.map(sql_excerpt).unwrap_or_default();
    info!(
        target: "erp_agent::audit",
        question,
        iteration,
        sql = sql.as_str(),
        outcome,
        next_step,
        "Iteration finished"
    );
}

/// Collapses whitespace and cuts long statements on a character boundary.
fn sql_excerpt(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SQL_EXCERPT_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(SQL_EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}
