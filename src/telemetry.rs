//! Log output for the bundled binaries.
//!
//! Installs a `tracing` subscriber writing either to stderr or to
//! `<log_dir>/<file_stem>.log`. `RUST_LOG`, when set, overrides the level
//! given on the command line.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parse a level name, case-insensitively. `WARNING` is accepted for `WARN`.
pub fn parse_level(name: &str) -> Option<Level> {
    // ---
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" | "WARNING" => Some(Level::WARN),
        "ERROR" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber.
///
/// An unrecognized `level` falls back to `INFO` and is reported as a warning
/// once logging is up.
///
/// # Errors
///
/// Fails if the log file cannot be created or a subscriber is already set.
pub fn init(level: &str, log_dir: Option<&Path>, file_stem: &str) -> io::Result<()> {
    // ---
    let parsed = parse_level(level);
    let directive = parsed.unwrap_or(Level::INFO).as_str().to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let installed = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(format!("{file_stem}.log"));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .compact()
            .try_init(),
    };
    installed.map_err(io::Error::other)?;

    if parsed.is_none() {
        tracing::warn!("unknown log level {level:?}, using INFO");
    }
    Ok(())
}
