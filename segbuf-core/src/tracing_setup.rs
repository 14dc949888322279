//! Logging setup for binaries and simulations.
//!
//! Two sinks are installed: the console, filtered to the level the user
//! picked, and a per-run file that keeps every event down to `trace`. The
//! append, evict and flush history of a session is logged at debug and trace
//! level, so the file is where buffering problems get diagnosed.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt as layer_fmt};

/// Name of the per-run debug log inside the logs directory.
pub const LOG_FILE_NAME: &str = "segbuf-last-run.log";

/// Crates whose events pass the console filter at the chosen level.
const CONSOLE_TARGETS: [&str; 3] = ["segbuf_core", "segbuf_sim", "segbuf"];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("Cannot prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Installs the console and file subscribers.
///
/// `logs_dir` defaults to `./logs`; the log file is truncated on every run.
/// `RUST_LOG`, when set, replaces the console filter.
///
/// # Errors
///
/// - `TracingError::LogFile` - Logs directory or file could not be created
/// - `TracingError::AlreadyInstalled` - Another subscriber owns the process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<(), TracingError> {
    let dir = logs_dir.unwrap_or_else(|| Path::new("logs"));
    let path = dir.join(LOG_FILE_NAME);
    let file = open_log_file(dir, &path)?;

    tracing_subscriber::registry()
        .with(console_layer(console_level))
        .with(file_layer(file))
        .try_init()
        .map_err(|_| TracingError::AlreadyInstalled)?;

    tracing::info!(console = %console_level, log_file = %path.display(), "Tracing initialized");
    Ok(())
}

fn open_log_file(dir: &Path, path: &Path) -> Result<File, TracingError> {
    fs::create_dir_all(dir)
        .and_then(|()| File::create(path))
        .map_err(|source| TracingError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Directives used when `RUST_LOG` is unset: other crates stay at warn.
fn console_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    let scoped: Vec<String> = CONSOLE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    format!("warn,{}", scoped.join(","))
}

fn console_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_directives(level)))
}

fn console_layer<S>(level: Level) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    layer_fmt::layer()
        .with_target(true)
        .compact()
        .with_filter(console_filter(level))
}

fn file_layer<S>(file: File) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    layer_fmt::layer()
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(file)
        .with_filter(EnvFilter::new("trace"))
}

/// Console verbosity selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    /// Appends, evictions and chain results
    Debug,
    /// Every skipped position check as well
    Trace,
}

impl CliLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        }
    }
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_cli_levels_map_to_tracing_levels() {
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
        for level in CliLogLevel::value_variants() {
            assert_eq!(Level::from(*level).to_string().to_lowercase(), level.as_str());
        }
    }

    #[test]
    fn test_console_directives_scope_level_to_segbuf_crates() {
        assert_eq!(
            console_directives(Level::DEBUG),
            "warn,segbuf_core=debug,segbuf_sim=debug,segbuf=debug"
        );
    }

    #[test]
    fn test_log_file_is_created_before_install() {
        let dir = tempfile::tempdir().unwrap();
        // Another test may already own the global subscriber
        let _ = init_tracing(Level::WARN, Some(dir.path()));
        assert!(dir.path().join(LOG_FILE_NAME).exists());
    }
}
