//! Tracing setup for Recast
//!
//! Console output at the level the user picks, plus a full trace log of the
//! last run on disk for diagnosing codec and surface problems after the fact.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File written inside the logs directory, replaced on every run.
pub const LOG_FILE_NAME: &str = "recast-last-run.log";

/// Crates whose events the console shows at the chosen level.
const RECAST_TARGETS: [&str; 3] = ["recast", "recast_core", "recast_sim"];

/// Installs the console layer and the trace file layer.
///
/// `RUST_LOG` replaces the console filter when set. `logs_dir` defaults to
/// `./logs`; the previous run's log is truncated.
///
/// # Errors
///
/// - `std::io::Error` - Logs directory cannot be created or the log file cannot be opened
/// - `tracing_subscriber::util::TryInitError` - A global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (log_path, log_file) = open_log_file(logs_dir.unwrap_or_else(|| Path::new("logs")))?;

    let console_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(console_filter(console_level));

    // Pool workers interleave per-buffer traces, keep thread names in the file
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        "Logging at {} to console, full trace in {}",
        console_level,
        log_path.display()
    );
    Ok(())
}

fn open_log_file(dir: &Path) -> std::io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    let file = File::create(&path)?;
    Ok((path, file))
}

/// Recast crates at `level`, everything else at warn.
fn console_filter(level: Level) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(console_directives(level))
}

fn console_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(RECAST_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// `--log-level` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Job lifecycle, negotiated formats and progress
    #[default]
    Info,
    /// Per-track state transitions
    Debug,
    /// Every buffer moved through the pipeline
    Trace,
}

impl CliLogLevel {
    /// # Examples
    /// ```
    /// use recast_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true).map_err(|_| format!("Invalid log level: {s}"))
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_tracing_level().as_str().to_ascii_lowercase())
    }
}
