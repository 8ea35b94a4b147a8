//! Logging system for twitter-search.
//!
//! Human-readable logs go to stderr. When [`LogConfig::file`] is set, every
//! event at info level or above is also written there as one JSON object
//! per line; that file is the run log uploaded by [`crate::run_log`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use twitter_search::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::default();
//! init_logging(&config).ok();
//!
//! tracing::info!("Application started");
//! ```

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Target prefix of this crate's events.
const CRATE_TARGET: &str = "twitter_search";

/// Logging configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Minimum log level to display on stderr.
    pub level: LogLevel,
    /// Output format for stderr.
    pub format: LogFormat,
    /// Include timestamps in stderr output.
    pub timestamps: bool,
    /// Include target (module path) in stderr output.
    pub target: bool,
    /// Enable ANSI colors in output.
    pub colors: bool,
    /// Also write JSON lines to this file.
    pub file: Option<PathBuf>,
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Errors, warnings, and info messages.
    Info,
    /// All of the above plus debug messages.
    Debug,
    /// Everything including trace messages.
    Trace,
    /// No logging at all.
    Off,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors.
    Pretty,
    /// Compact single-line format.
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            colors: true,
            file: None,
        }
    }
}

impl LogConfig {
    /// Create a config for quiet mode (errors only).
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            timestamps: false,
            target: false,
            colors: true,
            file: None,
        }
    }

    /// Create a config for verbose mode (debug level).
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            timestamps: true,
            target: true,
            colors: true,
            file: None,
        }
    }

    /// Pick the preset matching the CLI flags; quiet wins over verbose.
    #[must_use]
    pub const fn for_cli(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::quiet()
        } else if verbose {
            Self::verbose()
        } else {
            Self {
                level: LogLevel::Info,
                format: LogFormat::Compact,
                timestamps: true,
                target: false,
                    colors: true,
                file: None,
            }
        }
    }

    /// Also write the JSON run log to `path`.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Level of the file layer: never quieter than info, so the run log
    /// is complete even when stderr is quiet.
    const fn file_level(&self) -> LogLevel {
        match self.level {
            LogLevel::Debug => LogLevel::Debug,
            LogLevel::Trace => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    /// Convert to env filter directive string.
    const fn to_filter_string(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }

    fn crate_filter(self) -> EnvFilter {
        EnvFilter::new(format!("{CRATE_TARGET}={}", self.to_filter_string()))
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn stderr_layer(config: &LogConfig) -> BoxedLayer {
    // RUST_LOG overrides the preset level for the terminal only.
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        config.level.crate_filter()
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().with_filter(env_filter).boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().with_filter(env_filter).boxed(),
        (LogFormat::Compact, true) => base.compact().with_filter(env_filter).boxed(),
        (LogFormat::Compact, false) => {
            base.compact().without_time().with_filter(env_filter).boxed()
        }
    }
}

fn file_layer(config: &LogConfig, file: File) -> BoxedLayer {
    fmt::layer()
        .json()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false)
        .with_filter(config.file_level().crate_filter())
        .boxed()
}

/// Initialize the logging system with the given configuration.
///
/// This should be called once at the start of the application.
/// Subsequent calls are ignored.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn init_logging(config: &LogConfig) -> std::io::Result<()> {
    let mut layers = vec![stderr_layer(config)];
    if let Some(path) = &config.file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(file_layer(config, file));
    }

    tracing_subscriber::registry().with(layers).try_init().ok();
    Ok(())
}

/// Initialize logging for tests (quiet by default).
pub fn init_test_logging() {
    let config = LogConfig {
        level: LogLevel::Off,
        ..Default::default()
    };
    init_logging(&config).ok();
}

/// A guard that logs the start and end of an operation.
///
/// Useful for tracking the duration and success of pipeline phases.
pub struct OperationGuard {
    name: String,
    start: std::time::Instant,
}

impl OperationGuard {
    /// Start tracking an operation.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        tracing::info!(operation = %name, "Starting operation");
        Self {
            name,
            start: std::time::Instant::now(),
        }
    }

    /// Complete the operation successfully.
    pub fn complete(self) {
        let duration = self.start.elapsed();
        tracing::info!(
            operation = %self.name,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }

    /// Mark the operation as failed.
    pub fn fail(self, error: &dyn std::error::Error) {
        let duration = self.start.elapsed();
        tracing::error!(
            operation = %self.name,
            duration_ms = duration.as_millis(),
            error = %error,
            "Operation failed"
        );
    }

    /// Complete or fail depending on `result`, passing it through.
    pub fn finish<T, E: std::error::Error>(self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.complete(),
            Err(e) => self.fail(e),
        }
        result
    }
}
