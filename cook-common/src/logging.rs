//! Logging setup for the harness binary and its tests.
//!
//! ```ignore
//! let log_config = LogConfig::from_env("info").with_stderr();
//! let _logging_guards = init_logging(&log_config)?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Once;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::EnvParser;
use crate::errors::{CookError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `cook_common=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Also write JSON lines to this file.
    pub file: Option<PathBuf>,
    /// Console output to stderr instead of stdout.
    pub stderr: bool,
}

impl LogConfig {
    /// Read `COOK_LOG_LEVEL`, `COOK_LOG_FORMAT` and `COOK_LOG_FILE`.
    ///
    /// Invalid values fall back to the defaults.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level);
        let format = parser
            .get_optional_string("LOG_FORMAT")
            .and_then(|f| LogFormat::parse(&f))
            .unwrap_or_default();
        let file = parser.get_optional_string("LOG_FILE").map(PathBuf::from);
        for err in parser.take_errors() {
            eprintln!("warning: {err}");
        }
        Self {
            level,
            format,
            file,
            stderr: false,
        }
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Keeps the non-blocking writers flushing; drop at the end of `main`.
#[must_use = "dropping the guards stops log output"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(config: &LogConfig, guards: &mut Vec<WorkerGuard>) -> BoxedLayer {
    let (writer, guard) = if config.stderr {
        tracing_appender::non_blocking(std::io::stderr())
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };
    guards.push(guard);
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    match config.format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(path: &Path, guards: &mut Vec<WorkerGuard>) -> Result<BoxedLayer> {
    let file_name = path
        .file_name()
        .ok_or_else(|| CookError::Config(format!("log file {} has no file name", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|err| {
        CookError::Config(format!("cannot create log dir {}: {err}", dir.display()))
    })?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    guards.push(guard);
    Ok(tracing_subscriber::fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(writer)
        .boxed())
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|err| CookError::Config(format!("invalid log level {:?}: {err}", config.level)))?;

    let mut guards = Vec::new();
    let mut layers = vec![console_layer(config, &mut guards)];
    if let Some(path) = &config.file {
        layers.push(file_layer(path, &mut guards)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|err| CookError::Config(format!("logging already initialised: {err}")))?;
    Ok(LoggingGuards { _guards: guards })
}

static TEST_LOGGING_INIT: Once = Once::new();

/// JSON test-writer logging for test binaries. Safe to call repeatedly.
///
/// Level comes from `COOK_TEST_LOG_LEVEL` (default `info`).
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let level = std::env::var("COOK_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = EnvFilter::try_new(format!("cook_common={level},cook_itest={level}"))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_test_writer()
            .with_current_span(true)
            .with_target(true);
        let _ = tracing_subscriber::registry().with(layer).with(filter).try_init();
    });
}
