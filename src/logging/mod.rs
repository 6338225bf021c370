//! Logging infrastructure - structured tracing for segments, pools and vectors
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels, overridable through `RUST_LOG`
//! - Zero cost when disabled
//! - Console output with optional file output via `tracing-appender`

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

mod events;
pub use events::*;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer alive for the life of the process.
static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // RELOCMEM_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("RELOCMEM_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // RELOCMEM_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("RELOCMEM_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("RELOCMEM_LOG_JSON").is_ok();
        config.show_spans = std::env::var("RELOCMEM_LOG_SPANS").is_ok();

        config
    }

    /// Minimal logging for benchmarks
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Verbose logging, including every node and element event
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("relocmem.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Parse a level name as accepted by `RELOCMEM_LOG_LEVEL` and config files.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Targets the crate emits events under.
pub const EVENT_TARGETS: [&str; 4] = ["relocmem", "segment", "pool", "vector"];

/// Filter directives enabling every crate target at `level`.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    EVENT_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; later calls are no-ops, and so
/// is a call made after some other subscriber was installed globally.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(config.level)));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let console = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_span_events(span_events.clone())
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(io::stdout)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .boxed()
        };

        let file = match (config.file_output, config.log_path.as_deref()) {
            (true, Some(path)) => {
                let (writer, guard) = tracing_appender::non_blocking(file_appender(path));
                let _ = FILE_GUARD.set(guard);
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_span_events(span_events)
                        .boxed(),
                )
            }
            _ => None,
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

fn file_appender(path: &str) -> tracing_appender::rolling::RollingFileAppender {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "relocmem.log".to_string());
    tracing_appender::rolling::never(dir, name)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}
