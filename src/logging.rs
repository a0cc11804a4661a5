//! Subscriber setup for the `tracing` events emitted by providers and listeners.
//!
//! The library only emits events; applications that want them printed call
//! [`init_logging`] once at startup.

use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Disable all log output when false
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output is "file"
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Enable colored output (text format only, stdout/stderr only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("tether.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

/// Install a global `tracing` subscriber.
///
/// `TETHER_LOG` (a full filter), `TETHER_LOG_FORMAT` and `TETHER_LOG_OUTPUT`
/// take precedence over `config`; `TETHER_LOG_MODULES` adds per-module
/// directives on top of the configured level. Fails if a global subscriber is
/// already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ContextError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);
    if !config.enabled {
        return Ok(());
    }

    let filter = log_filter(config)?;
    let format = env_or("TETHER_LOG_FORMAT", &config.format);
    let output = LogOutput::parse(&env_or("TETHER_LOG_OUTPUT", &config.output))?;
    let writer = output.writer(&config.file)?;
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(writer);

    let registry = Registry::default().with(filter);
    let result = match format.as_str() {
        "json" => registry.with(layer.json()).try_init(),
        "text" => registry
            .with(layer.with_ansi(config.color && output != LogOutput::File))
            .try_init(),
        other => {
            return Err(ContextError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            )))
        }
    };

    result.map_err(|e| ContextError::ConfigError(format!("Failed to install logger: {}", e)))
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn log_filter(config: &LoggingConfig) -> Result<EnvFilter, ContextError> {
    if let Ok(filter) = EnvFilter::try_from_env("TETHER_LOG") {
        return Ok(filter);
    }

    let configured = config
        .modules
        .iter()
        .map(|(module, level)| format!("{}={}", module, level));
    let from_env = std::env::var("TETHER_LOG_MODULES").unwrap_or_default();
    let from_env = from_env
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(str::to_string);

    let mut filter = EnvFilter::new(&config.level);
    for directive in configured.chain(from_env) {
        let directive = directive.parse::<Directive>().map_err(|e| {
            ContextError::ConfigError(format!("Invalid log directive '{}': {}", directive, e))
        })?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutput {
    Stdout,
    Stderr,
    File,
}

impl LogOutput {
    fn parse(output: &str) -> Result<Self, ContextError> {
        match output {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(ContextError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }

    fn writer(self, path: &Path) -> Result<BoxMakeWriter, ContextError> {
        match self {
            LogOutput::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
            LogOutput::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
            LogOutput::File => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ContextError::ConfigError(format!("Failed to create log directory: {}", e))
                    })?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        ContextError::ConfigError(format!(
                            "Failed to open log file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
            }
        }
    }
}
