//! Tracing initialisation.
//!
//! Console output goes to stderr in one of three formats (pretty, compact, JSON).
//! When `[logging] file` is set, every event is also appended to that file without
//! ANSI colours, so consecutive runs accumulate in one log.
//!
//! # Example
//! ```no_run
//! use bt_current_bench::{config::Settings, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(std::path::Path::new("config.ini"))?;
//! logging::init_from_settings(&settings.logging)?;
//! tracing::info!("Bench started");
//! # Ok(())
//! # }
//! ```

use crate::config::LoggingSettings;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured.
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Tracing options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Minimum level, unless `RUST_LOG` is set.
    pub level: Level,
    /// Console format.
    pub format: OutputFormat,
    /// Append-mode log file.
    pub file: Option<PathBuf>,
    /// ANSI colours on the console (never in the file).
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            file: None,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Build from the `[logging]` section.
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&settings.level)?,
            format: parse_format(&settings.format)?,
            file: settings.file.clone(),
            ..Default::default()
        })
    }

    /// Console-only configuration at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the console format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colours on the console.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialise from the `[logging]` section.
pub fn init_from_settings(settings: &LoggingSettings) -> Result<(), String> {
    init(TracingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// Calling this again after a subscriber is installed is not an error, so tests
/// and the binary can both call it.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)))
    };

    let console = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_ansi(config.with_ansi)
            .with_filter(filter())
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(config.with_ansi)
            .with_filter(filter())
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed(),
    };

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Failed to open log file '{}': {}", path.display(), e))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat, String> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        )),
    }
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = LoggingSettings {
            level: "debug".to_string(),
            format: "json".to_string(),
            file: Some(PathBuf::from("bench.log")),
        };
        let config = TracingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("bench.log")));

        let bad = LoggingSettings {
            format: "xml".to_string(),
            ..LoggingSettings::default()
        };
        assert!(TracingConfig::from_settings(&bad).is_err());
    }

    #[test]
    fn test_filter_string() {
        assert_eq!(level_to_filter_string(Level::WARN), "warn");
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Pretty)
            .with_ansi(false);
        assert_eq!(config.format, OutputFormat::Pretty);
        assert!(!config.with_ansi);
        assert!(config.file.is_none());
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TracingConfig {
            file: Some(tmp.path().join("missing").join("bench.log")),
            ..Default::default()
        };
        let err = init(config).unwrap_err();
        assert!(err.starts_with("Failed to open log file"), "{}", err);
    }
}
