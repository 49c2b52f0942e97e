//! modgate Common Library
//!
//! Shared utilities for the modgate crates:
//!
//! - [`config`] - Logging configuration
//! - [`error`] - Error types

pub mod config;
pub mod error;

pub use config::{LogFormat, LoggingConfig};
pub use error::{Error, Result};

/// Crates whose events follow the configured level.
pub const LOG_TARGETS: [&str; 5] = [
    "modgate",
    "modgate_common",
    "modgate_controller",
    "modgate_exporter",
    "modgate_telegram",
];

/// Filter directives for a configured level.
///
/// The modgate crates log at `level`; dependencies such as the Modbus and
/// HTTP stacks stay at `warn`.
pub fn default_directives(level: &str) -> Result<String> {
    use tracing_subscriber::filter::LevelFilter;

    let level = level.trim().to_ascii_lowercase();
    level
        .parse::<LevelFilter>()
        .map_err(|_| Error::Config(format!("Invalid log level '{}'", level)))?;

    let mut directives = String::from("warn");
    for target in LOG_TARGETS {
        directives.push_str(&format!(",{}={}", target, level));
    }
    Ok(directives)
}

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Example
///
/// ```ignore
/// use modgate_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let directives = default_directives(&config.level)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directives)
            .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directives, e)))?,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
