//! logcat-bench common library
//!
//! Shared pieces used by the logcat-bench tools:
//!
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};

/// Build the level filter for a configured level such as `"info"` or
/// `"warn,logcat_bench=debug"`.
///
/// Unlike `RUST_LOG`, a malformed level is an error rather than ignored.
pub fn level_filter(level: &str) -> Result<tracing_subscriber::EnvFilter> {
    tracing_subscriber::EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", level, e)))
}

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set. Output is
/// text or JSON per [`LogFormat`], with timestamps unless
/// [`LoggingConfig::timestamps`] is off.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (config.format, config.timestamps) {
        (LogFormat::Text, true) => fmt::layer().boxed(),
        (LogFormat::Text, false) => fmt::layer().without_time().boxed(),
        (LogFormat::Json, true) => fmt::layer().json().boxed(),
        (LogFormat::Json, false) => fmt::layer().json().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
