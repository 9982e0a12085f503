//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{BenchConfig, ConfigError};

/// Record on-device benchmark events from logcat, enriched with CPU and
/// memory samples, into a CSV file.
#[derive(Parser, Debug, Clone)]
#[command(name = "logcat-bench")]
#[command(version)]
pub struct CliArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// CSV file to append results to (overrides config).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Logcat tag to listen on (overrides config).
    #[arg(long)]
    pub tag: Option<String>,

    /// Android package to sample CPU and memory for (overrides config).
    #[arg(long)]
    pub package: Option<String>,

    /// Device serial, as listed by `adb devices` (overrides config).
    #[arg(short, long)]
    pub serial: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Load the config file (or defaults), apply overrides and validate.
    pub fn load_config(&self) -> Result<BenchConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load_from_file(path)?,
            None => BenchConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of `config`.
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(output) = &self.output {
            config.output.path = output.clone();
        }
        if let Some(tag) = &self.tag {
            config.stream.tag = tag.clone();
        }
        if let Some(package) = &self.package {
            config.sampler.package = package.clone();
        }
        if let Some(serial) = &self.serial {
            config.device.serial = Some(serial.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}
