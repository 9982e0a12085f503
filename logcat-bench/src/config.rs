//! Configuration for the benchmark logger.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use logcat_bench_common::LoggingConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] logcat_bench_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete logger configuration.
///
/// Every section is optional; an empty file (or no file at all) yields the
/// defaults used against the speech translator app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// How to reach the device.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Log stream settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Resource sampling settings.
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Output file settings.
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path to the `adb` executable (default: "adb" from `PATH`).
    #[serde(default = "default_adb_path")]
    pub adb_path: String,

    /// Device serial passed as `adb -s <serial>`.
    /// Leave unset when only one device is attached.
    #[serde(default)]
    pub serial: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
        }
    }
}

fn default_adb_path() -> String {
    "adb".to_string()
}

impl DeviceConfig {
    /// Build the full argument list for an adb invocation, including the
    /// device selector when one is configured.
    pub fn adb_args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = Vec::new();
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.into_iter().map(Into::into));
        full
    }
}

/// Log stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Logcat tag to filter on (default: "flutter").
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Marker preceding the JSON payload (default: "BENCHMARK_DATA: ").
    #[serde(default = "default_marker")]
    pub marker: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tag: default_tag(),
            marker: default_marker(),
        }
    }
}

fn default_tag() -> String {
    "flutter".to_string()
}

fn default_marker() -> String {
    "BENCHMARK_DATA: ".to_string()
}

/// Resource sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Android package whose CPU and memory usage is sampled.
    #[serde(default = "default_package")]
    pub package: String,

    /// Pause between sampling cycles in milliseconds (default: 1000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound for a single device query in milliseconds (default: 2000).
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            package: default_package(),
            interval_ms: default_interval_ms(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_package() -> String {
    "com.armhack.speech_translator".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_query_timeout_ms() -> u64 {
    2000
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Output file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// CSV file that records are appended to.
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("benchmark_results.csv")
}

impl BenchConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Not validated; callers validate once all overrides are applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(logcat_bench_common::load_config(path)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("device.adb_path", self.device.adb_path.as_str()),
            ("stream.tag", self.stream.tag.as_str()),
            ("stream.marker", self.stream.marker.as_str()),
            ("sampler.package", self.sampler.package.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} must not be empty", name)));
            }
        }

        if self.output.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "output.path must not be empty".to_string(),
            ));
        }

        if self.sampler.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "sampler.interval_ms must be > 0".to_string(),
            ));
        }

        if self.sampler.query_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "sampler.query_timeout_ms must be > 0".to_string(),
            ));
        }

        logcat_bench_common::level_filter(&self.logging.level)
            .map_err(|e| ConfigError::Validation(format!("logging.level: {}", e)))?;

        Ok(())
    }
}
