//! Benchmark event records and the sampled metrics merged into them.

use serde_json::{Map, Value};
use thiserror::Error;

/// Output columns, in file order.
pub const COLUMNS: [&str; 13] = [
    "timestamp",
    "input_text",
    "input_language",
    "translated_text",
    "output_language",
    "stt_latency_ms",
    "translation_latency_ms",
    "tts_latency_ms",
    "total_latency_ms",
    "estimated_tokens",
    "tokens_per_second",
    "cpu_usage",
    "memory_usage_mb",
];

/// Column receiving the sampled CPU usage.
pub const CPU_COLUMN: &str = "cpu_usage";
/// Column receiving the sampled memory usage.
pub const MEMORY_COLUMN: &str = "memory_usage_mb";

/// Latest CPU and memory readings for the target package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledMetrics {
    /// CPU usage as reported by `dumpsys cpuinfo`, e.g. "37%".
    pub cpu_usage: String,
    /// Total PSS in megabytes with one decimal, e.g. "20.0".
    pub memory_mb: String,
}

impl Default for SampledMetrics {
    fn default() -> Self {
        Self {
            cpu_usage: "0%".to_string(),
            memory_mb: "0.0".to_string(),
        }
    }
}

/// Errors decoding an event payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// One benchmark event decoded from the log stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    fields: Map<String, Value>,
}

impl EventRecord {
    /// Decode a payload that must be a JSON object.
    pub fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        match serde_json::from_str::<Value>(payload)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(PayloadError::NotAnObject(json_kind(&other))),
        }
    }

    /// Overwrite the metric columns with a snapshot.
    pub fn with_metrics(mut self, metrics: &SampledMetrics) -> Self {
        self.fields.insert(
            CPU_COLUMN.to_string(),
            Value::String(metrics.cpu_usage.clone()),
        );
        self.fields.insert(
            MEMORY_COLUMN.to_string(),
            Value::String(metrics.memory_mb.clone()),
        );
        self
    }

    #[cfg(test)]
    pub(crate) fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Render a field as it appears in the output file.
    ///
    /// Absent and null fields render as an empty string.
    pub fn cell(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Values of [`COLUMNS`] in order; extra fields are left out.
    pub fn row(&self) -> Vec<String> {
        COLUMNS.iter().map(|column| self.cell(column)).collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
