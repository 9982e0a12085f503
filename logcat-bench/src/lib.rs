//! Benchmark logger for on-device inference runs.
//!
//! Reads `adb logcat -s <tag>`, picks out lines carrying a JSON payload
//! after a marker (`BENCHMARK_DATA: ` by default), merges in the latest CPU
//! and memory readings of the target package, and appends each event as a
//! row of a CSV file.
//!
//! # Output Columns
//!
//! ```text
//! timestamp, input_text, input_language, translated_text, output_language,
//! stt_latency_ms, translation_latency_ms, tts_latency_ms, total_latency_ms,
//! estimated_tokens, tokens_per_second, cpu_usage, memory_usage_mb
//! ```

pub mod args;
pub mod config;
pub mod record;
pub mod runner;
pub mod sampler;
pub mod stream;
pub mod writer;
