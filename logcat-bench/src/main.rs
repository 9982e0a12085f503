//! Benchmark logger for on-device inference runs.
//!
//! Streams benchmark events from logcat into a CSV file together with the
//! app's CPU and memory usage.

use anyhow::Result;
use clap::Parser;
use logcat_bench::args::CliArgs;
use logcat_bench::runner;
use logcat_bench_common::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = args.load_config()?;

    init_tracing(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting benchmark logger"
    );

    // Run until the stream ends or Ctrl+C
    runner::run(config).await?;

    Ok(())
}
