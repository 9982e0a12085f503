//! Lifecycle of a logging run: sampler, log stream, writer and shutdown.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use tokio::io::AsyncBufRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BenchConfig;
use crate::record::{EventRecord, SampledMetrics};
use crate::sampler::{AdbShell, Sampler};
use crate::stream::{EventReader, LogcatStream, StreamItem};
use crate::writer::RecordWriter;

/// How long to wait for the sampler task after signalling shutdown.
const SAMPLER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Characters of input/output text shown in progress lines.
const PREVIEW_CHARS: usize = 20;

/// Counters for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines_read: u64,
    pub events_written: u64,
    pub malformed_payloads: u64,
    pub write_errors: u64,
}

/// Why the event loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The log stream reached end of output.
    StreamEnded,
    /// A shutdown signal arrived.
    Shutdown,
}

/// Merges the latest metrics into each event and persists it.
pub struct EventRecorder {
    writer: RecordWriter,
    metrics: watch::Receiver<SampledMetrics>,
    stats: RunStats,
}

impl EventRecorder {
    pub fn new(writer: RecordWriter, metrics: watch::Receiver<SampledMetrics>) -> Self {
        Self {
            writer,
            metrics,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            events_written: self.writer.rows_written(),
            ..self.stats
        }
    }

    /// Record events until the stream ends or `stop` resolves.
    ///
    /// An event being written is always finished before `stop` is observed.
    pub async fn pump<R, F>(&mut self, events: &mut EventReader<R>, stop: F) -> StopReason
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);

        let reason = loop {
            tokio::select! {
                _ = &mut stop => break StopReason::Shutdown,
                item = events.next_item() => match item {
                    Ok(Some(item)) => self.handle(item).await,
                    Ok(None) => break StopReason::StreamEnded,
                    Err(e) => {
                        error!(error = %e, "Failed to read log stream");
                        break StopReason::StreamEnded;
                    }
                },
            }
        };

        self.stats.lines_read = events.lines_read();
        reason
    }

    /// Handle one marker line.
    pub async fn handle(&mut self, item: StreamItem) {
        match item {
            StreamItem::Event(record) => {
                // Latest snapshot; the sampler may update it right after.
                let metrics = self.metrics.borrow().clone();
                let record = record.with_metrics(&metrics);

                match self.writer.write(&record).await {
                    Ok(()) => {
                        let now = chrono::Local::now().time();
                        info!("{}", format_progress(now, &record, &metrics));
                    }
                    Err(e) => {
                        self.stats.write_errors += 1;
                        error!(
                            error = %e,
                            path = %self.writer.path().display(),
                            "Error processing line: failed to write record"
                        );
                    }
                }
            }
            StreamItem::Malformed { error, payload } => {
                self.stats.malformed_payloads += 1;
                warn!(error = %error, payload = %payload, "Error parsing benchmark payload");
            }
        }
    }
}

/// One human-readable line summarising a written event.
pub fn format_progress(time: NaiveTime, record: &EventRecord, metrics: &SampledMetrics) -> String {
    format!(
        "[{}] Logged translation: {}... -> {}... ({}ms) [TPS: {}] [CPU: {}, Mem: {}MB]",
        time.format("%H:%M:%S"),
        preview(&record.cell("input_text")),
        preview(&record.cell("translated_text")),
        or_dash(record.cell("total_latency_ms")),
        or_dash(record.cell("tokens_per_second")),
        metrics.cpu_usage,
        metrics.memory_mb,
    )
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

fn or_dash(value: String) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Wait for the sampler task to finish, giving up after `timeout` or when
/// `interrupt` resolves. Returns whether the task stopped on its own.
async fn join_sampler<F>(mut task: JoinHandle<()>, timeout: Duration, interrupt: F) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = tokio::time::timeout(timeout, &mut task) => match result {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => {
                warn!(error = %e, "Sampler task failed");
                return false;
            }
            Err(_) => warn!("Sampler did not stop in time"),
        },
        _ = interrupt => warn!("Interrupted while waiting for sampler"),
    }

    task.abort();
    false
}

/// Run the logger until the log stream ends or a shutdown signal arrives.
pub async fn run(config: BenchConfig) -> Result<RunStats> {
    info!(
        tag = %config.stream.tag,
        marker = %config.stream.marker,
        "Listening for log lines"
    );
    info!(
        package = %config.sampler.package,
        serial = config.device.serial.as_deref().unwrap_or("default"),
        "Sampling resource usage"
    );
    info!(path = %config.output.path.display(), "Saving results");
    info!("Press Ctrl+C to stop.");

    let (metrics_tx, metrics_rx) = watch::channel(SampledMetrics::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shell = AdbShell::new(config.device.clone(), config.sampler.query_timeout());
    let sampler = Sampler::new(shell, &config.sampler);
    let sampler_task = tokio::spawn(sampler.run(metrics_tx, shutdown_rx));

    let writer = RecordWriter::open(&config.output.path)
        .await
        .with_context(|| format!("Failed to open {}", config.output.path.display()))?;

    let mut stream = LogcatStream::spawn(&config.device, &config.stream)
        .context("Failed to start log stream")?;

    let mut recorder = EventRecorder::new(writer, metrics_rx);
    match recorder.pump(stream.events(), shutdown_signal()).await {
        StopReason::StreamEnded => info!("Log stream ended"),
        StopReason::Shutdown => debug!("Stopping log stream"),
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    if let Some(status) = stream.shutdown().await {
        debug!(%status, "Log stream exited");
    }

    // A second signal during teardown abandons the wait.
    join_sampler(sampler_task, SAMPLER_STOP_TIMEOUT, shutdown_signal()).await;

    let stats = recorder.stats();
    info!(
        lines_read = stats.lines_read,
        events_written = stats.events_written,
        malformed_payloads = stats.malformed_payloads,
        write_errors = stats.write_errors,
        "Final statistics"
    );

    info!("Goodbye!");

    Ok(stats)
}
