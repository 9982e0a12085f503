//! Benchmark events read from the device log stream.

use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, StreamConfig};
use crate::record::{EventRecord, PayloadError};

/// Errors starting the log stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("log stream has no stdout")]
    MissingStdout,
}

/// A marker line taken from the stream.
#[derive(Debug)]
pub enum StreamItem {
    /// The payload decoded into a record.
    Event(EventRecord),
    /// The payload after the marker could not be decoded.
    Malformed { error: PayloadError, payload: String },
}

/// Return the trimmed text following the first `marker` in `line`.
pub fn extract_payload<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.split_once(marker).map(|(_, payload)| payload.trim())
}

/// Classify one log line. `None` for lines without the marker.
pub fn parse_line(line: &str, marker: &str) -> Option<StreamItem> {
    let payload = extract_payload(line, marker)?;
    Some(match EventRecord::from_payload(payload) {
        Ok(record) => StreamItem::Event(record),
        Err(error) => StreamItem::Malformed {
            error,
            payload: payload.to_string(),
        },
    })
}

/// Pulls marker lines out of any buffered text source.
pub struct EventReader<R> {
    reader: R,
    marker: String,
    buf: Vec<u8>,
    lines_read: u64,
}

impl<R: AsyncBufRead + Unpin> EventReader<R> {
    pub fn new(reader: R, marker: impl Into<String>) -> Self {
        Self {
            reader,
            marker: marker.into(),
            buf: Vec::new(),
            lines_read: 0,
        }
    }

    /// Lines consumed so far, marker or not.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Next marker line, skipping everything else.
    ///
    /// Returns `Ok(None)` once the source is exhausted. Bytes that are not
    /// valid UTF-8 are replaced rather than rejected.
    pub async fn next_item(&mut self) -> std::io::Result<Option<StreamItem>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.lines_read += 1;

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(item) = parse_line(line, &self.marker) {
                return Ok(Some(item));
            }
        }
    }
}

/// The `adb logcat` child process and its event reader.
pub struct LogcatStream {
    child: Child,
    events: EventReader<BufReader<ChildStdout>>,
}

impl LogcatStream {
    /// Spawn `adb logcat -s <tag>` for the configured device.
    pub fn spawn(device: &DeviceConfig, config: &StreamConfig) -> Result<Self, StreamError> {
        let mut child = Command::new(&device.adb_path)
            .args(device.adb_args(["logcat", "-s", config.tag.as_str()]))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamError::Spawn {
                program: device.adb_path.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(StreamError::MissingStdout)?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "logcat_bench::adb", "{}", line);
                }
            });
        }

        info!(tag = %config.tag, pid = child.id(), "Log stream started");

        Ok(Self {
            child,
            events: EventReader::new(BufReader::new(stdout), config.marker.clone()),
        })
    }

    pub fn events(&mut self) -> &mut EventReader<BufReader<ChildStdout>> {
        &mut self.events
    }

    /// Stop the child (if still running) and reap it.
    pub async fn shutdown(mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Log stream already exited");
                return Some(status);
            }
            Ok(None) => {
                if let Err(e) = self.child.start_kill() {
                    warn!(error = %e, "Failed to kill log stream");
                }
            }
            Err(e) => warn!(error = %e, "Failed to poll log stream"),
        }

        match self.child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Failed to reap log stream");
                None
            }
        }
    }
}
