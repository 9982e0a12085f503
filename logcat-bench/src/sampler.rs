//! Best-effort CPU and memory sampling of the target package.
//!
//! Every cycle runs `dumpsys cpuinfo` and `dumpsys meminfo <package>` on the
//! device and scrapes the text output. A failed or unparseable query keeps
//! the previous reading; sampling never stops the logger.

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::config::{DeviceConfig, SamplerConfig};
use crate::record::SampledMetrics;

/// Error type for a single device query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("query exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read-only access to a device shell.
pub trait DeviceShell: Send + Sync {
    /// Run `args` against the device and return its standard output.
    fn query(&self, args: &[&str]) -> impl Future<Output = Result<String, QueryError>> + Send;
}

/// [`DeviceShell`] backed by the `adb` executable.
#[derive(Debug, Clone)]
pub struct AdbShell {
    device: DeviceConfig,
    timeout: Duration,
}

impl AdbShell {
    pub fn new(device: DeviceConfig, timeout: Duration) -> Self {
        Self { device, timeout }
    }
}

impl DeviceShell for AdbShell {
    async fn query(&self, args: &[&str]) -> Result<String, QueryError> {
        let mut command = Command::new(&self.device.adb_path);
        command
            .args(self.device.adb_args(args.iter().copied()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| QueryError::Spawn {
            program: self.device.adb_path.clone(),
            source,
        })?;

        // Dropping the pending wait on timeout kills the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(QueryError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Outcome of one sampling cycle. `None` means the reading was not obtained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSample {
    pub cpu_usage: Option<String>,
    pub memory_mb: Option<String>,
}

impl MetricsSample {
    /// True when both readings were obtained.
    pub fn is_complete(&self) -> bool {
        self.cpu_usage.is_some() && self.memory_mb.is_some()
    }

    /// Fold the obtained readings into `current`, keeping stale values for
    /// the missing ones. Returns whether anything changed.
    pub fn apply(&self, current: &mut SampledMetrics) -> bool {
        let mut changed = false;
        if let Some(cpu) = &self.cpu_usage {
            if *cpu != current.cpu_usage {
                current.cpu_usage = cpu.clone();
                changed = true;
            }
        }
        if let Some(memory) = &self.memory_mb {
            if *memory != current.memory_mb {
                current.memory_mb = memory.clone();
                changed = true;
            }
        }
        changed
    }
}

/// Periodic sampler for a single package.
pub struct Sampler<S> {
    shell: S,
    package: String,
    interval: Duration,
}

impl<S: DeviceShell> Sampler<S> {
    pub fn new(shell: S, config: &SamplerConfig) -> Self {
        Self {
            shell,
            package: config.package.clone(),
            interval: config.interval(),
        }
    }

    /// Run one cycle: query CPU then memory, independently.
    pub async fn sample(&self) -> MetricsSample {
        let cpu_usage = match self.shell.query(&["shell", "dumpsys", "cpuinfo"]).await {
            Ok(text) => {
                let cpu = parse_cpu_usage(&text, &self.package);
                if cpu.is_none() {
                    trace!(package = %self.package, "Package not listed in cpuinfo");
                }
                cpu
            }
            Err(e) => {
                debug!(error = %e, "cpuinfo query failed");
                None
            }
        };

        let memory_mb = match self
            .shell
            .query(&["shell", "dumpsys", "meminfo", self.package.as_str()])
            .await
        {
            Ok(text) => {
                let memory = parse_memory_mb(&text);
                if memory.is_none() {
                    trace!(package = %self.package, "No total line in meminfo");
                }
                memory
            }
            Err(e) => {
                debug!(error = %e, "meminfo query failed");
                None
            }
        };

        MetricsSample {
            cpu_usage,
            memory_mb,
        }
    }

    /// Sample until `shutdown` turns true, publishing into `metrics`.
    pub async fn run(
        self,
        metrics: watch::Sender<SampledMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            package = %self.package,
            interval_ms = self.interval.as_millis() as u64,
            "Starting resource sampler"
        );

        while !*shutdown.borrow() {
            let sample = tokio::select! {
                sample = self.sample() => sample,
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            if !sample.is_complete() {
                debug!(
                    cpu = sample.cpu_usage.is_some(),
                    memory = sample.memory_mb.is_some(),
                    "Incomplete sample, keeping previous readings"
                );
            }

            if metrics.send_if_modified(|current| sample.apply(current)) {
                let current = metrics.borrow();
                trace!(
                    cpu = %current.cpu_usage,
                    memory_mb = %current.memory_mb,
                    "Updated resource snapshot"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(package = %self.package, "Resource sampler stopped");
    }
}

/// Extract CPU usage for `package` from `dumpsys cpuinfo` output.
///
/// The row is the first line holding a token that names the package exactly
/// (an optional `pid/` prefix and trailing `:` are allowed); the value is the
/// first numeric token on that row, reported with a `%` suffix.
pub fn parse_cpu_usage(text: &str, package: &str) -> Option<String> {
    let line = text
        .lines()
        .find(|line| line.split_whitespace().any(|token| names_package(token, package)))?;

    line.split_whitespace().find_map(|token| {
        let number = token.trim_end_matches('%');
        is_decimal(number).then(|| format!("{}%", number))
    })
}

/// Extract total PSS in megabytes from `dumpsys meminfo <package>` output.
///
/// Accepts a `TOTAL PSS:` line or a line starting with `TOTAL:`; the first
/// all-digit token on it is taken as kilobytes.
pub fn parse_memory_mb(text: &str) -> Option<String> {
    let line = text
        .lines()
        .find(|line| line.contains("TOTAL PSS:") || line.trim_start().starts_with("TOTAL:"))?;

    let kilobytes: u64 = line
        .split_whitespace()
        .find(|token| token.bytes().all(|b| b.is_ascii_digit()))?
        .parse()
        .ok()?;

    Some(format!("{:.1}", kilobytes as f64 / 1024.0))
}

fn names_package(token: &str, package: &str) -> bool {
    let name = token.trim_end_matches(':');
    let name = match name.split_once('/') {
        Some((pid, rest)) if !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit()) => rest,
        _ => name,
    };
    name == package
}

fn is_decimal(s: &str) -> bool {
    s.bytes().any(|b| b.is_ascii_digit()) && s.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const PACKAGE: &str = "com.armhack.speech_translator";

    const CPUINFO: &str = "\
Load: 4.12 / 3.98 / 3.77
CPU usage from 5012ms to 12ms ago (2025-01-12 10:15:25.100 to 2025-01-12 10:15:30.100):
  42% 1093/system_server: 30% user + 12% kernel / faults: 1873 minor
  37% 12345/com.armhack.speech_translator: 31% user + 6% kernel / faults: 920 minor
  3.5% 12399/com.armhack.speech_translator:remote: 2% user + 1.5% kernel
19% TOTAL: 12% user + 6.1% kernel + 0.4% iowait
";

    const MEMINFO: &str = "\
Applications Memory Usage (in Kilobytes):
Uptime: 8271634 Realtime: 8271634

** MEMINFO in pid 12345 [com.armhack.speech_translator] **
                   Pss  Private  Private  SwapPss      Rss     Heap     Heap     Heap
                 Total    Dirty    Clean    Dirty    Total     Size    Alloc     Free
  Native Heap    10240    10200        0       12    11000    16384    12000     4384
        TOTAL    20480    18000     1200       40    45000    32768    24000     8768

 App Summary
           TOTAL PSS:    20480            TOTAL RSS:    45000       TOTAL SWAP PSS:       40
";

    #[test]
    fn test_parse_cpu_simple_line() {
        let text = "com.armhack.speech_translator 37% user";
        assert_eq!(parse_cpu_usage(text, PACKAGE), Some("37%".to_string()));
    }

    #[test]
    fn test_parse_cpu_dumpsys_output() {
        assert_eq!(parse_cpu_usage(CPUINFO, PACKAGE), Some("37%".to_string()));
    }

    #[test]
    fn test_parse_cpu_fractional() {
        let text = "  0.4% 12345/com.armhack.speech_translator: 0.2% user + 0.2% kernel";
        assert_eq!(parse_cpu_usage(text, PACKAGE), Some("0.4%".to_string()));
    }

    #[test]
    fn test_parse_cpu_rejects_substring_match() {
        let text = "  3.5% 12399/com.armhack.speech_translator:remote: 2% user";
        assert_eq!(parse_cpu_usage(text, PACKAGE), None);

        let text = "  8% 2222/com.armhack.speech_translator_beta: 8% user";
        assert_eq!(parse_cpu_usage(text, PACKAGE), None);
    }

    #[test]
    fn test_parse_cpu_package_absent() {
        let text = "  42% 1093/system_server: 30% user + 12% kernel";
        assert_eq!(parse_cpu_usage(text, PACKAGE), None);
    }

    #[test]
    fn test_parse_memory_total_pss() {
        let text = "           TOTAL PSS:    20480            TOTAL RSS:    45000";
        assert_eq!(parse_memory_mb(text), Some("20.0".to_string()));
    }

    #[test]
    fn test_parse_memory_dumpsys_output() {
        assert_eq!(parse_memory_mb(MEMINFO), Some("20.0".to_string()));
    }

    #[test]
    fn test_parse_memory_total_colon_line() {
        let text = "Header\n  TOTAL:   51815   TOTAL SWAP PSS: 12\n";
        assert_eq!(parse_memory_mb(text), Some("50.6".to_string()));
    }

    #[test]
    fn test_parse_memory_without_number() {
        assert_eq!(parse_memory_mb("TOTAL PSS: n/a"), None);
        assert_eq!(parse_memory_mb("No process found for: com.example"), None);
    }

    #[test]
    fn test_apply_keeps_stale_values() {
        let mut current = SampledMetrics::default();
        let sample = MetricsSample {
            cpu_usage: Some("12%".to_string()),
            memory_mb: None,
        };

        assert!(sample.apply(&mut current));
        assert_eq!(current.cpu_usage, "12%");
        assert_eq!(current.memory_mb, "0.0");
        assert!(!sample.apply(&mut current));
        assert!(!sample.is_complete());
    }

    /// Shell that replays canned responses; an exhausted queue times out.
    struct ScriptedShell {
        cpu: Mutex<VecDeque<Result<String, QueryError>>>,
        mem: Mutex<VecDeque<Result<String, QueryError>>>,
    }

    impl ScriptedShell {
        fn new(
            cpu: Vec<Result<String, QueryError>>,
            mem: Vec<Result<String, QueryError>>,
        ) -> Self {
            Self {
                cpu: Mutex::new(cpu.into()),
                mem: Mutex::new(mem.into()),
            }
        }
    }

    impl DeviceShell for ScriptedShell {
        async fn query(&self, args: &[&str]) -> Result<String, QueryError> {
            let queue = if args.contains(&"cpuinfo") {
                &self.cpu
            } else {
                assert_eq!(args, ["shell", "dumpsys", "meminfo", PACKAGE]);
                &self.mem
            };
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(QueryError::Timeout(Duration::from_secs(2))))
        }
    }

    fn sampler_config() -> SamplerConfig {
        SamplerConfig {
            package: PACKAGE.to_string(),
            interval_ms: 10,
            query_timeout_ms: 2000,
        }
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_values() {
        let shell = ScriptedShell::new(
            vec![
                Ok(CPUINFO.to_string()),
                Err(QueryError::Timeout(Duration::from_secs(2))),
            ],
            vec![Ok(MEMINFO.to_string()), Ok("nothing useful".to_string())],
        );
        let sampler = Sampler::new(shell, &sampler_config());
        let mut current = SampledMetrics::default();

        let first = sampler.sample().await;
        assert!(first.is_complete());
        first.apply(&mut current);
        assert_eq!(current.cpu_usage, "37%");
        assert_eq!(current.memory_mb, "20.0");

        let second = sampler.sample().await;
        assert_eq!(second, MetricsSample::default());
        assert!(!second.apply(&mut current));
        assert_eq!(current.cpu_usage, "37%");
        assert_eq!(current.memory_mb, "20.0");
    }

    #[tokio::test]
    async fn test_run_publishes_and_stops_on_shutdown() {
        let shell = ScriptedShell::new(vec![Ok(CPUINFO.to_string())], vec![Ok(MEMINFO.to_string())]);
        let sampler = Sampler::new(shell, &sampler_config());

        let (metrics_tx, mut metrics_rx) = watch::channel(SampledMetrics::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sampler.run(metrics_tx, shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), metrics_rx.changed())
            .await
            .expect("sampler published in time")
            .expect("sender alive");
        assert_eq!(
            *metrics_rx.borrow(),
            SampledMetrics {
                cpu_usage: "37%".to_string(),
                memory_mb: "20.0".to_string(),
            }
        );

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sampler stopped in time")
            .unwrap();

        // Later cycles failed; the snapshot is unchanged.
        assert_eq!(metrics_rx.borrow().cpu_usage, "37%");
    }

    #[tokio::test]
    async fn test_adb_shell_reports_spawn_failure() {
        let shell = AdbShell::new(
            DeviceConfig {
                adb_path: "/nonexistent/adb".to_string(),
                serial: None,
            },
            Duration::from_secs(2),
        );

        let err = shell.query(&["shell", "dumpsys", "cpuinfo"]).await.unwrap_err();
        assert!(matches!(err, QueryError::Spawn { .. }));
    }

    fn local_shell(program: &str, timeout: Duration) -> AdbShell {
        AdbShell::new(
            DeviceConfig {
                adb_path: program.to_string(),
                serial: None,
            },
            timeout,
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adb_shell_times_out_slow_query() {
        let shell = local_shell("sleep", Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = shell.query(&["5"]).await.unwrap_err();

        assert!(matches!(err, QueryError::Timeout(t) if t == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adb_shell_reports_non_zero_exit() {
        let shell = local_shell("false", Duration::from_secs(2));

        let err = shell.query(&["dumpsys"]).await.unwrap_err();
        match err {
            QueryError::Failed { status, .. } => assert!(!status.success()),
            other => panic!("expected failed query, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_adb_shell_returns_stdout() {
        let shell = local_shell("echo", Duration::from_secs(2));
        let out = shell.query(&["shell", "dumpsys", "cpuinfo"]).await.unwrap();
        assert_eq!(out, "shell dumpsys cpuinfo\n");
    }
}
