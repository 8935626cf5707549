//! Running the launch command as a child process.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use st_types::{LaunchError, ResourceUsage};

use crate::command::LaunchCommand;
use crate::sampler::{ResourceSampler, UsageAccumulator};

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub resources: ResourceUsage,
}

impl ProcessOutput {
    /// Last non-empty line of stderr, used as a short failure reason.
    pub fn failure_reason(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match self.exit_code {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            })
    }
}

/// Runs a command to completion or until the timeout, killing it on expiry.
///
/// Only failures to get a process running at all are errors; a process that
/// ran and failed is reported through [`ProcessOutput`].
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(
        &self,
        command: &LaunchCommand,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, LaunchError>;
}

/// [`ProcessLauncher`] on `tokio::process`, sampling resources while the
/// child runs.
pub struct TokioLauncher {
    sampler: Arc<dyn ResourceSampler>,
    sample_interval: Duration,
    /// How long to wait for output pipes to close after the child exits.
    drain_grace: Duration,
}

impl TokioLauncher {
    pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(sampler: Arc<dyn ResourceSampler>) -> Self {
        Self {
            sampler,
            sample_interval: Self::DEFAULT_SAMPLE_INTERVAL,
            drain_grace: Duration::from_secs(2),
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(Duration::from_millis(10));
        self
    }

    fn spawn_sampler(
        &self,
        pid: Option<u32>,
        mut stop: oneshot::Receiver<()>,
    ) -> JoinHandle<ResourceUsage> {
        let sampler = Arc::clone(&self.sampler);
        let interval = self.sample_interval;
        tokio::spawn(async move {
            let mut acc = UsageAccumulator::new(interval);
            let Some(pid) = pid else {
                return acc.finish();
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => match sampler.sample(pid) {
                        Some(sample) => acc.add(sample),
                        None => break,
                    },
                }
            }
            acc.finish()
        })
    }
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Wait for a reader task, abandoning it if a leftover grandchild keeps the
/// pipe open past the grace period.
async fn drain(handle: JoinHandle<String>, grace: Duration) -> String {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> LaunchError {
    match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
            LaunchError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            }
        }
        _ => LaunchError::Transient {
            message: format!("could not start {program}: {e}"),
        },
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(
        &self,
        command: &LaunchCommand,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, LaunchError> {
        let started = Instant::now();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&command.program, e))?;

        let pid = child.id();
        debug!(pid, program = %command.program, "child process started");

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());
        let (stop_tx, stop_rx) = oneshot::channel();
        let sampling = self.spawn_sampler(pid, stop_rx);

        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let (status, timed_out) = match waited {
            Some(status) => (Some(status), false),
            None => {
                warn!(pid, limit_secs = timeout.map(|t| t.as_secs_f64()), "timeout reached, killing process");
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "failed to kill timed out process");
                }
                (None, true)
            }
        };
        let elapsed = started.elapsed();

        // The sampler must be finished before the result is handed back.
        let _ = stop_tx.send(());
        let resources = sampling.await.unwrap_or_default();
        let stdout = drain(stdout, self.drain_grace).await;
        let stderr = drain(stderr, self.drain_grace).await;

        let status = match status {
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => {
                return Err(LaunchError::Transient {
                    message: format!("waiting on {} failed: {e}", command.program),
                })
            }
            None => None,
        };

        Ok(ProcessOutput {
            exit_code: status.and_then(|s| s.code()),
            success: status.is_some_and(|s| s.success()),
            stdout,
            stderr,
            elapsed,
            timed_out,
            resources,
        })
    }
}
