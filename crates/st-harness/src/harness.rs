//! The measurement harness: one launch of the job per rendered configuration.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use st_types::{
    ClusterError, LaunchError, Measure, Measurement, ParamValue, RenderedConfiguration,
};

use crate::command::{default_launcher, JobSpec, LaunchCommand};
use crate::launcher::{ProcessLauncher, ProcessOutput};
use crate::retry::RetryPolicy;
use crate::yarn::{extract_app_id, ClusterMetrics};

/// How long the best-effort `yarn application -kill` may take.
const YARN_KILL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Launcher program, usually `spark-submit`.
    pub launcher: String,
    pub job: JobSpec,
    /// Pinned launcher arguments appended verbatim.
    pub passthrough: Vec<String>,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Program used to kill YARN applications that outlive a timeout.
    pub yarn_program: String,
}

impl HarnessConfig {
    pub fn new(job: JobSpec) -> Self {
        Self {
            launcher: default_launcher(),
            job,
            passthrough: Vec::new(),
            timeout: None,
            retry: RetryPolicy::default(),
            yarn_program: "yarn".to_string(),
        }
    }

    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = launcher.into();
        self
    }

    pub fn with_passthrough(mut self, passthrough: Vec<String>) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Runs the job through a [`ProcessLauncher`] and turns what happened into a
/// [`Measurement`].
pub struct MeasurementHarness<L: ProcessLauncher> {
    launcher: L,
    config: HarnessConfig,
    metrics: Option<Box<dyn ClusterMetrics>>,
}

impl<L: ProcessLauncher> MeasurementHarness<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        Self {
            launcher,
            config,
            metrics: None,
        }
    }

    /// Fold per-application usage from a resource manager into measurements.
    pub fn with_cluster_metrics(mut self, metrics: Box<dyn ClusterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn runs_on_yarn(rendered: &RenderedConfiguration) -> bool {
        matches!(rendered.get("master"), Some(ParamValue::Text(master)) if master.starts_with("yarn"))
    }

    async fn kill_yarn_app(&self, app_id: &str) {
        let kill = LaunchCommand::new(&self.config.yarn_program)
            .arg("application")
            .arg("-kill")
            .arg(app_id);
        match self.launcher.launch(&kill, Some(YARN_KILL_TIMEOUT)).await {
            Ok(output) => info!(app_id, exit_code = ?output.exit_code, "yarn application killed"),
            Err(e) => warn!(app_id, error = %e, "failed to kill yarn application"),
        }
    }

    async fn cluster_usage(&self, app_id: &str, mut measurement: Measurement) -> Measurement {
        let Some(metrics) = &self.metrics else {
            return measurement;
        };
        let (usage, attempts) = self
            .config
            .retry
            .run("fetch cluster metrics", ClusterError::is_transient, || {
                metrics.app_usage(app_id)
            })
            .await;
        match usage {
            Ok(usage) => measurement = measurement.with_cluster(usage),
            Err(e) => warn!(
                app_id,
                attempts,
                error = %e,
                "cluster metrics unavailable, keeping local measurements"
            ),
        }
        measurement
    }

    async fn interpret(
        &self,
        rendered: &RenderedConfiguration,
        output: &ProcessOutput,
        app_id: Option<&str>,
    ) -> Measurement {
        let elapsed = output.elapsed.as_secs_f64();

        if output.timed_out {
            let limit = self.config.timeout.map_or(elapsed, |t| t.as_secs_f64());
            warn!(limit_secs = limit, app_id, "job timed out");
            if Self::runs_on_yarn(rendered) {
                match app_id {
                    Some(id) => self.kill_yarn_app(id).await,
                    None => warn!("no yarn application id found, cannot kill remote job"),
                }
            }
            return Measurement::timed_out(limit);
        }

        if !output.success {
            let reason = output.failure_reason();
            warn!(exit_code = ?output.exit_code, %reason, "job failed");
            return Measurement::failed(output.exit_code, reason, elapsed);
        }

        let measurement = Measurement::succeeded(elapsed);
        match app_id {
            Some(id) => self.cluster_usage(id, measurement).await,
            None => measurement,
        }
    }
}

#[async_trait]
impl<L: ProcessLauncher> Measure for MeasurementHarness<L> {
    async fn measure(&mut self, rendered: &RenderedConfiguration) -> Measurement {
        let started_at = Utc::now();
        let command = match LaunchCommand::build(
            &self.config.launcher,
            rendered,
            &self.config.passthrough,
            &self.config.job,
        ) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "cannot build launch command");
                return Measurement::failed(None, e.to_string(), 0.0);
            }
        };
        let command_line = command.to_string();
        info!(command = %command_line, "launching job");

        let launcher = &self.launcher;
        let timeout = self.config.timeout;
        let (result, attempts) = self
            .config
            .retry
            .run("launch", LaunchError::is_transient, || {
                launcher.launch(&command, timeout)
            })
            .await;

        let mut measurement = match result {
            Ok(output) => {
                let app_id = extract_app_id(&output.stderr, &output.stdout);
                let mut m = self.interpret(rendered, &output, app_id.as_deref()).await;
                m.app_id = app_id;
                m.with_resources(output.resources)
            }
            Err(e) => {
                warn!(attempts, error = %e, "launch failed");
                Measurement::failed(None, e.to_string(), 0.0)
            }
        };
        measurement.attempts = attempts;
        measurement.started_at = started_at;
        measurement.with_command(command_line)
    }
}
