//! Raw measurement results and the contract a measurement harness satisfies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RenderedConfiguration;

/// Process-level resource usage sampled while the job ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Highest resident set size observed, in bytes.
    pub peak_memory_bytes: u64,
    /// Integral of resident memory over time, in MiB-seconds.
    pub memory_mb_seconds: f64,
    /// Cumulative CPU time consumed, in seconds.
    pub cpu_seconds: f64,
    /// Number of samples taken.
    pub samples: u32,
}

/// Aggregate usage reported by a cluster resource manager for one application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterUsage {
    pub memory_mb_seconds: f64,
    pub vcore_seconds: f64,
    pub elapsed_secs: f64,
}

/// How a launched job ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    /// Non-zero exit, spawn failure, or malformed invocation.
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
    /// Killed after exceeding the time limit.
    TimedOut { limit_secs: f64 },
}

/// Everything captured from one launch of the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub outcome: Outcome,
    /// Wall-clock seconds from spawn to exit (or kill).
    pub elapsed_secs: f64,
    pub resources: ResourceUsage,
    pub cluster: Option<ClusterUsage>,
    /// Application identifier scraped from the launcher output, if any.
    pub app_id: Option<String>,
    /// The full command line that was executed.
    pub command: String,
    /// Number of launch attempts, including retries of transient failures.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
}

impl Measurement {
    pub fn succeeded(elapsed_secs: f64) -> Self {
        Self::with_outcome(Outcome::Succeeded, elapsed_secs)
    }

    pub fn failed(exit_code: Option<i32>, reason: impl Into<String>, elapsed_secs: f64) -> Self {
        Self::with_outcome(
            Outcome::Failed {
                exit_code,
                reason: reason.into(),
            },
            elapsed_secs,
        )
    }

    pub fn timed_out(limit_secs: f64) -> Self {
        Self::with_outcome(Outcome::TimedOut { limit_secs }, limit_secs)
    }

    fn with_outcome(outcome: Outcome, elapsed_secs: f64) -> Self {
        Self {
            outcome,
            elapsed_secs,
            resources: ResourceUsage::default(),
            cluster: None,
            app_id: None,
            command: String::new(),
            attempts: 1,
            started_at: Utc::now(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceUsage) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterUsage) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    /// Memory-time used by the job, preferring cluster-reported figures.
    pub fn memory_mb_seconds(&self) -> f64 {
        self.cluster
            .map(|c| c.memory_mb_seconds)
            .unwrap_or(self.resources.memory_mb_seconds)
    }
}

/// Anything that can run the job once under a rendered configuration.
///
/// Implementations never fail outright: launch failures and timeouts are
/// reported through [`Measurement::outcome`] so they can be scored and
/// recorded like any other result.
#[async_trait]
pub trait Measure: Send {
    async fn measure(&mut self, rendered: &RenderedConfiguration) -> Measurement;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_helpers() {
        assert!(Measurement::succeeded(1.5).is_success());
        assert!(!Measurement::failed(Some(1), "boom", 0.2).is_success());

        let timed_out = Measurement::timed_out(30.0);
        assert!(!timed_out.is_success());
        assert_eq!(timed_out.elapsed_secs, 30.0);
    }

    #[test]
    fn cluster_usage_takes_precedence() {
        let local = ResourceUsage {
            memory_mb_seconds: 10.0,
            ..ResourceUsage::default()
        };
        let m = Measurement::succeeded(2.0).with_resources(local);
        assert_eq!(m.memory_mb_seconds(), 10.0);

        let m = m.with_cluster(ClusterUsage {
            memory_mb_seconds: 4096.0,
            vcore_seconds: 8.0,
            elapsed_secs: 2.0,
        });
        assert_eq!(m.memory_mb_seconds(), 4096.0);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(Outcome::TimedOut { limit_secs: 5.0 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "timed_out", "limit_secs": 5.0}));
    }
}
