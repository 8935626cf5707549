//! Trial records and tuning run lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use st_types::{Configuration, Measurement, RenderedConfiguration};

use crate::objective::ObjectivePolicy;
use crate::space::Candidate;
use crate::strategy::StrategyKind;

/// Unique tuning run identifier.
pub type RunId = Uuid;

/// Top-level configuration for a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub id: RunId,
    pub name: String,

    /// Maximum number of measurements (launches) for the run.
    pub max_trials: usize,

    /// Stop after this many consecutive proposals without a new best.
    pub patience: Option<usize>,

    /// Feed back recorded scores instead of re-measuring known configurations.
    pub dedup: bool,

    /// Per-measurement wall-clock limit.
    pub timeout_secs: Option<f64>,

    pub objective: ObjectivePolicy,

    pub strategy: StrategyKind,

    /// Steps per continuous axis for grid search.
    pub grid_steps: usize,

    pub seed: u64,

    pub created_at: DateTime<Utc>,
}

impl RunConfig {
    pub const DEFAULT_MAX_TRIALS: usize = 20;
    pub const DEFAULT_GRID_STEPS: usize = 5;

    /// Proposals allowed per measurement before the run is cut off. Bounds
    /// runs whose strategy keeps proposing already-measured configurations.
    pub const PROPOSALS_PER_TRIAL: usize = 10;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            max_trials: Self::DEFAULT_MAX_TRIALS,
            patience: None,
            dedup: true,
            timeout_secs: None,
            objective: ObjectivePolicy::MinimizeTime,
            strategy: StrategyKind::Bandit,
            grid_steps: Self::DEFAULT_GRID_STEPS,
            seed: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_patience(mut self, patience: Option<usize>) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: Option<f64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_objective(mut self, objective: ObjectivePolicy) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_grid_steps(mut self, steps: usize) -> Self {
        self.grid_steps = steps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn proposal_cap(&self) -> usize {
        self.max_trials.saturating_mul(Self::PROPOSALS_PER_TRIAL)
    }
}

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub state: RunState,
    pub proposals: usize,
    pub trials_measured: usize,
    pub trials_failed: usize,
    pub dedup_hits: usize,
    pub best_trial: Option<Trial>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            state: RunState::Pending,
            proposals: 0,
            trials_measured: 0,
            trials_failed: 0,
            dedup_hits: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Count a measured trial, tracking the lowest-scoring success.
    pub fn record(&mut self, trial: &Trial) {
        self.trials_measured += 1;
        if !trial.is_success() {
            self.trials_failed += 1;
            return;
        }
        let improves = match &self.best_trial {
            None => true,
            Some(current) => trial.score < current.score,
        };
        if improves {
            self.best_trial = Some(trial.clone());
        }
    }
}

/// One measurement of a configuration. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub run_id: RunId,
    pub trial_number: usize,
    pub configuration: Configuration,
    pub rendered: RenderedConfiguration,
    pub measurement: Measurement,
    pub score: f64,
    pub recorded_at: DateTime<Utc>,
}

impl Trial {
    pub fn new(
        run_id: RunId,
        trial_number: usize,
        candidate: Candidate,
        measurement: Measurement,
        score: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            trial_number,
            configuration: candidate.configuration,
            rendered: candidate.rendered,
            measurement,
            score,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.measurement.is_success()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.measurement.elapsed_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_types::ParamValue;

    fn trial(score: f64, success: bool) -> Trial {
        let candidate = Candidate {
            configuration: Configuration::default().with("executor-cores", ParamValue::Int(2)),
            rendered: RenderedConfiguration::default(),
        };
        let measurement = if success {
            Measurement::succeeded(score)
        } else {
            Measurement::failed(Some(1), "exit 1", score)
        };
        Trial::new(Uuid::new_v4(), 1, candidate, measurement, score)
    }

    #[test]
    fn run_config_builder() {
        let config = RunConfig::new("wordcount")
            .with_max_trials(5)
            .with_patience(Some(3))
            .with_dedup(false)
            .with_strategy(StrategyKind::Grid)
            .with_seed(9);
        assert_eq!(config.max_trials, 5);
        assert_eq!(config.patience, Some(3));
        assert!(!config.dedup);
        assert_eq!(config.strategy, StrategyKind::Grid);
        assert_eq!(config.proposal_cap(), 50);
    }

    #[test]
    fn run_config_defaults() {
        let config = RunConfig::new("job");
        assert_eq!(config.max_trials, 20);
        assert!(config.dedup);
        assert!(config.patience.is_none());
        assert_eq!(config.strategy, StrategyKind::Bandit);
        assert_eq!(config.objective, ObjectivePolicy::MinimizeTime);
    }

    #[test]
    fn run_status_lifecycle() {
        let mut status = RunStatus::new(Uuid::new_v4());
        assert_eq!(status.state, RunState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, RunState::Running);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, RunState::Completed);
        assert!(status.finished_at.is_some());

        let mut failed = RunStatus::new(Uuid::new_v4());
        failed.mark_failed("no feasible result".into());
        assert_eq!(failed.state, RunState::Failed);
        assert_eq!(failed.error.as_deref(), Some("no feasible result"));
    }

    #[test]
    fn run_status_tracks_best_success_only() {
        let mut status = RunStatus::new(Uuid::new_v4());
        status.record(&trial(12.0, true));
        status.record(&trial(3.0, false));
        status.record(&trial(8.0, true));
        status.record(&trial(9.0, true));

        assert_eq!(status.trials_measured, 4);
        assert_eq!(status.trials_failed, 1);
        assert_eq!(status.best_trial.as_ref().unwrap().score, 8.0);
    }
}
