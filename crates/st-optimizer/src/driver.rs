//! The closed search loop: propose, materialize, dedup, measure, score,
//! record, feed back.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use st_types::{ConfigError, Measure, TuneError, TuneResult};

use crate::history::History;
use crate::objective::ObjectiveEvaluator;
use crate::persist::ResultSink;
use crate::space::ConfigurationSpace;
use crate::strategy::SearchStrategy;
use crate::trial::{RunConfig, RunStatus, Trial};

/// Search loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Idle,
    Requesting,
    Measuring,
    Updating,
    Converged,
    BudgetExhausted,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DriverState::Converged | DriverState::BudgetExhausted)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Idle => "idle",
            DriverState::Requesting => "requesting",
            DriverState::Measuring => "measuring",
            DriverState::Updating => "updating",
            DriverState::Converged => "converged",
            DriverState::BudgetExhausted => "budget_exhausted",
        };
        f.write_str(name)
    }
}

/// Result of a run that found at least one feasible configuration.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub best: Trial,
    pub terminal: DriverState,
    pub status: RunStatus,
}

/// Owns all state of one tuning run. Generic over the measurement harness so
/// tests can substitute a fake.
pub struct SearchDriver<M: Measure> {
    space: ConfigurationSpace,
    strategy: Box<dyn SearchStrategy>,
    harness: M,
    evaluator: ObjectiveEvaluator,
    config: RunConfig,
    history: History,
    status: RunStatus,
    state: DriverState,
    sink: Option<Box<dyn ResultSink>>,
}

impl<M: Measure> SearchDriver<M> {
    /// Create a driver using the strategy named in `config`.
    pub fn new(space: ConfigurationSpace, harness: M, config: RunConfig) -> Result<Self, ConfigError> {
        if config.max_trials == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "max_trials".to_string(),
                reason: "budget must allow at least one trial".to_string(),
            });
        }
        if config.patience == Some(0) {
            return Err(ConfigError::InvalidValue {
                parameter: "patience".to_string(),
                reason: "patience must be positive".to_string(),
            });
        }

        let strategy = config
            .strategy
            .build(space.dimensions(), config.seed, config.grid_steps);
        let evaluator = ObjectiveEvaluator::new(config.objective.clone());
        let status = RunStatus::new(config.id);

        info!(
            run = %config.id,
            parameters = space.parameters().len(),
            fixed = space.fixed().len(),
            strategy = %config.strategy,
            budget = config.max_trials,
            "search driver created"
        );

        Ok(Self {
            space,
            strategy,
            harness,
            evaluator,
            config,
            history: History::new(),
            status,
            state: DriverState::Idle,
            sink: None,
        })
    }

    /// Replace the configured strategy with a custom one.
    pub fn with_strategy(mut self, strategy: Box<dyn SearchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_evaluator(mut self, evaluator: ObjectiveEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn harness(&self) -> &M {
        &self.harness
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = %self.state, to = %next, "driver state change");
        self.state = next;
    }

    /// Run the loop to a terminal state and report the best trial.
    ///
    /// Fails with [`TuneError::NoFeasibleResult`] when no trial succeeded.
    pub async fn run(&mut self) -> TuneResult<RunOutcome> {
        self.status.mark_running();
        info!(run = %self.config.id, name = %self.config.name, "tuning run started");

        let proposal_cap = self.config.proposal_cap();
        let mut best_score: Option<f64> = None;
        let mut since_improvement = 0usize;

        let terminal = loop {
            if self.status.trials_measured >= self.config.max_trials {
                break DriverState::BudgetExhausted;
            }
            if self.status.proposals >= proposal_cap {
                warn!(
                    proposals = self.status.proposals,
                    measured = self.status.trials_measured,
                    "proposal cap reached before the measurement budget"
                );
                break DriverState::BudgetExhausted;
            }
            if let Some(patience) = self.config.patience {
                if since_improvement >= patience {
                    info!(patience, "no improvement within patience window");
                    break DriverState::Converged;
                }
            }

            self.transition(DriverState::Requesting);
            let Some(assignment) = self.strategy.propose() else {
                info!(strategy = self.strategy.name(), "strategy has no further proposals");
                break DriverState::Converged;
            };
            self.status.proposals += 1;
            let candidate = self.space.materialize(&assignment)?;
            debug!(configuration = %candidate.configuration, "proposed configuration");

            self.transition(DriverState::Measuring);
            if self.config.dedup {
                if let Some(previous) = self.history.lookup(&candidate.configuration) {
                    let score = previous.score;
                    info!(
                        trial = previous.trial_number,
                        score,
                        "configuration already measured, reusing score"
                    );
                    self.status.dedup_hits += 1;
                    since_improvement += 1;
                    self.transition(DriverState::Updating);
                    self.strategy.feedback(&assignment, score);
                    if self.strategy.converged() {
                        break DriverState::Converged;
                    }
                    continue;
                }
            }

            let measurement = self.harness.measure(&candidate.rendered).await;

            self.transition(DriverState::Updating);
            let score = self
                .evaluator
                .score(&candidate.rendered, &measurement, &self.history);
            let trial_number = self.status.trials_measured + 1;
            let trial = Trial::new(self.config.id, trial_number, candidate, measurement, score);

            let improved =
                trial.is_success() && best_score.map_or(true, |best| score < best);
            if improved {
                best_score = Some(score);
                since_improvement = 0;
            } else {
                since_improvement += 1;
            }

            info!(
                trial = trial_number,
                score,
                elapsed_secs = trial.elapsed_secs(),
                success = trial.is_success(),
                configuration = %trial.configuration,
                "trial recorded"
            );
            self.status.record(&trial);
            self.history.record(trial);
            self.strategy.feedback(&assignment, score);

            if self.strategy.converged() {
                break DriverState::Converged;
            }
        };
        self.transition(terminal);

        let Some(best) = self.evaluator.select_best(&self.history).cloned() else {
            let error = TuneError::NoFeasibleResult {
                trials: self.history.len(),
            };
            warn!(trials = self.history.len(), "no trial succeeded");
            self.status.mark_failed(error.to_string());
            return Err(error);
        };

        if let Some(sink) = &self.sink {
            sink.persist(&best, &self.history)?;
        }
        self.status.mark_completed();

        info!(
            terminal = %terminal,
            trials = self.history.len(),
            dedup_hits = self.status.dedup_hits,
            best_trial = best.trial_number,
            elapsed_secs = best.elapsed_secs(),
            configuration = %best.configuration,
            "tuning run finished"
        );

        Ok(RunOutcome {
            best,
            terminal,
            status: self.status.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::{ObjectivePolicy, ResourceCost};
    use crate::space::Assignment;
    use crate::strategy::StrategyKind;
    use async_trait::async_trait;
    use st_types::{
        FixedParameters, Measurement, ParamKind, ParamTarget, ParamValue, Parameter,
        RenderedConfiguration,
    };
    use std::sync::{Arc, Mutex};

    /// Harness whose elapsed time is a function of the rendered settings.
    struct FakeHarness {
        calls: usize,
        time: Box<dyn Fn(&RenderedConfiguration) -> Option<f64> + Send>,
    }

    impl FakeHarness {
        fn new(time: impl Fn(&RenderedConfiguration) -> Option<f64> + Send + 'static) -> Self {
            Self {
                calls: 0,
                time: Box::new(time),
            }
        }
    }

    #[async_trait]
    impl Measure for FakeHarness {
        async fn measure(&mut self, rendered: &RenderedConfiguration) -> Measurement {
            self.calls += 1;
            match (self.time)(rendered) {
                Some(t) => Measurement::succeeded(t),
                None => Measurement::failed(Some(1), "job failed", 0.5),
            }
        }
    }

    /// Proposes the same assignment forever.
    struct Stuck;

    impl SearchStrategy for Stuck {
        fn propose(&mut self) -> Option<Assignment> {
            Some([("executor-cores".to_string(), 0.5)].into_iter().collect())
        }

        fn name(&self) -> &str {
            "stuck"
        }
    }

    /// Records the scores it is fed.
    struct Recording {
        inner: Box<dyn SearchStrategy>,
        seen: Arc<Mutex<Vec<f64>>>,
    }

    impl SearchStrategy for Recording {
        fn propose(&mut self) -> Option<Assignment> {
            self.inner.propose()
        }

        fn feedback(&mut self, assignment: &Assignment, score: f64) {
            self.seen.lock().unwrap().push(score);
            self.inner.feedback(assignment, score);
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn space() -> ConfigurationSpace {
        let fixed = FixedParameters::new().pin("class", ParamValue::Text("Main".into()), ParamTarget::Direct);
        ConfigurationSpace::new(fixed)
            .with_parameter(Parameter::new(
                "executor-cores",
                ParamKind::Int { min: 1, max: 8 },
                ParamTarget::Direct,
            ))
            .unwrap()
    }

    fn cores(rendered: &RenderedConfiguration) -> f64 {
        rendered
            .get("executor-cores")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    #[tokio::test]
    async fn constant_scores_terminate_on_budget() {
        let harness = FakeHarness::new(|_| Some(10.0));
        let config = RunConfig::new("flat")
            .with_max_trials(6)
            .with_dedup(false)
            .with_strategy(StrategyKind::Random);
        let mut driver = SearchDriver::new(space(), harness, config).unwrap();

        let outcome = driver.run().await.unwrap();
        assert_eq!(outcome.terminal, DriverState::BudgetExhausted);
        assert_eq!(driver.harness().calls, 6);
        assert_eq!(driver.history().len(), 6);
    }

    #[tokio::test]
    async fn dedup_feeds_back_recorded_score_without_remeasuring() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let strategy = Recording {
            inner: Box::new(Stuck),
            seen: seen.clone(),
        };
        let harness = FakeHarness::new(|_| Some(7.5));
        let config = RunConfig::new("dedup").with_max_trials(3);
        let mut driver = SearchDriver::new(space(), harness, config)
            .unwrap()
            .with_strategy(Box::new(strategy));

        let outcome = driver.run().await.unwrap();

        assert_eq!(driver.harness().calls, 1);
        assert_eq!(driver.history().len(), 1);
        assert_eq!(outcome.terminal, DriverState::BudgetExhausted);
        assert_eq!(outcome.status.dedup_hits, outcome.status.proposals - 1);
        assert_eq!(outcome.status.proposals, RunConfig::PROPOSALS_PER_TRIAL * 3);
        assert!(seen.lock().unwrap().iter().all(|s| *s == 7.5));
    }

    #[tokio::test]
    async fn dedup_disabled_remeasures() {
        let harness = FakeHarness::new(|_| Some(1.0));
        let config = RunConfig::new("dups").with_max_trials(4).with_dedup(false);
        let mut driver = SearchDriver::new(space(), harness, config)
            .unwrap()
            .with_strategy(Box::new(Stuck));
        driver.run().await.unwrap();
        assert_eq!(driver.harness().calls, 4);
    }

    #[tokio::test]
    async fn all_failures_yield_no_feasible_result() {
        let harness = FakeHarness::new(|_| None);
        let config = RunConfig::new("broken")
            .with_max_trials(3)
            .with_dedup(false)
            .with_strategy(StrategyKind::Random);
        let mut driver = SearchDriver::new(space(), harness, config).unwrap();

        let err = driver.run().await.unwrap_err();
        assert!(matches!(err, TuneError::NoFeasibleResult { trials: 3 }));
        assert_eq!(driver.history().len(), 3);
        assert!(driver.history().best().is_none());
        assert_eq!(driver.status().trials_failed, 3);
    }

    #[tokio::test]
    async fn failed_trials_are_recorded_and_penalized() {
        // More than four cores fails.
        let harness = FakeHarness::new(|r| (cores(r) <= 4.0).then(|| 100.0 / cores(r)));
        let config = RunConfig::new("mixed")
            .with_strategy(StrategyKind::Grid)
            .with_grid_steps(8)
            .with_max_trials(20);
        let mut driver = SearchDriver::new(space(), harness, config).unwrap();

        let outcome = driver.run().await.unwrap();
        assert_eq!(outcome.terminal, DriverState::Converged);
        assert_eq!(driver.history().len(), 8);
        assert_eq!(outcome.status.trials_failed, 4);
        assert_eq!(outcome.best.rendered.get("executor-cores"), Some(&ParamValue::Int(4)));
        for trial in driver.history().trials().iter().filter(|t| !t.is_success()) {
            assert!(trial.score > outcome.best.score);
        }
    }

    #[tokio::test]
    async fn patience_stops_stalled_search() {
        let harness = FakeHarness::new(|_| Some(5.0));
        let config = RunConfig::new("patient")
            .with_max_trials(50)
            .with_patience(Some(3))
            .with_dedup(false)
            .with_strategy(StrategyKind::Random);
        let mut driver = SearchDriver::new(space(), harness, config).unwrap();

        let outcome = driver.run().await.unwrap();
        assert_eq!(outcome.terminal, DriverState::Converged);
        assert_eq!(driver.harness().calls, 4);
    }

    #[tokio::test]
    async fn tie_aware_policy_picks_cheaper_near_tie() {
        // Time barely improves past two cores while cost keeps growing.
        let harness = FakeHarness::new(|r| Some(if cores(r) >= 2.0 { 10.0 - cores(r) * 0.01 } else { 20.0 }));
        let policy = ObjectivePolicy::tie_aware(
            0.05,
            ResourceCost::Requested {
                memory: "executor-memory".into(),
                cores: "executor-cores".into(),
            },
        )
        .unwrap();
        let config = RunConfig::new("tie")
            .with_strategy(StrategyKind::Grid)
            .with_grid_steps(8)
            .with_objective(policy);
        let mut driver = SearchDriver::new(space(), harness, config).unwrap();

        let outcome = driver.run().await.unwrap();
        assert_eq!(outcome.best.rendered.get("executor-cores"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn zero_budget_is_a_configuration_error() {
        let harness = FakeHarness::new(|_| Some(1.0));
        let config = RunConfig::new("none").with_max_trials(0);
        assert!(matches!(
            SearchDriver::new(space(), harness, config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn status_reflects_completed_run() {
        let harness = FakeHarness::new(|r| Some(cores(r)));
        let config = RunConfig::new("status").with_max_trials(3).with_strategy(StrategyKind::Local);
        let mut driver = SearchDriver::new(space(), harness, config).unwrap();
        let outcome = driver.run().await.unwrap();

        assert_eq!(outcome.status.state, crate::trial::RunState::Completed);
        assert!(outcome.status.finished_at.is_some());
        assert_eq!(driver.state(), outcome.terminal);
        assert!(driver.state().is_terminal());
    }
}
