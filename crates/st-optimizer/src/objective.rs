//! Reduction of raw measurements to a scalar score (lower is better).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use st_types::{ConfigError, Measurement, RenderedConfiguration};

use crate::history::History;
use crate::trial::Trial;

/// Score given to failed and timed-out trials.
pub const FAILURE_PENALTY: f64 = 1e12;

/// Relative tolerance used when none is configured.
pub const DEFAULT_REL_TOL: f64 = 0.06;

/// How resource usage of a trial is costed for tie-breaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceCost {
    /// Requested memory (MiB) times requested cores, read from the launch
    /// settings. A missing setting counts as 1.
    Requested { memory: String, cores: String },
    /// Measured memory-time in MiB-seconds, cluster figures preferred.
    Measured,
}

impl Default for ResourceCost {
    fn default() -> Self {
        ResourceCost::Requested {
            memory: "executor-memory".to_string(),
            cores: "executor-cores".to_string(),
        }
    }
}

/// Scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ObjectivePolicy {
    /// Elapsed wall time of successful trials.
    MinimizeTime,
    /// Among trials within `rel_tol` of the best time seen, prefer the
    /// cheapest.
    TieAwareResource { rel_tol: f64, cost: ResourceCost },
}

impl ObjectivePolicy {
    pub fn tie_aware(rel_tol: f64, cost: ResourceCost) -> Result<Self, ConfigError> {
        if !rel_tol.is_finite() || rel_tol < 0.0 {
            return Err(ConfigError::InvalidValue {
                parameter: "rel_tol".to_string(),
                reason: format!("tolerance must be a non-negative number, got {rel_tol}"),
            });
        }
        Ok(ObjectivePolicy::TieAwareResource { rel_tol, cost })
    }
}

#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    policy: ObjectivePolicy,
    penalty: f64,
}

impl ObjectiveEvaluator {
    pub fn new(policy: ObjectivePolicy) -> Self {
        Self {
            policy,
            penalty: FAILURE_PENALTY,
        }
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn policy(&self) -> &ObjectivePolicy {
        &self.policy
    }

    /// Score a fresh measurement against the trials recorded so far.
    ///
    /// Under the tie-aware policy a trial inside the tolerance band of the
    /// best time `T` scores `T * (1 + tol * c / (c + c_ref))`, where `c_ref`
    /// is the cost of the fastest trial. Every in-band score therefore beats
    /// every out-of-band time, and cheaper trials beat dearer ones in band.
    pub fn score(
        &self,
        rendered: &RenderedConfiguration,
        measurement: &Measurement,
        history: &History,
    ) -> f64 {
        if !measurement.is_success() {
            return self.penalty;
        }
        let elapsed = measurement.elapsed_secs;

        let ObjectivePolicy::TieAwareResource { rel_tol, .. } = &self.policy else {
            return elapsed;
        };

        let fastest = history
            .successful()
            .min_by(|a, b| a.elapsed_secs().total_cmp(&b.elapsed_secs()))
            .filter(|t| t.elapsed_secs() < elapsed);
        let own_cost = self.cost(rendered, measurement);
        let (best_time, reference_cost) = match fastest {
            Some(t) => (t.elapsed_secs(), self.cost(&t.rendered, &t.measurement)),
            None => (elapsed, own_cost),
        };

        if elapsed > best_time * (1.0 + rel_tol) {
            return elapsed;
        }
        let share = if own_cost + reference_cost > 0.0 {
            own_cost / (own_cost + reference_cost)
        } else {
            0.5
        };
        best_time * (1.0 + rel_tol * share)
    }

    /// Resource cost of a trial under the configured policy; zero for the
    /// time-only policy.
    pub fn cost(&self, rendered: &RenderedConfiguration, measurement: &Measurement) -> f64 {
        match &self.policy {
            ObjectivePolicy::MinimizeTime => 0.0,
            ObjectivePolicy::TieAwareResource { cost, .. } => match cost {
                ResourceCost::Requested { memory, cores } => {
                    let read = |name: &str| {
                        rendered
                            .get(name)
                            .and_then(|v| v.as_f64())
                            .unwrap_or(1.0)
                    };
                    read(memory) * read(cores)
                }
                ResourceCost::Measured => measurement.memory_mb_seconds(),
            },
        }
    }

    /// The trial the run should report as its result.
    ///
    /// For the time policy this is the lowest-scored success. For the
    /// tie-aware policy it is the cheapest success whose time lies within the
    /// tolerance band of the fastest, with time breaking cost ties.
    pub fn select_best<'a>(&self, history: &'a History) -> Option<&'a Trial> {
        let ObjectivePolicy::TieAwareResource { rel_tol, .. } = &self.policy else {
            return history.best();
        };
        let limit = history.best_time()? * (1.0 + rel_tol);
        history
            .successful()
            .filter(|t| t.elapsed_secs() <= limit)
            .min_by(|a, b| {
                let cost_a = self.cost(&a.rendered, &a.measurement);
                let cost_b = self.cost(&b.rendered, &b.measurement);
                match cost_a.total_cmp(&cost_b) {
                    Ordering::Equal => a.elapsed_secs().total_cmp(&b.elapsed_secs()),
                    other => other,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Candidate;
    use st_types::{ClusterUsage, Configuration, ParamTarget, ParamValue};
    use uuid::Uuid;

    const MIB: u64 = 1024 * 1024;

    fn rendered(memory_mib: u64, cores: i64) -> RenderedConfiguration {
        let mut r = RenderedConfiguration::default();
        r.insert("executor-memory", ParamValue::Bytes(memory_mib * MIB), ParamTarget::Direct);
        r.insert("executor-cores", ParamValue::Int(cores), ParamTarget::Direct);
        r
    }

    fn record(history: &mut History, evaluator: &ObjectiveEvaluator, time: f64, cost: u64) {
        let rendered = rendered(cost, 1);
        let measurement = Measurement::succeeded(time);
        let score = evaluator.score(&rendered, &measurement, history);
        let candidate = Candidate {
            configuration: Configuration::default().with("executor-memory", ParamValue::Bytes(cost * MIB)),
            rendered,
        };
        history.record(Trial::new(Uuid::new_v4(), history.len(), candidate, measurement, score));
    }

    fn tie_aware() -> ObjectiveEvaluator {
        ObjectiveEvaluator::new(ObjectivePolicy::tie_aware(0.05, ResourceCost::default()).unwrap())
    }

    #[test]
    fn time_policy_scores_elapsed_and_penalizes_failure() {
        let evaluator = ObjectiveEvaluator::new(ObjectivePolicy::MinimizeTime);
        let history = History::new();
        let r = RenderedConfiguration::default();
        assert_eq!(evaluator.score(&r, &Measurement::succeeded(42.5), &history), 42.5);

        let failed = evaluator.score(&r, &Measurement::failed(Some(1), "boom", 3.0), &history);
        let timed_out = evaluator.score(&r, &Measurement::timed_out(60.0), &history);
        assert_eq!(failed, FAILURE_PENALTY);
        assert_eq!(timed_out, FAILURE_PENALTY);
        assert!(failed > 42.5);
    }

    #[test]
    fn tie_aware_selects_cheapest_within_band() {
        let evaluator = tie_aware();
        let mut history = History::new();
        record(&mut history, &evaluator, 10.0, 8);
        record(&mut history, &evaluator, 10.2, 4);
        record(&mut history, &evaluator, 20.0, 1);

        let best = evaluator.select_best(&history).unwrap();
        assert_eq!(best.elapsed_secs(), 10.2);
    }

    #[test]
    fn tie_aware_selection_is_order_independent() {
        let evaluator = tie_aware();
        let mut history = History::new();
        record(&mut history, &evaluator, 20.0, 1);
        record(&mut history, &evaluator, 10.2, 4);
        record(&mut history, &evaluator, 10.0, 8);
        assert_eq!(evaluator.select_best(&history).unwrap().elapsed_secs(), 10.2);
    }

    #[test]
    fn tie_aware_scores_rank_band_by_cost() {
        let evaluator = tie_aware();
        let mut history = History::new();
        record(&mut history, &evaluator, 10.0, 8);

        let cheap = evaluator.score(&rendered(4, 1), &Measurement::succeeded(10.2), &history);
        let dear = evaluator.score(&rendered(16, 1), &Measurement::succeeded(10.2), &history);
        let slow = evaluator.score(&rendered(1, 1), &Measurement::succeeded(20.0), &history);

        assert!(cheap < dear);
        assert!(dear < 10.0 * 1.05);
        assert_eq!(slow, 20.0);
        assert!(dear < slow);
    }

    #[test]
    fn requested_cost_multiplies_memory_and_cores() {
        let evaluator = tie_aware();
        let m = Measurement::succeeded(1.0);
        assert_eq!(evaluator.cost(&rendered(2048, 4), &m), 8192.0);
        assert_eq!(evaluator.cost(&RenderedConfiguration::default(), &m), 1.0);
    }

    #[test]
    fn measured_cost_prefers_cluster_usage() {
        let evaluator = ObjectiveEvaluator::new(ObjectivePolicy::TieAwareResource {
            rel_tol: 0.1,
            cost: ResourceCost::Measured,
        });
        let m = Measurement::succeeded(1.0).with_cluster(ClusterUsage {
            memory_mb_seconds: 300.0,
            vcore_seconds: 2.0,
            elapsed_secs: 1.0,
        });
        assert_eq!(evaluator.cost(&RenderedConfiguration::default(), &m), 300.0);
    }

    #[test]
    fn select_best_none_without_success() {
        let evaluator = tie_aware();
        assert!(evaluator.select_best(&History::new()).is_none());
        assert!(ObjectiveEvaluator::new(ObjectivePolicy::MinimizeTime)
            .select_best(&History::new())
            .is_none());
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        assert!(ObjectivePolicy::tie_aware(-0.1, ResourceCost::default()).is_err());
    }
}
