//! Append-only record of every trial in a run, indexed for deduplication.

use std::collections::HashMap;

use st_types::Configuration;

use crate::trial::Trial;

#[derive(Debug, Clone, Default)]
pub struct History {
    trials: Vec<Trial>,
    index: HashMap<Configuration, usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_been_tried(&self, configuration: &Configuration) -> bool {
        self.index.contains_key(configuration)
    }

    /// Most recent trial of a configuration.
    pub fn lookup(&self, configuration: &Configuration) -> Option<&Trial> {
        self.index.get(configuration).map(|&i| &self.trials[i])
    }

    pub fn record(&mut self, trial: Trial) {
        self.index
            .insert(trial.configuration.clone(), self.trials.len());
        self.trials.push(trial);
    }

    /// Lowest-scored successful trial; the earliest wins a tie.
    pub fn best(&self) -> Option<&Trial> {
        self.successful()
            .fold(None, |best: Option<&Trial>, t| match best {
                Some(b) if b.score <= t.score => Some(b),
                _ => Some(t),
            })
    }

    pub fn successful(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(|t| t.is_success())
    }

    /// Fastest successful elapsed time.
    pub fn best_time(&self) -> Option<f64> {
        self.successful()
            .map(Trial::elapsed_secs)
            .min_by(f64::total_cmp)
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Candidate;
    use st_types::{parse_size, Measurement, ParamValue, RenderedConfiguration};
    use uuid::Uuid;

    fn config(memory: &str, cores: i64) -> Configuration {
        Configuration::default()
            .with("executor-memory", ParamValue::Bytes(parse_size(memory).unwrap()))
            .with("executor-cores", ParamValue::Int(cores))
    }

    fn trial(configuration: Configuration, score: f64, success: bool) -> Trial {
        let measurement = if success {
            Measurement::succeeded(score)
        } else {
            Measurement::failed(Some(1), "boom", score)
        };
        let candidate = Candidate {
            configuration,
            rendered: RenderedConfiguration::default(),
        };
        Trial::new(Uuid::new_v4(), 0, candidate, measurement, score)
    }

    #[test]
    fn dedup_uses_normalized_equality() {
        let mut history = History::new();
        history.record(trial(config("1gb", 2), 10.0, true));
        assert!(history.has_been_tried(&config("1024mb", 2)));
        assert!(!history.has_been_tried(&config("1gb", 3)));
        assert_eq!(history.lookup(&config("1048576k", 2)).unwrap().score, 10.0);
    }

    #[test]
    fn best_ignores_failures() {
        let mut history = History::new();
        history.record(trial(config("1g", 1), 12.0, true));
        history.record(trial(config("1g", 2), 1.0, false));
        history.record(trial(config("1g", 3), 7.0, true));
        history.record(trial(config("1g", 4), 9.0, true));
        assert_eq!(history.best().unwrap().score, 7.0);
        assert_eq!(history.best_time(), Some(7.0));
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn best_is_none_when_everything_failed() {
        let mut history = History::new();
        assert!(history.best().is_none());
        history.record(trial(config("1g", 1), 1.0, false));
        history.record(trial(config("2g", 1), 2.0, false));
        assert!(history.best().is_none());
        assert!(history.best_time().is_none());
    }

    #[test]
    fn lookup_returns_latest_repeat() {
        let mut history = History::new();
        history.record(trial(config("1g", 1), 5.0, true));
        history.record(trial(config("1g", 1), 6.0, true));
        assert_eq!(history.lookup(&config("1g", 1)).unwrap().score, 6.0);
        assert_eq!(history.best().unwrap().score, 5.0);
    }
}
