//! Durable output of a finished run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use st_types::{Configuration, ParamValue, TuneResult};

use crate::history::History;
use crate::space::ConfigurationSpace;
use crate::trial::Trial;

/// Receives the outcome of a run.
pub trait ResultSink: Send {
    fn persist(&self, best: &Trial, history: &History) -> TuneResult<()>;
}

/// Writes `<name>_final_config.json` and `<name>_history.json` into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    out_dir: PathBuf,
    name: String,
}

impl JsonFileSink {
    pub fn new(out_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            name: name.into(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_final_config.json", self.name))
    }

    pub fn history_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_history.json", self.name))
    }
}

impl ResultSink for JsonFileSink {
    fn persist(&self, best: &Trial, history: &History) -> TuneResult<()> {
        fs::create_dir_all(&self.out_dir)?;

        let config_path = self.config_path();
        fs::write(&config_path, serde_json::to_string_pretty(&best.configuration)?)?;
        fs::write(self.history_path(), serde_json::to_string_pretty(history.trials())?)?;

        info!(path = %config_path.display(), trials = history.len(), "saved final configuration");
        Ok(())
    }
}

/// Read a saved final configuration back, normalizing it through `space`.
pub fn load_configuration(path: &Path, space: &ConfigurationSpace) -> TuneResult<Configuration> {
    let raw = fs::read_to_string(path)?;
    let values: BTreeMap<String, ParamValue> = serde_json::from_str(&raw)?;
    Ok(space.configuration_from_values(&values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Assignment;
    use st_types::{
        FixedParameters, Measurement, ParamKind, ParamTarget, Parameter, TuneError,
    };
    use tempfile::TempDir;
    use uuid::Uuid;

    const G: u64 = 1024 * 1024 * 1024;

    fn space() -> ConfigurationSpace {
        let mut space = ConfigurationSpace::new(FixedParameters::new());
        space
            .register(Parameter::new(
                "driver-memory",
                ParamKind::Bytes { min: G, max: 8 * G, step: G / 4 },
                ParamTarget::Direct,
            ))
            .unwrap();
        space
            .register(Parameter::new(
                "spark.memory.fraction",
                ParamKind::Float { min: 0.5, max: 1.0 },
                ParamTarget::Conf,
            ))
            .unwrap();
        space
            .register(Parameter::new(
                "spark.dynamicAllocation.enabled",
                ParamKind::Bool,
                ParamTarget::Conf,
            ))
            .unwrap();
        space
    }

    fn best_trial(space: &ConfigurationSpace) -> Trial {
        let assignment: Assignment = [
            ("driver-memory".to_string(), 0.3),
            ("spark.memory.fraction".to_string(), 1.0),
            ("spark.dynamicAllocation.enabled".to_string(), 0.9),
        ]
        .into_iter()
        .collect();
        let candidate = space.materialize(&assignment).unwrap();
        Trial::new(Uuid::new_v4(), 1, candidate, Measurement::succeeded(5.0), 5.0)
    }

    #[test]
    fn persisted_configuration_reloads_equal() {
        let dir = TempDir::new().unwrap();
        let space = space();
        let best = best_trial(&space);
        let mut history = History::new();
        history.record(best.clone());

        let sink = JsonFileSink::new(dir.path().join("out"), "wordcount");
        sink.persist(&best, &history).unwrap();

        assert!(sink.config_path().ends_with("wordcount_final_config.json"));
        let loaded = load_configuration(&sink.config_path(), &space).unwrap();
        assert_eq!(loaded, best.configuration);

        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(sink.history_path()).unwrap()).unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 1);
    }

    #[test]
    fn load_accepts_human_readable_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manual.json");
        fs::write(
            &path,
            r#"{"driver-memory": "2gb", "spark.memory.fraction": 0.75, "spark.dynamicAllocation.enabled": "true"}"#,
        )
        .unwrap();

        let loaded = load_configuration(&path, &space()).unwrap();
        assert_eq!(loaded.get("driver-memory"), Some(&ParamValue::Bytes(2 * G)));
        assert_eq!(
            loaded.get("spark.dynamicAllocation.enabled"),
            Some(&ParamValue::Bool(true))
        );
    }

    #[test]
    fn load_rejects_unknown_parameters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"executor-cores": 4}"#).unwrap();
        assert!(matches!(
            load_configuration(&path, &space()),
            Err(TuneError::Config(_))
        ));
    }
}
