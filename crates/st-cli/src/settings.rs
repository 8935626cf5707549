//! Tuning settings: an optional TOML file overlaid with command-line flags.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use st_harness::catalog::{self, CatalogEntry, REQUIRED_FLAGS};
use st_harness::{default_launcher, parse_fixed_args, HarnessConfig, JobSpec, RetryPolicy};
use st_optimizer::{
    ConfigurationSpace, ObjectivePolicy, ResourceCost, RunConfig, StrategyKind, DEFAULT_REL_TOL,
};
use st_types::{ConfigError, ParamValue, Setting, TuneResult};

use crate::cli::{Args, ObjectiveArg};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub run: RunSection,
    pub objective: ObjectiveSection,
    pub job: JobSection,
    /// Catalog flag or launch name → value or range.
    pub search: BTreeMap<String, String>,
    /// Catalog flag or launch name → pinned value.
    pub fixed: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub budget: Option<usize>,
    pub timeout_secs: Option<f64>,
    pub patience: Option<usize>,
    pub dedup: Option<bool>,
    pub strategy: Option<String>,
    pub grid_steps: Option<usize>,
    pub seed: Option<u64>,
    pub out_dir: Option<PathBuf>,
    pub launcher: Option<String>,
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectiveSection {
    /// `time` or `time-resource`.
    pub policy: Option<String>,
    pub rel_tol: Option<f64>,
    /// `requested` or `measured`.
    pub cost: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSection {
    pub path: Option<String>,
    pub class: Option<String>,
    pub name: Option<String>,
    pub master: Option<String>,
    pub deploy_mode: Option<String>,
    pub program_args: Vec<String>,
    pub fixed_args: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> TuneResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::parse(&text)?;
        info!(path = %path.display(), "loaded tuning file");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Other(format!("invalid tuning file: {e}")))
    }
}

/// Everything needed to start a run.
#[derive(Debug)]
pub struct Settings {
    pub run: RunConfig,
    pub space: ConfigurationSpace,
    pub harness: HarnessConfig,
    pub out_dir: PathBuf,
    /// Spark master of every launch.
    pub master: String,
}

impl Settings {
    /// Merge file values with flags (flags win) and build the search space.
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self, ConfigError> {
        let FileConfig {
            run: run_file,
            objective: objective_file,
            job: job_file,
            search,
            fixed,
        } = file;

        // Raw catalog values, lowest precedence first.
        let mut raw: BTreeMap<&'static str, String> = BTreeMap::new();
        let job_values = [
            ("name", job_file.name),
            ("class", job_file.class),
            ("master", job_file.master),
            ("deploy_mode", job_file.deploy_mode),
        ];
        for (flag, value) in job_values {
            if let Some(value) = value {
                raw.insert(flag, value);
            }
        }
        let mut search_flags = BTreeSet::new();
        for (key, value) in &search {
            let entry = catalog_entry(key)?;
            search_flags.insert(entry.flag);
            raw.insert(entry.flag, value.clone());
        }
        // Flags pinned by `[fixed]`; searching them anywhere is a collision.
        let mut file_pins = BTreeSet::new();
        for (key, value) in &fixed {
            let entry = catalog_entry(key)?;
            if search_flags.contains(entry.flag) || !file_pins.insert(entry.flag) {
                return Err(ConfigError::FixedCollision {
                    name: entry.launch_name.to_string(),
                });
            }
            raw.insert(entry.flag, toml_text(key, value)?);
        }
        for (flag, value) in args.catalog_values() {
            raw.insert(flag, value);
        }

        let fixed_line = args.fixed_param.clone().or(job_file.fixed_args).unwrap_or_default();
        let fixed_args = parse_fixed_args(&fixed_line)?;
        let mut pinned = fixed_args.parameters;
        let mut searched = Vec::new();
        for (flag, value) in &raw {
            let entry = catalog_entry(flag)?;
            match entry.parse(value)? {
                Setting::Fixed(value) => {
                    if pinned.insert(entry.launch_name, value, entry.target).is_some() {
                        return Err(ConfigError::FixedCollision {
                            name: entry.launch_name.to_string(),
                        });
                    }
                }
                Setting::Search(_) if file_pins.contains(entry.flag) => {
                    return Err(ConfigError::FixedCollision {
                        name: entry.launch_name.to_string(),
                    });
                }
                Setting::Search(kind) => searched.push(entry.parameter(kind)),
            }
        }

        for flag in REQUIRED_FLAGS {
            let present = catalog::lookup(flag).is_some_and(|entry| {
                pinned.contains(entry.launch_name)
                    || searched.iter().any(|p| p.name == entry.launch_name)
            });
            if !present {
                return Err(ConfigError::MissingRequired {
                    name: flag.to_string(),
                });
            }
        }

        let mut space = ConfigurationSpace::new(pinned);
        for parameter in searched {
            space.register(parameter)?;
        }

        let master = match space.fixed().get("master").map(|f| &f.value) {
            Some(ParamValue::Text(master)) => master.clone(),
            _ => String::new(),
        };
        let name = match space.fixed().get("name").map(|f| &f.value) {
            Some(ParamValue::Text(name)) => name.clone(),
            _ => "spark_program".to_string(),
        };

        let run = run_config(&name, args, &run_file, &objective_file)?;

        let app_path = args
            .path
            .clone()
            .or(job_file.path)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                name: "path".to_string(),
            })?;
        let program_args = match &args.program_conf {
            Some(line) => line.split_whitespace().map(str::to_string).collect(),
            None => job_file.program_args,
        };
        let retry = match run_file.retry_attempts {
            Some(attempts) => RetryPolicy::default().with_attempts(attempts),
            None => RetryPolicy::default(),
        };
        let harness = HarnessConfig::new(JobSpec::new(app_path).with_args(program_args))
            .with_launcher(
                args.launcher
                    .clone()
                    .or(run_file.launcher)
                    .unwrap_or_else(default_launcher),
            )
            .with_passthrough(fixed_args.passthrough)
            .with_timeout(run.timeout_secs.map(Duration::from_secs_f64))
            .with_retry(retry);

        let out_dir = args
            .out_config
            .clone()
            .or(run_file.out_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        debug!(
            searched = space.parameters().len(),
            fixed = space.fixed().len(),
            launcher = %harness.launcher,
            "settings resolved"
        );

        Ok(Self {
            run,
            space,
            harness,
            out_dir,
            master,
        })
    }

    pub fn runs_on_yarn(&self) -> bool {
        self.master.starts_with("yarn")
    }
}

fn run_config(
    name: &str,
    args: &Args,
    file: &RunSection,
    objective: &ObjectiveSection,
) -> Result<RunConfig, ConfigError> {
    let mut run = RunConfig::new(name);
    if let Some(budget) = args.budget.or(file.budget) {
        run = run.with_max_trials(budget);
    }
    if let Some(steps) = file.grid_steps {
        run = run.with_grid_steps(steps);
    }
    let strategy = match args.strategy {
        Some(strategy) => Some(StrategyKind::from(strategy)),
        None => file.strategy.as_deref().map(str::parse).transpose()?,
    };
    if let Some(strategy) = strategy {
        run = run.with_strategy(strategy);
    }

    let timeout = args.timeout.or(file.timeout_secs);
    if let Some(secs) = timeout {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                parameter: "timeout".to_string(),
                reason: format!("timeout must be a positive number of seconds, got {secs}"),
            });
        }
    }

    let policy = args
        .objective
        .map(ObjectiveArg::as_str)
        .or(objective.policy.as_deref())
        .unwrap_or("time");
    let objective = match policy {
        "time" => ObjectivePolicy::MinimizeTime,
        "time-resource" | "time_resource" => {
            let cost = match objective.cost.as_deref().unwrap_or("requested") {
                "requested" => ResourceCost::default(),
                "measured" => ResourceCost::Measured,
                other => {
                    return Err(ConfigError::InvalidValue {
                        parameter: "cost".to_string(),
                        reason: format!("unknown cost '{other}' (expected requested or measured)"),
                    })
                }
            };
            let rel_tol = args.rel_tol.or(objective.rel_tol).unwrap_or(DEFAULT_REL_TOL);
            ObjectivePolicy::tie_aware(rel_tol, cost)?
        }
        other => {
            return Err(ConfigError::InvalidValue {
                parameter: "objective".to_string(),
                reason: format!("unknown objective '{other}' (expected time or time-resource)"),
            })
        }
    };

    Ok(run
        .with_patience(args.patience.or(file.patience))
        .with_dedup(args.dedup().or(file.dedup).unwrap_or(true))
        .with_timeout_secs(timeout)
        .with_seed(args.seed.or(file.seed).unwrap_or(0))
        .with_objective(objective))
}

fn catalog_entry(key: &str) -> Result<&'static CatalogEntry, ConfigError> {
    catalog::lookup(key).ok_or_else(|| ConfigError::UnknownParameter {
        name: key.to_string(),
    })
}

fn toml_text(key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        other => Err(ConfigError::InvalidValue {
            parameter: key.to_string(),
            reason: format!("expected a scalar, got {}", other.type_str()),
        }),
    }
}
