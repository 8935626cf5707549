//! Command-line flags of `spark-tune`.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use st_optimizer::StrategyKind;

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "spark-tune")]
#[command(about = "Search Spark launch settings for the fastest (or cheapest) run of a job")]
pub struct Args {
    /// Fully qualified application jar path
    #[arg(long)]
    pub path: Option<String>,

    /// Fully qualified main class name
    #[arg(long)]
    pub class: Option<String>,

    /// Program name
    #[arg(long)]
    pub name: Option<String>,

    /// Spark master type: local/yarn/mesos
    #[arg(long)]
    pub master: Option<String>,

    /// Deployment mode: client/cluster
    #[arg(long = "deploy_mode")]
    pub deploy_mode: Option<String>,

    /// Program-specific arguments, passed to the application as is
    #[arg(long = "program_conf", allow_hyphen_values = true)]
    pub program_conf: Option<String>,

    /// Launcher arguments included as is in every run
    #[arg(long = "fixed_param", allow_hyphen_values = true)]
    pub fixed_param: Option<String>,

    /// Directory for the final configuration and trial history
    #[arg(long = "out_config")]
    pub out_config: Option<PathBuf>,

    /// Amount of driver memory, e.g. 1g or 1g,4g
    #[arg(long = "driver_memory")]
    pub driver_memory: Option<String>,

    /// Amount of executor memory, e.g. 2g or 1g,8g
    #[arg(long = "executor_memory")]
    pub executor_memory: Option<String>,

    /// Number of executor cores, e.g. 2 or 1,8
    #[arg(long = "executor_cores")]
    pub executor_cores: Option<String>,

    /// Upper bound for the number of executors with dynamic allocation
    #[arg(long = "max_executors")]
    pub max_executors: Option<String>,

    /// Default number of partitions in RDDs returned by transformations
    #[arg(long = "spark_parallelism")]
    pub spark_parallelism: Option<String>,

    /// Number of partitions to use when shuffling data for joins or aggregations
    #[arg(long = "spark_partitions")]
    pub spark_partitions: Option<String>,

    /// Maximum number of trials (launches)
    #[arg(long, alias = "test-limit")]
    pub budget: Option<usize>,

    /// Never re-measure a configuration already tried (the default)
    #[arg(long = "no-dups", conflicts_with = "allow_dups")]
    pub no_dups: bool,

    /// Re-measure configurations proposed more than once
    #[arg(long = "allow-dups")]
    pub allow_dups: bool,

    /// Per-trial time limit in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Stop after this many proposals without a new best
    #[arg(long)]
    pub patience: Option<usize>,

    /// Search strategy
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Objective to minimize
    #[arg(long, value_enum)]
    pub objective: Option<ObjectiveArg>,

    /// Relative tolerance of the time-resource objective
    #[arg(long = "rel-tol")]
    pub rel_tol: Option<f64>,

    /// Random seed for the search strategy
    #[arg(long)]
    pub seed: Option<u64>,

    /// Launcher program (default: $SPARK_HOME/bin/spark-submit)
    #[arg(long)]
    pub launcher: Option<String>,

    /// TOML tuning file; flags override its values
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Random,
    Grid,
    Local,
    Bandit,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Random => StrategyKind::Random,
            StrategyArg::Grid => StrategyKind::Grid,
            StrategyArg::Local => StrategyKind::Local,
            StrategyArg::Bandit => StrategyKind::Bandit,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveArg {
    /// Fastest run
    Time,
    /// Cheapest run among those close to the fastest
    TimeResource,
}

impl ObjectiveArg {
    /// Name used for the policy in tuning files.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectiveArg::Time => "time",
            ObjectiveArg::TimeResource => "time-resource",
        }
    }
}

impl Args {
    /// Catalog settings given on the command line, keyed by flag.
    pub fn catalog_values(&self) -> Vec<(&'static str, String)> {
        [
            ("name", &self.name),
            ("class", &self.class),
            ("master", &self.master),
            ("deploy_mode", &self.deploy_mode),
            ("driver_memory", &self.driver_memory),
            ("executor_memory", &self.executor_memory),
            ("executor_cores", &self.executor_cores),
            ("max_executors", &self.max_executors),
            ("spark_parallelism", &self.spark_parallelism),
            ("spark_partitions", &self.spark_partitions),
        ]
        .into_iter()
        .filter_map(|(flag, value)| value.as_ref().map(|v| (flag, v.clone())))
        .collect()
    }

    /// `Some(false)` for `--allow-dups`, `Some(true)` for `--no-dups`.
    pub fn dedup(&self) -> Option<bool> {
        if self.allow_dups {
            Some(false)
        } else if self.no_dups {
            Some(true)
        } else {
            None
        }
    }
}
