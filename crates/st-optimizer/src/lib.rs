//! # st-optimizer
//!
//! Configuration space, pluggable search strategies, trial history,
//! objective scoring and the search driver for SparkTune.

mod driver;
mod history;
mod objective;
mod persist;
mod space;
mod strategy;
mod trial;

pub use driver::{DriverState, RunOutcome, SearchDriver};
pub use history::History;
pub use objective::{
    ObjectiveEvaluator, ObjectivePolicy, ResourceCost, DEFAULT_REL_TOL, FAILURE_PENALTY,
};
pub use persist::{load_configuration, JsonFileSink, ResultSink};
pub use space::{Assignment, Candidate, ConfigurationSpace, Dimension};
pub use strategy::{
    BanditSearch, GridSearch, LocalSearch, RandomSearch, SearchStrategy, StrategyKind,
};
pub use trial::{RunConfig, RunId, RunState, RunStatus, Trial};
