//! # st-harness
//!
//! Everything between a rendered configuration and a [`Measurement`]:
//! the Spark parameter catalog, launch command construction, the process
//! runner with resource sampling, bounded retries and YARN metrics.
//!
//! [`Measurement`]: st_types::Measurement

pub mod catalog;
pub mod command;
pub mod harness;
pub mod launcher;
pub mod retry;
pub mod sampler;
pub mod yarn;

pub use catalog::{CatalogEntry, CATALOG, REQUIRED_FLAGS};
pub use command::{default_launcher, parse_fixed_args, FixedArgs, JobSpec, LaunchCommand};
pub use harness::{HarnessConfig, MeasurementHarness};
pub use launcher::{ProcessLauncher, ProcessOutput, TokioLauncher};
pub use retry::RetryPolicy;
pub use sampler::{NullSampler, ProcfsSampler, ResourceSample, ResourceSampler};
pub use yarn::{extract_app_id, ClusterMetrics, YarnClient, YarnSite};
