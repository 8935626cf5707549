pub mod config;
pub mod errors;
pub mod measurement;
pub mod param;
pub mod size;

pub use config::*;
pub use errors::*;
pub use measurement::*;
pub use param::*;
pub use size::*;
