use thiserror::Error;

/// Main error type for the SparkTune system
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("No feasible result: none of {trials} trials succeeded")]
    NoFeasibleResult { trials: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Setup-time errors. Always fatal before the first measurement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid size '{input}': {reason}")]
    InvalidSize { input: String, reason: String },

    #[error("Invalid range for {parameter}: '{input}' ({reason})")]
    InvalidRange {
        parameter: String,
        input: String,
        reason: String,
    },

    #[error("Invalid domain for {parameter}: {reason}")]
    InvalidDomain { parameter: String, reason: String },

    #[error("Parameter {name} is both pinned and searched")]
    FixedCollision { name: String },

    #[error("Parameter {name} is already registered")]
    DuplicateParameter { name: String },

    #[error("Unknown parameter: {name}")]
    UnknownParameter { name: String },

    #[error("Missing required parameter: {name}")]
    MissingRequired { name: String },

    #[error("Invalid value for {parameter}: {reason}")]
    InvalidValue { parameter: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Errors raised while launching or waiting on the external job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaunchError {
    #[error("Malformed launch invocation: {message}")]
    Malformed { message: String },

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Process exited with status {exit_code:?}")]
    NonZeroExit { exit_code: Option<i32> },

    #[error("Process exceeded the {limit_secs}s time limit")]
    Timeout { limit_secs: f64 },

    #[error("Transient infrastructure error: {message}")]
    Transient { message: String },
}

impl LaunchError {
    /// Whether retrying the same invocation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LaunchError::Transient { .. })
    }
}

/// Errors talking to a cluster resource manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("Resource manager address not configured: {message}")]
    NotConfigured { message: String },

    #[error("Unsupported resource manager setup: {message}")]
    Unsupported { message: String },

    #[error("Resource manager request failed: {message}")]
    Request { message: String },

    #[error("Unexpected resource manager response: {message}")]
    Response { message: String },

    #[error("Failed to read cluster configuration: {message}")]
    SiteConfig { message: String },
}

impl ClusterError {
    /// Request failures may clear up on their own; bad configuration will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Request { .. })
    }
}

/// Result type alias for SparkTune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::errors::ConfigError::Other(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::errors::TuneError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::FixedCollision {
            name: "executor-cores".to_string(),
        };
        assert!(error.to_string().contains("executor-cores"));
        assert!(error.to_string().contains("pinned"));
    }

    #[test]
    fn test_error_conversion() {
        let launch = LaunchError::Timeout { limit_secs: 30.0 };
        let tune_error: TuneError = launch.into();

        match tune_error {
            TuneError::Launch(LaunchError::Timeout { .. }) => (),
            _ => panic!("Expected Launch error"),
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(LaunchError::Transient {
            message: "connection refused".into()
        }
        .is_transient());
        assert!(!LaunchError::NonZeroExit { exit_code: Some(1) }.is_transient());
        assert!(ClusterError::Request {
            message: "503".into()
        }
        .is_transient());
        assert!(!ClusterError::Unsupported {
            message: "ha".into()
        }
        .is_transient());
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("Missing required field: {}", "path");
        assert_eq!(
            config_err,
            ConfigError::Other("Missing required field: path".to_string())
        );
        let _internal_err = internal_error!("Something went wrong");
    }
}
