//! Spark parameters the tuner understands.

use st_types::{ConfigError, ParamKind, ParamTarget, Parameter, Setting, ValueType};

/// Static description of one launcher setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Command-line flag of the tuner (`driver_memory`).
    pub flag: &'static str,
    /// Name on the launch line (`driver-memory`, `spark.sql.shuffle.partitions`).
    pub launch_name: &'static str,
    pub value_type: ValueType,
    pub target: ParamTarget,
    pub description: &'static str,
}

macro_rules! entry {
    ($flag:literal, $name:literal, $ty:ident, $target:ident, $desc:literal) => {
        CatalogEntry {
            flag: $flag,
            launch_name: $name,
            value_type: ValueType::$ty,
            target: ParamTarget::$target,
            description: $desc,
        }
    };
}

/// Every known setting, in launch-line order for direct flags.
pub static CATALOG: &[CatalogEntry] = &[
    entry!("name", "name", Text, Direct, "Program name"),
    entry!("class", "class", Text, Direct, "Fully qualified main class name"),
    entry!("master", "master", Text, Direct, "Spark master type: local/yarn/mesos"),
    entry!("deploy_mode", "deploy-mode", Text, Direct, "Deployment mode: client/cluster"),
    entry!("driver_memory", "driver-memory", Bytes, Direct, "Amount of driver memory"),
    entry!("executor_memory", "executor-memory", Bytes, Direct, "Amount of executor memory"),
    entry!("executor_cores", "executor-cores", Int, Direct, "Number of executor cores"),
    entry!(
        "max_executors",
        "spark.dynamicAllocation.maxExecutors",
        Int,
        Conf,
        "Upper bound for the number of executors with dynamic allocation"
    ),
    entry!(
        "spark_parallelism",
        "spark.default.parallelism",
        Int,
        Conf,
        "Default number of partitions in RDDs returned by transformations"
    ),
    entry!(
        "spark_partitions",
        "spark.sql.shuffle.partitions",
        Int,
        Conf,
        "Number of partitions to use when shuffling data for joins or aggregations"
    ),
    entry!(
        "dynamic_allocation",
        "spark.dynamicAllocation.enabled",
        Bool,
        Conf,
        "Scale the number of executors with the workload"
    ),
    entry!(
        "shuffle_service",
        "spark.shuffle.service.enabled",
        Bool,
        Conf,
        "Use the external shuffle service"
    ),
    entry!(
        "broadcast_join_threshold",
        "spark.sql.autoBroadcastJoinThreshold",
        Bytes,
        Conf,
        "Largest table size broadcast to all workers in a join"
    ),
    entry!(
        "max_app_attempts",
        "spark.yarn.maxAppAttempts",
        Int,
        Conf,
        "Maximum number of attempts to submit the application"
    ),
    entry!(
        "event_log",
        "spark.eventLog.enabled",
        Bool,
        Conf,
        "Log Spark events for the history server"
    ),
    entry!(
        "event_log_dir",
        "spark.eventLog.dir",
        Text,
        Conf,
        "Base directory for Spark event logs"
    ),
    entry!(
        "memory_fraction",
        "spark.memory.fraction",
        Float,
        Conf,
        "Fraction of heap used for execution and storage"
    ),
];

/// Direct flags every launch must carry.
pub const REQUIRED_FLAGS: [&str; 4] = ["name", "class", "master", "deploy_mode"];

/// Find an entry by tuner flag or launch name.
pub fn lookup(key: &str) -> Option<&'static CatalogEntry> {
    CATALOG
        .iter()
        .find(|e| e.flag == key || e.launch_name == key)
}

/// Position of a launch name in the catalog; unknown names sort last.
pub fn launch_order(launch_name: &str) -> usize {
    CATALOG
        .iter()
        .position(|e| e.launch_name == launch_name)
        .unwrap_or(CATALOG.len())
}

impl CatalogEntry {
    /// Parse a user-supplied value or range for this setting.
    pub fn parse(&self, raw: &str) -> Result<Setting, ConfigError> {
        let setting = self.value_type.parse_setting(self.launch_name, raw)?;
        if let Setting::Search(ParamKind::Float { min, max }) = &setting {
            if self.launch_name == "spark.memory.fraction" && (*min < 0.0 || *max > 1.0) {
                return Err(ConfigError::InvalidDomain {
                    parameter: self.launch_name.to_string(),
                    reason: "fraction must lie within 0..1".to_string(),
                });
            }
        }
        Ok(setting)
    }

    /// A tunable parameter for this setting over `kind`.
    pub fn parameter(&self, kind: ParamKind) -> Parameter {
        Parameter::new(self.launch_name, kind, self.target).with_description(self.description)
    }

    pub fn is_required(&self) -> bool {
        REQUIRED_FLAGS.contains(&self.flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_types::ParamValue;

    #[test]
    fn lookup_by_flag_or_launch_name() {
        let by_flag = lookup("deploy_mode").unwrap();
        let by_name = lookup("deploy-mode").unwrap();
        assert_eq!(by_flag, by_name);
        assert_eq!(by_flag.target, ParamTarget::Direct);

        let partitions = lookup("spark_partitions").unwrap();
        assert_eq!(partitions.launch_name, "spark.sql.shuffle.partitions");
        assert_eq!(partitions.target, ParamTarget::Conf);

        assert!(lookup("spark.unknown").is_none());
    }

    #[test]
    fn flags_and_names_are_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in &CATALOG[i + 1..] {
                assert_ne!(a.flag, b.flag);
                assert_ne!(a.launch_name, b.launch_name);
            }
        }
    }

    #[test]
    fn required_flags_are_direct_catalog_entries() {
        for flag in REQUIRED_FLAGS {
            let entry = lookup(flag).unwrap();
            assert!(entry.is_required());
            assert_eq!(entry.target, ParamTarget::Direct);
        }
        assert!(!lookup("executor_cores").unwrap().is_required());
    }

    #[test]
    fn launch_order_follows_catalog() {
        assert!(launch_order("name") < launch_order("driver-memory"));
        assert!(launch_order("driver-memory") < launch_order("executor-cores"));
        assert_eq!(launch_order("queue"), CATALOG.len());
    }

    #[test]
    fn entries_parse_with_their_value_type() {
        let memory = lookup("driver_memory").unwrap();
        assert_eq!(
            memory.parse("1g,4g").unwrap(),
            Setting::Search(ParamKind::Bytes {
                min: 1 << 30,
                max: 4 << 30,
                step: 1 << 10
            })
        );
        let mode = lookup("deploy_mode").unwrap();
        assert_eq!(
            mode.parse("cluster").unwrap(),
            Setting::Fixed(ParamValue::Text("cluster".into()))
        );
        assert!(lookup("memory_fraction").unwrap().parse("0.2,1.5").is_err());
        assert!(lookup("executor_cores").unwrap().parse("2;4").is_err());
    }

    #[test]
    fn parameter_carries_launch_name_and_target() {
        let entry = lookup("max_executors").unwrap();
        let parameter = entry.parameter(ParamKind::Int { min: 2, max: 10 });
        assert_eq!(parameter.name, "spark.dynamicAllocation.maxExecutors");
        assert_eq!(parameter.target, ParamTarget::Conf);
        assert!(!parameter.description.is_empty());
    }
}
