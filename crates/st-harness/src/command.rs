//! Launch command construction.

use serde::{Deserialize, Serialize};
use std::fmt;

use st_types::{
    ConfigError, FixedParameters, LaunchError, ParamTarget, ParamValue, RenderedConfiguration,
    Setting,
};

use crate::catalog;

/// The application being tuned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Path to the application jar or script.
    pub app_path: String,
    /// Arguments passed to the application unmodified.
    pub program_args: Vec<String>,
}

impl JobSpec {
    pub fn new(app_path: impl Into<String>) -> Self {
        Self {
            app_path: app_path.into(),
            program_args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Launcher arguments pinned for every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedArgs {
    /// `--flag value` and `--conf key=value` pairs, subject to collision checks.
    pub parameters: FixedParameters,
    /// Everything else, appended verbatim.
    pub passthrough: Vec<String>,
}

/// Split a raw launcher argument string into pinned parameters and
/// passthrough tokens.
///
/// `--conf key=value` becomes a job configuration entry and `--flag value`
/// a direct flag. Values of catalog settings are parsed with the setting's
/// type and must be single values. Flags without a value, and any other
/// tokens, pass through unchanged.
pub fn parse_fixed_args(raw: &str) -> Result<FixedArgs, ConfigError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let mut fixed = FixedArgs::default();
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        let value = tokens.get(i + 1).copied().filter(|v| !v.starts_with("--"));

        match (token.strip_prefix("--"), value) {
            (Some("conf"), Some(pair)) => {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    ConfigError::InvalidValue {
                        parameter: "fixed_param".to_string(),
                        reason: format!("expected key=value after --conf, got '{pair}'"),
                    }
                })?;
                pin(&mut fixed.parameters, key, value, ParamTarget::Conf)?;
                i += 2;
            }
            (Some(flag), Some(value)) if !flag.is_empty() && flag != "conf" => {
                pin(&mut fixed.parameters, flag, value, ParamTarget::Direct)?;
                i += 2;
            }
            _ => {
                fixed.passthrough.push(token.to_string());
                i += 1;
            }
        }
    }
    Ok(fixed)
}

fn pin(
    parameters: &mut FixedParameters,
    name: &str,
    raw: &str,
    target: ParamTarget,
) -> Result<(), ConfigError> {
    let value = match catalog::lookup(name).filter(|e| e.launch_name == name) {
        Some(entry) => match entry.parse(raw)? {
            Setting::Fixed(value) => value,
            Setting::Search(_) => {
                return Err(ConfigError::InvalidValue {
                    parameter: name.to_string(),
                    reason: format!("pinned arguments take a single value, got '{raw}'"),
                })
            }
        },
        None => ParamValue::Text(raw.to_string()),
    };
    if parameters.insert(name, value, target).is_some() {
        return Err(ConfigError::DuplicateParameter {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Where the launcher binary lives: `$SPARK_HOME/bin/spark-submit`, else
/// `spark-submit` on the path.
pub fn default_launcher() -> String {
    match std::env::var("SPARK_HOME") {
        Ok(home) if !home.is_empty() => format!("{}/bin/spark-submit", home.trim_end_matches('/')),
        _ => "spark-submit".to_string(),
    }
}

/// A program and its argument vector. Executed directly, never via a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Assemble a full launch line: direct flags in catalog order, sorted
    /// `--conf` entries, passthrough arguments, application path, program
    /// arguments.
    pub fn build(
        launcher: &str,
        rendered: &RenderedConfiguration,
        passthrough: &[String],
        job: &JobSpec,
    ) -> Result<Self, LaunchError> {
        if launcher.trim().is_empty() {
            return Err(LaunchError::Malformed {
                message: "launcher program is empty".to_string(),
            });
        }
        if job.app_path.trim().is_empty() {
            return Err(LaunchError::Malformed {
                message: "application path is empty".to_string(),
            });
        }

        let mut direct: Vec<(&String, &ParamValue)> = rendered.direct.iter().collect();
        direct.sort_by(|(a, _), (b, _)| {
            catalog::launch_order(a)
                .cmp(&catalog::launch_order(b))
                .then_with(|| a.cmp(b))
        });

        let mut args = Vec::new();
        for (name, value) in direct {
            args.push(format!("--{name}"));
            args.push(value.launch_string());
        }
        // BTreeMap iteration is already sorted by key.
        for (name, value) in &rendered.conf {
            args.push("--conf".to_string());
            args.push(format!("{name}={}", value.launch_string()));
        }
        args.extend(passthrough.iter().cloned());
        args.push(job.app_path.clone());
        args.extend(job.program_args.iter().cloned());

        Ok(Self {
            program: launcher.to_string(),
            args,
        })
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: u64 = 1024 * 1024 * 1024;

    fn rendered() -> RenderedConfiguration {
        let mut r = RenderedConfiguration::default();
        r.insert("executor-cores", ParamValue::Int(4), ParamTarget::Direct);
        r.insert("driver-memory", ParamValue::Bytes(G), ParamTarget::Direct);
        r.insert("name", ParamValue::Text("wordcount".into()), ParamTarget::Direct);
        r.insert("queue", ParamValue::Text("etl".into()), ParamTarget::Direct);
        r.insert("spark.sql.shuffle.partitions", ParamValue::Int(200), ParamTarget::Conf);
        r.insert("spark.dynamicAllocation.enabled", ParamValue::Bool(true), ParamTarget::Conf);
        r
    }

    #[test]
    fn builds_argv_in_deterministic_order() {
        let job = JobSpec::new("/jobs/wc.jar").with_args(["in.txt", "out"]);
        let cmd = LaunchCommand::build(
            "spark-submit",
            &rendered(),
            &["--verbose".to_string()],
            &job,
        )
        .unwrap();

        assert_eq!(cmd.program, "spark-submit");
        assert_eq!(
            cmd.args,
            vec![
                "--name",
                "wordcount",
                "--driver-memory",
                "1048576k",
                "--executor-cores",
                "4",
                "--queue",
                "etl",
                "--conf",
                "spark.dynamicAllocation.enabled=true",
                "--conf",
                "spark.sql.shuffle.partitions=200",
                "--verbose",
                "/jobs/wc.jar",
                "in.txt",
                "out",
            ]
        );
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = LaunchCommand::new("spark-submit")
            .arg("--name")
            .arg("my job")
            .arg("app.jar");
        assert_eq!(cmd.to_string(), "spark-submit --name 'my job' app.jar");
    }

    #[test]
    fn empty_application_path_is_malformed() {
        let err = LaunchCommand::build("spark-submit", &rendered(), &[], &JobSpec::default())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Malformed { .. }));
    }

    #[test]
    fn fixed_args_split_into_parameters_and_passthrough() {
        let fixed = parse_fixed_args(
            "--conf spark.eventLog.enabled=false --queue etl --verbose --driver-memory 2g --supervise",
        )
        .unwrap();

        let event_log = fixed.parameters.get("spark.eventLog.enabled").unwrap();
        assert_eq!(event_log.value, ParamValue::Bool(false));
        assert_eq!(event_log.target, ParamTarget::Conf);

        let queue = fixed.parameters.get("queue").unwrap();
        assert_eq!(queue.value, ParamValue::Text("etl".into()));
        assert_eq!(queue.target, ParamTarget::Direct);

        assert_eq!(
            fixed.parameters.get("driver-memory").unwrap().value,
            ParamValue::Bytes(2 * G)
        );
        assert_eq!(fixed.passthrough, vec!["--verbose", "--supervise"]);
    }

    #[test]
    fn fixed_args_reject_bad_conf_ranges_and_repeats() {
        assert!(parse_fixed_args("--conf spark.eventLog.enabled").is_err());
        assert!(parse_fixed_args("--executor-cores 2,4").is_err());
        assert!(matches!(
            parse_fixed_args("--queue a --queue b"),
            Err(ConfigError::DuplicateParameter { .. })
        ));
        assert!(parse_fixed_args("").unwrap().parameters.is_empty());
    }

    #[test]
    fn default_launcher_is_spark_submit() {
        assert!(default_launcher().ends_with("spark-submit"));
    }
}
