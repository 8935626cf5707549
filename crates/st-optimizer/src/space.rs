//! The configuration space: registered tunables, pinned values, and the
//! mapping from strategy coordinates to concrete launch settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use st_types::{
    ConfigError, Configuration, FixedParameters, ParamValue, Parameter, RenderedConfiguration,
};

/// A strategy's proposal: one coordinate in `[0, 1]` per registered parameter.
pub type Assignment = BTreeMap<String, f64>;

/// One searchable axis as seen by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    /// Number of distinct values, or `None` for continuous axes.
    pub levels: Option<usize>,
}

impl Dimension {
    /// Coordinate of the `k`-th of `levels` evenly spaced points.
    pub fn level_coordinate(k: usize, levels: usize) -> f64 {
        if levels <= 1 {
            0.0
        } else {
            k.min(levels - 1) as f64 / (levels - 1) as f64
        }
    }
}

/// A materialized proposal: the dedup key and its launch-ready form.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub configuration: Configuration,
    pub rendered: RenderedConfiguration,
}

/// Registered tunable parameters plus the values pinned outside the search.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationSpace {
    parameters: Vec<Parameter>,
    fixed: FixedParameters,
}

impl ConfigurationSpace {
    pub fn new(fixed: FixedParameters) -> Self {
        Self {
            parameters: Vec::new(),
            fixed,
        }
    }

    /// Add a tunable parameter.
    ///
    /// Fails if the name is pinned, already registered, or the domain is empty.
    pub fn register(&mut self, parameter: Parameter) -> Result<(), ConfigError> {
        if self.fixed.contains(&parameter.name) {
            return Err(ConfigError::FixedCollision {
                name: parameter.name,
            });
        }
        if self.contains(&parameter.name) {
            return Err(ConfigError::DuplicateParameter {
                name: parameter.name,
            });
        }
        parameter.kind.validate(&parameter.name)?;

        debug!(parameter = %parameter.name, kind = ?parameter.kind, "registered tunable parameter");
        self.parameters.push(parameter);
        Ok(())
    }

    /// Builder form of [`ConfigurationSpace::register`].
    pub fn with_parameter(mut self, parameter: Parameter) -> Result<Self, ConfigError> {
        self.register(parameter)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn fixed(&self) -> &FixedParameters {
        &self.fixed
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn dimensions(&self) -> Vec<Dimension> {
        self.parameters
            .iter()
            .map(|p| Dimension {
                name: p.name.clone(),
                levels: p.kind.cardinality(),
            })
            .collect()
    }

    /// Map a strategy assignment to domain-valid values and render it together
    /// with the fixed parameters.
    pub fn materialize(&self, assignment: &Assignment) -> Result<Candidate, ConfigError> {
        if let Some(unknown) = assignment.keys().find(|name| !self.contains(name)) {
            return Err(ConfigError::UnknownParameter {
                name: unknown.clone(),
            });
        }

        let mut values = BTreeMap::new();
        for parameter in &self.parameters {
            let unit = assignment
                .get(&parameter.name)
                .ok_or_else(|| ConfigError::InvalidValue {
                    parameter: parameter.name.clone(),
                    reason: "no coordinate proposed".to_string(),
                })?;
            values.insert(parameter.name.clone(), parameter.kind.materialize(*unit));
        }

        let configuration = Configuration::new(values);
        let rendered = self.render(&configuration);
        Ok(Candidate {
            configuration,
            rendered,
        })
    }

    /// Merge a configuration with the fixed parameters into launch form.
    pub fn render(&self, configuration: &Configuration) -> RenderedConfiguration {
        let mut rendered = RenderedConfiguration::default();
        for (name, fixed) in self.fixed.iter() {
            rendered.insert(name.clone(), fixed.value.clone(), fixed.target);
        }
        for parameter in &self.parameters {
            if let Some(value) = configuration.get(&parameter.name) {
                rendered.insert(parameter.name.clone(), value.clone(), parameter.target);
            }
        }
        rendered
    }

    /// Build a configuration from externally supplied values (e.g. a saved
    /// result), normalizing each through its parameter's domain.
    pub fn configuration_from_values(
        &self,
        values: &BTreeMap<String, ParamValue>,
    ) -> Result<Configuration, ConfigError> {
        if let Some(unknown) = values.keys().find(|name| !self.contains(name)) {
            return Err(ConfigError::UnknownParameter {
                name: unknown.clone(),
            });
        }

        let mut normalized = BTreeMap::new();
        for parameter in &self.parameters {
            let value = values
                .get(&parameter.name)
                .ok_or_else(|| ConfigError::MissingRequired {
                    name: parameter.name.clone(),
                })?;
            normalized.insert(
                parameter.name.clone(),
                parameter.kind.coerce(&parameter.name, value)?,
            );
        }
        Ok(Configuration::new(normalized))
    }
}
