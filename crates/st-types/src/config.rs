//! Concrete configurations and their launch-ready rendering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::param::{ParamTarget, ParamValue};

/// An immutable assignment of normalized values to searched parameter names.
///
/// Equality and hashing are defined on the normalized value map, so two
/// configurations built from `"1gb"` and `"1024mb"` are the same configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, ParamValue>,
}

impl Configuration {
    pub fn new(values: BTreeMap<String, ParamValue>) -> Self {
        Self { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    pub fn values(&self) -> &BTreeMap<String, ParamValue> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.values {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// A pinned value and where it goes on the launch line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedValue {
    pub value: ParamValue,
    pub target: ParamTarget,
}

/// Parameters whose values are pinned and excluded from search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedParameters {
    entries: BTreeMap<String, FixedValue>,
}

impl FixedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FixedParameters::insert`].
    pub fn pin(mut self, name: impl Into<String>, value: ParamValue, target: ParamTarget) -> Self {
        self.insert(name, value, target);
        self
    }

    /// Pin a value, returning the one it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: ParamValue,
        target: ParamTarget,
    ) -> Option<FixedValue> {
        self.entries.insert(name.into(), FixedValue { value, target })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FixedValue> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FixedValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Launch-ready view of a configuration merged with the fixed parameters,
/// split into launcher flags and job configuration entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedConfiguration {
    pub direct: BTreeMap<String, ParamValue>,
    pub conf: BTreeMap<String, ParamValue>,
}

impl RenderedConfiguration {
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue, target: ParamTarget) {
        match target {
            ParamTarget::Direct => self.direct.insert(name.into(), value),
            ParamTarget::Conf => self.conf.insert(name.into(), value),
        };
    }

    /// Look a value up in either section.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.direct.get(name).or_else(|| self.conf.get(name))
    }
}
