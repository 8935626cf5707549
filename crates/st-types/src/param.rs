//! Tunable parameter definitions and normalized parameter values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::errors::ConfigError;
use crate::size::{format_size, format_size_exact, parse_size, SizeUnit};

/// Separator between the elements of a range string (`"1g,4g"`).
pub const RANGE_SEP: char = ',';

/// Separator between the options of a categorical setting (`"lz4|zstd"`).
pub const CHOICE_SEP: char = '|';

/// Where a parameter ends up on the launch command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamTarget {
    /// Passed straight to the launcher as `--name value`.
    Direct,
    /// Injected as a job configuration entry, `--conf name=value`.
    Conf,
}

/// Search domain of a parameter. Bounds are always held in canonical units
/// (bytes for sizes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    /// Integer range [min, max] inclusive.
    Int { min: i64, max: i64 },
    /// Continuous range [min, max].
    Float { min: f64, max: f64 },
    /// Byte-size range [min, max] searched on a grid of `step` bytes.
    Bytes { min: u64, max: u64, step: u64 },
    /// true / false.
    Bool,
    /// One of a fixed list of values.
    Choice { values: Vec<String> },
}

impl ParamKind {
    /// Check that the domain is non-empty and well-formed.
    pub fn validate(&self, parameter: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDomain {
            parameter: parameter.to_string(),
            reason,
        };
        match self {
            ParamKind::Int { min, max } if min > max => {
                Err(invalid(format!("min {min} exceeds max {max}")))
            }
            ParamKind::Float { min, max } if !min.is_finite() || !max.is_finite() => {
                Err(invalid("bounds must be finite".to_string()))
            }
            ParamKind::Float { min, max } if min > max => {
                Err(invalid(format!("min {min} exceeds max {max}")))
            }
            ParamKind::Bytes { min, max, .. } if min > max => Err(invalid(format!(
                "min {} exceeds max {}",
                format_size(*min, None),
                format_size(*max, None)
            ))),
            ParamKind::Bytes { step: 0, .. } => Err(invalid("step must be positive".to_string())),
            ParamKind::Choice { values } if values.is_empty() => {
                Err(invalid("no choices given".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Number of distinct values, or `None` for continuous domains.
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            ParamKind::Int { min, max } => usize::try_from(max - min).ok()?.checked_add(1),
            ParamKind::Float { min, max } => (min == max).then_some(1),
            ParamKind::Bytes { min, max, step } => {
                usize::try_from((max - min) / step).ok()?.checked_add(1)
            }
            ParamKind::Bool => Some(2),
            ParamKind::Choice { values } => Some(values.len()),
        }
    }

    /// Map a unit-interval coordinate to a domain-valid value: clamp continuous
    /// values, round integers, snap sizes to the step grid, index choices.
    pub fn materialize(&self, unit: f64) -> ParamValue {
        let u = if unit.is_nan() { 0.0 } else { unit.clamp(0.0, 1.0) };
        match self {
            ParamKind::Int { min, max } => {
                let span = (max - min) as f64;
                let v = *min + (u * span).round() as i64;
                ParamValue::Int(v.clamp(*min, *max))
            }
            ParamKind::Float { min, max } => {
                ParamValue::Float((min + u * (max - min)).clamp(*min, *max))
            }
            ParamKind::Bytes { min, max, step } => {
                let steps = (max - min) / step;
                let k = (u * steps as f64).round() as u64;
                ParamValue::Bytes((min + k.min(steps) * step).min(*max))
            }
            ParamKind::Bool => ParamValue::Bool(u >= 0.5),
            ParamKind::Choice { values } => {
                let idx = ((u * values.len() as f64) as usize).min(values.len() - 1);
                ParamValue::Text(values[idx].clone())
            }
        }
    }

    /// Bring an externally supplied value into this domain's canonical form.
    /// Fails if the value has the wrong shape or lies outside the domain.
    pub fn coerce(&self, parameter: &str, value: &ParamValue) -> Result<ParamValue, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            parameter: parameter.to_string(),
            reason,
        };
        let coerced = match (self, value) {
            (ParamKind::Int { .. }, ParamValue::Int(v)) => ParamValue::Int(*v),
            (ParamKind::Float { .. }, ParamValue::Float(v)) => ParamValue::Float(*v),
            (ParamKind::Float { .. }, ParamValue::Int(v)) => ParamValue::Float(*v as f64),
            (ParamKind::Bytes { .. }, ParamValue::Bytes(v)) => ParamValue::Bytes(*v),
            (ParamKind::Bytes { .. }, ParamValue::Int(v)) => ParamValue::Bytes(
                u64::try_from(*v).map_err(|_| invalid(format!("negative size {v}")))?,
            ),
            (ParamKind::Bytes { .. }, ParamValue::Text(s)) => ParamValue::Bytes(parse_size(s)?),
            (ParamKind::Bool, ParamValue::Bool(b)) => ParamValue::Bool(*b),
            (ParamKind::Bool, ParamValue::Text(s)) => ParamValue::Bool(parse_bool(s).ok_or_else(
                || invalid(format!("'{s}' is not a boolean")),
            )?),
            (ParamKind::Choice { .. }, ParamValue::Text(s)) => ParamValue::Text(s.clone()),
            (kind, other) => {
                return Err(invalid(format!("{other} does not fit a {} domain", kind.label())))
            }
        };

        let in_domain = match (self, &coerced) {
            (ParamKind::Int { min, max }, ParamValue::Int(v)) => (min..=max).contains(&v),
            (ParamKind::Float { min, max }, ParamValue::Float(v)) => *v >= *min && *v <= *max,
            (ParamKind::Bytes { min, max, .. }, ParamValue::Bytes(v)) => (min..=max).contains(&v),
            (ParamKind::Choice { values }, ParamValue::Text(s)) => values.contains(s),
            _ => true,
        };
        if !in_domain {
            return Err(invalid(format!("{coerced} lies outside the search domain")));
        }
        Ok(coerced)
    }

    fn label(&self) -> &'static str {
        match self {
            ParamKind::Int { .. } => "integer",
            ParamKind::Float { .. } => "float",
            ParamKind::Bytes { .. } => "size",
            ParamKind::Bool => "boolean",
            ParamKind::Choice { .. } => "choice",
        }
    }
}

/// A single tunable dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Launcher-facing name, e.g. `driver-memory` or `spark.sql.shuffle.partitions`.
    pub name: String,
    pub kind: ParamKind,
    pub target: ParamTarget,
    #[serde(default)]
    pub description: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParamKind, target: ParamTarget) -> Self {
        Self {
            name: name.into(),
            kind,
            target,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_direct(&self) -> bool {
        self.target == ParamTarget::Direct
    }
}

/// A concrete, normalized parameter value.
///
/// Sizes are held in bytes so that `"1gb"` and `"1024mb"` compare equal.
/// Floats compare and hash by bit pattern, with `-0.0` folded into `0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Bytes(u64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Render the value the way the launcher expects it. Sizes are exact:
    /// kibibytes when aligned, plain bytes otherwise.
    pub fn launch_string(&self) -> String {
        match self {
            ParamValue::Bytes(b) if b % SizeUnit::Kibi.multiplier() == 0 => {
                format_size(*b, Some(SizeUnit::Kibi))
            }
            ParamValue::Bytes(b) => format_size(*b, Some(SizeUnit::Byte)),
            other => other.to_string(),
        }
    }

    /// Numeric view used by cost formulas. Sizes are reported in MiB.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Bytes(b) => Some(*b as f64 / (1024.0 * 1024.0)),
            ParamValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ParamValue::Text(_) => None,
        }
    }

    fn float_key(v: f64) -> u64 {
        if v == 0.0 {
            0.0f64.to_bits()
        } else {
            v.to_bits()
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (ParamValue::Bytes(a), ParamValue::Bytes(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => {
                Self::float_key(*a) == Self::float_key(*b)
            }
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParamValue::Bool(v) => v.hash(state),
            ParamValue::Int(v) => v.hash(state),
            ParamValue::Bytes(v) => v.hash(state),
            ParamValue::Float(v) => Self::float_key(*v).hash(state),
            ParamValue::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Bytes(v) => write!(f, "{}", format_size_exact(*v)),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Value shape expected for a setting before its string form is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Float,
    Bytes,
    Bool,
    Text,
}

/// Outcome of parsing a user-supplied setting: either pinned or searched.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Fixed(ParamValue),
    Search(ParamKind),
}

impl ValueType {
    /// Parse a point value or a range string.
    ///
    /// - int: `"n"` or `"a,b"` (positive integers)
    /// - bytes: `"s"`, `"a,b"` (1k step) or `"a,b,step"`
    /// - float: `"x"` or `"a,b"`
    /// - bool: `"true"`, `"false"` or `"true,false"`
    /// - text: a literal, or `"a|b|c"` for a categorical choice
    ///
    /// Ranges with equal ends collapse to a fixed value.
    pub fn parse_setting(self, parameter: &str, raw: &str) -> Result<Setting, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRange {
            parameter: parameter.to_string(),
            input: raw.to_string(),
            reason: reason.to_string(),
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid("empty value"));
        }

        let parts: Vec<&str> = raw.split(RANGE_SEP).map(str::trim).collect();
        match self {
            ValueType::Int => {
                let parse = |s: &str| -> Result<i64, ConfigError> {
                    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
                        return Err(invalid("expected a positive integer"));
                    }
                    match s.parse::<i64>() {
                        Ok(v) if v > 0 => Ok(v),
                        _ => Err(invalid("expected a positive integer")),
                    }
                };
                match parts[..] {
                    [v] => Ok(Setting::Fixed(ParamValue::Int(parse(v)?))),
                    [a, b] => range_or_point(parse(a)?, parse(b)?, &invalid, |min, max| {
                        ParamKind::Int { min, max }
                    }, ParamValue::Int),
                    _ => Err(invalid("expected 'value' or 'min,max'")),
                }
            }
            ValueType::Float => {
                let parse = |s: &str| -> Result<f64, ConfigError> {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| invalid("expected a number"))
                };
                match parts[..] {
                    [v] => Ok(Setting::Fixed(ParamValue::Float(parse(v)?))),
                    [a, b] => range_or_point(parse(a)?, parse(b)?, &invalid, |min, max| {
                        ParamKind::Float { min, max }
                    }, ParamValue::Float),
                    _ => Err(invalid("expected 'value' or 'min,max'")),
                }
            }
            ValueType::Bytes => {
                let parse = |s: &str| parse_size(s);
                match parts[..] {
                    [v] => Ok(Setting::Fixed(ParamValue::Bytes(parse(v)?))),
                    [a, b] => range_or_point(parse(a)?, parse(b)?, &invalid, |min, max| {
                        ParamKind::Bytes { min, max, step: SizeUnit::Kibi.multiplier() }
                    }, ParamValue::Bytes),
                    [a, b, step] => {
                        let step = parse(step)?;
                        if step == 0 {
                            return Err(invalid("step must be positive"));
                        }
                        range_or_point(parse(a)?, parse(b)?, &invalid, |min, max| {
                            ParamKind::Bytes { min, max, step }
                        }, ParamValue::Bytes)
                    }
                    _ => Err(invalid("expected 'size', 'min,max' or 'min,max,step'")),
                }
            }
            ValueType::Bool => {
                let parse = |s: &str| parse_bool(s).ok_or_else(|| invalid("expected true or false"));
                match parts[..] {
                    [v] => Ok(Setting::Fixed(ParamValue::Bool(parse(v)?))),
                    [a, b] => {
                        let (a, b) = (parse(a)?, parse(b)?);
                        Ok(if a == b {
                            Setting::Fixed(ParamValue::Bool(a))
                        } else {
                            Setting::Search(ParamKind::Bool)
                        })
                    }
                    _ => Err(invalid("expected 'true', 'false' or 'true,false'")),
                }
            }
            ValueType::Text => text_setting(raw, &invalid),
        }
    }
}

fn text_setting(raw: &str, invalid: &dyn Fn(&str) -> ConfigError) -> Result<Setting, ConfigError> {
    if !raw.contains(CHOICE_SEP) {
        return Ok(Setting::Fixed(ParamValue::Text(raw.to_string())));
    }
    let mut values: Vec<String> = Vec::new();
    for option in raw.split(CHOICE_SEP).map(str::trim) {
        if option.is_empty() {
            return Err(invalid("empty choice"));
        }
        if !values.iter().any(|v| v == option) {
            values.push(option.to_string());
        }
    }
    Ok(if values.len() == 1 {
        Setting::Fixed(ParamValue::Text(values.remove(0)))
    } else {
        Setting::Search(ParamKind::Choice { values })
    })
}

fn range_or_point<T: PartialOrd + Copy>(
    min: T,
    max: T,
    invalid: &dyn Fn(&str) -> ConfigError,
    make_range: impl FnOnce(T, T) -> ParamKind,
    make_point: impl FnOnce(T) -> ParamValue,
) -> Result<Setting, ConfigError> {
    if min > max {
        Err(invalid("range start exceeds range end"))
    } else if min == max {
        Ok(Setting::Fixed(make_point(min)))
    } else {
        Ok(Setting::Search(make_range(min, max)))
    }
}

/// Case-insensitive `true`/`false`; nothing else is accepted.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
