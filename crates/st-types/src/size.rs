//! Byte-size parsing and formatting.
//!
//! All sizes are binary: `1k` is 1024 bytes. Formatting only emits integral
//! values with the single-letter suffixes the JVM heap flags accept.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Binary size units, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeUnit {
    Byte,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
    Pebi,
}

impl SizeUnit {
    pub const ALL: [SizeUnit; 6] = [
        SizeUnit::Byte,
        SizeUnit::Kibi,
        SizeUnit::Mebi,
        SizeUnit::Gibi,
        SizeUnit::Tebi,
        SizeUnit::Pebi,
    ];

    pub fn suffix(self) -> char {
        match self {
            SizeUnit::Byte => 'b',
            SizeUnit::Kibi => 'k',
            SizeUnit::Mebi => 'm',
            SizeUnit::Gibi => 'g',
            SizeUnit::Tebi => 't',
            SizeUnit::Pebi => 'p',
        }
    }

    pub fn multiplier(self) -> u64 {
        1024u64.pow(self as u32)
    }

    fn from_prefix(c: char) -> Option<Self> {
        SizeUnit::ALL.into_iter().find(|u| u.suffix() == c)
    }
}

/// Parse a human-readable size such as `"50mb"`, `"1GB"`, `"0.75G"` or `"4"`
/// into bytes. Fractional results are rounded to the nearest byte.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSize {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(invalid("expected a number"));
    }
    let value: f64 = number.parse().map_err(|_| invalid("expected a number"))?;

    let suffix = suffix.trim().to_ascii_lowercase();
    let unit = match suffix.as_str() {
        "" | "b" | "byte" | "bytes" => SizeUnit::Byte,
        other => {
            let mut chars = other.chars();
            let prefix = chars.next().and_then(SizeUnit::from_prefix);
            let rest = chars.as_str();
            match prefix {
                Some(unit) if unit != SizeUnit::Byte && matches!(rest, "" | "b" | "ib") => unit,
                _ => {
                    return Err(invalid(
                        "units must be one of b, k, m, g, t or p (e.g. 50b, 100kb, 250mb)",
                    ))
                }
            }
        }
    };

    let bytes = (value * unit.multiplier() as f64).round();
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(invalid("size out of range"));
    }
    Ok(bytes as u64)
}

/// Format a byte count with an integral value and a single-letter suffix.
///
/// Without a unit, the largest unit that keeps the value integral is chosen,
/// except that up to four significant digits are kept rather than rounding
/// further (`4.12g` formats as `4218m`). With a unit, formatting stops at that
/// unit or earlier if going further would lose precision.
pub fn format_size(bytes: u64, unit: Option<SizeUnit>) -> String {
    let mut num = bytes as f64;
    for candidate in &SizeUnit::ALL[..SizeUnit::ALL.len() - 1] {
        if Some(*candidate) == unit || num < 1024.0 || (num.fract() != 0.0 && num <= 9999.0) {
            return format!("{}{}", num.trunc() as u64, candidate.suffix());
        }
        num /= 1024.0;
    }
    format!("{}{}", num.trunc() as u64, SizeUnit::Pebi.suffix())
}

/// Format a byte count in the largest unit that divides it evenly.
pub fn format_size_exact(bytes: u64) -> String {
    let unit = SizeUnit::ALL
        .into_iter()
        .rev()
        .find(|u| bytes != 0 && bytes % u.multiplier() == 0)
        .unwrap_or(SizeUnit::Byte);
    format!("{}{}", bytes / unit.multiplier(), unit.suffix())
}
