use core::fmt;
use serde::{Deserialize, Serialize};

/// A decoded register value as published in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum DecodedValue {
    Number(f64),
    Text(String),
    Flag(bool),
    /// Read failed or the register has not been polled yet.
    #[default]
    Absent,
}

impl DecodedValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, DecodedValue::Absent)
    }

    /// Numeric view: numbers as-is, flags as 1/0, numeric text parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Number(n) => Some(*n),
            DecodedValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            DecodedValue::Text(s) => s.trim().parse::<f64>().ok(),
            DecodedValue::Absent => None,
        }
    }

    /// Truth view: flags as-is, numbers by non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DecodedValue::Flag(b) => Some(*b),
            DecodedValue::Number(n) => Some(*n != 0.0),
            DecodedValue::Text(_) | DecodedValue::Absent => None,
        }
    }

    /// Best-effort conversion of operator input: numbers, then booleans,
    /// then free text.
    pub fn parse_input(input: &str) -> Self {
        let t = input.trim();
        if let Ok(n) = t.parse::<f64>() {
            return DecodedValue::Number(n);
        }
        match t {
            "true" => DecodedValue::Flag(true),
            "false" => DecodedValue::Flag(false),
            _ => DecodedValue::Text(input.to_string()),
        }
    }
}

impl From<f64> for DecodedValue {
    fn from(v: f64) -> Self {
        DecodedValue::Number(v)
    }
}

impl From<bool> for DecodedValue {
    fn from(v: bool) -> Self {
        DecodedValue::Flag(v)
    }
}

impl From<&str> for DecodedValue {
    fn from(v: &str) -> Self {
        DecodedValue::Text(v.to_string())
    }
}

impl From<String> for DecodedValue {
    fn from(v: String) -> Self {
        DecodedValue::Text(v)
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Number(n) => write!(f, "{n}"),
            DecodedValue::Text(s) => f.write_str(s),
            DecodedValue::Flag(b) => write!(f, "{b}"),
            DecodedValue::Absent => f.write_str("null"),
        }
    }
}
