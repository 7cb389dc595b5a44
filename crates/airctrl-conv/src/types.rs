//! Value domains and the building blocks of decode rules

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Set of values a capability accepts or reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    Boolean,
    /// One of a fixed set of labels
    Choice { labels: Vec<String> },
    /// Numeric range, optionally restricted to multiples of `step` above `min`
    Range(ValueRange),
    /// Anything the device reports; not validated
    Opaque,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Boolean => f.write_str("on|off"),
            Domain::Choice { labels } => f.write_str(&labels.join("|")),
            Domain::Range(range) => write!(f, "{}", range),
            Domain::Opaque => f.write_str("-"),
        }
    }
}

/// Numeric range of a scaled or bit-field capability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// True when `value` is a multiple of the step above `min`
    pub fn on_step(&self, value: f64) -> bool {
        match self.step {
            Some(step) if step > 0.0 => {
                let steps = (value - self.min) / step;
                (steps - steps.round()).abs() < 1e-9
            }
            _ => true,
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "{}..{} step {}", self.min, self.max, step),
            None => write!(f, "{}..{}", self.min, self.max),
        }
    }
}

/// Raw value ↔ label pair of a choice rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub raw: Value,
    pub label: String,
}

/// Error code ↔ message pair of a message rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub code: i64,
    pub text: String,
}

/// One row of a composite table; `None` positions match any raw value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRow {
    pub values: Vec<Option<Value>>,
    pub label: String,
}

/// Loose raw value equality: `"1"` matches `1`, `true` matches `true`
///
/// Firmware revisions disagree on whether numbers are sent as strings.
pub fn raw_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim() == n.to_string()
        }
        _ => false,
    }
}

/// Numeric view of a raw value, accepting numeric strings
pub fn raw_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Integer view of a raw value, accepting numeric strings
pub fn raw_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_eq_is_loose_on_numbers() {
        assert!(raw_eq(&json!("1"), &json!(1)));
        assert!(raw_eq(&json!(2), &json!("2")));
        assert!(raw_eq(&json!("P"), &json!("P")));
        assert!(!raw_eq(&json!("1"), &json!(true)));
        assert!(!raw_eq(&json!("PH"), &json!("P")));
    }

    #[test]
    fn test_raw_number_and_integer() {
        assert_eq!(raw_number(&json!("21.5")), Some(21.5));
        assert_eq!(raw_integer(&json!("49408")), Some(49408));
        assert_eq!(raw_integer(&json!(4.0)), Some(4));
        assert_eq!(raw_integer(&json!("x")), None);
    }

    #[test]
    fn test_value_range_steps() {
        let range = ValueRange::new(40.0, 70.0).with_step(10.0);
        assert!(range.contains(40.0));
        assert!(!range.contains(75.0));
        assert!(range.on_step(60.0));
        assert!(!range.on_step(55.0));
        assert_eq!(range.to_string(), "40..70 step 10");
    }
}
