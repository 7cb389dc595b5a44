//! Capability descriptor structures
//!
//! A descriptor says which raw key(s) one capability reads and writes, and
//! how raw values translate to normalized ones.

use std::collections::BTreeMap;

use airctrl_core::Capability;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChoiceOption, CompositeRow, Domain, MessageEntry, ValueRange};

/// Label reported for choice and composite values no entry matches
pub const DEFAULT_FALLBACK: &str = "unknown";

/// Prefix of the message reported for unlisted error codes
pub const DEFAULT_MESSAGE_FALLBACK: &str = "unknown error";

/// Translation rule between raw key(s) and a capability value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Boolean: `on` ↔ true, anything else ↔ false
    ///
    /// `also_on` entries are written together with `on`, e.g. powering the
    /// device up when a humidifying function is switched on.
    Switch {
        key: String,
        on: Value,
        off: Value,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        also_on: BTreeMap<String, Value>,
    },

    /// Enumeration of raw values with labels
    Choice {
        key: String,
        options: Vec<ChoiceOption>,
        #[serde(default = "default_fallback")]
        fallback: String,
    },

    /// physical = raw * scale + offset
    Scaled {
        key: String,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },

    /// Unsigned sub-field of an integer key
    Bits { key: String, shift: u8, width: u8 },

    /// Error code to human-readable text
    Message {
        key: String,
        messages: Vec<MessageEntry>,
        #[serde(default = "default_message_fallback")]
        fallback: String,
    },

    /// Label derived from several raw keys; first matching row wins
    Composite {
        keys: Vec<String>,
        rows: Vec<CompositeRow>,
        #[serde(default = "default_fallback")]
        fallback: String,
    },

    /// Remaining/total hour counters of a filter
    Filter {
        remaining_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_key: Option<String>,
    },
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK.to_string()
}

fn default_message_fallback() -> String {
    DEFAULT_MESSAGE_FALLBACK.to_string()
}

fn default_scale() -> f64 {
    1.0
}

impl Rule {
    /// Raw keys read by this rule
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Rule::Switch { key, .. }
            | Rule::Choice { key, .. }
            | Rule::Scaled { key, .. }
            | Rule::Bits { key, .. }
            | Rule::Message { key, .. } => vec![key.as_str()],
            Rule::Composite { keys, .. } => keys.iter().map(String::as_str).collect(),
            Rule::Filter {
                remaining_key,
                total_key,
            } => std::iter::once(remaining_key.as_str())
                .chain(total_key.as_deref())
                .collect(),
        }
    }
}

/// Complete definition of one capability for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub capability: Capability,

    #[serde(flatten)]
    pub rule: Rule,

    /// Accepted numeric range for scaled and bit-field rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,

    /// Unit string (e.g. "%", "°C", "µg/m³")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Whether commands may write this capability.
    /// Defaults to false; only explicitly writable capabilities can be set.
    #[serde(default)]
    pub writable: bool,
}

impl CapabilityDescriptor {
    fn with_rule(capability: Capability, rule: Rule) -> Self {
        Self {
            capability,
            rule,
            range: None,
            unit: None,
            writable: false,
        }
    }

    pub fn switch(
        capability: Capability,
        key: impl Into<String>,
        on: impl Into<Value>,
        off: impl Into<Value>,
    ) -> Self {
        Self::with_rule(
            capability,
            Rule::Switch {
                key: key.into(),
                on: on.into(),
                off: off.into(),
                also_on: BTreeMap::new(),
            },
        )
    }

    pub fn choice<R: Into<Value> + Clone>(
        capability: Capability,
        key: impl Into<String>,
        options: &[(R, &str)],
    ) -> Self {
        Self::with_rule(
            capability,
            Rule::Choice {
                key: key.into(),
                options: options
                    .iter()
                    .map(|(raw, label)| ChoiceOption {
                        raw: raw.clone().into(),
                        label: label.to_string(),
                    })
                    .collect(),
                fallback: default_fallback(),
            },
        )
    }

    /// Pass-through numeric value
    pub fn number(capability: Capability, key: impl Into<String>) -> Self {
        Self::scaled(capability, key, 1.0, 0.0)
    }

    pub fn scaled(capability: Capability, key: impl Into<String>, scale: f64, offset: f64) -> Self {
        Self::with_rule(
            capability,
            Rule::Scaled {
                key: key.into(),
                scale,
                offset,
            },
        )
    }

    pub fn bits(capability: Capability, key: impl Into<String>, shift: u8, width: u8) -> Self {
        Self::with_rule(
            capability,
            Rule::Bits {
                key: key.into(),
                shift,
                width,
            },
        )
    }

    pub fn message(capability: Capability, key: impl Into<String>, messages: &[(i64, &str)]) -> Self {
        Self::with_rule(
            capability,
            Rule::Message {
                key: key.into(),
                messages: messages
                    .iter()
                    .map(|(code, text)| MessageEntry {
                        code: *code,
                        text: text.to_string(),
                    })
                    .collect(),
                fallback: default_message_fallback(),
            },
        )
    }

    pub fn composite(capability: Capability, keys: &[&str], rows: Vec<CompositeRow>) -> Self {
        Self::with_rule(
            capability,
            Rule::Composite {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                rows,
                fallback: default_fallback(),
            },
        )
    }

    pub fn filter(
        capability: Capability,
        remaining_key: impl Into<String>,
        total_key: Option<&str>,
    ) -> Self {
        Self::with_rule(
            capability,
            Rule::Filter {
                remaining_key: remaining_key.into(),
                total_key: total_key.map(str::to_string),
            },
        )
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64, step: Option<f64>) -> Self {
        self.range = Some(ValueRange { min, max, step });
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Add a raw entry written along with the "on" value of a switch
    pub fn also_on(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Rule::Switch { also_on, .. } = &mut self.rule {
            also_on.insert(key.into(), value.into());
        }
        self
    }

    /// Override the fallback label of a choice, message or composite rule
    pub fn with_fallback(mut self, label: impl Into<String>) -> Self {
        match &mut self.rule {
            Rule::Choice { fallback, .. }
            | Rule::Message { fallback, .. }
            | Rule::Composite { fallback, .. } => *fallback = label.into(),
            _ => {}
        }
        self
    }

    /// Raw keys this descriptor reads
    pub fn keys(&self) -> Vec<&str> {
        self.rule.keys()
    }

    /// Value domain of this capability
    pub fn domain(&self) -> Domain {
        match &self.rule {
            Rule::Switch { .. } => Domain::Boolean,
            Rule::Choice { options, .. } => Domain::Choice {
                labels: options.iter().map(|o| o.label.clone()).collect(),
            },
            Rule::Composite { rows, .. } => {
                let mut labels: Vec<String> = Vec::new();
                for row in rows {
                    if !labels.contains(&row.label) {
                        labels.push(row.label.clone());
                    }
                }
                Domain::Choice { labels }
            }
            Rule::Scaled { .. } => self.range.map(Domain::Range).unwrap_or(Domain::Opaque),
            Rule::Bits { width, .. } => Domain::Range(self.range.unwrap_or_else(|| {
                ValueRange::new(0.0, ((1u64 << u32::from((*width).min(63))) - 1) as f64)
            })),
            Rule::Message { .. } | Rule::Filter { .. } => Domain::Opaque,
        }
    }
}

/// Composite row helper: `row(&[Some(json!(1)), None], "pm2.5")`
pub fn row(values: &[Option<Value>], label: &str) -> CompositeRow {
    CompositeRow {
        values: values.to_vec(),
        label: label.to_string(),
    }
}
