//! Normalized capability vocabulary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One controllable or observable device attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Power,
    Mode,
    FanSpeed,
    Function,
    Humidification,
    TargetHumidity,
    Humidity,
    Temperature,
    Pm25,
    IndoorAllergenIndex,
    Gas,
    Tvoc,
    PreferredIndex,
    ChildLock,
    LightBrightness,
    DisplayBacklight,
    Timer,
    TimerRemaining,
    WaterLevel,
    Error,
    PreFilter,
    HepaFilter,
    CarbonFilter,
    WickFilter,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Capability; 24] = [
        Capability::Power,
        Capability::Mode,
        Capability::FanSpeed,
        Capability::Function,
        Capability::Humidification,
        Capability::TargetHumidity,
        Capability::Humidity,
        Capability::Temperature,
        Capability::Pm25,
        Capability::IndoorAllergenIndex,
        Capability::Gas,
        Capability::Tvoc,
        Capability::PreferredIndex,
        Capability::ChildLock,
        Capability::LightBrightness,
        Capability::DisplayBacklight,
        Capability::Timer,
        Capability::TimerRemaining,
        Capability::WaterLevel,
        Capability::Error,
        Capability::PreFilter,
        Capability::HepaFilter,
        Capability::CarbonFilter,
        Capability::WickFilter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Power => "power",
            Capability::Mode => "mode",
            Capability::FanSpeed => "fan_speed",
            Capability::Function => "function",
            Capability::Humidification => "humidification",
            Capability::TargetHumidity => "target_humidity",
            Capability::Humidity => "humidity",
            Capability::Temperature => "temperature",
            Capability::Pm25 => "pm25",
            Capability::IndoorAllergenIndex => "indoor_allergen_index",
            Capability::Gas => "gas",
            Capability::Tvoc => "tvoc",
            Capability::PreferredIndex => "preferred_index",
            Capability::ChildLock => "child_lock",
            Capability::LightBrightness => "light_brightness",
            Capability::DisplayBacklight => "display_backlight",
            Capability::Timer => "timer",
            Capability::TimerRemaining => "timer_remaining",
            Capability::WaterLevel => "water_level",
            Capability::Error => "error",
            Capability::PreFilter => "pre_filter",
            Capability::HepaFilter => "hepa_filter",
            Capability::CarbonFilter => "carbon_filter",
            Capability::WickFilter => "wick_filter",
        }
    }

    /// Whether this capability reports a consumable filter
    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            Capability::PreFilter
                | Capability::HepaFilter
                | Capability::CarbonFilter
                | Capability::WickFilter
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    /// Accepts snake_case or kebab-case names ("fan_speed", "fan-speed")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown capability: {}", s))
    }
}

/// Remaining and total lifetime of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterLife {
    /// Hours left before the filter must be cleaned or replaced
    pub remaining_hours: u32,
    /// Full lifetime in hours, when the device reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<u32>,
}

impl FilterLife {
    /// Remaining life as a percentage of the total (0-100)
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_hours.filter(|t| *t > 0)?;
        let pct = (u64::from(self.remaining_hours) * 100 / u64::from(total)).min(100);
        Some(pct as u8)
    }
}

impl fmt::Display for FilterLife {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.total_hours, self.percent()) {
            (Some(total), Some(pct)) => {
                write!(f, "{}h / {}h ({}%)", self.remaining_hours, total, pct)
            }
            _ => write!(f, "{}h", self.remaining_hours),
        }
    }
}

/// Typed value of a capability in a snapshot or a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Filter(FilterLife),
    /// The device did not report the capability's raw key(s)
    Unavailable,
}

impl CapabilityValue {
    /// Parse a user-supplied string: booleans, integers, floats, else text
    pub fn parse_loose(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" => return CapabilityValue::Bool(true),
            "false" | "off" | "no" => return CapabilityValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return CapabilityValue::Integer(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return CapabilityValue::Float(f);
        }
        CapabilityValue::Text(trimmed.to_string())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CapabilityValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of integer and float values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CapabilityValue::Integer(i) => Some(*i as f64),
            CapabilityValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CapabilityValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_filter(&self) -> Option<&FilterLife> {
        match self {
            CapabilityValue::Filter(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, CapabilityValue::Unavailable)
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityValue::Bool(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            CapabilityValue::Integer(i) => write!(f, "{}", i),
            CapabilityValue::Float(v) => write!(f, "{}", v),
            CapabilityValue::Text(s) => f.write_str(s),
            CapabilityValue::Filter(life) => match (life.total_hours, life.percent()) {
                (Some(total), Some(pct)) => {
                    write!(f, "{}h / {}h ({}%)", life.remaining_hours, total, pct)
                }
                _ => write!(f, "{}h", life.remaining_hours),
            },
            CapabilityValue::Unavailable => f.write_str("unavailable"),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        CapabilityValue::Bool(value)
    }
}

impl From<i64> for CapabilityValue {
    fn from(value: i64) -> Self {
        CapabilityValue::Integer(value)
    }
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        CapabilityValue::Text(value.to_string())
    }
}
