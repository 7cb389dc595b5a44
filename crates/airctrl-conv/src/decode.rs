//! Raw status → normalized snapshot
//!
//! Decoding is total: a well-formed raw status always produces a snapshot
//! holding exactly the profile's capabilities. Missing or unreadable raw
//! values decode to `Unavailable`; unrecognised enumerations decode to the
//! descriptor's fallback label.

use airctrl_core::{is_identity_key, CapabilityValue, FilterLife, NormalizedSnapshot, RawStatus};
use serde_json::Value;

use crate::definition::{CapabilityDescriptor, Rule};
use crate::profile::ModelProfile;
use crate::types::{raw_eq, raw_integer, raw_number};

/// Decode a raw status with a model profile
pub fn decode(raw: &RawStatus, profile: &ModelProfile) -> NormalizedSnapshot {
    let mut snapshot = NormalizedSnapshot::new(profile.model_id.clone());

    for descriptor in &profile.capabilities {
        snapshot
            .values
            .insert(descriptor.capability, decode_value(descriptor, raw));
    }

    let known = profile.raw_keys();
    snapshot.unmapped = raw
        .iter()
        .filter(|(key, _)| !known.contains(key.as_str()) && !is_identity_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    snapshot
}

/// Decode one capability
pub fn decode_value(descriptor: &CapabilityDescriptor, raw: &RawStatus) -> CapabilityValue {
    match &descriptor.rule {
        Rule::Switch { key, on, .. } => match raw.get(key) {
            Some(value) => CapabilityValue::Bool(raw_eq(value, on)),
            None => CapabilityValue::Unavailable,
        },

        Rule::Choice {
            key,
            options,
            fallback,
        } => match raw.get(key) {
            Some(value) => CapabilityValue::Text(
                options
                    .iter()
                    .find(|o| raw_eq(&o.raw, value))
                    .map(|o| o.label.clone())
                    .unwrap_or_else(|| fallback.clone()),
            ),
            None => CapabilityValue::Unavailable,
        },

        Rule::Scaled { key, scale, offset } => raw
            .get(key)
            .and_then(raw_number)
            .map(|n| scaled_value(n, *scale, *offset))
            .unwrap_or(CapabilityValue::Unavailable),

        Rule::Bits { key, shift, width } => raw
            .get(key)
            .and_then(raw_integer)
            .map(|n| CapabilityValue::Integer(extract_bits(n, *shift, *width)))
            .unwrap_or(CapabilityValue::Unavailable),

        Rule::Message {
            key,
            messages,
            fallback,
        } => match raw.get(key) {
            Some(value) => match raw_integer(value) {
                Some(code) => CapabilityValue::Text(
                    messages
                        .iter()
                        .find(|m| m.code == code)
                        .map(|m| m.text.clone())
                        .unwrap_or_else(|| format!("{} {}", fallback, code)),
                ),
                None => CapabilityValue::Text(format!("{} {}", fallback, display_raw(value))),
            },
            None => CapabilityValue::Unavailable,
        },

        Rule::Composite {
            keys,
            rows,
            fallback,
        } => {
            let values: Vec<Option<&Value>> = keys.iter().map(|k| raw.get(k)).collect();
            if values.iter().all(Option::is_none) {
                return CapabilityValue::Unavailable;
            }
            let label = rows
                .iter()
                .find(|row| {
                    row.values.len() == values.len()
                        && row.values.iter().zip(&values).all(|(want, got)| match want {
                            None => true,
                            Some(want) => got.is_some_and(|got| raw_eq(want, got)),
                        })
                })
                .map(|row| row.label.clone())
                .unwrap_or_else(|| fallback.clone());
            CapabilityValue::Text(label)
        }

        Rule::Filter {
            remaining_key,
            total_key,
        } => match raw.get(remaining_key).and_then(raw_integer) {
            Some(remaining) => CapabilityValue::Filter(FilterLife {
                remaining_hours: clamp_hours(remaining),
                total_hours: total_key
                    .as_ref()
                    .and_then(|k| raw.get(k))
                    .and_then(raw_integer)
                    .map(clamp_hours),
            }),
            None => CapabilityValue::Unavailable,
        },
    }
}

fn scaled_value(raw: f64, scale: f64, offset: f64) -> CapabilityValue {
    let value = round_to_scale(raw * scale + offset, scale);
    if value.fract() == 0.0 && scale.fract() == 0.0 && offset.fract() == 0.0 {
        CapabilityValue::Integer(value as i64)
    } else {
        CapabilityValue::Float(value)
    }
}

/// Round a scaled reading to the decimals its scale carries, so a
/// tenths-of-a-degree raw 215 at scale 0.1 reads 21.5 and not 21.500000001
fn round_to_scale(value: f64, scale: f64) -> f64 {
    let decimals = scale
        .abs()
        .to_string()
        .split_once('.')
        .map_or(0, |(_, fraction)| fraction.len().min(6));
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// `width` bits of `value` starting at bit `shift`
pub fn extract_bits(value: i64, shift: u8, width: u8) -> i64 {
    let value = value as u64;
    let mask = if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    let shifted = if shift >= 64 { 0 } else { value >> shift };
    (shifted & mask) as i64
}

fn clamp_hours(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

fn display_raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
