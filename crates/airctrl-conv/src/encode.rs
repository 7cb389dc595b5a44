//! Capability value → raw status patch

use airctrl_core::{Capability, CapabilityValue, ModelError, RawStatus};
use serde_json::{json, Value};

use crate::definition::{CapabilityDescriptor, Rule};
use crate::error::EncodeError;
use crate::profile::ModelProfile;
use crate::types::{raw_eq, ValueRange};

/// Encode a desired value into the raw entries to send
pub fn encode(
    capability: Capability,
    value: &CapabilityValue,
    profile: &ModelProfile,
) -> Result<RawStatus, EncodeError> {
    let descriptor =
        profile
            .descriptor(capability)
            .ok_or_else(|| ModelError::UnsupportedCapability {
                capability,
                model: profile.model_id.clone(),
            })?;
    if !descriptor.writable {
        return Err(ModelError::ReadOnly(capability));
    }
    encode_value(descriptor, value)
}

/// Encode a value with a single descriptor
pub fn encode_value(
    descriptor: &CapabilityDescriptor,
    value: &CapabilityValue,
) -> Result<RawStatus, EncodeError> {
    let capability = descriptor.capability;
    let out_of_domain = |reason: String| ModelError::out_of_domain(capability, value.clone(), reason);
    let mut patch = RawStatus::new();

    match &descriptor.rule {
        Rule::Switch {
            key,
            on,
            off,
            also_on,
        } => {
            let enabled = as_switch(value).ok_or_else(|| out_of_domain("expected on or off".into()))?;
            if enabled {
                patch.extend(also_on.iter().map(|(k, v)| (k.clone(), v.clone())));
                patch.insert(key.clone(), on.clone());
            } else {
                patch.insert(key.clone(), off.clone());
            }
        }

        Rule::Choice { key, options, .. } => {
            let wanted = choice_text(value).ok_or_else(|| out_of_domain("expected a label".into()))?;
            let option = options
                .iter()
                .find(|o| o.label.eq_ignore_ascii_case(&wanted))
                .or_else(|| options.iter().find(|o| raw_eq(&o.raw, &Value::String(wanted.clone()))))
                .ok_or_else(|| out_of_domain(format!("expected one of {}", descriptor.domain())))?;
            patch.insert(key.clone(), option.raw.clone());
        }

        Rule::Scaled { key, scale, offset } => {
            let physical = value
                .as_f64()
                .ok_or_else(|| out_of_domain("expected a number".into()))?;
            check_range(descriptor.range, physical).map_err(out_of_domain)?;
            if *scale == 0.0 {
                return Err(out_of_domain("descriptor has zero scale".into()));
            }
            patch.insert(key.clone(), number_value((physical - offset) / scale));
        }

        Rule::Bits { key, shift, width } => {
            let physical = value
                .as_f64()
                .ok_or_else(|| out_of_domain("expected a number".into()))?;
            let range = descriptor.range.unwrap_or_else(|| {
                ValueRange::new(0.0, ((1u64 << u32::from((*width).min(63))) - 1) as f64)
            });
            check_range(Some(range), physical).map_err(out_of_domain)?;
            if physical.fract() != 0.0 || physical < 0.0 {
                return Err(out_of_domain("expected a non-negative integer".into()));
            }
            let raw = (physical as u64).checked_shl(u32::from(*shift)).unwrap_or(0);
            patch.insert(key.clone(), json!(raw));
        }

        Rule::Composite { keys, rows, .. } => {
            let wanted = choice_text(value).ok_or_else(|| out_of_domain("expected a label".into()))?;
            let row = rows
                .iter()
                .find(|r| r.label.eq_ignore_ascii_case(&wanted))
                .ok_or_else(|| out_of_domain(format!("expected one of {}", descriptor.domain())))?;
            for (key, raw) in keys.iter().zip(&row.values) {
                if let Some(raw) = raw {
                    patch.insert(key.clone(), raw.clone());
                }
            }
        }

        Rule::Filter { remaining_key, .. } => {
            let hours = match value {
                CapabilityValue::Filter(life) => i64::from(life.remaining_hours),
                other => other
                    .as_f64()
                    .filter(|h| *h >= 0.0 && h.fract() == 0.0)
                    .map(|h| h as i64)
                    .ok_or_else(|| out_of_domain("expected whole hours".into()))?,
            };
            patch.insert(remaining_key.clone(), json!(hours));
        }

        Rule::Message { .. } => return Err(ModelError::ReadOnly(capability)),
    }

    Ok(patch)
}

/// Snap a target to the range step; current ± 1 is a one-step nudge
///
/// A request exactly one above or below the current target moves by a whole
/// step (plus/minus buttons in user interfaces); the nudged result is
/// clamped into the range. Absolute requests are only snapped, so values
/// outside the range still fail to encode.
pub fn step_target(range: &ValueRange, requested: f64, current: Option<f64>) -> f64 {
    let step = match range.step {
        Some(step) if step > 0.0 => step,
        _ => return requested,
    };

    match current {
        Some(current) if requested == current + 1.0 => {
            snap(current + step, range, step).clamp(range.min, range.max)
        }
        Some(current) if requested == current - 1.0 => {
            snap(current - step, range, step).clamp(range.min, range.max)
        }
        _ => snap(requested, range, step),
    }
}

fn snap(value: f64, range: &ValueRange, step: f64) -> f64 {
    range.min + ((value - range.min) / step).round() * step
}

fn check_range(range: Option<ValueRange>, value: f64) -> Result<(), String> {
    let Some(range) = range else {
        return Ok(());
    };
    if !range.contains(value) {
        return Err(format!("outside {}", range));
    }
    if !range.on_step(value) {
        return Err(format!("not on a step of {}", range));
    }
    Ok(())
}

fn as_switch(value: &CapabilityValue) -> Option<bool> {
    match value {
        CapabilityValue::Bool(b) => Some(*b),
        CapabilityValue::Integer(1) => Some(true),
        CapabilityValue::Integer(0) => Some(false),
        CapabilityValue::Text(s) => CapabilityValue::parse_loose(s).as_bool(),
        _ => None,
    }
}

fn choice_text(value: &CapabilityValue) -> Option<String> {
    match value {
        CapabilityValue::Text(s) => Some(s.trim().to_string()),
        CapabilityValue::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

fn number_value(value: f64) -> Value {
    let rounded = value.round();
    if (value - rounded).abs() < 1e-9 {
        json!(rounded as i64)
    } else {
        json!(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{builtin_profiles, generic_profiles};
    use crate::decode::decode;
    use pretty_assertions::assert_eq;

    fn profile(model: &str) -> ModelProfile {
        builtin_profiles()
            .into_iter()
            .chain(generic_profiles())
            .find(|p| p.model_id == model)
            .unwrap()
    }

    fn patch(entries: &[(&str, Value)]) -> RawStatus {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_encode_switch_and_choice() {
        let p = profile("AC2729/10");
        assert_eq!(
            encode(Capability::Power, &CapabilityValue::Bool(true), &p).unwrap(),
            patch(&[("pwr", json!("1"))])
        );
        assert_eq!(
            encode(Capability::Mode, &"Sleep".into(), &p).unwrap(),
            patch(&[("mode", json!("S"))])
        );
        // Raw value accepted in place of the label
        assert_eq!(
            encode(Capability::FanSpeed, &CapabilityValue::Integer(2), &p).unwrap(),
            patch(&[("om", json!("2"))])
        );
    }

    #[test]
    fn test_humidification_writes_power_and_function() {
        let p = profile("AC2729/10");
        assert_eq!(
            encode(Capability::Humidification, &CapabilityValue::Bool(true), &p).unwrap(),
            patch(&[("func", json!("PH")), ("pwr", json!("1"))])
        );
        assert_eq!(
            encode(Capability::Humidification, &CapabilityValue::Bool(false), &p).unwrap(),
            patch(&[("func", json!("P"))])
        );
    }

    #[test]
    fn test_encode_errors() {
        let generic = profile("generic");
        assert!(matches!(
            encode(Capability::TargetHumidity, &CapabilityValue::Integer(50), &generic),
            Err(EncodeError::UnsupportedCapability { .. })
        ));

        let p = profile("AC2729/10");
        assert!(matches!(
            encode(Capability::TargetHumidity, &CapabilityValue::Integer(80), &p),
            Err(EncodeError::OutOfDomain { .. })
        ));
        assert!(matches!(
            encode(Capability::TargetHumidity, &CapabilityValue::Integer(55), &p),
            Err(EncodeError::OutOfDomain { .. })
        ));
        assert!(matches!(
            encode(Capability::FanSpeed, &"warp 9".into(), &p),
            Err(EncodeError::OutOfDomain { .. })
        ));
        assert_eq!(
            encode(Capability::Pm25, &CapabilityValue::Integer(3), &p),
            Err(EncodeError::ReadOnly(Capability::Pm25))
        );
    }

    #[test]
    fn test_encode_numeric_vocabulary() {
        let p = profile("AC0850/31");
        assert_eq!(
            encode(Capability::PreferredIndex, &"pm2.5".into(), &p).unwrap(),
            patch(&[("D0312A", json!(1)), ("D0312B", json!(0))])
        );
        // Wildcard positions are left untouched
        assert_eq!(
            encode(Capability::PreferredIndex, &"humidity".into(), &p).unwrap(),
            patch(&[("D0312A", json!(2))])
        );
        assert_eq!(
            encode(Capability::Timer, &CapabilityValue::Integer(4), &p).unwrap(),
            patch(&[("D03110", json!(4))])
        );
        assert_eq!(
            encode(Capability::Power, &CapabilityValue::Bool(false), &p).unwrap(),
            patch(&[("D03102", json!(0))])
        );
    }

    #[test]
    fn test_encode_filter_reset() {
        let p = profile("AC2729/10");
        assert_eq!(
            encode(Capability::HepaFilter, &CapabilityValue::Integer(4800), &p).unwrap(),
            patch(&[("fltsts1", json!(4800))])
        );
    }

    #[test]
    fn test_encode_then_decode_recovers_value() {
        let cases: Vec<(&str, Capability, CapabilityValue)> = vec![
            ("AC2729/10", Capability::Power, CapabilityValue::Bool(false)),
            ("AC2729/10", Capability::Mode, "allergen".into()),
            ("AC2729/10", Capability::FanSpeed, "turbo".into()),
            ("AC2729/10", Capability::TargetHumidity, CapabilityValue::Integer(60)),
            ("AC2729/10", Capability::ChildLock, CapabilityValue::Bool(true)),
            ("AC2729/10", Capability::LightBrightness, CapabilityValue::Integer(75)),
            ("AC2729/10", Capability::Humidification, CapabilityValue::Bool(true)),
            ("AC0850/11", Capability::Mode, "turbo".into()),
            ("AC0850/11", Capability::Power, CapabilityValue::Bool(true)),
            ("AC0850/31", Capability::PreferredIndex, "gas".into()),
            ("AC0850/31", Capability::LightBrightness, "dim".into()),
            ("AC0850/31", Capability::Timer, CapabilityValue::Integer(8)),
            ("AC3737/10", Capability::TargetHumidity, CapabilityValue::Integer(40)),
        ];

        for (model, capability, value) in cases {
            let p = profile(model);
            let raw = encode(capability, &value, &p).unwrap();
            let snapshot = decode(&raw, &p);
            assert_eq!(snapshot.get(capability), Some(&value), "{} {}", model, capability);
        }
    }

    #[test]
    fn test_step_target() {
        let range = ValueRange::new(40.0, 70.0).with_step(10.0);
        // Plus/minus nudges move a whole step
        assert_eq!(step_target(&range, 51.0, Some(50.0)), 60.0);
        assert_eq!(step_target(&range, 49.0, Some(50.0)), 40.0);
        // Nudges clamp at the bounds
        assert_eq!(step_target(&range, 71.0, Some(70.0)), 70.0);
        assert_eq!(step_target(&range, 39.0, Some(40.0)), 40.0);
        // Absolute requests snap to the nearest step
        assert_eq!(step_target(&range, 54.0, Some(40.0)), 50.0);
        assert_eq!(step_target(&range, 56.0, None), 60.0);
        // Out-of-range requests stay out of range
        assert_eq!(step_target(&range, 90.0, None), 90.0);
    }
}
