//! Built-in model profiles
//!
//! Three firmware vocabularies are in the field:
//!
//! - legacy short keys (`pwr`, `om`, `rhset`, ...)
//! - dashed keys (`D03-02`, `D03-12`, ...)
//! - numeric keys (`D03102`, `D0310C`, ...)
//!
//! Each has a generic profile exposing only power and fan speed, used for
//! models with no registered profile.

use airctrl_core::Capability;
use serde_json::json;

use crate::definition::{row, CapabilityDescriptor as D};
use crate::profile::ModelProfile;

pub const GENERIC_LEGACY: &str = "generic";
pub const GENERIC_DASHED: &str = "generic-dashed";
pub const GENERIC_NUMERIC: &str = "generic-numeric";

/// Power keys of the dashed and numeric vocabularies, used to pick a generic
/// profile; anything else is the legacy `pwr` vocabulary
pub(crate) const DASHED_POWER_KEY: &str = "D03-02";
pub(crate) const NUMERIC_POWER_KEY: &str = "D03102";

const ERROR_MESSAGES: &[(i64, &str)] = &[
    (0, "no error"),
    (32768, "water tank open"),
    (49153, "pre-filter must be cleaned"),
    (49154, "wick filter must be replaced"),
    (49155, "pre-filter must be cleaned"),
    (49408, "no water"),
];

const FAN_SPEEDS: &[(&str, &str)] = &[
    ("s", "silent"),
    ("1", "speed 1"),
    ("2", "speed 2"),
    ("3", "speed 3"),
    ("t", "turbo"),
];

// --- Legacy vocabulary ---

fn legacy_power() -> D {
    D::switch(Capability::Power, "pwr", "1", "0").writable()
}

fn legacy_fan_speed() -> D {
    D::choice(Capability::FanSpeed, "om", FAN_SPEEDS).writable()
}

/// Descriptors shared by every legacy purifier
fn legacy_purifier_base() -> Vec<D> {
    vec![
        legacy_power(),
        legacy_fan_speed(),
        D::number(Capability::Pm25, "pm25").with_unit("µg/m³"),
        D::number(Capability::IndoorAllergenIndex, "iaql"),
        D::switch(Capability::ChildLock, "cl", true, false).writable(),
        D::number(Capability::LightBrightness, "aqil")
            .with_range(0.0, 100.0, Some(25.0))
            .with_unit("%")
            .writable(),
        D::switch(Capability::DisplayBacklight, "uil", "1", "0").writable(),
        D::number(Capability::Timer, "dt")
            .with_range(0.0, 12.0, Some(1.0))
            .with_unit("h")
            .writable(),
        D::number(Capability::TimerRemaining, "dtrs").with_unit("min"),
        D::message(Capability::Error, "err", ERROR_MESSAGES),
        D::filter(Capability::PreFilter, "fltsts0", Some("flttotal0")).writable(),
        D::filter(Capability::HepaFilter, "fltsts1", Some("flttotal1")).writable(),
        D::filter(Capability::CarbonFilter, "fltsts2", Some("flttotal2")).writable(),
    ]
}

/// Humidifier descriptors of legacy combo devices
fn legacy_humidifier() -> Vec<D> {
    vec![
        D::choice(
            Capability::Function,
            "func",
            &[("P", "purification"), ("PH", "purification and humidification")],
        )
        .writable(),
        D::switch(Capability::Humidification, "func", "PH", "P")
            .also_on("pwr", "1")
            .writable(),
        D::number(Capability::TargetHumidity, "rhset")
            .with_range(40.0, 70.0, Some(10.0))
            .with_unit("%")
            .writable(),
        D::number(Capability::Humidity, "rh").with_unit("%"),
        D::number(Capability::Temperature, "temp").with_unit("°C"),
        D::number(Capability::WaterLevel, "wl").with_unit("%"),
        D::filter(Capability::WickFilter, "wicksts", Some("wicktotal")).writable(),
    ]
}

fn ac1214() -> ModelProfile {
    let mut caps = legacy_purifier_base();
    caps.push(
        D::choice(
            Capability::Mode,
            "mode",
            &[("P", "auto"), ("A", "allergen"), ("N", "night"), ("M", "manual")],
        )
        .writable(),
    );
    caps.push(
        D::choice(
            Capability::PreferredIndex,
            "ddp",
            &[("0", "indoor allergen index"), ("1", "pm2.5")],
        )
        .writable(),
    );
    ModelProfile::new("AC1214/10", caps)
        .with_description("Air purifier 1000 series")
        .with_aliases(&["AC1214/20"])
}

fn ac2729() -> ModelProfile {
    let mut caps = legacy_purifier_base();
    caps.extend(legacy_humidifier());
    caps.push(
        D::choice(
            Capability::Mode,
            "mode",
            &[("P", "auto"), ("A", "allergen"), ("S", "sleep"), ("M", "manual")],
        )
        .writable(),
    );
    caps.push(
        D::choice(
            Capability::PreferredIndex,
            "ddp",
            &[("0", "indoor allergen index"), ("1", "pm2.5"), ("2", "humidity")],
        )
        .writable(),
    );
    ModelProfile::new("AC2729/10", caps)
        .with_description("Air purifier and humidifier 2-in-1")
        .with_aliases(&["AC2729/50", "AC2729/51"])
}

fn ac2889() -> ModelProfile {
    let mut caps = legacy_purifier_base();
    caps.push(
        D::choice(
            Capability::Mode,
            "mode",
            &[
                ("P", "auto"),
                ("A", "allergen"),
                ("S", "sleep"),
                ("M", "manual"),
                ("B", "bacteria"),
            ],
        )
        .writable(),
    );
    caps.push(D::number(Capability::Tvoc, "tvoc"));
    caps.push(
        D::choice(
            Capability::PreferredIndex,
            "ddp",
            &[("0", "indoor allergen index"), ("1", "pm2.5"), ("3", "gas")],
        )
        .writable(),
    );
    ModelProfile::new("AC2889/10", caps).with_description("Air purifier 2000 series")
}

fn ac3829() -> ModelProfile {
    let mut caps = legacy_purifier_base();
    caps.extend(legacy_humidifier());
    caps.push(
        D::choice(
            Capability::Mode,
            "mode",
            &[("P", "auto"), ("A", "allergen"), ("S", "sleep"), ("M", "manual")],
        )
        .writable(),
    );
    caps.push(D::number(Capability::Gas, "gas"));
    caps.push(
        D::choice(
            Capability::PreferredIndex,
            "ddp",
            &[
                ("0", "indoor allergen index"),
                ("1", "pm2.5"),
                ("2", "humidity"),
                ("3", "gas"),
            ],
        )
        .writable(),
    );
    ModelProfile::new("AC3829/10", caps).with_description("Air purifier and humidifier 3000 series")
}

// --- Dashed vocabulary ---

fn dashed_power() -> D {
    D::switch(Capability::Power, "D03-02", "ON", "OFF").writable()
}

fn dashed_fan_speed() -> D {
    D::choice(
        Capability::FanSpeed,
        "D03-13",
        &[("1", "speed 1"), ("2", "speed 2"), ("3", "speed 3"), ("t", "turbo")],
    )
    .writable()
}

fn ac0850_11() -> ModelProfile {
    ModelProfile::new(
        "AC0850/11",
        vec![
            dashed_power(),
            D::choice(
                Capability::Mode,
                "D03-12",
                &[
                    ("Auto General", "auto"),
                    ("Gentle/Speed 1", "speed 1"),
                    ("Speed 2", "speed 2"),
                    ("Turbo", "turbo"),
                    ("Sleep", "sleep"),
                ],
            )
            .writable(),
            D::switch(Capability::ChildLock, "D03-03", true, false).writable(),
            D::number(Capability::LightBrightness, "D03-05")
                .with_range(0.0, 100.0, Some(50.0))
                .with_unit("%")
                .writable(),
            D::number(Capability::IndoorAllergenIndex, "D03-32"),
            D::number(Capability::Pm25, "D03-33").with_unit("µg/m³"),
            D::choice(
                Capability::PreferredIndex,
                "D03-42",
                &[("PM2.5", "pm2.5"), ("IAI", "indoor allergen index")],
            )
            .writable(),
            D::filter(Capability::HepaFilter, "D05-14", Some("D05-08")).writable(),
        ],
    )
    .with_description("Air purifier 800 series (dashed keys)")
    .with_aliases(&["AC0850/41", "AC0850/70"])
}

// --- Numeric vocabulary ---

fn numeric_power() -> D {
    D::switch(Capability::Power, "D03102", 1, 0).writable()
}

fn numeric_fan_speed() -> D {
    D::choice(
        Capability::FanSpeed,
        "D0310D",
        &[(1, "speed 1"), (2, "speed 2"), (3, "speed 3"), (18, "turbo")],
    )
    .writable()
}

fn numeric_purifier_base() -> Vec<D> {
    vec![
        numeric_power(),
        numeric_fan_speed(),
        D::choice(
            Capability::Mode,
            "D0310C",
            &[(0, "auto"), (1, "speed 1"), (2, "speed 2"), (17, "sleep"), (18, "turbo")],
        )
        .writable(),
        D::switch(Capability::ChildLock, "D03103", 1, 0).writable(),
        D::choice(
            Capability::LightBrightness,
            "D03105",
            &[(0, "off"), (115, "dim"), (123, "bright")],
        )
        .writable(),
        D::number(Capability::Pm25, "D03221").with_unit("µg/m³"),
        D::number(Capability::IndoorAllergenIndex, "D03120"),
        D::scaled(Capability::Temperature, "D03224", 0.1, 0.0).with_unit("°C"),
        D::composite(
            Capability::PreferredIndex,
            &["D0312A", "D0312B"],
            vec![
                row(&[Some(json!(0)), None], "indoor allergen index"),
                row(&[Some(json!(1)), Some(json!(0))], "pm2.5"),
                row(&[Some(json!(1)), Some(json!(1))], "gas"),
                row(&[Some(json!(2)), None], "humidity"),
            ],
        )
        .writable(),
        // Packed timer word: low byte is the set time in hours, the next
        // 16 bits the remaining minutes
        D::bits(Capability::Timer, "D03110", 0, 8)
            .with_range(0.0, 12.0, Some(1.0))
            .with_unit("h")
            .writable(),
        D::bits(Capability::TimerRemaining, "D03110", 8, 16).with_unit("min"),
        D::message(Capability::Error, "D03240", ERROR_MESSAGES),
        D::filter(Capability::PreFilter, "D0520D", Some("D05207")).writable(),
        D::filter(Capability::HepaFilter, "D0540E", Some("D05408")).writable(),
    ]
}

fn ac0850_31() -> ModelProfile {
    ModelProfile::new("AC0850/31", numeric_purifier_base())
        .with_description("Air purifier 800i series (numeric keys)")
        .with_aliases(&["AC0950/10", "AC0951/10"])
}

fn ac3737() -> ModelProfile {
    let mut caps = numeric_purifier_base();
    caps.extend(vec![
        D::choice(
            Capability::Function,
            "D0312C",
            &[(0, "purification"), (1, "purification and humidification")],
        )
        .writable(),
        D::switch(Capability::Humidification, "D0312C", 1, 0)
            .also_on("D03102", 1)
            .writable(),
        D::number(Capability::TargetHumidity, "D03128")
            .with_range(40.0, 70.0, Some(10.0))
            .with_unit("%")
            .writable(),
        D::number(Capability::Humidity, "D03125").with_unit("%"),
    ]);
    ModelProfile::new("AC3737/10", caps).with_description("Air purifier and humidifier 3-in-1")
}

// --- Tables ---

/// Every built-in model profile
pub fn builtin_profiles() -> Vec<ModelProfile> {
    vec![
        ac1214(),
        ac2729(),
        ac2889(),
        ac3829(),
        ac0850_11(),
        ac0850_31(),
        ac3737(),
    ]
}

/// Generic power + fan speed profiles, one per vocabulary
pub fn generic_profiles() -> Vec<ModelProfile> {
    vec![
        ModelProfile::new(GENERIC_LEGACY, vec![legacy_power(), legacy_fan_speed()])
            .with_description("Unknown model, legacy keys"),
        ModelProfile::new(GENERIC_DASHED, vec![dashed_power(), dashed_fan_speed()])
            .with_description("Unknown model, dashed keys"),
        ModelProfile::new(GENERIC_NUMERIC, vec![numeric_power(), numeric_fan_speed()])
            .with_description("Unknown model, numeric keys"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_are_valid() {
        for profile in builtin_profiles().iter().chain(generic_profiles().iter()) {
            profile.validate().unwrap();
            assert!(profile.supports(Capability::Power), "{}", profile.model_id);
        }
    }

    #[test]
    fn test_generic_profiles_expose_power_and_speed_only() {
        for profile in generic_profiles() {
            assert_eq!(
                profile.capability_ids().collect::<Vec<_>>(),
                vec![Capability::Power, Capability::FanSpeed]
            );
        }
    }
}
