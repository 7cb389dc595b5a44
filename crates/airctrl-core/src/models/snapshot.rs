//! Raw status records and normalized snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Capability, CapabilityValue};

/// Raw key/value status as reported by a device
pub type RawStatus = BTreeMap<String, Value>;

/// Decoded, normalized view of a device's state at one poll
///
/// Contains exactly the capabilities of the device's model profile. Raw keys
/// the profile does not describe are kept in `unmapped` for diagnostics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedSnapshot {
    /// Model id of the profile used to decode this snapshot
    pub model_id: String,
    /// Capability values keyed by capability
    pub values: BTreeMap<Capability, CapabilityValue>,
    /// Raw entries not covered by any descriptor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unmapped: BTreeMap<String, Value>,
}

impl NormalizedSnapshot {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    /// Get a capability value (None when the profile lacks the capability)
    pub fn get(&self, capability: Capability) -> Option<&CapabilityValue> {
        self.values.get(&capability)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.values.contains_key(&capability)
    }

    /// Capabilities present in this snapshot
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.values.keys().copied()
    }

    /// Power state, when reported
    pub fn is_on(&self) -> Option<bool> {
        self.get(Capability::Power).and_then(CapabilityValue::as_bool)
    }
}
