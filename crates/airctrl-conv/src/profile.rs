//! Model profiles: the capability descriptors of one model or family

use std::collections::BTreeSet;

use airctrl_core::Capability;
use serde::{Deserialize, Serialize};

use crate::definition::CapabilityDescriptor;
use crate::error::{ConvError, ConvResult};

/// Capabilities of one device model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Canonical model id, e.g. "AC2729/10"
    pub model_id: String,

    /// Family the model belongs to, e.g. "AC2729"; derived from the model id
    /// when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Other exact model ids sharing this profile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    pub capabilities: Vec<CapabilityDescriptor>,
}

impl ModelProfile {
    pub fn new(model_id: impl Into<String>, capabilities: Vec<CapabilityDescriptor>) -> Self {
        Self {
            model_id: model_id.into(),
            family: None,
            description: None,
            aliases: Vec::new(),
            capabilities,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Family name: explicit, or the model id up to the first '/'
    pub fn family(&self) -> &str {
        self.family
            .as_deref()
            .unwrap_or_else(|| family_of(&self.model_id))
    }

    /// Descriptor for a capability, if the model supports it
    pub fn descriptor(&self, capability: Capability) -> Option<&CapabilityDescriptor> {
        self.capabilities
            .iter()
            .find(|d| d.capability == capability)
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.descriptor(capability).is_some()
    }

    pub fn capability_ids(&self) -> impl Iterator<Item = Capability> + '_ {
        self.capabilities.iter().map(|d| d.capability)
    }

    /// Every raw key read by some descriptor
    pub fn raw_keys(&self) -> BTreeSet<&str> {
        self.capabilities.iter().flat_map(|d| d.keys()).collect()
    }

    /// Check that every capability resolves to exactly one descriptor
    pub fn validate(&self) -> ConvResult<()> {
        let mut seen = BTreeSet::new();
        for descriptor in &self.capabilities {
            if !seen.insert(descriptor.capability) {
                return Err(ConvError::DuplicateCapability {
                    model: self.model_id.clone(),
                    capability: descriptor.capability,
                });
            }
            if let Some(range) = descriptor.range {
                if range.min > range.max || range.step.is_some_and(|s| s <= 0.0) {
                    return Err(ConvError::InvalidDefinition {
                        model: self.model_id.clone(),
                        reason: format!("{}: bad range {}", descriptor.capability, range),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Model family: the part of a model id before the first '/'
pub fn family_of(model_id: &str) -> &str {
    model_id.split('/').next().unwrap_or(model_id).trim()
}
