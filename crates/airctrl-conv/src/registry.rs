//! Capability registry: model id → profile resolution
//!
//! Lookup order is exact model id (or alias), then model family, then the
//! generic power + fan speed profile for the device's key vocabulary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use airctrl_core::{ModelError, RawStatus};
use serde::{Deserialize, Serialize};

use crate::builtin::{
    builtin_profiles, generic_profiles, DASHED_POWER_KEY, GENERIC_DASHED, GENERIC_LEGACY,
    GENERIC_NUMERIC, NUMERIC_POWER_KEY,
};
use crate::error::ConvResult;
use crate::profile::{family_of, ModelProfile};

/// How a model id was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Family,
    Generic,
}

/// Outcome of resolving a model id
#[derive(Debug, Clone)]
pub struct Resolution {
    pub profile: Arc<ModelProfile>,
    pub matched: MatchKind,
    /// Set when no profile matched; the generic profile is still usable
    pub unknown_model: Option<ModelError>,
}

/// Profile file layout
#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profiles: Vec<ModelProfile>,
}

/// Registry of model profiles, read-only once loaded
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    profiles: Vec<Arc<ModelProfile>>,
    /// Model id and aliases → index into `profiles`
    by_model: HashMap<String, usize>,
    /// Family → index of the first profile registered for it
    by_family: HashMap<String, usize>,
    generics: HashMap<&'static str, Arc<ModelProfile>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Registry with no model profiles, only the generic ones
    pub fn empty() -> Self {
        let generics = generic_profiles()
            .into_iter()
            .filter_map(|p| {
                let name = match p.model_id.as_str() {
                    GENERIC_LEGACY => GENERIC_LEGACY,
                    GENERIC_DASHED => GENERIC_DASHED,
                    GENERIC_NUMERIC => GENERIC_NUMERIC,
                    _ => return None,
                };
                Some((name, Arc::new(p)))
            })
            .collect();

        Self {
            profiles: Vec::new(),
            by_model: HashMap::new(),
            by_family: HashMap::new(),
            generics,
        }
    }

    /// Registry with the built-in profiles
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for profile in builtin_profiles() {
            registry.insert(profile);
        }
        registry
    }

    /// Load additional profiles from a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConvResult<usize> {
        let content = std::fs::read_to_string(path)?;
        self.load_yaml(&content)
    }

    /// Load additional profiles from a YAML string
    ///
    /// Profiles for an already registered model id replace the earlier one.
    pub fn load_yaml(&mut self, yaml: &str) -> ConvResult<usize> {
        let file: ProfileFile = serde_yaml::from_str(yaml)?;
        let count = file.profiles.len();
        for profile in file.profiles {
            self.register(profile)?;
        }
        Ok(count)
    }

    /// Built-in profiles plus those of a YAML string
    pub fn from_yaml(yaml: &str) -> ConvResult<Self> {
        let mut registry = Self::new();
        registry.load_yaml(yaml)?;
        Ok(registry)
    }

    /// Register a validated profile
    pub fn register(&mut self, profile: ModelProfile) -> ConvResult<()> {
        profile.validate()?;
        self.insert(profile);
        Ok(())
    }

    /// Add a profile, replacing the one with the same canonical model id
    ///
    /// A model id that was only an alias of another profile becomes a
    /// profile of its own; the other profile keeps its model id.
    fn insert(&mut self, profile: ModelProfile) {
        let existing = self
            .profiles
            .iter()
            .position(|p| p.model_id == profile.model_id);
        let index = match existing {
            Some(index) => {
                for alias in &self.profiles[index].aliases {
                    if self.by_model.get(alias) == Some(&index) {
                        self.by_model.remove(alias);
                    }
                }
                self.profiles[index] = Arc::new(profile);
                index
            }
            None => {
                self.profiles.push(Arc::new(profile));
                self.profiles.len() - 1
            }
        };

        let profile = Arc::clone(&self.profiles[index]);
        self.by_model.insert(profile.model_id.clone(), index);
        for alias in &profile.aliases {
            // Canonical ids are never shadowed by another profile's alias
            if self.profiles.iter().any(|p| &p.model_id == alias) {
                continue;
            }
            self.by_model.insert(alias.clone(), index);
        }
        self.by_family
            .entry(profile.family().to_string())
            .or_insert(index);
    }

    /// Exact lookup by model id or alias
    pub fn get(&self, model_id: &str) -> Option<Arc<ModelProfile>> {
        self.by_model
            .get(model_id.trim())
            .map(|&i| Arc::clone(&self.profiles[i]))
    }

    /// Resolve a model id with the legacy-vocabulary generic fallback
    pub fn resolve(&self, model_id: &str) -> Resolution {
        self.resolve_with_generic(model_id, GENERIC_LEGACY)
    }

    /// Resolve a model id, choosing the generic fallback by the key
    /// vocabulary of the device's raw status
    pub fn resolve_for(&self, model_id: &str, raw: &RawStatus) -> Resolution {
        let generic = if raw.contains_key(NUMERIC_POWER_KEY) {
            GENERIC_NUMERIC
        } else if raw.contains_key(DASHED_POWER_KEY) {
            GENERIC_DASHED
        } else {
            GENERIC_LEGACY
        };
        self.resolve_with_generic(model_id, generic)
    }

    fn resolve_with_generic(&self, model_id: &str, generic: &str) -> Resolution {
        let model_id = model_id.trim();

        if let Some(profile) = self.get(model_id) {
            return Resolution {
                profile,
                matched: MatchKind::Exact,
                unknown_model: None,
            };
        }

        let family = family_of(model_id);
        if !family.is_empty() {
            if let Some(&index) = self.by_family.get(family) {
                return Resolution {
                    profile: Arc::clone(&self.profiles[index]),
                    matched: MatchKind::Family,
                    unknown_model: None,
                };
            }
        }

        Resolution {
            profile: self.generic(generic),
            matched: MatchKind::Generic,
            unknown_model: Some(ModelError::UnknownModel(model_id.to_string())),
        }
    }

    fn generic(&self, name: &str) -> Arc<ModelProfile> {
        self.generics
            .get(name)
            .or_else(|| self.generics.get(GENERIC_LEGACY))
            .cloned()
            .unwrap_or_else(|| Arc::new(ModelProfile::new(GENERIC_LEGACY, Vec::new())))
    }

    /// All registered model profiles, in registration order
    pub fn profiles(&self) -> Vec<Arc<ModelProfile>> {
        self.profiles.clone()
    }

    /// The generic fallback profiles
    pub fn generic_profiles(&self) -> Vec<Arc<ModelProfile>> {
        let mut generics: Vec<_> = self.generics.values().cloned().collect();
        generics.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        generics
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
