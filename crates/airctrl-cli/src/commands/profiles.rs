//! Profiles command - inspect the capability registry

use airctrl_conv::{CapabilityRegistry, MatchKind, ModelProfile, Rule};
use anyhow::Result;

use crate::output::{DescriptorRow, OutputContext, OutputFormat, ProfileRow};

/// List known profiles, or the descriptors of the profile a model resolves to
pub fn profiles(
    registry: &CapabilityRegistry,
    model: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    match model {
        None => {
            let rows: Vec<ProfileRow> = registry
                .profiles()
                .iter()
                .chain(registry.generic_profiles().iter())
                .map(|p| profile_row(p))
                .collect();
            ctx.print(&rows);
        }
        Some(model) => {
            let resolution = registry.resolve(model);
            let profile = &resolution.profile;
            match resolution.matched {
                MatchKind::Exact => {}
                MatchKind::Family => {
                    ctx.info(&format!("{} matched family profile {}", model, profile.model_id))
                }
                MatchKind::Generic => ctx.warn(&format!(
                    "{} is not a known model, falling back to {}",
                    model, profile.model_id
                )),
            }

            if ctx.format == OutputFormat::Json {
                ctx.print_json(profile.as_ref());
            } else {
                ctx.print(&descriptor_rows(profile));
            }
        }
    }
    Ok(())
}

fn profile_row(profile: &ModelProfile) -> ProfileRow {
    ProfileRow {
        model: profile.model_id.clone(),
        family: profile.family().to_string(),
        aliases: profile.aliases.join(", "),
        capabilities: profile.capabilities.len(),
        description: profile.description.clone().unwrap_or_default(),
    }
}

fn descriptor_rows(profile: &ModelProfile) -> Vec<DescriptorRow> {
    profile
        .capabilities
        .iter()
        .map(|d| DescriptorRow {
            capability: d.capability.to_string(),
            rule: rule_name(&d.rule).to_string(),
            keys: d.keys().join(", "),
            domain: d.domain().to_string(),
            unit: d.unit.clone().unwrap_or_default(),
            writable: if d.writable { "yes" } else { "no" }.to_string(),
        })
        .collect()
}

fn rule_name(rule: &Rule) -> &'static str {
    match rule {
        Rule::Switch { .. } => "switch",
        Rule::Choice { .. } => "choice",
        Rule::Scaled { .. } => "scaled",
        Rule::Bits { .. } => "bits",
        Rule::Message { .. } => "message",
        Rule::Composite { .. } => "composite",
        Rule::Filter { .. } => "filter",
    }
}
