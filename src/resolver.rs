use crate::policy::{MapOn, MappingPolicy, TargetRule};
use crate::state::{ImageRecord, ResolvedTarget};
use tracing::debug;

/// Resolves a single image to its Snyk target.
///
/// The discriminator (label value or namespace) is looked up exactly in the policy values.
/// When nothing usable matches, or the image has no value for the mapping label, the
/// default rule applies if it is usable. `None` means the image stays unmapped.
pub fn resolve(record: &ImageRecord, policy: &MappingPolicy) -> Option<ResolvedTarget> {
    if policy.is_inert() {
        return None;
    }

    let discriminator = match &policy.map_on {
        MapOn::Label(_) => record.label_value.as_deref(),
        MapOn::Namespace => Some(record.namespace.as_str()),
    };

    let matched = discriminator
        .and_then(|value| policy.values.get(value))
        .filter(|rule| rule.is_usable());

    matched
        .or_else(|| policy.default_rule.as_ref().filter(|rule| rule.is_usable()))
        .map(|rule| to_resolved_target(record, rule))
}

/// Resolves all images in order, dropping the unmapped ones.
pub fn resolve_all(records: &[ImageRecord], policy: &MappingPolicy) -> Vec<ResolvedTarget> {
    records
        .iter()
        .filter_map(|record| {
            let resolved = resolve(record, policy);
            if resolved.is_none() {
                debug!(
                    "No Snyk target for image {} (namespace {}, label value {:?})",
                    record.image_reference, record.namespace, record.label_value
                );
            }
            resolved
        })
        .collect()
}

fn to_resolved_target(record: &ImageRecord, rule: &TargetRule) -> ResolvedTarget {
    ResolvedTarget {
        image_reference: record.image_reference.clone(),
        org_id: rule.org_id.clone(),
        integration_id: rule.integration_id.clone(),
    }
}
