use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Snyk organization and integration an image is imported into.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetRule {
    #[serde(rename = "snyk_org_id")]
    pub org_id: String,
    #[serde(rename = "snyk_integration_id")]
    pub integration_id: String,
}

impl TargetRule {
    pub fn is_usable(&self) -> bool {
        !self.org_id.trim().is_empty() && !self.integration_id.trim().is_empty()
    }
}

/// Where the discriminator value of an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOn {
    /// Value of the named pod label.
    Label(String),
    /// Namespace of the pod.
    Namespace,
}

/// Routing of images to Snyk targets, loaded from the `snyk_org_mapping` config section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawMappingPolicy")]
pub struct MappingPolicy {
    pub map_on: MapOn,
    pub values: BTreeMap<String, TargetRule>,
    pub default_rule: Option<TargetRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawMapOn {
    Label,
    Namespace,
}

#[derive(Debug, Deserialize)]
struct RawMappingPolicy {
    map_on: RawMapOn,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    values: Option<BTreeMap<String, TargetRule>>,
    #[serde(default)]
    default: Option<TargetRule>,
}

impl TryFrom<RawMappingPolicy> for MappingPolicy {
    type Error = ConfigError;

    fn try_from(raw: RawMappingPolicy) -> Result<Self, Self::Error> {
        let map_on = match raw.map_on {
            RawMapOn::Namespace => MapOn::Namespace,
            RawMapOn::Label => match raw.label.map(|l| l.trim().to_string()) {
                Some(label) if !label.is_empty() => MapOn::Label(label),
                _ => return Err(ConfigError::MissingLabel),
            },
        };

        let policy = MappingPolicy {
            map_on,
            values: raw.values.unwrap_or_default(),
            default_rule: raw.default,
        };
        policy.warn_unusable_rules();
        Ok(policy)
    }
}

impl MappingPolicy {
    /// A policy that maps nothing, used when the config has no `snyk_org_mapping`.
    pub fn inert() -> Self {
        MappingPolicy {
            map_on: MapOn::Namespace,
            values: BTreeMap::new(),
            default_rule: None,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.values.is_empty() && self.default_rule.is_none()
    }

    /// Pod label the collector has to read, if any.
    pub fn label_key(&self) -> Option<&str> {
        match &self.map_on {
            MapOn::Label(label) => Some(label),
            MapOn::Namespace => None,
        }
    }

    fn warn_unusable_rules(&self) {
        for (value, rule) in &self.values {
            if !rule.is_usable() {
                warn!(
                    "Mapping rule for {:?} has an empty snyk_org_id or snyk_integration_id and will be ignored",
                    value
                );
            }
        }
        if let Some(rule) = &self.default_rule {
            if !rule.is_usable() {
                warn!(
                    "Default mapping rule has an empty snyk_org_id or snyk_integration_id and will be ignored"
                );
            }
        }
    }
}
