use crate::error::ConfigError;
use crate::filter::ExclusionFilter;
use crate::policy::MappingPolicy;
use crate::targets::TargetNameStyle;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use std::{env, fs};
use tracing::{info, warn};

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)}").expect("env var pattern is valid"));

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub image_filter_regex_exclude: Option<String>,
    #[serde(default)]
    pub snyk_org_mapping: Option<MappingPolicy>,
    #[serde(default = "default_targets_file_output_path")]
    pub targets_file_output_path: PathBuf,
    #[serde(default)]
    pub target_name_style: TargetNameStyle,
    #[serde(default)]
    pub collection: CollectionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    pub timeout_seconds: u64,
    pub page_size: u32,
    pub max_retries: u32,
    pub initial_backoff_millis: u64,
    pub tolerate_namespace_failures: bool,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        CollectionSettings {
            timeout_seconds: 300,
            page_size: 500,
            max_retries: 3,
            initial_backoff_millis: 500,
            tolerate_namespace_failures: false,
        }
    }
}

impl CollectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_millis)
    }
}

fn default_targets_file_output_path() -> PathBuf {
    PathBuf::from("imported-targets.json")
}

/// Config with everything that can fail at runtime already checked.
#[derive(Debug)]
pub struct Settings {
    pub namespaces: Option<Vec<String>>,
    pub exclusion_filter: ExclusionFilter,
    pub policy: MappingPolicy,
    pub targets_file_output_path: PathBuf,
    pub target_name_style: TargetNameStyle,
    pub collection: CollectionSettings,
}

impl Config {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let exclusion_filter = ExclusionFilter::new(self.image_filter_regex_exclude.as_deref())?;

        let policy = self.snyk_org_mapping.unwrap_or_else(|| {
            warn!("No snyk_org_mapping configured, no image will be mapped to a Snyk target");
            MappingPolicy::inert()
        });

        let namespaces = self.namespaces.map(dedup_namespaces).filter(|ns| !ns.is_empty());

        Ok(Settings {
            namespaces,
            exclusion_filter,
            policy,
            targets_file_output_path: self.targets_file_output_path,
            target_name_style: self.target_name_style,
            collection: self.collection,
        })
    }
}

fn dedup_namespaces(namespaces: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(namespaces.len());
    for namespace in namespaces {
        let namespace = namespace.trim().to_string();
        if !namespace.is_empty() && !unique.contains(&namespace) {
            unique.push(namespace);
        }
    }
    unique
}

enum Format {
    Json,
    Yaml,
}

fn detect_format(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("yaml") | Some("yml") => Ok(Format::Yaml),
        _ => Err(ConfigError::UnsupportedFormat),
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    info!("Loading config from file {}", path.display());
    let format = detect_format(path)?;

    let content = fs::read_to_string(path).map_err(ConfigError::Read)?;

    let expanded = expand_env_vars(&content)?;

    let config = match format {
        Format::Json => serde_json::from_str(&expanded)?,
        Format::Yaml => serde_yaml_ng::from_str(&expanded)?,
    };

    Ok(config)
}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    load_config(path)?.into_settings()
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming the first missing variable.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = None;

    let result = ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingEnvVar(var_name)),
        None => Ok(result.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MapOn;
    use std::env;

    fn write_config(extension: &str, content: &str) -> tempfile::NamedTempFile {
        let tmp_file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .expect("Failed to create temp file");
        fs::write(tmp_file.path(), content).expect("Failed to write to temp file");
        tmp_file
    }

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("SNYK_TEST_VAR", "value123");
        }
        let input = "This is a test: ${SNYK_TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("SNYK_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${SNYK_MISSING_VAR}";
        let err = expand_env_vars(input).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref name) if name == "SNYK_MISSING_VAR"));
    }

    #[test]
    fn test_expand_env_vars_multiple_vars() {
        unsafe {
            env::set_var("SNYK_VAR1", "foo");
            env::set_var("SNYK_VAR2", "bar");
        }
        let input = "${SNYK_VAR1} and ${SNYK_VAR2}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "foo and bar");
        unsafe {
            env::remove_var("SNYK_VAR1");
            env::remove_var("SNYK_VAR2");
        }
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_yaml_config_file() {
        let yaml_content = r#"
        namespaces:
          - payments
          - checkout
          - payments
        image_filter_regex_exclude: "^docker\\.io/library/"
        snyk_org_mapping:
          map_on: label
          label: team
          values:
            payments:
              snyk_org_id: O1
              snyk_integration_id: I1
          default:
            snyk_org_id: O0
            snyk_integration_id: I0
        targets_file_output_path: out/targets.json
        target_name_style: full_reference
        collection:
          timeout_seconds: 60
          tolerate_namespace_failures: true
        "#;
        let tmp_file = write_config(".yaml", yaml_content);

        let settings = load_settings(tmp_file.path()).expect("Should load config");

        assert_eq!(
            settings.namespaces,
            Some(vec!["payments".to_string(), "checkout".to_string()])
        );
        assert!(settings.exclusion_filter.is_excluded("docker.io/library/nginx:1"));
        assert_eq!(settings.policy.map_on, MapOn::Label("team".to_string()));
        assert_eq!(settings.targets_file_output_path, PathBuf::from("out/targets.json"));
        assert_eq!(settings.target_name_style, TargetNameStyle::FullReference);
        assert_eq!(settings.collection.timeout(), Duration::from_secs(60));
        assert_eq!(settings.collection.page_size, 500);
        assert!(settings.collection.tolerate_namespace_failures);
    }

    #[test]
    fn test_load_json_config_file_with_defaults() {
        let json_content = r#"{
            "snyk_org_mapping": {
                "map_on": "namespace",
                "values": {
                    "ns-a": {"snyk_org_id": "OA", "snyk_integration_id": "IA"}
                }
            }
        }"#;
        let tmp_file = write_config(".json", json_content);

        let settings = load_settings(tmp_file.path()).expect("Should load config");

        assert_eq!(settings.namespaces, None);
        assert!(!settings.exclusion_filter.is_excluded("docker.io/library/nginx:1"));
        assert_eq!(settings.policy.map_on, MapOn::Namespace);
        assert_eq!(
            settings.targets_file_output_path,
            PathBuf::from("imported-targets.json")
        );
        assert_eq!(settings.target_name_style, TargetNameStyle::PathSuffix);
        assert_eq!(settings.collection.max_retries, 3);
    }

    #[test]
    fn test_empty_namespace_list_means_all_namespaces() {
        let tmp_file = write_config(".yml", "namespaces: []\n");
        let settings = load_settings(tmp_file.path()).expect("Should load config");
        assert_eq!(settings.namespaces, None);
        assert!(settings.policy.is_inert());
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp_file = write_config(".toml", "namespaces = []\n");
        let err = load_config(tmp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        let tmp_file = write_config(".yaml", "namespaces: [unterminated\n");
        let err = load_config(tmp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_label_mapping_without_label_is_rejected() {
        let tmp_file = write_config(".yaml", "snyk_org_mapping:\n  map_on: label\n");
        let err = load_config(tmp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_invalid_exclusion_pattern_is_rejected() {
        let tmp_file = write_config(".yaml", "image_filter_regex_exclude: '[a-'\n");
        let err = load_settings(tmp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExcludePattern { .. }));
    }
}
