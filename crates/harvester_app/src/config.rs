//! Harvest configuration read from a RON file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use engine_logging::engine_warn;
use harvester_core::{
    ApiVersion, ConfigurationError, ObjectCategory, ProcessingDefaults, ValidatedUrl,
};
use harvester_engine::{
    Credentials, FetchSettings, ResourceFetchSettings, TolerancePolicy, TranslationConfig,
};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::platform::logging::LogDestination;

pub const DEFAULT_CONFIG_PATH: &str = "./harvester.ron";

/// Transform template per translated item kind. Kinds without one are stored raw only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformPaths {
    pub object: Option<PathBuf>,
    pub relationship: Option<PathBuf>,
    pub group: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub api_url: String,
    /// `"4.9"`, `"v5.5"`... Read from the server when unset.
    pub api_version: Option<String>,
    pub use_affected_since: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_interval_ms: u64,
    pub max_retries: u32,
    pub request_timeout_secs: u64,

    pub full_detail: bool,
    /// Overrides the per-detail page size defaults.
    pub per_page: Option<i32>,
    pub process_all_pages: bool,
    /// Singular or plural names; empty harvests every category.
    pub categories: Vec<String>,
    /// Restrict object queries to members of these groups.
    pub groups: Vec<u32>,
    pub explicit_members_only: bool,
    pub approved_only: bool,
    pub harvest_relationships: bool,
    pub relationship_types: Vec<u32>,
    pub harvest_groups: bool,
    /// Record the explicit user members of every harvested group.
    pub harvest_group_members: bool,
    pub harvest_relationship_types: bool,
    pub fetch_photos: bool,

    pub output_dir: PathBuf,
    pub transforms: TransformPaths,
    pub tolerate_io_errors: bool,
    pub tolerate_transform_errors: bool,
    pub ignore_file_not_found: bool,
    pub use_full_utf8: bool,
    pub parameters: BTreeMap<String, String>,
    /// Defaults to the number of cores.
    pub translation_workers: Option<usize>,
    pub photo_workers: usize,

    pub rewrite_mismatched_urls: bool,
    /// Ignore the saved run state and harvest everything.
    pub force_full: bool,
    pub log_destination: LogDestination,
    pub log_file: PathBuf,
    pub verbose: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let tolerance = TolerancePolicy::default();
        let fetch = FetchSettings::default();
        Self {
            api_url: String::new(),
            api_version: None,
            use_affected_since: false,
            username: None,
            password: None,
            request_interval_ms: fetch.min_interval.as_millis() as u64,
            max_retries: fetch.max_retries,
            request_timeout_secs: fetch.request_timeout.as_secs(),
            full_detail: true,
            per_page: None,
            process_all_pages: true,
            categories: Vec::new(),
            groups: Vec::new(),
            explicit_members_only: false,
            approved_only: false,
            harvest_relationships: true,
            relationship_types: Vec::new(),
            harvest_groups: true,
            harvest_group_members: true,
            harvest_relationship_types: false,
            fetch_photos: false,
            output_dir: PathBuf::from("./output"),
            transforms: TransformPaths::default(),
            tolerate_io_errors: tolerance.tolerate_io_errors,
            tolerate_transform_errors: tolerance.tolerate_transform_errors,
            ignore_file_not_found: tolerance.ignore_file_not_found,
            use_full_utf8: true,
            parameters: BTreeMap::new(),
            translation_workers: None,
            photo_workers: ResourceFetchSettings::default().workers,
            rewrite_mismatched_urls: false,
            force_full: false,
            log_destination: LogDestination::Both,
            log_file: PathBuf::from("./harvester.log"),
            verbose: false,
        }
    }
}

impl HarvestConfig {
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    pub fn api_version(&self) -> Result<Option<ApiVersion>, ConfigurationError> {
        self.api_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ApiVersion::parse)
            .transpose()
    }

    pub fn categories(&self) -> Result<Vec<ObjectCategory>, ConfigurationError> {
        if self.categories.is_empty() {
            return Ok(ObjectCategory::ALL.to_vec());
        }
        self.categories.iter().map(|name| name.parse()).collect()
    }

    /// Credentials are only kept for a secure base URL, and a secure base URL
    /// requires them.
    pub fn fetch_settings(&self, base: &ValidatedUrl) -> Result<FetchSettings, ConfigurationError> {
        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let credentials = match credentials {
            Some(_) if !base.is_secure() => {
                engine_warn!(
                    "Credentials are ignored for insecure API URL {}",
                    base.as_str()
                );
                None
            }
            None if base.is_secure() => {
                return Err(ConfigurationError::MissingCredentials(base.as_str().to_string()))
            }
            other => other,
        };
        Ok(FetchSettings {
            credentials,
            min_interval: Duration::from_millis(self.request_interval_ms),
            max_retries: self.max_retries,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..FetchSettings::default()
        })
    }

    pub fn processing_defaults(&self) -> ProcessingDefaults {
        let defaults = ProcessingDefaults::default();
        ProcessingDefaults {
            process_all_pages: self.process_all_pages,
            per_page_full: self.per_page.unwrap_or(defaults.per_page_full),
            per_page_ref: self.per_page.unwrap_or(defaults.per_page_ref),
        }
    }

    pub fn tolerance(&self) -> TolerancePolicy {
        TolerancePolicy {
            tolerate_io_errors: self.tolerate_io_errors,
            tolerate_transform_errors: self.tolerate_transform_errors,
            ignore_file_not_found: self.ignore_file_not_found,
        }
    }

    pub fn translation_config(&self) -> TranslationConfig {
        let defaults = TranslationConfig::default();
        TranslationConfig {
            workers: self.translation_workers.unwrap_or(defaults.workers),
            policy: self.tolerance(),
            use_full_utf8: self.use_full_utf8,
            parameters: self.parameters.clone(),
        }
    }

    pub fn resource_settings(&self) -> ResourceFetchSettings {
        ResourceFetchSettings {
            workers: self.photo_workers,
            max_retries: self.max_retries,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

pub fn load(path: &Path) -> anyhow::Result<HarvestConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration {}", path.display()))?;
    let config = HarvestConfig::from_ron(&text)
        .with_context(|| format!("cannot parse configuration {}", path.display()))?;
    if config.api_url.trim().is_empty() {
        anyhow::bail!("configuration {} has no api_url", path.display());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_take_defaults() {
        let config = HarvestConfig::from_ron(
            r#"(
                api_url: "https://elements.example.org:8092/secure-api/v4.9",
                api_version: Some("v4.9"),
                username: Some("harvester"),
                password: Some("secret"),
                categories: ["users", "grant"],
                force_full: true,
            )"#,
        )
        .unwrap();

        assert_eq!(config.api_version().unwrap(), Some(ApiVersion::V4_9));
        assert_eq!(
            config.categories().unwrap(),
            vec![ObjectCategory::User, ObjectCategory::Grant]
        );
        assert!(config.force_full);
        assert!(config.full_detail);
        assert_eq!(config.request_interval_ms, 250);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.tolerance(), TolerancePolicy::default());
        assert_eq!(config.log_destination, LogDestination::Both);
    }

    #[test]
    fn empty_category_list_means_all() {
        let config = HarvestConfig::default();
        assert_eq!(config.categories().unwrap().len(), ObjectCategory::ALL.len());
        assert_eq!(config.api_version().unwrap(), None);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let config = HarvestConfig {
            api_version: Some("6.1".to_string()),
            categories: vec!["widgets".to_string()],
            ..HarvestConfig::default()
        };
        assert!(config.api_version().is_err());
        assert!(config.categories().is_err());
    }

    #[test]
    fn credentials_follow_the_scheme() {
        let config = HarvestConfig {
            username: Some("harvester".to_string()),
            password: Some("secret".to_string()),
            ..HarvestConfig::default()
        };
        let secure = ValidatedUrl::base("https://elements.example.org/secure-api").unwrap();
        let insecure = ValidatedUrl::base("http://elements.example.org/public-api").unwrap();

        assert!(config.fetch_settings(&secure).unwrap().credentials.is_some());
        assert!(config.fetch_settings(&insecure).unwrap().credentials.is_none());

        let anonymous = HarvestConfig::default();
        assert!(matches!(
            anonymous.fetch_settings(&secure),
            Err(ConfigurationError::MissingCredentials(_))
        ));
        assert!(anonymous.fetch_settings(&insecure).is_ok());
    }

    #[test]
    fn per_page_override_applies_to_both_detail_levels() {
        let config = HarvestConfig {
            per_page: Some(10),
            process_all_pages: false,
            ..HarvestConfig::default()
        };
        let defaults = config.processing_defaults();
        assert_eq!(defaults.per_page_full, 10);
        assert_eq!(defaults.per_page_ref, 10);
        assert!(!defaults.process_all_pages);
    }
}
