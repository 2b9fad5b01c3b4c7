//! Ingest configuration
//!
//! Every setting resolves as: command-line argument → `SCANPORT_*` environment
//! variable → TOML config file → compiled default.

use scanport_common::config::{default_data_folder, resolve_setting};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::rate_limit::RateLimitSettings;

/// Configuration record passed to every ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    pub env_name: String,

    /// Holds pseudo-intensity CSVs and calibration files
    pub config_container: String,
    /// Publish target for scan binaries, diffraction DBs, images and job logs
    pub datasets_container: String,
    /// User customisation files
    pub overlay_container: String,
    /// Manual upload area
    pub uploads_container: String,
    /// Raw bundle archive
    pub archive_container: String,

    pub archive_root: String,
    pub images_root: String,
    pub datasets_root: String,
    pub overlay_root: String,
    pub uploads_root: String,
    pub config_root: String,
    pub job_log_root: String,

    /// Suffix of `StandardPseudoIntensities<version>.csv`
    pub pseudo_intensity_version: String,

    /// Leave the working tree on disk after the job ends
    pub keep_working_dir: bool,
    /// Parent directory for working trees (system temp dir when unset)
    pub working_dir_base: Option<PathBuf>,

    /// Creator recorded for automated imports when the converter supplies none
    pub default_creator_id: String,

    pub rate_limit: Option<RateLimitSettings>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let containers = default_data_folder().join("containers");
        let container = |name: &str| containers.join(name).to_string_lossy().into_owned();

        Self {
            env_name: "local".to_string(),
            config_container: container("config"),
            datasets_container: container("datasets"),
            overlay_container: container("overlays"),
            uploads_container: container("uploads"),
            archive_container: container("archive"),
            archive_root: "Archive".to_string(),
            images_root: "Images".to_string(),
            datasets_root: "Scans".to_string(),
            overlay_root: "dataset-addons".to_string(),
            uploads_root: "UploadedDatasets".to_string(),
            config_root: "DatasetConfig".to_string(),
            job_log_root: "Import-Logs".to_string(),
            pseudo_intensity_version: String::new(),
            keep_working_dir: false,
            working_dir_base: None,
            default_creator_id: String::new(),
            rate_limit: None,
        }
    }
}

/// Values given on the command line (highest priority)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub env_name: Option<String>,
    pub config_container: Option<String>,
    pub datasets_container: Option<String>,
    pub overlay_container: Option<String>,
    pub uploads_container: Option<String>,
    pub archive_container: Option<String>,
    pub working_dir_base: Option<String>,
    pub keep_working_dir: bool,
}

impl IngestConfig {
    /// Resolve the full configuration from overrides, environment and TOML
    pub fn resolve(overrides: &ConfigOverrides, toml: Option<&toml::Value>) -> Self {
        let defaults = Self::default();
        let get = |cli: Option<&String>, env: &str, key: &str, default: &str| {
            resolve_setting(cli.map(|s| s.as_str()), env, toml, key, default)
        };

        let working_dir_base = get(
            overrides.working_dir_base.as_ref(),
            "SCANPORT_WORKING_DIR",
            "working_dir",
            "",
        );
        let keep = get(None, "SCANPORT_KEEP_WORKING_DIR", "keep_working_dir", "false");

        Self {
            env_name: get(overrides.env_name.as_ref(), "SCANPORT_ENV", "env_name", &defaults.env_name),
            config_container: get(
                overrides.config_container.as_ref(),
                "SCANPORT_CONFIG_CONTAINER",
                "containers.config",
                &defaults.config_container,
            ),
            datasets_container: get(
                overrides.datasets_container.as_ref(),
                "SCANPORT_DATASETS_CONTAINER",
                "containers.datasets",
                &defaults.datasets_container,
            ),
            overlay_container: get(
                overrides.overlay_container.as_ref(),
                "SCANPORT_OVERLAY_CONTAINER",
                "containers.overlay",
                &defaults.overlay_container,
            ),
            uploads_container: get(
                overrides.uploads_container.as_ref(),
                "SCANPORT_UPLOADS_CONTAINER",
                "containers.uploads",
                &defaults.uploads_container,
            ),
            archive_container: get(
                overrides.archive_container.as_ref(),
                "SCANPORT_ARCHIVE_CONTAINER",
                "containers.archive",
                &defaults.archive_container,
            ),
            archive_root: get(None, "SCANPORT_ARCHIVE_ROOT", "roots.archive", &defaults.archive_root),
            images_root: get(None, "SCANPORT_IMAGES_ROOT", "roots.images", &defaults.images_root),
            datasets_root: get(None, "SCANPORT_DATASETS_ROOT", "roots.datasets", &defaults.datasets_root),
            overlay_root: get(None, "SCANPORT_OVERLAY_ROOT", "roots.overlay", &defaults.overlay_root),
            uploads_root: get(None, "SCANPORT_UPLOADS_ROOT", "roots.uploads", &defaults.uploads_root),
            config_root: get(None, "SCANPORT_CONFIG_ROOT", "roots.config", &defaults.config_root),
            job_log_root: get(None, "SCANPORT_JOB_LOG_ROOT", "roots.job_log", &defaults.job_log_root),
            pseudo_intensity_version: get(
                None,
                "SCANPORT_PSEUDO_INTENSITY_VERSION",
                "pseudo_intensity_version",
                "",
            ),
            keep_working_dir: overrides.keep_working_dir || parse_bool(&keep),
            working_dir_base: if working_dir_base.is_empty() {
                None
            } else {
                Some(PathBuf::from(working_dir_base))
            },
            default_creator_id: get(None, "SCANPORT_DEFAULT_CREATOR", "default_creator_id", ""),
            rate_limit: resolve_rate_limit(toml),
        }
    }

    /// Key of the pseudo-intensity ranges CSV in the config container
    pub fn pseudo_intensity_key(&self) -> String {
        format!(
            "{}/StandardPseudoIntensities{}.csv",
            self.config_root, self.pseudo_intensity_version
        )
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Rate limiter settings are only active when all three values are present
fn resolve_rate_limit(toml: Option<&toml::Value>) -> Option<RateLimitSettings> {
    let soft = resolve_setting(None, "SCANPORT_RATE_LIMIT_SOFT", toml, "rate_limit.soft_limit", "");
    let hard = resolve_setting(None, "SCANPORT_RATE_LIMIT_HARD", toml, "rate_limit.hard_limit", "");
    let window = resolve_setting(None, "SCANPORT_RATE_LIMIT_WINDOW_SEC", toml, "rate_limit.window_sec", "");

    if soft.is_empty() && hard.is_empty() && window.is_empty() {
        return None;
    }

    match (soft.parse(), hard.parse(), window.parse()) {
        (Ok(soft_limit), Ok(hard_limit), Ok(window_sec)) => Some(RateLimitSettings {
            soft_limit,
            hard_limit,
            window_sec,
        }),
        _ => {
            warn!(soft = %soft, hard = %hard, window = %window, "Ignoring incomplete rate limit settings");
            None
        }
    }
}
