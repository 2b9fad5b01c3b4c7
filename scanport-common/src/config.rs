//! Configuration file discovery and setting resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Resolve one string setting following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. Compiled default (fallback)
pub fn resolve_setting(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: Option<&toml::Value>,
    config_file_key: &str,
    default: &str,
) -> String {
    // Priority 1: Command-line argument
    if let Some(value) = cli_arg {
        return value.to_string();
    }

    // Priority 2: Environment variable
    if let Ok(value) = std::env::var(env_var_name) {
        if !value.is_empty() {
            return value;
        }
    }

    // Priority 3: TOML config file
    if let Some(value) = config.and_then(|c| lookup_key(c, config_file_key)) {
        return value;
    }

    // Priority 4: compiled default
    default.to_string()
}

/// Dotted key lookup (`containers.archive`) returning string values only
fn lookup_key(config: &toml::Value, dotted: &str) -> Option<String> {
    let mut current = config;
    for part in dotted.split('.') {
        current = current.get(part)?;
    }
    current.as_str().map(|s| s.to_string())
}

/// Load the TOML config file, if one exists.
///
/// An explicit path must exist and parse. Without one the platform locations
/// are tried and a missing file is not an error.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<toml::Value>> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match find_config_file() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    let value = toml::from_str::<toml::Value>(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    tracing::info!(path = %path.display(), "Loaded configuration file");
    Ok(Some(value))
}

/// Platform config file path
fn find_config_file() -> Option<PathBuf> {
    // ~/.config/scanport/config.toml first
    let user_config = dirs::config_dir().map(|d| d.join("scanport").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    // then /etc/scanport/config.toml on Linux
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/scanport/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default data folder (holds the database when none is configured)
pub fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("scanport"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/scanport"))
    } else {
        dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .map(|d| d.join("scanport"))
            .unwrap_or_else(|| PathBuf::from("./scanport_data"))
    }
}
