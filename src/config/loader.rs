// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the global and
//! workspace locations.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

use super::types::HubConfigFile;

/// Workspace config files to search for (in order), relative to the repo.
pub const WORKSPACE_CONFIG_FILES: &[&str] = &[".hive/hub.yaml", ".hive/hub.yml", ".hive/hub.json"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".hive";

/// Global config file names to search for (in order).
pub const GLOBAL_CONFIG_FILES: &[&str] = &["config.yaml", "config.yml", "config.json"];

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Load global configuration from `~/.hive/config.yaml` or `config.json`.
pub fn load_global_config() -> Result<Option<HubConfigFile>, ConfigError> {
    match get_global_config_dir() {
        Some(dir) => load_first(&dir, GLOBAL_CONFIG_FILES),
        None => Ok(None),
    }
}

/// Load workspace configuration from the repository.
///
/// Searches for config files in the following order:
/// 1. .hive/hub.yaml
/// 2. .hive/hub.yml
/// 3. .hive/hub.json
pub fn load_workspace_config(repo_path: &Path) -> Result<Option<HubConfigFile>, ConfigError> {
    load_first(repo_path, WORKSPACE_CONFIG_FILES)
}

fn load_first(dir: &Path, candidates: &[&str]) -> Result<Option<HubConfigFile>, ConfigError> {
    for filename in candidates {
        let path = dir.join(filename);
        if path.exists() {
            debug!("Loading config from {}", path.display());
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<HubConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        "json" => serde_json::from_str(&content).map_err(ConfigError::from),
        other => Err(ConfigError::InvalidFormat(format!(
            "unsupported config extension '{}' ({})",
            other,
            path.display()
        ))),
    }
}

/// Save workspace configuration to `.hive/hub.yaml`.
pub fn save_workspace_config(
    repo_path: &Path,
    config: &HubConfigFile,
) -> Result<PathBuf, ConfigError> {
    let path = repo_path.join(WORKSPACE_CONFIG_FILES[0]);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_yaml::to_string(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}
