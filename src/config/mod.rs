// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for the hub.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.hive/config.yaml (or .yml / .json)
//! - Workspace config: <repo>/.hive/hub.yaml, .hive/hub.yml or .hive/hub.json
//! - CLI options: command-line arguments and `HIVE_*` environment variables
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    get_global_config_dir, load_config_file, load_global_config, load_workspace_config,
    save_workspace_config, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILES, WORKSPACE_CONFIG_FILES,
};

pub use merger::{merge_config, CliOptions};

pub use types::{HubConfig, HubConfigFile, DEFAULT_BASE_PORT, DEFAULT_PORT, STATE_FILE};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a repository.
pub fn load_config(repo_path: &Path, cli_options: CliOptions) -> Result<HubConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(repo_path)?;

    let config = merge_config(repo_path, global, workspace, cli_options);
    config.validate()?;
    Ok(config)
}
