// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{HubConfig, HubConfigFile};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub port: Option<u16>,
    pub base_port: Option<u16>,
    pub worktrees_dir: Option<PathBuf>,
    pub sandbox: Option<bool>,
    pub hub_url: Option<String>,
    pub state_file: Option<PathBuf>,
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config (.hive/hub.yaml)
/// 3. Global config (~/.hive/config.yaml)
/// 4. Default values
pub fn merge_config(
    repo_path: impl Into<PathBuf>,
    global: Option<HubConfigFile>,
    workspace: Option<HubConfigFile>,
    cli: CliOptions,
) -> HubConfig {
    let mut result = HubConfig::new(repo_path);

    if let Some(config) = global {
        result.apply(&config);
    }

    if let Some(config) = workspace {
        result.apply(&config);
    }

    if let Some(port) = cli.port {
        result.port = port;
    }
    if let Some(base) = cli.base_port {
        result.base_port = base;
    }
    if let Some(dir) = cli.worktrees_dir {
        result.worktrees_dir = Some(dir);
    }
    if let Some(sandbox) = cli.sandbox {
        result.sandbox = sandbox;
    }
    if let Some(url) = cli.hub_url {
        result.hub_url = Some(url);
    }
    if let Some(path) = cli.state_file {
        result.state_file = Some(path);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_defaults() {
        let config = merge_config("/repo", None, None, CliOptions::default());
        assert_eq!(config, HubConfig::new("/repo"));
    }

    #[test]
    fn test_merge_precedence() {
        let global = HubConfigFile {
            port: Some(1000),
            base_port: Some(5000),
            sandbox: Some(false),
            ..Default::default()
        };
        let workspace = HubConfigFile {
            port: Some(2000),
            stop_grace_secs: Some(1),
            ..Default::default()
        };
        let cli = CliOptions {
            port: Some(3000),
            ..Default::default()
        };

        let config = merge_config("/repo", Some(global), Some(workspace), cli);
        assert_eq!(config.port, 3000); // CLI wins
        assert_eq!(config.stop_grace_secs, 1); // workspace over default
        assert_eq!(config.base_port, 5000); // global over default
        assert!(!config.sandbox);
    }

    #[test]
    fn test_cli_sandbox_override() {
        let workspace = HubConfigFile {
            sandbox: Some(true),
            ..Default::default()
        };
        let cli = CliOptions {
            sandbox: Some(false),
            ..Default::default()
        };
        let config = merge_config("/repo", None, Some(workspace), cli);
        assert!(!config.sandbox);
    }
}
