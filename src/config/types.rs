// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`HubConfigFile`] is what a YAML or JSON file may contain; every field is
//! optional. [`HubConfig`] is the resolved configuration the hub runs with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::SpawnSettings;
use crate::error::ConfigError;

/// Default HTTP port of the hub.
pub const DEFAULT_PORT: u16 = 8080;

/// First port handed to agents.
pub const DEFAULT_BASE_PORT: u16 = 3284;

/// State file location, relative to the repository.
pub const STATE_FILE: &str = ".hive/hub-state.json";

/// Hub configuration as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Where agent worktrees are created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktrees_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,

    /// Run agents inside the `srt` sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<bool>,

    /// URL agents use to reach the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_secs: Option<u64>,

    /// Seconds between liveness sweeps. 0 disables the sweeper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_interval_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Fully resolved hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubConfig {
    pub port: u16,
    pub worktrees_dir: Option<PathBuf>,
    pub base_port: u16,
    /// Repository the agents work on. Required.
    pub repo_path: PathBuf,
    pub sandbox: bool,
    pub hub_url: Option<String>,
    pub ready_timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub liveness_interval_secs: u64,
    pub state_file: Option<PathBuf>,
}

impl HubConfig {
    /// Defaults for a repository.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            port: DEFAULT_PORT,
            worktrees_dir: None,
            base_port: DEFAULT_BASE_PORT,
            repo_path: repo_path.into(),
            sandbox: true,
            hub_url: None,
            ready_timeout_secs: 60,
            stop_grace_secs: 5,
            liveness_interval_secs: 15,
            state_file: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_worktrees_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worktrees_dir = Some(dir.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Overlay the fields a config file sets.
    pub fn apply(&mut self, file: &HubConfigFile) {
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(dir) = &file.worktrees_dir {
            self.worktrees_dir = Some(dir.clone());
        }
        if let Some(base) = file.base_port {
            self.base_port = base;
        }
        if let Some(sandbox) = file.sandbox {
            self.sandbox = sandbox;
        }
        if let Some(url) = &file.hub_url {
            self.hub_url = Some(url.clone());
        }
        if let Some(secs) = file.ready_timeout_secs {
            self.ready_timeout_secs = secs;
        }
        if let Some(secs) = file.stop_grace_secs {
            self.stop_grace_secs = secs;
        }
        if let Some(secs) = file.liveness_interval_secs {
            self.liveness_interval_secs = secs;
        }
        if let Some(path) = &file.state_file {
            self.state_file = Some(path.clone());
        }
    }

    /// URL agents use to reach the hub.
    pub fn hub_url(&self) -> String {
        self.hub_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    /// Where the agent snapshot is stored.
    pub fn state_path(&self) -> PathBuf {
        match &self.state_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.repo_path.join(path),
            None => self.repo_path.join(STATE_FILE),
        }
    }

    /// Worktree directory, defaulting to `~/hive-worktrees`.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.worktrees_dir
            .clone()
            .unwrap_or_else(crate::worktree::default_work_dir)
    }

    pub fn liveness_interval(&self) -> Option<Duration> {
        (self.liveness_interval_secs > 0).then(|| Duration::from_secs(self.liveness_interval_secs))
    }

    pub fn spawn_settings(&self) -> SpawnSettings {
        SpawnSettings {
            base_port: self.base_port,
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            hub_url: self.hub_url(),
            sandbox: self.sandbox,
            ..Default::default()
        }
    }

    /// Reject configurations the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("repo_path".to_string()));
        }
        if self.base_port == 0 {
            return Err(ConfigError::invalid("base_port", "must be greater than 0"));
        }
        if self.ready_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "ready_timeout_secs",
                "must be greater than 0",
            ));
        }
        if let Some(url) = &self.hub_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid("hub_url", "must be an http(s) URL"));
            }
        }
        Ok(())
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::new("/repo");
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_port, 3284);
        assert!(config.sandbox);
        assert_eq!(config.hub_url(), "http://localhost:8080");
        assert_eq!(config.state_path(), PathBuf::from("/repo/.hive/hub-state.json"));
        assert_eq!(config.liveness_interval(), Some(Duration::from_secs(15)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_spawn_settings() {
        let config = HubConfig::new("/repo").with_port(9000).with_sandbox(false);
        let settings = config.spawn_settings();
        assert_eq!(settings.hub_url, "http://localhost:9000");
        assert_eq!(settings.base_port, 3284);
        assert_eq!(settings.port_span, 100);
        assert_eq!(settings.ready_timeout, Duration::from_secs(60));
        assert!(!settings.sandbox);
    }

    #[test]
    fn test_relative_state_file() {
        let mut config = HubConfig::new("/repo");
        config.state_file = Some(PathBuf::from("state/hub.json"));
        assert_eq!(config.state_path(), PathBuf::from("/repo/state/hub.json"));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            HubConfig::new("").validate(),
            Err(ConfigError::MissingField(_))
        ));

        let mut config = HubConfig::new("/repo");
        config.hub_url = Some("localhost:8080".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "hub_url"
        ));

        let mut config = HubConfig::new("/repo");
        config.liveness_interval_secs = 0;
        assert!(config.liveness_interval().is_none());
        config.ready_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_partial_file() {
        let file: HubConfigFile = serde_yaml::from_str("port: 9090\nsandbox: false\n").unwrap();
        let mut config = HubConfig::new("/repo");
        config.apply(&file);
        assert_eq!(config.port, 9090);
        assert!(!config.sandbox);
        assert_eq!(config.base_port, 3284);
    }
}
