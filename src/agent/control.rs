// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process control for agents.
//!
//! Each agent runs as `agentapi server --port P -- claude ...`. AgentAPI
//! exposes a small HTTP interface on that port:
//!
//! | Request          | Meaning                                          |
//! |------------------|--------------------------------------------------|
//! | `POST /message`  | send `{content, type: "user"}`                   |
//! | `GET /messages`  | `{messages: [{role, content, timestamp?}]}`      |
//! | `GET /status`    | `{status: "stable" | "running"}`                 |
//!
//! [`ProcessControl`] is the seam used by the agent manager; tests swap in
//! fakes, production uses [`AgentApiControl`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::liveness::terminate_gracefully;
use super::types::{AgentHealth, LaunchSpec, Message};
use super::workspace;

/// HTTP timeout for calls to an agent.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for process control operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Agent returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown agent status: {0}")]
    UnknownStatus(String),

    #[error("Failed to launch agent: {0}")]
    Launch(String),

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Starts, queries and stops agent processes.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Launch the agent process and return its pid.
    async fn start(&self, spec: &LaunchSpec) -> Result<u32, ControlError>;

    /// Query the agent's control endpoint.
    async fn health(&self, port: u16) -> Result<AgentHealth, ControlError>;

    /// Send a user message to the agent.
    async fn message(&self, port: u16, content: &str) -> Result<(), ControlError>;

    /// Fetch the agent's conversation.
    async fn messages(&self, port: u16) -> Result<Vec<Message>, ControlError>;

    /// Stop the process: SIGTERM, then SIGKILL after `grace`.
    async fn terminate(&self, pid: u32, grace: Duration) -> Result<(), ControlError>;
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

/// [`ProcessControl`] for agents run under AgentAPI.
#[derive(Debug, Clone)]
pub struct AgentApiControl {
    http: reqwest::Client,
    host: String,
    agentapi_bin: String,
    claude_bin: String,
}

impl AgentApiControl {
    /// Create a controller that finds `agentapi` and `claude` on `PATH`.
    pub fn new() -> Result<Self, ControlError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            host: "localhost".to_string(),
            agentapi_bin: "agentapi".to_string(),
            claude_bin: "claude".to_string(),
        })
    }

    /// Use explicit binaries instead of relying on `PATH`.
    pub fn with_binaries(mut self, agentapi: impl Into<String>, claude: impl Into<String>) -> Self {
        self.agentapi_bin = agentapi.into();
        self.claude_bin = claude.into();
        self
    }

    /// Talk to agents on a host other than `localhost`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.host, port, path)
    }

    /// The shell command line that runs the agent.
    fn command_line(&self, spec: &LaunchSpec) -> Result<String, ControlError> {
        let mut agent_cmd = format!("{} --dangerously-skip-permissions", self.claude_bin);
        if let Some(model) = spec.model.as_deref().filter(|m| !m.is_empty()) {
            if !is_safe_model_name(model) {
                return Err(ControlError::Launch(format!("invalid model name: {:?}", model)));
            }
            agent_cmd.push_str(" --model ");
            agent_cmd.push_str(model);
        }
        Ok(format!(
            "{} server --port {} -- {}",
            self.agentapi_bin, spec.port, agent_cmd
        ))
    }
}

#[async_trait]
impl ProcessControl for AgentApiControl {
    async fn start(&self, spec: &LaunchSpec) -> Result<u32, ControlError> {
        let command_line = self.command_line(spec)?;
        workspace::provision(spec).await?;
        let hive_dir = spec.worktree_path.join(".hive");

        let mut cmd = if spec.sandbox {
            let config = write_sandbox_config(&spec.worktree_path, &hive_dir).await?;
            let mut cmd = Command::new("srt");
            cmd.arg("-s").arg(config).arg("-c").arg(&command_line);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&command_line);
            cmd
        };

        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(hive_dir.join("agent.log"))?;
        let log_err = log.try_clone()?;

        cmd.current_dir(&spec.worktree_path)
            .env("HIVE_HUB_URL", &spec.hub_url)
            .env("HIVE_AGENT_ID", &spec.agent_id)
            .env("HIVE_AGENT_NAME", &spec.agent_name)
            .env("HIVE_WORKTREE_PATH", &spec.worktree_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| ControlError::Launch(format!("{}: {}", command_line, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| ControlError::Launch("process exited immediately".to_string()))?;

        // Reap the child so an exited agent does not linger as a zombie and
        // look alive to `kill(pid, 0)`.
        let name = spec.agent_name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("Agent {} (pid {}) exited: {}", name, pid, status),
                Err(e) => warn!("Failed to wait for agent {} (pid {}): {}", name, pid, e),
            }
        });

        info!(
            "Launched agent {} on port {} (pid {}, sandbox: {})",
            spec.agent_name, spec.port, pid, spec.sandbox
        );
        Ok(pid)
    }

    async fn health(&self, port: u16) -> Result<AgentHealth, ControlError> {
        let resp = self.http.get(self.url(port, "/status")).send().await?;
        if !resp.status().is_success() {
            return Err(ControlError::Status {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }
        let body: StatusResponse = resp.json().await?;
        match body.status.as_str() {
            "stable" => Ok(AgentHealth::Ready),
            "running" => Ok(AgentHealth::Busy),
            other => Err(ControlError::UnknownStatus(other.to_string())),
        }
    }

    async fn message(&self, port: u16, content: &str) -> Result<(), ControlError> {
        let resp = self
            .http
            .post(self.url(port, "/message"))
            .json(&MessageRequest {
                content,
                kind: "user",
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ControlError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Delivered message to agent on port {}", port);
        Ok(())
    }

    async fn messages(&self, port: u16) -> Result<Vec<Message>, ControlError> {
        let resp = self.http.get(self.url(port, "/messages")).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ControlError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: MessagesResponse = resp.json().await?;
        Ok(body.messages)
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> Result<(), ControlError> {
        terminate_gracefully(pid, grace)
            .await
            .map_err(|e| ControlError::Signal {
                pid,
                message: e.to_string(),
            })
    }
}

/// Model names are interpolated into a shell command line.
fn is_safe_model_name(model: &str) -> bool {
    model
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '[' | ']'))
}

/// Write the sandbox runtime config: writes confined to the worktree,
/// network limited to the hub and model APIs.
async fn write_sandbox_config(worktree: &Path, hive_dir: &Path) -> Result<PathBuf, ControlError> {
    let home = dirs::home_dir().unwrap_or_default();
    let config = serde_json::json!({
        "filesystem": {
            "allowWrite": [worktree, home.join(".claude"), "/tmp"],
            "denyRead": [home.join(".ssh")],
        },
        "network": {
            "allowedDomains": ["localhost", "127.0.0.1", "api.anthropic.com", "*.anthropic.com"],
        },
    });
    let path = hive_dir.join("sandbox-config.json");
    let body = serde_json::to_vec_pretty(&config)
        .map_err(|e| ControlError::Launch(format!("sandbox config: {}", e)))?;
    tokio::fs::write(&path, body).await?;
    Ok(path)
}
