// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for agent lifecycle management.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Agent Record
// ============================================================================

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Accepted, still creating the worktree or waiting for the process.
    Spawning,
    /// Idle and accepting messages.
    Ready,
    /// Processing a message.
    Busy,
    /// Stopped by request.
    Stopped,
    /// The control endpoint returned an error.
    Error,
    /// The process vanished without being stopped.
    Dead,
}

impl AgentStatus {
    /// Whether the agent's process is expected to be alive.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Spawning | Self::Ready | Self::Busy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Dead => "dead",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An agent process working in its own worktree.
///
/// `port` and `pid` are both zero until the process has been started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub worktree_path: PathBuf,
    #[serde(default)]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub pid: u32,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Agent {
    /// A fresh record in the `spawning` state.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            worktree_path: PathBuf::new(),
            branch: String::new(),
            specialty: None,
            port: 0,
            pid: 0,
            status: AgentStatus::Spawning,
            created_at: Utc::now(),
            last_seen_at: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Whether the agent holds a process that can receive messages.
    pub fn accepts_messages(&self) -> bool {
        matches!(self.status, AgentStatus::Ready | AgentStatus::Busy) && self.port != 0
    }
}

/// Generate a short agent id (first 8 characters of a v4 UUID).
pub fn new_agent_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ============================================================================
// Conversation
// ============================================================================

/// One message in an agent's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// `user` or `agent`/`assistant`, as reported by the agent.
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An agent's full conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub agent_id: String,
    pub messages: Vec<Message>,
}

/// Health reported by an agent's control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentHealth {
    Ready,
    Busy,
}

impl From<AgentHealth> for AgentStatus {
    fn from(health: AgentHealth) -> Self {
        match health {
            AgentHealth::Ready => AgentStatus::Ready,
            AgentHealth::Busy => AgentStatus::Busy,
        }
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Request to spawn an agent (`POST /agents`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnOptions {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    /// Overrides the hub-wide sandbox default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Repository to check the worktree out of; the hub's repository
    /// when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
}

impl SpawnOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_repo_path(mut self, repo: impl Into<PathBuf>) -> Self {
        self.repo_path = Some(repo.into());
        self
    }
}

/// Everything the process controller needs to launch an agent.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub agent_id: String,
    pub agent_name: String,
    pub port: u16,
    pub worktree_path: PathBuf,
    pub repo_path: PathBuf,
    pub branch: String,
    pub specialty: Option<String>,
    pub sandbox: bool,
    pub model: Option<String>,
    pub hub_url: String,
}

/// Tunables for spawning and stopping agents.
#[derive(Debug, Clone)]
pub struct SpawnSettings {
    /// First port handed to agents.
    pub base_port: u16,
    /// Number of ports scanned from `base_port`.
    pub port_span: u16,
    /// How long a new agent has to answer its health check.
    pub ready_timeout: Duration,
    /// Delay between health checks while waiting for readiness.
    pub poll_interval: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub stop_grace: Duration,
    /// Hub URL passed to agents as `HIVE_HUB_URL`.
    pub hub_url: String,
    /// Sandbox agents unless the spawn request says otherwise.
    pub sandbox: bool,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            base_port: 3284,
            port_span: 100,
            ready_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            stop_grace: Duration::from_secs(5),
            hub_url: "http://localhost:8080".to_string(),
            sandbox: true,
        }
    }
}

/// Result of restoring agents from a saved snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Agents whose process was still alive.
    pub recovered: Vec<String>,
    /// Agents marked dead.
    pub dead: Vec<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Change notifications published by the agent manager.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Spawned(Agent),
    Stopped(Agent),
    Destroyed {
        id: String,
        name: String,
    },
    StatusChanged {
        id: String,
        name: String,
        previous: AgentStatus,
        status: AgentStatus,
    },
    MessageSent {
        id: String,
        name: String,
        content: String,
    },
}

impl AgentEvent {
    /// Event type as seen by SSE subscribers.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Spawned(_) => "agent.spawned",
            Self::Stopped(_) => "agent.stopped",
            Self::Destroyed { .. } => "agent.destroyed",
            Self::StatusChanged { .. } => "agent.status",
            Self::MessageSent { .. } => "message.sent",
        }
    }

    /// JSON payload for SSE subscribers.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Spawned(agent) | Self::Stopped(agent) => {
                serde_json::to_value(agent).unwrap_or(serde_json::Value::Null)
            }
            Self::Destroyed { id, name } => serde_json::json!({ "id": id, "name": name }),
            Self::StatusChanged {
                id,
                name,
                previous,
                status,
            } => serde_json::json!({
                "id": id,
                "name": name,
                "previous": previous,
                "status": status,
            }),
            Self::MessageSent { id, name, content } => serde_json::json!({
                "agent_id": id,
                "agent_name": name,
                "content": content,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        assert!(AgentStatus::Spawning.is_running());
        assert!(AgentStatus::Ready.is_running());
        assert!(AgentStatus::Busy.is_running());
        assert!(!AgentStatus::Stopped.is_running());
        assert!(!AgentStatus::Error.is_running());
        assert!(!AgentStatus::Dead.is_running());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&AgentStatus::Dead).unwrap(), "\"dead\"");
        let status: AgentStatus = serde_json::from_str("\"spawning\"").unwrap();
        assert_eq!(status, AgentStatus::Spawning);
        assert_eq!(AgentStatus::Busy.to_string(), "busy");
    }

    #[test]
    fn test_agent_id_shape() {
        let id = new_agent_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_agent_id());
    }

    #[test]
    fn test_agent_record_round_trip_omits_empty_optionals() {
        let mut agent = Agent::new("abcd1234", "front");
        agent.port = 3284;
        agent.pid = 4242;
        agent.status = AgentStatus::Ready;

        let json = serde_json::to_value(&agent).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("specialty").is_none());
        assert_eq!(json["status"], "ready");

        let back: Agent = serde_json::from_value(json).unwrap();
        assert_eq!(back, agent);
    }

    #[test]
    fn test_spawn_options_minimal_body() {
        let opts: SpawnOptions = serde_json::from_str(r#"{"name": "front"}"#).unwrap();
        assert_eq!(opts.name, "front");
        assert!(opts.sandbox.is_none());
        assert!(opts.branch.is_none());
    }

    #[test]
    fn test_event_payloads() {
        let event = AgentEvent::StatusChanged {
            id: "a1".to_string(),
            name: "front".to_string(),
            previous: AgentStatus::Ready,
            status: AgentStatus::Dead,
        };
        assert_eq!(event.event_type(), "agent.status");
        assert_eq!(event.payload()["status"], "dead");

        let event = AgentEvent::Spawned(Agent::new("a1", "front"));
        assert_eq!(event.event_type(), "agent.spawned");
        assert_eq!(event.payload()["name"], "front");
    }
}
