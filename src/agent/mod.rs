// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent lifecycle management.
//!
//! The [`AgentManager`] owns the table of agents and drives each one through
//! its lifecycle. It depends on three seams so it can be tested without git
//! or real processes:
//!
//! - [`WorktreeProvider`](crate::worktree::WorktreeProvider): isolated checkout
//! - [`ProcessControl`]: launch, health, messages, terminate
//! - [`Liveness`]: does a pid still exist
//!
//! # Spawn
//!
//! ```text
//! spawning ─ worktree ─ port lease ─ process start ─ health poll ─▶ ready
//!     │          │            │              │              │
//!     └──────────┴────────────┴──────────────┴──────────────┴─▶ rollback
//! ```
//!
//! A failure at any stage undoes the earlier stages and reports which
//! stage failed ([`SpawnStage`]).
//!
//! # Recovery
//!
//! After a hub restart the saved agents are re-registered. Agents whose
//! process is still alive get their port lease back; the rest are marked
//! [`AgentStatus::Dead`].

mod control;
mod liveness;
mod manager;
mod types;
mod workspace;

pub use control::{AgentApiControl, ControlError, ProcessControl};
pub use liveness::{process_exists, send_signal, terminate_gracefully, Liveness, OsLiveness, ProcessSignal};
pub use manager::AgentManager;
pub use workspace::{provision, render_system_prompt};
pub use types::{
    new_agent_id, Agent, AgentEvent, AgentHealth, AgentStatus, Conversation, LaunchSpec, Message,
    RecoveryReport, SpawnOptions, SpawnSettings,
};

use crate::port::PortError;
use crate::worktree::WorktreeError;

/// Stage of a spawn that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStage {
    Worktree,
    Port,
    Process,
    Readiness,
}

impl std::fmt::Display for SpawnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Worktree => "worktree",
            Self::Port => "port",
            Self::Process => "process",
            Self::Readiness => "readiness",
        })
    }
}

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent already exists: {0}")]
    AlreadyExists(String),

    #[error("Agent is not running: {0}")]
    NotRunning(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Spawn failed at {stage} stage: {message}")]
    Spawn { stage: SpawnStage, message: String },

    #[error("Process control error: {0}")]
    Control(#[from] ControlError),

    #[error("Worktree error: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("Port error: {0}")]
    Port(#[from] PortError),
}

impl AgentError {
    pub(crate) fn spawn(stage: SpawnStage, err: impl std::fmt::Display) -> Self {
        Self::Spawn {
            stage,
            message: err.to_string(),
        }
    }
}
