// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hive - a coordination hub for a fleet of autonomous coding agents.
//!
//! The hub spawns each agent in its own git worktree, leases ports between
//! agents, tracks the tasks they work on and the questions they ask, and
//! shows all of it to observers over REST and server-sent events.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`error`] - Shared error types and result aliases
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing setup and in-process metrics
//! - [`event`] - Bounded, non-blocking event dispatch
//! - [`port`] - Port lease registry with FIFO waiters
//! - [`worktree`] - Git worktree provider
//! - [`agent`] - Agent lifecycle: spawn, stop, destroy, recover
//! - [`task`] - Task plans and step progress
//! - [`solicitation`] - Questions from agents to humans
//! - [`hub`] - Composition root, persistence and HTTP API
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hive::config::{load_config, CliOptions};
//! use hive::hub::{shutdown_signal, Hub};
//!
//! let config = load_config(repo, CliOptions::default())?;
//! let hub = Arc::new(Hub::new(config)?);
//! hub.restore_state().await?;
//! hub.spawn_liveness_sweeper();
//! hub.serve(shutdown_signal()).await?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod port;
pub mod solicitation;
pub mod task;
pub mod telemetry;
pub mod worktree;

// Re-export commonly used types at crate root
pub use agent::{Agent, AgentError, AgentManager, AgentStatus, SpawnOptions};
pub use config::{load_config, CliOptions, HubConfig};
pub use error::{ConfigError, Result, StateError};
pub use hub::{Hub, HubComponents, HubEvent, HubStatus};
pub use port::{PortError, PortRegistry};
pub use solicitation::{Solicitation, SolicitationError, SolicitationManager};
pub use task::{Task, TaskError, TaskManager};

/// Hive version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _opts = SpawnOptions::new("frontend");
        let _config = HubConfig::new("/repo");
        assert!(AgentStatus::Ready.is_running());
    }
}
