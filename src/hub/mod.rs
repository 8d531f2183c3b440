// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The hub: composition root and HTTP surface.
//!
//! The [`Hub`] owns one of each manager, forwards their events to the
//! [`EventHub`], persists the agent table through the [`StateStore`] and
//! serves the REST + SSE API.
//!
//! ```text
//!   handler ─▶ manager (own lock) ─▶ dispatcher ─▶ EventHub ─▶ SSE clients
//!                 │
//!                 └─ agent changes ─▶ StateStore (.hive/hub-state.json)
//! ```

mod error;
mod events;
mod handlers;
mod server;
mod sse;
mod state;

pub use error::ApiError;
pub use events::{EventHub, HubEvent, EVENT_BUFFER};
pub use server::shutdown_signal;
pub use state::{HubState, StateStore, STATE_VERSION};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{
    Agent, AgentApiControl, AgentError, AgentEvent, AgentManager, Liveness, OsLiveness,
    ProcessControl, ProcessSignal, RecoveryReport, SpawnOptions,
};
use crate::config::HubConfig;
use crate::error::{Result, StateError};
use crate::event::EventHandler;
use crate::port::{PortLease, PortRegistry, PortWaiter};
use crate::solicitation::SolicitationManager;
use crate::task::TaskManager;
use crate::telemetry::{MetricsSummary, GLOBAL_METRICS};
use crate::worktree::{GitWorktreeProvider, WorktreeProvider};

/// The external collaborators of the agent manager.
pub struct HubComponents {
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub control: Arc<dyn ProcessControl>,
    pub liveness: Arc<dyn Liveness>,
}

impl HubComponents {
    /// Git worktrees, `agentapi` processes and OS liveness checks.
    pub fn from_config(config: &HubConfig) -> Result<Self> {
        let worktrees = GitWorktreeProvider::new(&config.repo_path, Some(config.worktrees_dir()));
        let control = AgentApiControl::new().context("Failed to build agent control client")?;
        Ok(Self {
            worktrees: Arc::new(worktrees),
            control: Arc::new(control),
            liveness: Arc::new(OsLiveness),
        })
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HubInfo {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub port: u16,
    pub repo_path: PathBuf,
    pub state_file: PathBuf,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub total: usize,
    pub running: usize,
    pub by_status: BTreeMap<String, usize>,
    pub agents: Vec<Agent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolicitationSummary {
    pub pending: usize,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortSummary {
    pub leases: Vec<PortLease>,
    pub waiters: Vec<PortWaiter>,
}

/// Aggregate returned by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    pub hub: HubInfo,
    pub agents: AgentSummary,
    pub tasks: TaskSummary,
    pub solicitations: SolicitationSummary,
    pub ports: PortSummary,
    pub metrics: MetricsSummary,
}

// ============================================================================
// Hub
// ============================================================================

pub struct Hub {
    config: HubConfig,
    events: Arc<EventHub>,
    ports: Arc<PortRegistry>,
    agents: AgentManager,
    tasks: TaskManager,
    solicitations: SolicitationManager,
    store: StateStore,
    started_at: Instant,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Event handler that forwards into the broadcast hub.
fn forward<T>(events: &Arc<EventHub>) -> EventHandler<T>
where
    T: Into<HubEvent> + Send + 'static,
{
    let events = Arc::clone(events);
    Arc::new(move |event: T| events.publish(event))
}

impl Hub {
    /// Build a hub with git worktrees and `agentapi` processes.
    /// Must be called inside a tokio runtime.
    pub fn new(config: HubConfig) -> Result<Self> {
        let components = HubComponents::from_config(&config)?;
        Self::with_components(config, components)
    }

    /// Build a hub around the given collaborators.
    pub fn with_components(config: HubConfig, components: HubComponents) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventHub::new());
        let ports = Arc::new(PortRegistry::new(Some(forward(&events))));
        let agents = AgentManager::new(
            components.worktrees,
            components.control,
            components.liveness,
            Arc::clone(&ports),
            config.spawn_settings(),
            Some(forward::<AgentEvent>(&events)),
        );
        let tasks = TaskManager::new(Some(forward(&events)));
        let solicitations = SolicitationManager::new(Some(forward(&events)));
        let store = StateStore::new(config.state_path());

        info!(
            "Hub configured for {} (state: {})",
            config.repo_path.display(),
            store.path().display()
        );

        Ok(Self {
            config,
            events,
            ports,
            agents,
            tasks,
            solicitations,
            store,
            started_at: Instant::now(),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn ports(&self) -> &PortRegistry {
        &self.ports
    }

    pub fn agents(&self) -> &AgentManager {
        &self.agents
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn solicitations(&self) -> &SolicitationManager {
        &self.solicitations
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Snapshot the agent table to disk.
    pub async fn save_state(&self) -> std::result::Result<HubState, StateError> {
        self.store
            .save_with(|| self.agents.snapshot_records())
            .await
    }

    /// Save, logging instead of failing. Used after agent mutations.
    async fn persist(&self) {
        if let Err(e) = self.save_state().await {
            warn!("Failed to save hub state: {}", e);
        }
    }

    /// Load the snapshot and re-register its agents.
    pub async fn restore_state(&self) -> std::result::Result<RecoveryReport, StateError> {
        let Some(state) = self.store.load().await? else {
            debug!("No saved hub state at {}", self.store.path().display());
            return Ok(RecoveryReport::default());
        };

        let report = self.agents.recover(state.agents).await;
        info!(
            "Restored hub state: {} agents recovered, {} dead",
            report.recovered.len(),
            report.dead.len()
        );
        self.save_state().await?;
        Ok(report)
    }

    // ========================================================================
    // Agent operations that change persisted state
    // ========================================================================

    async fn resolve_agent(&self, id_or_name: &str) -> std::result::Result<Agent, AgentError> {
        self.agents
            .resolve(id_or_name)
            .await
            .ok_or_else(|| AgentError::NotFound(id_or_name.to_string()))
    }

    pub async fn spawn_agent(&self, opts: SpawnOptions) -> std::result::Result<Agent, AgentError> {
        let agent = self.agents.spawn_agent(opts).await?;
        self.persist().await;
        Ok(agent)
    }

    /// Refresh an agent's status, saving if it changed.
    pub async fn refresh_agent(&self, id_or_name: &str) -> std::result::Result<Agent, AgentError> {
        let agent = self.resolve_agent(id_or_name).await?;
        let refreshed = self.agents.refresh_status(&agent.id).await?;
        if refreshed.status != agent.status {
            self.persist().await;
        }
        Ok(refreshed)
    }

    pub async fn stop_agent(&self, id_or_name: &str) -> std::result::Result<Agent, AgentError> {
        let agent = self.resolve_agent(id_or_name).await?;
        let stopped = self.agents.stop_agent(&agent.id).await?;
        self.persist().await;
        Ok(stopped)
    }

    /// Destroy an agent and close out its open tasks and questions.
    pub async fn destroy_agent(&self, id_or_name: &str) -> std::result::Result<Agent, AgentError> {
        let agent = self.resolve_agent(id_or_name).await?;
        self.agents.destroy_agent(&agent.id).await?;

        let cancelled = self.tasks.cancel_all_for_agent(&agent.id, "agent destroyed");
        let dismissed = self
            .solicitations
            .dismiss_all_for_agent(&agent.id, "agent destroyed");
        if !cancelled.is_empty() || !dismissed.is_empty() {
            info!(
                "Closed {} tasks and {} solicitations of {}",
                cancelled.len(),
                dismissed.len(),
                agent.name
            );
        }

        self.persist().await;
        Ok(agent)
    }

    /// Force a port free and SIGTERM the process recorded on its lease.
    pub fn force_release_port(
        &self,
        req: crate::port::ForceReleaseRequest,
    ) -> std::result::Result<PortLease, crate::port::PortError> {
        let lease = self.ports.force_release(req)?;
        if let Some(pid) = lease.process_id {
            match crate::agent::send_signal(pid, ProcessSignal::Terminate) {
                Ok(true) => info!("Sent SIGTERM to pid {} (port {})", pid, lease.port),
                Ok(false) => debug!("Process {} on port {} already gone", pid, lease.port),
                Err(e) => warn!("Failed to signal pid {}: {}", pid, e),
            }
        }
        Ok(lease)
    }

    /// Stop every running agent. Used with `--stop-agents-on-exit`.
    pub async fn shutdown_agents(&self) -> Vec<String> {
        let stopped = self.agents.stop_all().await;
        info!("Stopped {} agents", stopped.len());
        self.persist().await;
        stopped
    }

    // ========================================================================
    // Background work
    // ========================================================================

    /// Periodically mark agents with vanished processes as dead.
    ///
    /// Does nothing when the interval is configured as 0. The task holds a
    /// weak reference and ends once the hub is dropped.
    pub fn spawn_liveness_sweeper(self: &Arc<Self>) {
        let Some(interval) = self.config.liveness_interval() else {
            debug!("Liveness sweeper disabled");
            return;
        };

        let hub = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                let dead = hub.agents.sweep_liveness().await;
                if !dead.is_empty() {
                    warn!("Liveness sweep found {} dead agents", dead.len());
                    hub.persist().await;
                }
            }
        });

        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Save state and stop background work. Agents keep running.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = sweeper {
            handle.abort();
        }

        self.persist().await;
        self.agents.close().await;
        self.tasks.close().await;
        self.solicitations.close().await;
        self.ports.close().await;
        info!("Hub shut down");
    }

    // ========================================================================
    // HTTP
    // ========================================================================

    pub fn router(self: &Arc<Self>) -> axum::Router {
        server::router(Arc::clone(self))
    }

    /// Serve the API on `0.0.0.0:<port>` until `shutdown` resolves, then
    /// save state and stop background work.
    pub async fn serve<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Hub listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        self.shutdown().await;
        Ok(())
    }

    /// Aggregate view composed from each manager independently.
    pub async fn status(&self) -> HubStatus {
        let agents = self.agents.list_agents().await;
        let mut agents_by_status = BTreeMap::new();
        for agent in &agents {
            *agents_by_status
                .entry(agent.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        let solicitations_by_status = self.solicitations.count();

        HubStatus {
            hub: HubInfo {
                version: crate::VERSION,
                uptime_secs: self.uptime_secs(),
                port: self.config.port,
                repo_path: self.config.repo_path.clone(),
                state_file: self.store.path().to_path_buf(),
                subscribers: self.events.subscriber_count(),
            },
            agents: AgentSummary {
                total: agents.len(),
                running: agents.iter().filter(|a| a.is_running()).count(),
                by_status: agents_by_status,
                agents,
            },
            tasks: TaskSummary {
                total: self.tasks.count(),
                by_status: self.tasks.count_by_status(),
            },
            solicitations: SolicitationSummary {
                pending: solicitations_by_status.get("pending").copied().unwrap_or(0),
                by_status: solicitations_by_status,
            },
            ports: PortSummary {
                leases: self.ports.list_leases(),
                waiters: self.ports.list_waiters(),
            },
            metrics: GLOBAL_METRICS.snapshot().summary(),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("port", &self.config.port)
            .field("repo_path", &self.config.repo_path)
            .field("state_file", &self.store.path())
            .finish()
    }
}
