// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The agent manager.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::control::ProcessControl;
use super::liveness::Liveness;
use super::types::*;
use super::{AgentError, SpawnStage};
use crate::event::{Dispatcher, EventHandler};
use crate::port::{AcquireRequest, PortRegistry};
use crate::telemetry::{OperationTimer, GLOBAL_METRICS};
use crate::worktree::{CreateOptions, WorktreeProvider};

/// Service name recorded on the port leases of agent processes.
const AGENT_SERVICE: &str = "agentapi";

/// What a spawn has acquired so far, for rollback.
#[derive(Debug, Default)]
struct SpawnProgress {
    worktree: bool,
    port: bool,
    pid: Option<u32>,
}

/// Canonical table of agents and the operations that change it.
pub struct AgentManager {
    agents: Arc<RwLock<HashMap<String, Agent>>>,
    worktrees: Arc<dyn WorktreeProvider>,
    control: Arc<dyn ProcessControl>,
    liveness: Arc<dyn Liveness>,
    ports: Arc<PortRegistry>,
    settings: SpawnSettings,
    dispatcher: Dispatcher<AgentEvent>,
}

impl AgentManager {
    /// Create a manager. Must be called inside a tokio runtime.
    pub fn new(
        worktrees: Arc<dyn WorktreeProvider>,
        control: Arc<dyn ProcessControl>,
        liveness: Arc<dyn Liveness>,
        ports: Arc<PortRegistry>,
        settings: SpawnSettings,
        handler: Option<EventHandler<AgentEvent>>,
    ) -> Self {
        let dispatcher = Dispatcher::new(handler, 0, 0);
        dispatcher.start();
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            worktrees,
            control,
            liveness,
            ports,
            settings,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &SpawnSettings {
        &self.settings
    }

    fn emit(&self, event: AgentEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Apply `f` to an agent record and return the updated copy.
    async fn update<F>(&self, id: &str, f: F) -> Option<Agent>
    where
        F: FnOnce(&mut Agent),
    {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id)?;
        f(agent);
        Some(agent.clone())
    }

    /// Change an agent's status, publishing `agent.status` if it changed.
    /// A dead agent loses its port lease but keeps its recorded port/pid.
    async fn set_status(
        &self,
        id: &str,
        status: AgentStatus,
        error: Option<String>,
    ) -> Option<Agent> {
        let (previous, agent) = {
            let mut agents = self.agents.write().await;
            let agent = agents.get_mut(id)?;
            let previous = agent.status;
            agent.status = status;
            agent.error = error;
            if matches!(status, AgentStatus::Ready | AgentStatus::Busy) {
                agent.last_seen_at = Some(Utc::now());
            }
            (previous, agent.clone())
        };

        if previous != status {
            if status == AgentStatus::Dead {
                self.ports.release_all_for_agent(id);
                GLOBAL_METRICS.increment("agent.dead");
                warn!("Agent {} ({}) is dead (pid {} gone)", agent.name, id, agent.pid);
            } else {
                debug!("Agent {} status {} -> {}", agent.name, previous, status);
            }
            self.emit(AgentEvent::StatusChanged {
                id: agent.id.clone(),
                name: agent.name.clone(),
                previous,
                status,
            });
        }
        Some(agent)
    }

    // ========================================================================
    // Spawn
    // ========================================================================

    /// Spawn an agent: worktree, port lease, process, readiness.
    ///
    /// Any failure rolls back the earlier stages and removes the record.
    #[instrument(skip(self, opts), fields(name = %opts.name))]
    pub async fn spawn_agent(&self, opts: SpawnOptions) -> Result<Agent, AgentError> {
        let name = opts.name.trim().to_string();
        if name.is_empty() {
            return Err(AgentError::InvalidRequest("name is required".to_string()));
        }
        let _timer = OperationTimer::start("agent.spawn");

        let id = new_agent_id();
        {
            let mut agents = self.agents.write().await;
            if agents.values().any(|a| a.name == name && a.is_running()) {
                return Err(AgentError::AlreadyExists(name));
            }
            let mut agent = Agent::new(&id, &name);
            agent.specialty = opts.specialty.clone();
            agents.insert(id.clone(), agent);
        }
        info!("Spawning agent {} ({})", name, id);

        let mut progress = SpawnProgress::default();
        match self.run_spawn(&id, &name, &opts, &mut progress).await {
            Ok(agent) => {
                GLOBAL_METRICS.increment("agent.spawned");
                self.emit(AgentEvent::Spawned(agent.clone()));
                info!(
                    "Agent {} ({}) ready on port {} (pid {})",
                    name, id, agent.port, agent.pid
                );
                Ok(agent)
            }
            Err(e) => {
                error!("Failed to spawn agent {}: {}", name, e);
                GLOBAL_METRICS.increment("agent.spawn_failed");
                self.rollback(&id, &name, progress).await;
                Err(e)
            }
        }
    }

    async fn run_spawn(
        &self,
        id: &str,
        name: &str,
        opts: &SpawnOptions,
        progress: &mut SpawnProgress,
    ) -> Result<Agent, AgentError> {
        let worktree = self
            .worktrees
            .create(
                CreateOptions::new(name)
                    .with_branch(opts.branch.clone())
                    .with_base_branch(opts.base_branch.clone())
                    .with_repo_path(opts.repo_path.clone()),
            )
            .await
            .map_err(|e| AgentError::spawn(SpawnStage::Worktree, e))?;
        // Rollback only removes a checkout this spawn added.
        progress.worktree = worktree.created;
        self.update(id, |a| {
            a.worktree_path = worktree.path.clone();
            a.branch = worktree.branch.clone();
        })
        .await;

        let start = self.settings.base_port;
        let end = start.saturating_add(self.settings.port_span);
        let lease = self
            .ports
            .acquire_in_range(start, end, id, name, AGENT_SERVICE)
            .map_err(|e| AgentError::spawn(SpawnStage::Port, e))?;
        progress.port = true;

        let spec = LaunchSpec {
            agent_id: id.to_string(),
            agent_name: name.to_string(),
            port: lease.port,
            worktree_path: worktree.path.clone(),
            repo_path: worktree.repo_path.clone(),
            branch: worktree.branch.clone(),
            specialty: opts.specialty.clone(),
            sandbox: opts.sandbox.unwrap_or(self.settings.sandbox),
            model: opts.model.clone(),
            hub_url: self.settings.hub_url.clone(),
        };
        let pid = self
            .control
            .start(&spec)
            .await
            .map_err(|e| AgentError::spawn(SpawnStage::Process, e))?;
        progress.pid = Some(pid);
        if let Err(e) = self.ports.set_process_id(lease.port, pid) {
            warn!("Could not record pid on port {}: {}", lease.port, e);
        }
        self.update(id, |a| {
            a.port = lease.port;
            a.pid = pid;
        })
        .await;

        self.wait_ready(pid, lease.port)
            .await
            .map_err(|message| AgentError::Spawn {
                stage: SpawnStage::Readiness,
                message,
            })?;

        self.update(id, |a| {
            a.status = AgentStatus::Ready;
            a.last_seen_at = Some(Utc::now());
            a.error = None;
        })
        .await
        .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    /// Poll the agent's health until it answers or the ready timeout passes.
    async fn wait_ready(&self, pid: u32, port: u16) -> Result<(), String> {
        let _timer = OperationTimer::start("agent.ready_wait");
        let poll = async {
            loop {
                match self.control.health(port).await {
                    Ok(_) => return Ok(()),
                    Err(e) => debug!("Agent on port {} not ready yet: {}", port, e),
                }
                if !self.liveness.is_alive(pid) {
                    return Err(format!("process {} exited during startup", pid));
                }
                sleep(self.settings.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.settings.ready_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "agent did not become ready within {:?}",
                self.settings.ready_timeout
            )),
        }
    }

    async fn rollback(&self, id: &str, name: &str, progress: SpawnProgress) {
        if let Some(pid) = progress.pid {
            if let Err(e) = self.control.terminate(pid, self.settings.stop_grace).await {
                warn!("Rollback: failed to terminate pid {}: {}", pid, e);
            }
        }
        if progress.port {
            self.ports.release_all_for_agent(id);
        }
        if progress.worktree {
            if let Err(e) = self.worktrees.delete(name).await {
                warn!("Rollback: failed to delete worktree {}: {}", name, e);
            }
        }
        self.agents.write().await.remove(id);
        debug!("Rolled back spawn of {} ({})", name, id);
    }

    /// Insert an agent record as-is.
    pub async fn register_agent(&self, agent: Agent) -> Result<(), AgentError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            return Err(AgentError::AlreadyExists(agent.id));
        }
        agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Re-register agents restored from a snapshot.
    ///
    /// Agents with a live pid get their port lease back and are marked
    /// ready; the rest are marked dead and hold no lease.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn recover(&self, records: Vec<Agent>) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for mut agent in records {
            let alive = agent.pid != 0 && self.liveness.is_alive(agent.pid);
            if alive {
                if agent.port != 0 {
                    let req = AcquireRequest::new(agent.port, &agent.id)
                        .with_agent_name(&agent.name)
                        .with_service(AGENT_SERVICE);
                    match self.ports.acquire(req).await {
                        Ok(resp) if resp.is_acquired() => {
                            if let Err(e) = self.ports.set_process_id(agent.port, agent.pid) {
                                warn!("Could not record pid on port {}: {}", agent.port, e);
                            }
                        }
                        Ok(resp) => warn!(
                            "Recovered agent {} could not re-lease port {}: {}",
                            agent.name, agent.port, resp.message
                        ),
                        Err(e) => warn!(
                            "Recovered agent {} could not re-lease port {}: {}",
                            agent.name, agent.port, e
                        ),
                    }
                }
                agent.status = AgentStatus::Ready;
                agent.error = None;
                info!("Recovered agent {} ({}) pid {}", agent.name, agent.id, agent.pid);
                report.recovered.push(agent.id.clone());
            } else {
                if agent.status != AgentStatus::Dead {
                    GLOBAL_METRICS.increment("agent.dead");
                }
                agent.status = AgentStatus::Dead;
                warn!(
                    "Agent {} ({}) did not survive the restart (pid {})",
                    agent.name, agent.id, agent.pid
                );
                report.dead.push(agent.id.clone());
            }
            self.agents.write().await.insert(agent.id.clone(), agent);
        }

        report
    }

    // ========================================================================
    // Stop / Destroy
    // ========================================================================

    /// Terminate the agent's process unless it is already known dead.
    async fn terminate_process(&self, agent: &Agent) {
        if agent.pid == 0 || agent.status == AgentStatus::Dead {
            return;
        }
        if let Err(e) = self
            .control
            .terminate(agent.pid, self.settings.stop_grace)
            .await
        {
            warn!("Failed to terminate agent {} (pid {}): {}", agent.name, agent.pid, e);
        }
    }

    /// Stop an agent's process and forget it, keeping its worktree.
    #[instrument(skip(self))]
    pub async fn stop_agent(&self, id: &str) -> Result<Agent, AgentError> {
        let agent = self
            .get_agent(id)
            .await
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;

        self.terminate_process(&agent).await;
        self.ports.release_all_for_agent(&agent.id);
        self.agents.write().await.remove(&agent.id);

        let mut stopped = agent;
        stopped.status = AgentStatus::Stopped;
        info!("Stopped agent {} ({})", stopped.name, stopped.id);
        self.emit(AgentEvent::Stopped(stopped.clone()));
        Ok(stopped)
    }

    /// Stop an agent and delete its worktree.
    ///
    /// Destroying an unknown agent succeeds. Failures of individual cleanup
    /// steps are logged and do not abort the rest.
    #[instrument(skip(self))]
    pub async fn destroy_agent(&self, id: &str) -> Result<(), AgentError> {
        let Some(agent) = self.get_agent(id).await else {
            debug!("Destroy of unknown agent {} ignored", id);
            return Ok(());
        };
        let _timer = OperationTimer::start("agent.destroy");

        self.terminate_process(&agent).await;
        self.ports.release_all_for_agent(&agent.id);

        let shared = {
            let agents = self.agents.read().await;
            agents
                .values()
                .any(|a| a.id != agent.id && a.name == agent.name && a.is_running())
        };
        if shared {
            warn!(
                "Keeping worktree {}: a running agent with the same name uses it",
                agent.name
            );
        } else if let Err(e) = self.worktrees.delete(&agent.name).await {
            warn!("Failed to delete worktree for {}: {}", agent.name, e);
        }

        self.agents.write().await.remove(&agent.id);
        info!("Destroyed agent {} ({})", agent.name, agent.id);
        self.emit(AgentEvent::Destroyed {
            id: agent.id,
            name: agent.name,
        });
        Ok(())
    }

    /// Stop every running agent. Returns the ids stopped.
    pub async fn stop_all(&self) -> Vec<String> {
        let ids: Vec<String> = self.list_running().await.into_iter().map(|a| a.id).collect();
        let mut stopped = Vec::new();
        for id in ids {
            match self.stop_agent(&id).await {
                Ok(_) => stopped.push(id),
                Err(e) => warn!("Failed to stop agent {}: {}", id, e),
            }
        }
        stopped
    }

    /// Destroy every agent. Returns the ids destroyed.
    pub async fn destroy_all(&self) -> Vec<String> {
        let ids: Vec<String> = self.list_agents().await.into_iter().map(|a| a.id).collect();
        for id in &ids {
            // destroy_agent only fails on programming errors; it logs the rest.
            let _ = self.destroy_agent(id).await;
        }
        ids
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Re-check an agent's process and control endpoint.
    pub async fn refresh_status(&self, id: &str) -> Result<Agent, AgentError> {
        let agent = self
            .get_agent(id)
            .await
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        if matches!(
            agent.status,
            AgentStatus::Spawning | AgentStatus::Stopped | AgentStatus::Dead
        ) {
            return Ok(agent);
        }

        let (status, error) = if agent.pid != 0 && !self.liveness.is_alive(agent.pid) {
            (AgentStatus::Dead, Some("process exited".to_string()))
        } else {
            match self.control.health(agent.port).await {
                Ok(health) => (health.into(), None),
                Err(e) => (AgentStatus::Error, Some(e.to_string())),
            }
        };

        self.set_status(id, status, error)
            .await
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    /// Mark every agent whose process vanished as dead. Returns their ids.
    pub async fn sweep_liveness(&self) -> Vec<String> {
        let candidates: Vec<(String, u32)> = {
            let agents = self.agents.read().await;
            agents
                .values()
                .filter(|a| {
                    a.pid != 0
                        && matches!(
                            a.status,
                            AgentStatus::Ready | AgentStatus::Busy | AgentStatus::Error
                        )
                })
                .map(|a| (a.id.clone(), a.pid))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, pid) in candidates {
            if self.liveness.is_alive(pid) {
                continue;
            }
            if self
                .set_status(&id, AgentStatus::Dead, Some("process exited".to_string()))
                .await
                .is_some()
            {
                dead.push(id);
            }
        }
        dead
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Send a user message to a running agent.
    pub async fn send_message(&self, id: &str, content: &str) -> Result<(), AgentError> {
        if content.trim().is_empty() {
            return Err(AgentError::InvalidRequest("content is required".to_string()));
        }
        let agent = self
            .get_agent(id)
            .await
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        if !agent.accepts_messages() {
            return Err(AgentError::NotRunning(id.to_string()));
        }

        self.control.message(agent.port, content).await?;
        debug!("Sent message to {} ({} bytes)", agent.name, content.len());
        self.emit(AgentEvent::MessageSent {
            id: agent.id,
            name: agent.name,
            content: content.to_string(),
        });
        Ok(())
    }

    /// Fetch an agent's conversation.
    pub async fn conversation(&self, id: &str) -> Result<Conversation, AgentError> {
        let agent = self
            .get_agent(id)
            .await
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;
        let reachable = agent.port != 0
            && matches!(
                agent.status,
                AgentStatus::Ready | AgentStatus::Busy | AgentStatus::Error
            );
        if !reachable {
            return Err(AgentError::NotRunning(id.to_string()));
        }

        let messages = self.control.messages(agent.port).await?;
        Ok(Conversation {
            agent_id: agent.id,
            messages,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_agent(&self, id: &str) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    /// Find an agent by name, preferring a running one.
    pub async fn get_agent_by_name(&self, name: &str) -> Option<Agent> {
        let agents = self.agents.read().await;
        agents
            .values()
            .filter(|a| a.name == name)
            .max_by_key(|a| (a.is_running(), a.created_at))
            .cloned()
    }

    /// Look up by id, then by name.
    pub async fn resolve(&self, id_or_name: &str) -> Option<Agent> {
        match self.get_agent(id_or_name).await {
            Some(agent) => Some(agent),
            None => self.get_agent_by_name(id_or_name).await,
        }
    }

    /// All agents, oldest first.
    pub async fn list_agents(&self) -> Vec<Agent> {
        let mut list: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        list
    }

    pub async fn list_running(&self) -> Vec<Agent> {
        let mut list = self.list_agents().await;
        list.retain(|a| a.is_running());
        list
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn count_running(&self) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.is_running())
            .count()
    }

    /// Records worth persisting: everything except stopped and errored agents.
    pub async fn snapshot_records(&self) -> Vec<Agent> {
        let mut list = self.list_agents().await;
        list.retain(|a| !matches!(a.status, AgentStatus::Stopped | AgentStatus::Error));
        list
    }

    /// Stop the event workers after they drain.
    pub async fn close(&self) {
        self.dispatcher.stop().await;
    }
}
