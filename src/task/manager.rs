// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory task catalog.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::models::*;
use super::TaskError;
use crate::event::{Dispatcher, EventHandler};

#[derive(Default)]
struct Catalog {
    tasks: HashMap<String, Task>,
    /// Task ids per agent, in creation order.
    by_agent: HashMap<String, Vec<String>>,
}

impl Catalog {
    fn index(&mut self, agent_id: &str, task_id: &str) {
        self.by_agent
            .entry(agent_id.to_string())
            .or_default()
            .push(task_id.to_string());
    }

    fn unindex(&mut self, agent_id: &str, task_id: &str) {
        if let Some(ids) = self.by_agent.get_mut(agent_id) {
            ids.retain(|id| id != task_id);
            if ids.is_empty() {
                self.by_agent.remove(agent_id);
            }
        }
    }
}

/// Central catalog of tasks.
pub struct TaskManager {
    catalog: RwLock<Catalog>,
    dispatcher: Dispatcher<TaskEvent>,
}

impl TaskManager {
    /// Create a task manager. Must be called inside a tokio runtime.
    pub fn new(handler: Option<EventHandler<TaskEvent>>) -> Self {
        let dispatcher = Dispatcher::new(handler, 4, 100);
        dispatcher.start();
        Self {
            catalog: RwLock::new(Catalog::default()),
            dispatcher,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: TaskEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Apply `f` to a task and return the updated copy.
    fn mutate<F>(&self, id: &str, f: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskError>,
    {
        let mut catalog = self.write();
        let task = catalog
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        f(task)?;
        Ok(task.clone())
    }

    fn ensure_active(task: &Task, action: &'static str) -> Result<(), TaskError> {
        if task.status.is_terminal() {
            return Err(TaskError::InvalidState {
                id: task.id.clone(),
                status: task.status,
                action,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Create / Query
    // ========================================================================

    /// Create a task. It is `assigned` when an agent is given, else `pending`.
    #[instrument(skip(self, req), fields(title = %req.title))]
    pub fn create(&self, req: CreateTaskRequest) -> Result<Task, TaskError> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(TaskError::Validation("title is required".to_string()));
        }

        let mut steps = Vec::with_capacity(req.steps.len());
        for (idx, s) in req.steps.into_iter().enumerate() {
            let id = idx + 1;
            if s.action.trim().is_empty() {
                return Err(TaskError::Validation(format!("step {}: action is required", id)));
            }
            if s.dod.is_empty() {
                return Err(TaskError::Validation(format!(
                    "step {}: at least one DoD item is required",
                    id
                )));
            }
            steps.push(Step {
                id,
                action: s.action,
                description: s.description,
                dod: s.dod,
                autonomy: s.autonomy.unwrap_or_default(),
                status: StepStatus::Pending,
                result: None,
                error: None,
                started_at: None,
                completed_at: None,
            });
        }

        let agent_id = req.agent_id.filter(|id| !id.trim().is_empty());
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: req.description,
            context: req.context,
            status: if agent_id.is_some() {
                TaskStatus::Assigned
            } else {
                TaskStatus::Pending
            },
            agent_name: agent_id.as_ref().and(req.agent_name),
            agent_id,
            ticket: req.ticket,
            plan: Plan {
                steps,
                required_ports: req.required_ports,
                on_blocker: req.on_blocker,
                on_ambiguity: req.on_ambiguity,
                on_complete: req.on_complete,
            },
            current_step: 0,
            result: None,
            error: None,
            artifacts: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        {
            let mut catalog = self.write();
            if let Some(agent_id) = &task.agent_id {
                catalog.index(agent_id, &task.id);
            }
            catalog.tasks.insert(task.id.clone(), task.clone());
        }

        info!("Created task {} ({} steps)", task.id, task.plan.steps.len());
        self.emit(TaskEvent::new(TaskEventKind::Created, &task));
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        self.read()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Tasks matching `filter`, oldest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .read()
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// The agent's most recent task that has not finished.
    pub fn get_by_agent(&self, agent_id: &str) -> Option<Task> {
        let catalog = self.read();
        let ids = catalog.by_agent.get(agent_id)?;
        ids.iter()
            .rev()
            .filter_map(|id| catalog.tasks.get(id))
            .find(|t| !t.status.is_terminal())
            .cloned()
    }

    /// Every task ever assigned to the agent, in creation order.
    pub fn tasks_for_agent(&self, agent_id: &str) -> Vec<Task> {
        let catalog = self.read();
        catalog
            .by_agent
            .get(agent_id)
            .map(|ids| ids.iter().filter_map(|id| catalog.tasks.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn current_step(&self, id: &str) -> Result<Step, TaskError> {
        let task = self.get(id)?;
        task.current()
            .cloned()
            .ok_or(TaskError::NoCurrentStep(task.id))
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Give a task to an agent. Only tasks that have not started can move.
    pub fn assign(
        &self,
        id: &str,
        agent_id: &str,
        agent_name: Option<String>,
    ) -> Result<Task, TaskError> {
        if agent_id.trim().is_empty() {
            return Err(TaskError::Validation("agent_id is required".to_string()));
        }

        let mut catalog = self.write();
        let task = catalog
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Assigned) {
            return Err(TaskError::InvalidState {
                id: id.to_string(),
                status: task.status,
                action: "assign",
            });
        }

        let previous = task.agent_id.replace(agent_id.to_string());
        task.agent_name = agent_name;
        task.status = TaskStatus::Assigned;
        let task = task.clone();

        if let Some(previous) = previous {
            catalog.unindex(&previous, id);
        }
        catalog.index(agent_id, id);
        drop(catalog);

        debug!("Assigned task {} to {}", id, agent_id);
        self.emit(
            TaskEvent::new(TaskEventKind::Assigned, &task)
                .with_message(format!("assigned to {}", agent_id)),
        );
        Ok(task)
    }

    /// Begin work: `assigned` to `in_progress`, first step in progress.
    pub fn start(&self, id: &str) -> Result<Task, TaskError> {
        let task = self.mutate(id, |task| {
            if task.status != TaskStatus::Assigned {
                return Err(TaskError::InvalidState {
                    id: task.id.clone(),
                    status: task.status,
                    action: "start",
                });
            }
            let now = Utc::now();
            task.status = TaskStatus::InProgress;
            task.started_at = Some(now);
            if let Some(first) = task.plan.steps.first_mut() {
                first.status = StepStatus::InProgress;
                first.started_at = Some(now);
                task.current_step = 1;
            }
            Ok(())
        })?;

        info!("Started task {}", id);
        self.emit(TaskEvent::new(TaskEventKind::Started, &task));
        Ok(task)
    }

    /// Record a step transition.
    ///
    /// A waiting or blocked step puts the task in `waiting`; completing a
    /// step moves the task on to the next one.
    pub fn update_step(
        &self,
        id: &str,
        step_id: usize,
        req: UpdateStepRequest,
    ) -> Result<Task, TaskError> {
        let mut updated = None;
        let task = self.mutate(id, |task| {
            Self::ensure_active(task, "update a step")?;
            if step_id == 0 || step_id > task.plan.steps.len() {
                return Err(TaskError::InvalidStep {
                    id: task.id.clone(),
                    step: step_id,
                });
            }

            let now = Utc::now();
            let step = &mut task.plan.steps[step_id - 1];
            step.status = req.status;
            step.result = req.result;
            step.error = req.error;
            match req.status {
                StepStatus::InProgress => step.started_at = Some(now),
                StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped => {
                    step.completed_at = Some(now)
                }
                _ => {}
            }
            updated = Some(step.clone());

            match req.status {
                StepStatus::Waiting | StepStatus::Blocked => task.status = TaskStatus::Waiting,
                StepStatus::InProgress => {
                    task.status = TaskStatus::InProgress;
                    task.current_step = step_id;
                }
                StepStatus::Completed if step_id < task.plan.steps.len() => {
                    let next = &mut task.plan.steps[step_id];
                    next.status = StepStatus::InProgress;
                    next.started_at = Some(now);
                    task.current_step = step_id + 1;
                    task.status = TaskStatus::InProgress;
                }
                _ => {}
            }
            Ok(())
        })?;

        debug!("Task {} step {} -> {:?} ({}%)", id, step_id, req.status, task.progress());
        let mut event = TaskEvent::new(TaskEventKind::Progress, &task);
        if let Some(step) = updated {
            event = event.with_step(step);
        }
        self.emit(event);
        Ok(task)
    }

    pub fn complete(&self, id: &str, req: CompleteTaskRequest) -> Result<Task, TaskError> {
        let task = self.mutate(id, |task| {
            Self::ensure_active(task, "complete")?;
            let now = Utc::now();
            task.status = TaskStatus::Completed;
            task.result = req.result;
            task.artifacts = req.artifacts;
            task.completed_at = Some(now);
            task.close_current_step(StepStatus::Completed, None, now);
            Ok(())
        })?;

        info!("Completed task {}", id);
        let mut event = TaskEvent::new(TaskEventKind::Completed, &task);
        event.progress = 100;
        self.emit(event);
        Ok(task)
    }

    pub fn fail(&self, id: &str, req: FailTaskRequest) -> Result<Task, TaskError> {
        if req.error.trim().is_empty() {
            return Err(TaskError::Validation("error is required".to_string()));
        }
        let task = self.mutate(id, |task| {
            Self::ensure_active(task, "fail")?;
            let now = Utc::now();
            task.status = TaskStatus::Failed;
            task.error = Some(req.error.clone());
            task.completed_at = Some(now);
            task.close_current_step(StepStatus::Failed, Some(&req.error), now);
            Ok(())
        })?;

        info!("Task {} failed: {}", id, req.error);
        self.emit(TaskEvent::new(TaskEventKind::Failed, &task).with_message(req.error));
        Ok(task)
    }

    pub fn cancel(&self, id: &str, reason: &str) -> Result<Task, TaskError> {
        let task = self.mutate(id, |task| {
            Self::ensure_active(task, "cancel")?;
            task.status = TaskStatus::Cancelled;
            task.error = Some(reason.to_string());
            task.completed_at = Some(Utc::now());
            Ok(())
        })?;

        info!("Cancelled task {}: {}", id, reason);
        self.emit(TaskEvent::new(TaskEventKind::Cancelled, &task).with_message(reason));
        Ok(task)
    }

    /// Remove a task from the catalog.
    pub fn delete(&self, id: &str) -> Result<Task, TaskError> {
        let mut catalog = self.write();
        let task = catalog
            .tasks
            .remove(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if let Some(agent_id) = &task.agent_id {
            catalog.unindex(agent_id, id);
        }
        Ok(task)
    }

    /// Cancel every unfinished task of an agent. Returns the cancelled ids.
    pub fn cancel_all_for_agent(&self, agent_id: &str, reason: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .tasks_for_agent(agent_id)
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id)
            .collect();
        ids.into_iter()
            .filter(|id| self.cancel(id, reason).is_ok())
            .collect()
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn count(&self) -> usize {
        self.read().tasks.len()
    }

    /// Number of tasks per status.
    pub fn count_by_status(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for task in self.read().tasks.values() {
            *counts.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Stop the event workers after they drain.
    pub async fn close(&self) {
        self.dispatcher.stop().await;
    }
}
