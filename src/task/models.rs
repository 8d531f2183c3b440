// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task, plan and step types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Statuses
// ============================================================================

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created without an owner.
    Pending,
    Assigned,
    InProgress,
    /// A step is waiting on input or blocked.
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Waiting,
    Blocked,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Counts toward task progress.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// When an agent should check back before continuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Work and validate the definition of done alone.
    Full,
    /// Work alone, ask when something is unclear.
    #[default]
    AskIfUnclear,
    /// Ask for validation before moving to the next step.
    ValidateBeforeNext,
    /// Work alone and report when finished.
    NotifyWhenDone,
}

// ============================================================================
// Task
// ============================================================================

/// One step of a plan. Ids are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: usize,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Definition-of-done items.
    pub dod: Vec<String>,
    #[serde(default)]
    pub autonomy: AutonomyLevel,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A port a plan needs, optionally only during some phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequirement {
    pub port: u16,
    pub service: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<String>,
}

/// The steps of a task and how the agent should handle trouble.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_ports: Vec<PortRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_blocker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_ambiguity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,
}

/// Something a task produced: a merge request, a file, a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// External ticket reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    pub plan: Plan,
    pub status: TaskStatus,
    /// 1-based index into `plan.steps`; 0 before the task starts.
    pub current_step: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Percentage of steps completed or skipped.
    pub fn progress(&self) -> u8 {
        let total = self.plan.steps.len();
        if total == 0 {
            return 0;
        }
        let done = self.plan.steps.iter().filter(|s| s.status.is_done()).count();
        (done * 100 / total) as u8
    }

    pub fn current(&self) -> Option<&Step> {
        self.current_step
            .checked_sub(1)
            .and_then(|idx| self.plan.steps.get(idx))
    }

    fn current_mut(&mut self) -> Option<&mut Step> {
        self.current_step
            .checked_sub(1)
            .and_then(|idx| self.plan.steps.get_mut(idx))
    }

    /// Close the current step with `status` unless it already finished.
    pub(crate) fn close_current_step(
        &mut self,
        status: StepStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) {
        if let Some(step) = self.current_mut() {
            if !step.status.is_done() {
                step.status = status;
                step.completed_at = Some(now);
                if let Some(error) = error {
                    step.error = Some(error.to_string());
                }
            }
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateStepRequest {
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dod: Vec<String>,
    #[serde(default)]
    pub autonomy: Option<AutonomyLevel>,
}

impl CreateStepRequest {
    pub fn new(action: impl Into<String>, dod: &[&str]) -> Self {
        Self {
            action: action.into(),
            dod: dod.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Request to create a task (`POST /tasks`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default, alias = "subject")]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub ticket: Option<String>,
    #[serde(default)]
    pub steps: Vec<CreateStepRequest>,
    #[serde(default)]
    pub required_ports: Vec<PortRequirement>,
    #[serde(default)]
    pub on_blocker: Option<String>,
    #[serde(default)]
    pub on_ambiguity: Option<String>,
    #[serde(default)]
    pub on_complete: Option<String>,
}

impl CreateTaskRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_step(mut self, step: CreateStepRequest) -> Self {
        self.steps.push(step);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStepRequest {
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UpdateStepRequest {
    pub fn new(status: StepStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteTaskRequest {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailTaskRequest {
    pub error: String,
}

/// Filter for [`TaskManager::list`](super::TaskManager::list).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if task.agent_id.as_deref() != Some(agent_id.as_str()) {
                return false;
            }
        }
        self.status.map_or(true, |status| task.status == status)
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventKind {
    Created,
    Assigned,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Assigned => "assigned",
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: TaskEventKind,
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    /// 0-100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind, task: &Task) -> Self {
        Self {
            kind,
            progress: task.progress(),
            task: task.clone(),
            step: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
