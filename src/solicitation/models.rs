// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Solicitation types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an agent needs from a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolicitationType {
    /// Technical blocker: an error, a missing dependency.
    #[default]
    Blocker,
    /// Unclear requirements.
    Ambiguity,
    /// A choice between options.
    Decision,
    /// Sign-off before continuing.
    Validation,
    Info,
    Completion,
    Progress,
    /// A shared resource such as a port is in use.
    ResourceConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Sort key: lower is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolicitationStatus {
    Pending,
    #[serde(alias = "answered")]
    Responded,
    Dismissed,
    Expired,
}

impl SolicitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Responded => "responded",
            Self::Dismissed => "dismissed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SolicitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from an agent for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solicitation {
    pub id: String,
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<usize>,
    #[serde(rename = "type")]
    pub kind: SolicitationType,
    pub urgency: Urgency,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub status: SolicitationStatus,
    /// The answer, or the dismissal reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Solicitation {
    pub fn is_pending(&self) -> bool {
        self.status == SolicitationStatus::Pending
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Request to create a solicitation (`POST /solicitations`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<usize>,
    #[serde(default, rename = "type")]
    pub kind: Option<SolicitationType>,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    #[serde(default, alias = "question")]
    pub message: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CreateRequest {
    pub fn new(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, kind: SolicitationType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondRequest {
    pub response: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DismissRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Filter for listing. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SolicitationFilter {
    pub agent_id: Option<String>,
    pub kind: Option<SolicitationType>,
    pub urgency: Option<Urgency>,
    pub status: Option<SolicitationStatus>,
}

impl SolicitationFilter {
    pub fn pending() -> Self {
        Self {
            status: Some(SolicitationStatus::Pending),
            ..Default::default()
        }
    }

    pub fn matches(&self, sol: &Solicitation) -> bool {
        self.agent_id.as_ref().map_or(true, |id| &sol.agent_id == id)
            && self.kind.map_or(true, |k| sol.kind == k)
            && self.urgency.map_or(true, |u| sol.urgency == u)
            && self.status.map_or(true, |s| sol.status == s)
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolicitationEventKind {
    New,
    Responded,
    Dismissed,
    Expired,
}

impl SolicitationEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Responded => "responded",
            Self::Dismissed => "dismissed",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SolicitationEvent {
    #[serde(rename = "type")]
    pub kind: SolicitationEventKind,
    pub solicitation: Solicitation,
    pub timestamp: DateTime<Utc>,
}

impl SolicitationEvent {
    pub fn new(kind: SolicitationEventKind, solicitation: &Solicitation) -> Self {
        Self {
            kind,
            solicitation: solicitation.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answered_alias() {
        let status: SolicitationStatus = serde_json::from_str("\"answered\"").unwrap();
        assert_eq!(status, SolicitationStatus::Responded);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"responded\"");
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateRequest =
            serde_json::from_str(r#"{"agent_id": "a1", "question": "Which DB?"}"#).unwrap();
        assert_eq!(req.message, "Which DB?");
        assert!(req.kind.is_none());
        assert!(req.urgency.is_none());

        let req: CreateRequest = serde_json::from_str(
            r#"{"agent_id": "a1", "message": "port busy", "type": "resource_conflict", "urgency": "critical"}"#,
        )
        .unwrap();
        assert_eq!(req.kind, Some(SolicitationType::ResourceConflict));
        assert_eq!(req.urgency, Some(Urgency::Critical));
    }

    #[test]
    fn test_urgency_rank() {
        let mut all = vec![Urgency::Low, Urgency::Critical, Urgency::Medium, Urgency::High];
        all.sort_by_key(|u| u.rank());
        assert_eq!(
            all,
            vec![Urgency::Critical, Urgency::High, Urgency::Medium, Urgency::Low]
        );
    }
}
