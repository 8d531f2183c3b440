// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire and bookkeeping types for port leasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Leases and Waiters
// ============================================================================

/// A port currently held by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLease {
    pub port: u16,
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    pub leased_at: DateTime<Utc>,
}

impl PortLease {
    pub(crate) fn new(
        port: u16,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            port,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            service: service.into(),
            process_id: None,
            leased_at: Utc::now(),
        }
    }
}

/// An agent queued for a port that someone else holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortWaiter {
    pub agent_id: String,
    pub agent_name: String,
    pub port: u16,
    pub service: String,
    pub waiting_since: DateTime<Utc>,
    /// Seconds to wait before giving up; 0 waits forever.
    pub timeout: u64,
}

/// Coarse state of a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Free,
    Leased,
    /// No lease but waiters still queued; only seen during a handoff.
    Waiting,
}

/// Full status of a port as reported by `GET /ports/:port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortStatus {
    pub port: u16,
    pub status: PortState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<PortLease>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiters: Vec<PortWaiter>,
}

// ============================================================================
// Events
// ============================================================================

/// Kind of port event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortEventKind {
    Acquired,
    Released,
    Waiting,
    Timeout,
    Conflict,
}

impl PortEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Released => "released",
            Self::Waiting => "waiting",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
        }
    }
}

/// Notification emitted by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortEvent {
    #[serde(rename = "type")]
    pub kind: PortEventKind,
    pub port: u16,
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<PortLease>,
    pub timestamp: DateTime<Utc>,
}

impl PortEvent {
    pub(crate) fn new(kind: PortEventKind, lease: &PortLease) -> Self {
        Self {
            kind,
            port: lease.port,
            agent_id: lease.agent_id.clone(),
            agent_name: lease.agent_name.clone(),
            service: lease.service.clone(),
            held_by: None,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn for_request(
        kind: PortEventKind,
        req: &AcquireRequest,
        held_by: Option<PortLease>,
    ) -> Self {
        Self {
            kind,
            port: req.port,
            agent_id: req.agent_id.clone(),
            agent_name: req.agent_name.clone(),
            service: req.service.clone(),
            held_by,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Requests and Responses
// ============================================================================

/// Request to lease a port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub port: u16,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub service: String,
    /// Queue behind the current holder instead of failing fast.
    #[serde(default)]
    pub wait: bool,
    /// Seconds to wait; 0 waits forever.
    #[serde(default)]
    pub timeout: u64,
}

impl AcquireRequest {
    /// Build a non-waiting request.
    pub fn new(port: u16, agent_id: impl Into<String>) -> Self {
        Self {
            port,
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Wait for the port, giving up after `timeout_secs` (0 = never).
    pub fn waiting(mut self, timeout_secs: u64) -> Self {
        self.wait = true;
        self.timeout = timeout_secs;
        self
    }
}

/// Outcome of an acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquireStatus {
    Acquired,
    Busy,
    Timeout,
}

/// Response to an acquire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub status: AcquireStatus,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<PortLease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<PortLease>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl AcquireResponse {
    pub(crate) fn acquired(lease: PortLease) -> Self {
        Self {
            status: AcquireStatus::Acquired,
            port: lease.port,
            message: format!("port {} acquired", lease.port),
            lease: Some(lease),
            held_by: None,
        }
    }

    pub(crate) fn busy(port: u16, holder: PortLease) -> Self {
        Self {
            status: AcquireStatus::Busy,
            port,
            message: format!("port {} is held by {}", port, holder.display_name()),
            lease: None,
            held_by: Some(holder),
        }
    }

    pub(crate) fn timeout(port: u16, holder: Option<PortLease>, secs: u64) -> Self {
        Self {
            status: AcquireStatus::Timeout,
            port,
            lease: None,
            held_by: holder,
            message: format!("timed out after {}s waiting for port {}", secs, port),
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.status == AcquireStatus::Acquired
    }
}

impl PortLease {
    fn display_name(&self) -> &str {
        if self.agent_name.is_empty() {
            &self.agent_id
        } else {
            &self.agent_name
        }
    }
}

/// Request to release a held port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub port: u16,
    pub agent_id: String,
}

/// Request to release a port regardless of holder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForceReleaseRequest {
    /// Taken from the URL when sent over HTTP.
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_request_defaults() {
        let req: AcquireRequest = serde_json::from_str(r#"{"port": 5173, "agent_id": "a1"}"#).unwrap();
        assert_eq!(req.port, 5173);
        assert!(!req.wait);
        assert_eq!(req.timeout, 0);
        assert!(req.agent_name.is_empty());
    }

    #[test]
    fn test_event_serializes_type_field() {
        let lease = PortLease::new(5173, "a1", "alpha", "vite");
        let event = PortEvent::new(PortEventKind::Acquired, &lease);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "acquired");
        assert_eq!(json["service"], "vite");
        assert!(json.get("held_by").is_none());
    }

    #[test]
    fn test_busy_message_prefers_name() {
        let holder = PortLease::new(3000, "a1", "alpha", "");
        let resp = AcquireResponse::busy(3000, holder);
        assert_eq!(resp.status, AcquireStatus::Busy);
        assert!(resp.message.contains("alpha"));

        let holder = PortLease::new(3000, "a2", "", "");
        assert!(AcquireResponse::busy(3000, holder).message.contains("a2"));
    }

    #[test]
    fn test_port_state_wire_format() {
        assert_eq!(serde_json::to_string(&PortState::Waiting).unwrap(), "\"waiting\"");
        assert_eq!(serde_json::to_string(&AcquireStatus::Timeout).unwrap(), "\"timeout\"");
    }
}
