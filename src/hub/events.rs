// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Broadcast of hub events to SSE subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::agent::AgentEvent;
use crate::port::PortEvent;
use crate::solicitation::SolicitationEvent;
use crate::task::TaskEvent;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_BUFFER: usize = 100;

/// An event as sent to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct HubEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl HubEvent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    fn from_serializable<T: Serialize>(kind: String, payload: &T) -> Self {
        Self::new(kind, serde_json::to_value(payload).unwrap_or(Value::Null))
    }
}

impl From<AgentEvent> for HubEvent {
    fn from(event: AgentEvent) -> Self {
        Self::new(event.event_type(), event.payload())
    }
}

impl From<PortEvent> for HubEvent {
    fn from(event: PortEvent) -> Self {
        Self::from_serializable(format!("port.{}", event.kind.as_str()), &event)
    }
}

impl From<TaskEvent> for HubEvent {
    fn from(event: TaskEvent) -> Self {
        Self::from_serializable(format!("task.{}", event.kind.as_str()), &event)
    }
}

impl From<SolicitationEvent> for HubEvent {
    fn from(event: SolicitationEvent) -> Self {
        Self::from_serializable(format!("solicitation.{}", event.kind.as_str()), &event)
    }
}

/// Fan-out of [`HubEvent`]s. Publishing never blocks; a subscriber that
/// falls more than [`EVENT_BUFFER`] events behind skips ahead.
#[derive(Debug)]
pub struct EventHub {
    tx: broadcast::Sender<HubEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Send an event to every current subscriber.
    pub fn publish(&self, event: impl Into<HubEvent>) {
        // No subscribers is not an error.
        let _ = self.tx.send(event.into());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentStatus};

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(AgentEvent::Spawned(Agent::new("a1", "front")));

        let ev = a.recv().await.unwrap();
        assert_eq!(ev.kind, "agent.spawned");
        assert_eq!(ev.data["id"], "a1");
        assert_eq!(b.recv().await.unwrap().kind, "agent.spawned");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::new();
        hub.publish(HubEvent::new("custom", Value::Null));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        for i in 0..(EVENT_BUFFER + 10) {
            hub.publish(HubEvent::new("tick", serde_json::json!(i)));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(10))
        ));
        assert_eq!(rx.recv().await.unwrap().data, serde_json::json!(10));
    }

    #[test]
    fn test_agent_status_event_type() {
        let event: HubEvent = AgentEvent::StatusChanged {
            id: "a1".to_string(),
            name: "front".to_string(),
            previous: AgentStatus::Ready,
            status: AgentStatus::Dead,
        }
        .into();
        assert_eq!(event.kind, "agent.status");
    }
}
