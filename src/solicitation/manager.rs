// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory solicitation catalog with response waiters.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use super::models::*;
use super::SolicitationError;
use crate::event::{Dispatcher, EventHandler};

#[derive(Default)]
struct Catalog {
    items: HashMap<String, Solicitation>,
    /// Solicitation ids per agent, in creation order.
    by_agent: HashMap<String, Vec<String>>,
    /// Callers blocked in `create_and_wait`. `None` means dismissed.
    waiters: HashMap<String, oneshot::Sender<Option<String>>>,
}

/// Central catalog of solicitations.
pub struct SolicitationManager {
    catalog: Mutex<Catalog>,
    dispatcher: Dispatcher<SolicitationEvent>,
}

/// Removes an abandoned waiter when `create_and_wait` is dropped.
struct WaiterGuard<'a> {
    manager: &'a SolicitationManager,
    id: String,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.manager.lock().waiters.remove(&self.id);
    }
}

impl SolicitationManager {
    /// Create a solicitation manager. Must be called inside a tokio runtime.
    pub fn new(handler: Option<EventHandler<SolicitationEvent>>) -> Self {
        let dispatcher = Dispatcher::new(handler, 4, 100);
        dispatcher.start();
        Self {
            catalog: Mutex::new(Catalog::default()),
            dispatcher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, kind: SolicitationEventKind, sol: &Solicitation) {
        self.dispatcher.dispatch(SolicitationEvent::new(kind, sol));
    }

    /// Record a new pending solicitation.
    #[instrument(skip(self, req), fields(agent_id = %req.agent_id))]
    pub fn create(&self, req: CreateRequest) -> Result<Solicitation, SolicitationError> {
        if req.agent_id.trim().is_empty() {
            return Err(SolicitationError::Validation("agent_id is required".to_string()));
        }
        if req.message.trim().is_empty() {
            return Err(SolicitationError::Validation("message is required".to_string()));
        }

        let sol = Solicitation {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: req.agent_id,
            agent_name: req.agent_name,
            task_id: req.task_id,
            step_id: req.step_id,
            kind: req.kind.unwrap_or_default(),
            urgency: req.urgency.unwrap_or_default(),
            message: req.message,
            context: req.context,
            options: req.options,
            metadata: req.metadata,
            status: SolicitationStatus::Pending,
            response: None,
            created_at: Utc::now(),
            responded_at: None,
        };

        {
            let mut catalog = self.lock();
            catalog
                .by_agent
                .entry(sol.agent_id.clone())
                .or_default()
                .push(sol.id.clone());
            catalog.items.insert(sol.id.clone(), sol.clone());
        }

        info!(
            "New {:?} solicitation {} from {} ({:?})",
            sol.kind, sol.id, sol.agent_id, sol.urgency
        );
        self.emit(SolicitationEventKind::New, &sol);
        Ok(sol)
    }

    /// Create a solicitation and wait for the answer.
    ///
    /// Resolves with `Some(response)` when answered and `None` when
    /// dismissed. A zero `timeout` waits forever; otherwise the solicitation
    /// expires when the timeout passes.
    pub async fn create_and_wait(
        &self,
        req: CreateRequest,
        timeout: Duration,
    ) -> Result<(Solicitation, Option<String>), SolicitationError> {
        let sol = self.create(req)?;
        let (tx, rx) = oneshot::channel();
        self.lock().waiters.insert(sol.id.clone(), tx);
        let _guard = WaiterGuard {
            manager: self,
            id: sol.id.clone(),
        };

        let outcome = if timeout.is_zero() {
            Ok(rx.await)
        } else {
            tokio::time::timeout(timeout, rx).await
        };

        match outcome {
            Ok(Ok(response)) => Ok((self.get(&sol.id)?, response)),
            // Sender dropped without an answer: the solicitation was deleted.
            Ok(Err(_)) => Err(SolicitationError::NotFound(sol.id)),
            Err(_) => {
                self.expire(&sol.id)?;
                let current = self.get(&sol.id)?;
                if current.status == SolicitationStatus::Responded {
                    let response = current.response.clone();
                    return Ok((current, response));
                }
                warn!("Solicitation {} expired after {:?}", sol.id, timeout);
                Err(SolicitationError::Timeout {
                    id: sol.id,
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Solicitation, SolicitationError> {
        self.lock()
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| SolicitationError::NotFound(id.to_string()))
    }

    /// Solicitations matching `filter`, most urgent first, then oldest first.
    pub fn list(&self, filter: &SolicitationFilter) -> Vec<Solicitation> {
        let mut list: Vec<Solicitation> = self
            .lock()
            .items
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            a.urgency
                .rank()
                .cmp(&b.urgency.rank())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn list_pending(&self) -> Vec<Solicitation> {
        self.list(&SolicitationFilter::pending())
    }

    /// All of an agent's solicitations, in creation order.
    pub fn for_agent(&self, agent_id: &str) -> Vec<Solicitation> {
        let catalog = self.lock();
        catalog
            .by_agent
            .get(agent_id)
            .map(|ids| ids.iter().filter_map(|id| catalog.items.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_for_agent(&self, agent_id: &str) -> Vec<Solicitation> {
        let mut list = self.for_agent(agent_id);
        list.retain(|s| s.is_pending());
        list
    }

    /// Close a pending solicitation and wake its waiter, if any.
    fn resolve(
        &self,
        id: &str,
        status: SolicitationStatus,
        response: Option<String>,
    ) -> Result<Solicitation, SolicitationError> {
        let mut catalog = self.lock();
        let sol = catalog
            .items
            .get_mut(id)
            .ok_or_else(|| SolicitationError::NotFound(id.to_string()))?;
        if !sol.is_pending() {
            return Err(SolicitationError::NotPending {
                id: id.to_string(),
                status: sol.status,
            });
        }

        sol.status = status;
        sol.response = response;
        sol.responded_at = Some(Utc::now());
        let sol = sol.clone();

        if let Some(waiter) = catalog.waiters.remove(id) {
            let answer = match status {
                SolicitationStatus::Responded => sol.response.clone(),
                _ => None,
            };
            // The waiter may already be gone.
            let _ = waiter.send(answer);
        }
        Ok(sol)
    }

    pub fn respond(&self, id: &str, req: RespondRequest) -> Result<Solicitation, SolicitationError> {
        if req.response.trim().is_empty() {
            return Err(SolicitationError::Validation("response is required".to_string()));
        }
        let sol = self.resolve(id, SolicitationStatus::Responded, Some(req.response))?;
        info!("Solicitation {} answered", id);
        self.emit(SolicitationEventKind::Responded, &sol);
        Ok(sol)
    }

    pub fn dismiss(&self, id: &str, req: DismissRequest) -> Result<Solicitation, SolicitationError> {
        let sol = self.resolve(id, SolicitationStatus::Dismissed, req.reason)?;
        debug!("Solicitation {} dismissed", id);
        self.emit(SolicitationEventKind::Dismissed, &sol);
        Ok(sol)
    }

    /// Mark a pending solicitation expired. Already-closed ones are left alone.
    pub fn expire(&self, id: &str) -> Result<(), SolicitationError> {
        match self.resolve(id, SolicitationStatus::Expired, None) {
            Ok(sol) => {
                self.emit(SolicitationEventKind::Expired, &sol);
                Ok(())
            }
            Err(SolicitationError::NotPending { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&self, id: &str) -> Result<Solicitation, SolicitationError> {
        let mut catalog = self.lock();
        let sol = catalog
            .items
            .remove(id)
            .ok_or_else(|| SolicitationError::NotFound(id.to_string()))?;
        if let Some(ids) = catalog.by_agent.get_mut(&sol.agent_id) {
            ids.retain(|sid| sid != id);
            if ids.is_empty() {
                catalog.by_agent.remove(&sol.agent_id);
            }
        }
        catalog.waiters.remove(id);
        Ok(sol)
    }

    /// Dismiss every pending solicitation of an agent. Returns their ids.
    pub fn dismiss_all_for_agent(&self, agent_id: &str, reason: &str) -> Vec<String> {
        self.pending_for_agent(agent_id)
            .into_iter()
            .filter_map(|sol| {
                let req = DismissRequest {
                    reason: Some(reason.to_string()),
                };
                self.dismiss(&sol.id, req).ok().map(|s| s.id)
            })
            .collect()
    }

    /// Number of solicitations per status.
    pub fn count(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for sol in self.lock().items.values() {
            *counts.entry(sol.status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Stop the event workers after they drain.
    pub async fn close(&self) {
        self.dispatcher.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_defaults_and_validation() {
        let sm = SolicitationManager::new(None);

        let sol = sm.create(CreateRequest::new("a1", "Which DB?")).unwrap();
        assert_eq!(sol.kind, SolicitationType::Blocker);
        assert_eq!(sol.urgency, Urgency::Medium);
        assert!(sol.is_pending());

        assert!(matches!(
            sm.create(CreateRequest::new("", "x")),
            Err(SolicitationError::Validation(_))
        ));
        assert!(matches!(
            sm.create(CreateRequest::new("a1", " ")),
            Err(SolicitationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_orders_by_urgency_then_age() {
        let sm = SolicitationManager::new(None);
        let low = sm
            .create(CreateRequest::new("a1", "later").with_urgency(Urgency::Low))
            .unwrap();
        let first_high = sm
            .create(CreateRequest::new("a2", "soon").with_urgency(Urgency::High))
            .unwrap();
        let critical = sm
            .create(CreateRequest::new("a1", "now").with_urgency(Urgency::Critical))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second_high = sm
            .create(CreateRequest::new("a1", "soon too").with_urgency(Urgency::High))
            .unwrap();

        let ids: Vec<String> = sm.list_pending().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![critical.id, first_high.id, second_high.id, low.id]);

        let filter = SolicitationFilter {
            agent_id: Some("a2".to_string()),
            ..Default::default()
        };
        assert_eq!(sm.list(&filter).len(), 1);
    }

    #[tokio::test]
    async fn test_respond_and_dismiss_only_pending() {
        let sm = SolicitationManager::new(None);
        let a = sm.create(CreateRequest::new("a1", "Which DB?")).unwrap();
        let b = sm.create(CreateRequest::new("a1", "Rename?")).unwrap();

        let answered = sm
            .respond(&a.id, RespondRequest { response: "Postgres".to_string() })
            .unwrap();
        assert_eq!(answered.status, SolicitationStatus::Responded);
        assert_eq!(answered.response.as_deref(), Some("Postgres"));
        assert!(answered.responded_at.is_some());

        let err = sm
            .respond(&a.id, RespondRequest { response: "MySQL".to_string() })
            .unwrap_err();
        assert!(matches!(err, SolicitationError::NotPending { .. }));
        assert!(matches!(
            sm.dismiss(&a.id, DismissRequest::default()),
            Err(SolicitationError::NotPending { .. })
        ));

        sm.dismiss(&b.id, DismissRequest::default()).unwrap();
        // Expiring a closed solicitation is a no-op.
        sm.expire(&b.id).unwrap();
        assert_eq!(sm.get(&b.id).unwrap().status, SolicitationStatus::Dismissed);
        assert!(matches!(sm.expire("nope"), Err(SolicitationError::NotFound(_))));

        let counts = sm.count();
        assert_eq!(counts["responded"], 1);
        assert_eq!(counts["dismissed"], 1);
    }

    #[tokio::test]
    async fn test_create_and_wait_receives_response() {
        let sm = Arc::new(SolicitationManager::new(None));
        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move {
                sm.create_and_wait(CreateRequest::new("a1", "Ship it?"), Duration::from_secs(5))
                    .await
            })
        };

        let pending = loop {
            if let Some(sol) = sm.list_pending().pop() {
                break sol;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        sm.respond(&pending.id, RespondRequest { response: "yes".to_string() })
            .unwrap();

        let (sol, response) = waiter.await.unwrap().unwrap();
        assert_eq!(response.as_deref(), Some("yes"));
        assert_eq!(sol.status, SolicitationStatus::Responded);
    }

    #[tokio::test]
    async fn test_create_and_wait_dismissed() {
        let sm = Arc::new(SolicitationManager::new(None));
        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move {
                sm.create_and_wait(CreateRequest::new("a1", "Ship it?"), Duration::ZERO)
                    .await
            })
        };

        loop {
            if !sm.list_pending().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sm.dismiss_all_for_agent("a1", "agent destroyed").len(), 1);

        let (sol, response) = waiter.await.unwrap().unwrap();
        assert!(response.is_none());
        assert_eq!(sol.status, SolicitationStatus::Dismissed);
        assert_eq!(sol.response.as_deref(), Some("agent destroyed"));
    }

    #[tokio::test]
    async fn test_create_and_wait_times_out() {
        let sm = SolicitationManager::new(None);
        let err = sm
            .create_and_wait(CreateRequest::new("a1", "Anyone?"), Duration::from_millis(50))
            .await
            .unwrap_err();
        let SolicitationError::Timeout { id, .. } = err else {
            panic!("expected timeout, got {:?}", err);
        };
        assert_eq!(sm.get(&id).unwrap().status, SolicitationStatus::Expired);
        assert!(sm.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let sm = SolicitationManager::new(None);
        let sol = sm.create(CreateRequest::new("a1", "x")).unwrap();
        sm.delete(&sol.id).unwrap();
        assert!(sm.for_agent("a1").is_empty());
        assert!(matches!(sm.delete(&sol.id), Err(SolicitationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_events() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sm = SolicitationManager::new(Some(Arc::new(move |e: SolicitationEvent| {
            sink.lock().unwrap().push(e.kind.as_str());
        })));

        let a = sm.create(CreateRequest::new("a1", "x")).unwrap();
        let b = sm.create(CreateRequest::new("a1", "y")).unwrap();
        sm.respond(&a.id, RespondRequest { response: "ok".to_string() })
            .unwrap();
        sm.expire(&b.id).unwrap();
        sm.close().await;

        let mut kinds = seen.lock().unwrap().clone();
        kinds.sort();
        assert_eq!(kinds, vec!["expired", "new", "new", "responded"]);
    }
}
