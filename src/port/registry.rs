// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The port lease registry.

use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use super::models::*;
use super::PortError;
use crate::event::{Dispatcher, EventHandler};
use crate::telemetry::GLOBAL_METRICS;

const EVENT_WORKERS: usize = 4;
const EVENT_QUEUE: usize = 100;

struct WaiterEntry {
    ticket: u64,
    waiter: PortWaiter,
    grant: oneshot::Sender<PortLease>,
}

struct LeaseSlot {
    lease: PortLease,
    /// Ticket of the waiter this lease was handed to, if any.
    ticket: Option<u64>,
}

#[derive(Default)]
struct RegistryState {
    leases: HashMap<u16, LeaseSlot>,
    waiters: HashMap<u16, VecDeque<WaiterEntry>>,
    next_ticket: u64,
}

impl RegistryState {
    fn remove_waiter(&mut self, port: u16, ticket: u64) -> bool {
        let Some(queue) = self.waiters.get_mut(&port) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|e| e.ticket != ticket);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.waiters.remove(&port);
        }
        removed
    }
}

/// Exclusive port leases with per-port FIFO waiters.
///
/// All state lives behind one mutex that is never held across an `.await`.
/// When a lease is released the next waiter is granted the port while the
/// lock is still held, so no third agent can slip in between.
pub struct PortRegistry {
    state: Mutex<RegistryState>,
    dispatcher: Dispatcher<PortEvent>,
}

impl PortRegistry {
    /// Create a registry whose events are delivered to `handler`.
    ///
    /// Starts the event workers, so this must run inside a tokio runtime.
    pub fn new(handler: Option<EventHandler<PortEvent>>) -> Self {
        let dispatcher = Dispatcher::new(handler, EVENT_WORKERS, EVENT_QUEUE);
        dispatcher.start();
        Self {
            state: Mutex::new(RegistryState::default()),
            dispatcher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PortEvent) {
        self.dispatcher.dispatch(event);
    }

    fn validate(port: u16, agent_id: &str) -> Result<(), PortError> {
        if port == 0 {
            return Err(PortError::InvalidPort);
        }
        if agent_id.is_empty() {
            return Err(PortError::MissingAgentId);
        }
        Ok(())
    }

    /// Lease a port.
    ///
    /// A free port is leased immediately. A port already held by the same
    /// agent returns the existing lease. Otherwise the request either fails
    /// fast with [`AcquireStatus::Busy`] or, with `wait`, queues until the
    /// port is handed over or `timeout` seconds pass. Dropping the returned
    /// future withdraws the request.
    pub async fn acquire(&self, req: AcquireRequest) -> Result<AcquireResponse, PortError> {
        Self::validate(req.port, &req.agent_id)?;
        let port = req.port;

        let (ticket, mut rx) = {
            let mut state = self.lock();
            let holder = state.leases.get(&port).map(|slot| slot.lease.clone());
            match holder {
                None => {
                    let lease =
                        PortLease::new(port, &req.agent_id, &req.agent_name, &req.service);
                    state.leases.insert(
                        port,
                        LeaseSlot {
                            lease: lease.clone(),
                            ticket: None,
                        },
                    );
                    self.emit(PortEvent::new(PortEventKind::Acquired, &lease));
                    debug!("Port {} leased to {}", port, req.agent_id);
                    return Ok(AcquireResponse::acquired(lease));
                }
                Some(existing) if existing.agent_id == req.agent_id => {
                    return Ok(AcquireResponse::acquired(existing));
                }
                Some(existing) if !req.wait => {
                    GLOBAL_METRICS.increment("port.conflict");
                    self.emit(PortEvent::for_request(
                        PortEventKind::Conflict,
                        &req,
                        Some(existing.clone()),
                    ));
                    debug!(
                        "Port {} busy: {} requested, held by {}",
                        port, req.agent_id, existing.agent_id
                    );
                    return Ok(AcquireResponse::busy(port, existing));
                }
                Some(existing) => {
                    let ticket = state.next_ticket;
                    state.next_ticket += 1;
                    let (tx, rx) = oneshot::channel();
                    state.waiters.entry(port).or_default().push_back(WaiterEntry {
                        ticket,
                        waiter: PortWaiter {
                            agent_id: req.agent_id.clone(),
                            agent_name: req.agent_name.clone(),
                            port,
                            service: req.service.clone(),
                            waiting_since: Utc::now(),
                            timeout: req.timeout,
                        },
                        grant: tx,
                    });
                    self.emit(PortEvent::for_request(
                        PortEventKind::Waiting,
                        &req,
                        Some(existing),
                    ));
                    debug!("{} queued for port {}", req.agent_id, port);
                    (ticket, rx)
                }
            }
        };

        let started = Instant::now();
        let mut guard = WaitGuard {
            registry: self,
            port,
            ticket,
            armed: true,
        };

        let outcome = if req.timeout == 0 {
            Ok((&mut rx).await)
        } else {
            tokio::time::timeout(Duration::from_secs(req.timeout), &mut rx).await
        };
        guard.armed = false;
        GLOBAL_METRICS.record_operation("port.wait", started.elapsed());

        match outcome {
            Ok(Ok(lease)) => Ok(AcquireResponse::acquired(lease)),
            Ok(Err(_)) => Err(PortError::WaitCancelled(port)),
            Err(_) => self.finish_timed_out_wait(&req, ticket, &mut rx),
        }
    }

    fn finish_timed_out_wait(
        &self,
        req: &AcquireRequest,
        ticket: u64,
        rx: &mut oneshot::Receiver<PortLease>,
    ) -> Result<AcquireResponse, PortError> {
        let mut state = self.lock();
        if state.remove_waiter(req.port, ticket) {
            let holder = state.leases.get(&req.port).map(|slot| slot.lease.clone());
            drop(state);
            GLOBAL_METRICS.increment("port.timeout");
            self.emit(PortEvent::for_request(
                PortEventKind::Timeout,
                req,
                holder.clone(),
            ));
            info!(
                "{} gave up waiting for port {} after {}s",
                req.agent_id, req.port, req.timeout
            );
            return Ok(AcquireResponse::timeout(req.port, holder, req.timeout));
        }

        // Granted between the deadline firing and the lock being taken.
        match rx.try_recv() {
            Ok(lease) => Ok(AcquireResponse::acquired(lease)),
            Err(_) => Err(PortError::WaitCancelled(req.port)),
        }
    }

    /// Withdraw a waiter whose future was dropped. If the lease was already
    /// handed to it, pass the port on to the next in line.
    fn abandon_wait(&self, port: u16, ticket: u64) {
        let mut state = self.lock();
        if state.remove_waiter(port, ticket) {
            trace!("Withdrew cancelled waiter for port {}", port);
            return;
        }
        let granted_here = state
            .leases
            .get(&port)
            .is_some_and(|slot| slot.ticket == Some(ticket));
        if granted_here {
            if let Some(slot) = state.leases.remove(&port) {
                self.emit(PortEvent::new(PortEventKind::Released, &slot.lease));
                debug!("Port {} granted to a cancelled waiter, passing on", port);
            }
            self.grant_next(&mut state, port);
        }
    }

    /// Hand `port` to the first live waiter. Caller holds the lock and has
    /// already removed the previous lease.
    fn grant_next(&self, state: &mut RegistryState, port: u16) {
        loop {
            let Some(queue) = state.waiters.get_mut(&port) else {
                return;
            };
            let Some(entry) = queue.pop_front() else {
                state.waiters.remove(&port);
                return;
            };
            if queue.is_empty() {
                state.waiters.remove(&port);
            }

            let lease = PortLease::new(
                port,
                entry.waiter.agent_id,
                entry.waiter.agent_name,
                entry.waiter.service,
            );
            if entry.grant.send(lease.clone()).is_err() {
                trace!("Waiter for port {} went away before grant", port);
                continue;
            }

            self.emit(PortEvent::new(PortEventKind::Acquired, &lease));
            debug!("Port {} handed to waiting agent {}", port, lease.agent_id);
            state.leases.insert(
                port,
                LeaseSlot {
                    lease,
                    ticket: Some(entry.ticket),
                },
            );
            return;
        }
    }

    /// Release a port held by the requesting agent.
    pub fn release(&self, req: ReleaseRequest) -> Result<(), PortError> {
        Self::validate(req.port, &req.agent_id)?;
        let mut state = self.lock();
        let slot = match state.leases.get(&req.port) {
            None => return Err(PortError::NotLeased(req.port)),
            Some(slot) if slot.lease.agent_id != req.agent_id => {
                return Err(PortError::NotHolder {
                    port: req.port,
                    holder: slot.lease.agent_id.clone(),
                });
            }
            Some(_) => state.leases.remove(&req.port),
        };
        if let Some(slot) = slot {
            self.emit(PortEvent::new(PortEventKind::Released, &slot.lease));
            debug!("Port {} released by {}", req.port, req.agent_id);
        }
        self.grant_next(&mut state, req.port);
        Ok(())
    }

    /// Release a port regardless of who holds it, returning the removed lease.
    pub fn force_release(&self, req: ForceReleaseRequest) -> Result<PortLease, PortError> {
        if req.port == 0 {
            return Err(PortError::InvalidPort);
        }
        let mut state = self.lock();
        let slot = state
            .leases
            .remove(&req.port)
            .ok_or(PortError::NotLeased(req.port))?;
        self.emit(PortEvent::new(PortEventKind::Released, &slot.lease));
        warn!(
            "Port {} force-released from {} ({})",
            req.port,
            slot.lease.agent_id,
            req.reason.as_deref().unwrap_or("no reason given")
        );
        self.grant_next(&mut state, req.port);
        Ok(slot.lease)
    }

    /// Release every lease held by an agent and drop its queued waits.
    /// Returns the released ports in ascending order.
    pub fn release_all_for_agent(&self, agent_id: &str) -> Vec<u16> {
        let mut state = self.lock();

        // Waiters go first so a release below cannot hand a port back to
        // the agent being cleaned up.
        state.waiters.retain(|_, queue| {
            queue.retain(|e| e.waiter.agent_id != agent_id);
            !queue.is_empty()
        });

        let mut ports: Vec<u16> = state
            .leases
            .iter()
            .filter(|(_, slot)| slot.lease.agent_id == agent_id)
            .map(|(port, _)| *port)
            .collect();
        ports.sort_unstable();

        for port in &ports {
            if let Some(slot) = state.leases.remove(port) {
                self.emit(PortEvent::new(PortEventKind::Released, &slot.lease));
            }
            self.grant_next(&mut state, *port);
        }
        if !ports.is_empty() {
            debug!("Released ports {:?} held by {}", ports, agent_id);
        }
        ports
    }

    /// Lease the first port in `start..end` that is neither leased nor bound
    /// by another process on this host.
    pub fn acquire_in_range(
        &self,
        start: u16,
        end: u16,
        agent_id: &str,
        agent_name: &str,
        service: &str,
    ) -> Result<PortLease, PortError> {
        Self::validate(start.max(1), agent_id)?;
        let mut state = self.lock();
        for port in start.max(1)..end {
            if state.leases.contains_key(&port) || !port_is_bindable(port) {
                continue;
            }
            let lease = PortLease::new(port, agent_id, agent_name, service);
            state.leases.insert(
                port,
                LeaseSlot {
                    lease: lease.clone(),
                    ticket: None,
                },
            );
            self.emit(PortEvent::new(PortEventKind::Acquired, &lease));
            debug!("Port {} allocated to {}", port, agent_id);
            return Ok(lease);
        }
        Err(PortError::NoFreePort { start, end })
    }

    /// Record the OS process that is serving a leased port.
    pub fn set_process_id(&self, port: u16, pid: u32) -> Result<(), PortError> {
        let mut state = self.lock();
        let slot = state
            .leases
            .get_mut(&port)
            .ok_or(PortError::NotLeased(port))?;
        slot.lease.process_id = Some(pid);
        Ok(())
    }

    /// Status of one port.
    pub fn get_status(&self, port: u16) -> PortStatus {
        let state = self.lock();
        let lease = state.leases.get(&port).map(|slot| slot.lease.clone());
        let waiters: Vec<PortWaiter> = state
            .waiters
            .get(&port)
            .map(|q| q.iter().map(|e| e.waiter.clone()).collect())
            .unwrap_or_default();
        let status = match (&lease, waiters.is_empty()) {
            (Some(_), _) => PortState::Leased,
            (None, false) => PortState::Waiting,
            (None, true) => PortState::Free,
        };
        PortStatus {
            port,
            status,
            lease,
            waiters,
        }
    }

    /// All leases, ordered by port.
    pub fn list_leases(&self) -> Vec<PortLease> {
        let state = self.lock();
        let mut leases: Vec<PortLease> =
            state.leases.values().map(|slot| slot.lease.clone()).collect();
        leases.sort_by_key(|l| l.port);
        leases
    }

    /// All waiters, ordered by port and then queue position.
    pub fn list_waiters(&self) -> Vec<PortWaiter> {
        let state = self.lock();
        let mut ports: Vec<&u16> = state.waiters.keys().collect();
        ports.sort_unstable();
        ports
            .into_iter()
            .flat_map(|port| state.waiters[port].iter().map(|e| e.waiter.clone()))
            .collect()
    }

    /// Leases held by one agent, ordered by port.
    pub fn leases_for_agent(&self, agent_id: &str) -> Vec<PortLease> {
        self.list_leases()
            .into_iter()
            .filter(|l| l.agent_id == agent_id)
            .collect()
    }

    /// Cancel all pending waits and stop the event workers after they drain.
    pub async fn close(&self) {
        {
            let mut state = self.lock();
            state.waiters.clear();
        }
        self.dispatcher.stop().await;
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PortRegistry")
            .field("leases", &state.leases.len())
            .field("waiting_ports", &state.waiters.len())
            .finish()
    }
}

struct WaitGuard<'a> {
    registry: &'a PortRegistry,
    port: u16,
    ticket: u64,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon_wait(self.port, self.ticket);
        }
    }
}

fn port_is_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> Arc<PortRegistry> {
        Arc::new(PortRegistry::new(None))
    }

    async fn wait_for_waiters(registry: &PortRegistry, count: usize) {
        for _ in 0..200 {
            if registry.list_waiters().len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} waiters, found {}",
            count,
            registry.list_waiters().len()
        );
    }

    #[tokio::test]
    async fn test_acquire_free_port() {
        let reg = registry();
        let resp = reg
            .acquire(AcquireRequest::new(5173, "a1").with_service("vite"))
            .await
            .unwrap();
        assert!(resp.is_acquired());
        assert_eq!(resp.lease.unwrap().service, "vite");

        let status = reg.get_status(5173);
        assert_eq!(status.status, PortState::Leased);
        assert_eq!(status.lease.unwrap().agent_id, "a1");
        assert_eq!(reg.get_status(5174).status, PortState::Free);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_is_exclusive() {
        let reg = registry();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                tokio::spawn(async move {
                    reg.acquire(AcquireRequest::new(6000, format!("a{}", i)).waiting(10))
                        .await
                })
            })
            .collect();

        wait_for_waiters(&reg, 7).await;
        assert_eq!(reg.list_leases().len(), 1);

        let holder = reg.get_status(6000).lease.unwrap().agent_id;
        reg.release(ReleaseRequest {
            port: 6000,
            agent_id: holder.clone(),
        })
        .unwrap();
        wait_for_waiters(&reg, 6).await;
        let next = reg.get_status(6000).lease.unwrap().agent_id;
        assert_ne!(next, holder);

        reg.close().await;
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_busy_without_wait() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(5173, "a1")).await.unwrap();

        let resp = reg.acquire(AcquireRequest::new(5173, "a2")).await.unwrap();
        assert_eq!(resp.status, AcquireStatus::Busy);
        assert_eq!(resp.held_by.unwrap().agent_id, "a1");
        assert!(reg.list_waiters().is_empty());
    }

    #[tokio::test]
    async fn test_same_agent_reacquire() {
        let reg = registry();
        let first = reg.acquire(AcquireRequest::new(3000, "a1")).await.unwrap();
        let again = reg.acquire(AcquireRequest::new(3000, "a1")).await.unwrap();
        assert!(again.is_acquired());
        assert_eq!(first.lease.unwrap().leased_at, again.lease.unwrap().leased_at);
        assert_eq!(reg.list_leases().len(), 1);
    }

    #[tokio::test]
    async fn test_validation() {
        let reg = registry();
        assert_eq!(
            reg.acquire(AcquireRequest::new(0, "a1")).await.unwrap_err(),
            PortError::InvalidPort
        );
        assert_eq!(
            reg.acquire(AcquireRequest::new(80, "")).await.unwrap_err(),
            PortError::MissingAgentId
        );
    }

    #[tokio::test]
    async fn test_release_enforces_ownership() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(3000, "a1")).await.unwrap();

        let err = reg
            .release(ReleaseRequest {
                port: 3000,
                agent_id: "a2".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, PortError::NotHolder { port: 3000, .. }));
        assert_eq!(reg.get_status(3000).status, PortState::Leased);

        reg.release(ReleaseRequest {
            port: 3000,
            agent_id: "a1".to_string(),
        })
        .unwrap();
        assert_eq!(reg.get_status(3000).status, PortState::Free);

        let err = reg
            .release(ReleaseRequest {
                port: 3000,
                agent_id: "a1".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, PortError::NotLeased(3000));
    }

    #[tokio::test]
    async fn test_waiter_receives_port_on_release() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(5173, "a1").with_agent_name("alpha"))
            .await
            .unwrap();

        let waiting = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.acquire(
                    AcquireRequest::new(5173, "a2")
                        .with_agent_name("beta")
                        .waiting(10),
                )
                .await
            })
        };
        wait_for_waiters(&reg, 1).await;
        assert_eq!(reg.get_status(5173).waiters[0].agent_id, "a2");

        reg.release(ReleaseRequest {
            port: 5173,
            agent_id: "a1".to_string(),
        })
        .unwrap();

        let resp = waiting.await.unwrap().unwrap();
        assert!(resp.is_acquired());
        let lease = reg.get_status(5173).lease.unwrap();
        assert_eq!(lease.agent_id, "a2");
        assert_eq!(lease.agent_name, "beta");
        assert!(reg.list_waiters().is_empty());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(4000, "a1")).await.unwrap();

        let mut handles = Vec::new();
        for (i, agent) in ["a2", "a3", "a4"].into_iter().enumerate() {
            let reg_task = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg_task
                    .acquire(AcquireRequest::new(4000, agent).waiting(0))
                    .await
            }));
            wait_for_waiters(&reg, i + 1).await;
        }

        let mut holder = "a1".to_string();
        for (handle, expected) in handles.into_iter().zip(["a2", "a3", "a4"]) {
            reg.release(ReleaseRequest {
                port: 4000,
                agent_id: holder.clone(),
            })
            .unwrap();
            let resp = handle.await.unwrap().unwrap();
            assert_eq!(resp.lease.unwrap().agent_id, expected);
            holder = expected.to_string();
        }
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(8080, "a1")).await.unwrap();

        let resp = reg
            .acquire(AcquireRequest::new(8080, "a2").waiting(1))
            .await
            .unwrap();
        assert_eq!(resp.status, AcquireStatus::Timeout);
        assert_eq!(resp.held_by.unwrap().agent_id, "a1");
        assert!(reg.list_waiters().is_empty());
        assert_eq!(reg.get_status(8080).lease.unwrap().agent_id, "a1");
    }

    #[tokio::test]
    async fn test_cancelled_wait_is_withdrawn() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(9000, "a1")).await.unwrap();

        let handle = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.acquire(AcquireRequest::new(9000, "a2").waiting(0))
                    .await
            })
        };
        wait_for_waiters(&reg, 1).await;

        handle.abort();
        let _ = handle.await;
        assert!(reg.list_waiters().is_empty());

        reg.release(ReleaseRequest {
            port: 9000,
            agent_id: "a1".to_string(),
        })
        .unwrap();
        assert_eq!(reg.get_status(9000).status, PortState::Free);
    }

    #[tokio::test]
    async fn test_release_all_for_agent() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(3001, "a1")).await.unwrap();
        reg.acquire(AcquireRequest::new(3000, "a1")).await.unwrap();
        reg.acquire(AcquireRequest::new(3002, "a2")).await.unwrap();

        let waiting = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.acquire(AcquireRequest::new(3002, "a1").waiting(0))
                    .await
            })
        };
        wait_for_waiters(&reg, 1).await;

        let released = reg.release_all_for_agent("a1");
        assert_eq!(released, vec![3000, 3001]);
        assert!(reg.leases_for_agent("a1").is_empty());
        assert_eq!(reg.leases_for_agent("a2").len(), 1);
        assert_eq!(
            waiting.await.unwrap().unwrap_err(),
            PortError::WaitCancelled(3002)
        );
    }

    #[tokio::test]
    async fn test_force_release_hands_over() {
        let reg = registry();
        reg.acquire(AcquireRequest::new(6006, "a1")).await.unwrap();
        reg.set_process_id(6006, 4242).unwrap();

        let waiting = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                reg.acquire(AcquireRequest::new(6006, "a2").waiting(5))
                    .await
            })
        };
        wait_for_waiters(&reg, 1).await;

        let removed = reg
            .force_release(ForceReleaseRequest {
                port: 6006,
                reason: Some("stuck".to_string()),
            })
            .unwrap();
        assert_eq!(removed.agent_id, "a1");
        assert_eq!(removed.process_id, Some(4242));

        assert!(waiting.await.unwrap().unwrap().is_acquired());
        assert_eq!(reg.get_status(6006).lease.unwrap().agent_id, "a2");

        let err = reg
            .force_release(ForceReleaseRequest {
                port: 6007,
                reason: None,
            })
            .unwrap_err();
        assert_eq!(err, PortError::NotLeased(6007));
    }

    #[tokio::test]
    async fn test_acquire_in_range_skips_leased_and_bound_ports() {
        let reg = registry();
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let bound = listener.local_addr().unwrap().port();

        let err = reg
            .acquire_in_range(bound, bound + 1, "a1", "alpha", "agentapi")
            .unwrap_err();
        assert!(matches!(err, PortError::NoFreePort { .. }));
        drop(listener);

        let free = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        reg.acquire(AcquireRequest::new(free, "other")).await.unwrap();
        let err = reg
            .acquire_in_range(free, free + 1, "a1", "alpha", "agentapi")
            .unwrap_err();
        assert!(matches!(err, PortError::NoFreePort { .. }));
    }

    #[tokio::test]
    async fn test_set_process_id_requires_lease() {
        let reg = registry();
        assert_eq!(
            reg.set_process_id(1234, 1).unwrap_err(),
            PortError::NotLeased(1234)
        );
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reg = PortRegistry::new(Some(Arc::new(move |e: PortEvent| {
            sink.lock().unwrap().push(e.kind);
        })));

        reg.acquire(AcquireRequest::new(5173, "a1")).await.unwrap();
        reg.acquire(AcquireRequest::new(5173, "a2")).await.unwrap();
        reg.release(ReleaseRequest {
            port: 5173,
            agent_id: "a1".to_string(),
        })
        .unwrap();
        reg.close().await;

        let mut kinds = seen.lock().unwrap().clone();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(
            kinds,
            vec![
                PortEventKind::Acquired,
                PortEventKind::Conflict,
                PortEventKind::Released
            ]
        );
    }
}
