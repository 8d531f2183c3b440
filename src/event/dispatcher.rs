// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded worker-pool event dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::telemetry::GLOBAL_METRICS;

/// Default number of workers when zero is requested.
pub const DEFAULT_WORKERS: usize = 4;

/// Default queue capacity when zero is requested.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Handler invoked by the workers for each event.
pub type EventHandler<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Lifecycle<T> {
    started: bool,
    sender: Option<mpsc::Sender<T>>,
    receiver: Option<mpsc::Receiver<T>>,
    workers: Vec<JoinHandle<()>>,
}

/// Dispatches events to a fixed pool of workers through a bounded queue.
///
/// Producers never block on [`dispatch`](Self::dispatch): when the queue is
/// full the event is shed and `false` is returned. [`stop`](Self::stop)
/// closes the queue and waits until every queued event has been handled.
pub struct Dispatcher<T: Send + 'static> {
    handler: Option<EventHandler<T>>,
    worker_count: usize,
    capacity: usize,
    state: Mutex<Lifecycle<T>>,
    dropped: AtomicU64,
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Create a dispatcher. Zero workers or a zero queue size fall back to
    /// [`DEFAULT_WORKERS`] and [`DEFAULT_QUEUE_SIZE`].
    pub fn new(handler: Option<EventHandler<T>>, workers: usize, queue_size: usize) -> Self {
        let worker_count = if workers == 0 { DEFAULT_WORKERS } else { workers };
        let capacity = if queue_size == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            queue_size
        };
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            handler,
            worker_count,
            capacity,
            state: Mutex::new(Lifecycle {
                started: false,
                sender: Some(tx),
                receiver: Some(rx),
                workers: Vec::new(),
            }),
            dropped: AtomicU64::new(0),
        }
    }

    /// Convenience constructor taking a plain closure.
    pub fn with_handler<F>(handler: F, workers: usize, queue_size: usize) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::new(Some(Arc::new(handler)), workers, queue_size)
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Launch the worker pool. Calling this more than once has no effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.started {
            return;
        }
        let Some(receiver) = state.receiver.take() else {
            return;
        };
        state.started = true;

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for id in 0..self.worker_count {
            let receiver = Arc::clone(&receiver);
            let handler = self.handler.clone();
            state.workers.push(tokio::spawn(async move {
                loop {
                    let next = { receiver.lock().await.recv().await };
                    match next {
                        Some(event) => {
                            if let Some(handler) = &handler {
                                handler(event);
                            }
                        }
                        None => break,
                    }
                }
                trace!("Dispatcher worker {} exiting", id);
            }));
        }
        debug!("Dispatcher started with {} workers", self.worker_count);
    }

    /// Queue an event without blocking.
    ///
    /// Returns `false` when the queue is full or the dispatcher is stopped.
    pub fn dispatch(&self, event: T) -> bool {
        let state = self.lock();
        let Some(sender) = state.sender.as_ref() else {
            return false;
        };
        let result = sender.try_send(event);
        drop(state);

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                GLOBAL_METRICS.increment("dispatcher.dropped");
                warn!("Event queue full ({}), dropping event", self.capacity);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue an event, waiting for space if the queue is full.
    ///
    /// Only the calling task waits. Returns `false` if the dispatcher was
    /// stopped.
    pub async fn dispatch_blocking(&self, event: T) -> bool {
        let sender = { self.lock().sender.clone() };
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the queue and wait for all queued events to be handled.
    pub async fn stop(&self) {
        let workers = {
            let mut state = self.lock();
            if !state.started {
                return;
            }
            state.sender = None;
            std::mem::take(&mut state.workers)
        };

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Dispatcher worker failed: {}", e);
            }
        }
        debug!("Dispatcher stopped");
    }

    /// Number of events currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        let state = self.lock();
        match state.sender.as_ref() {
            Some(sender) => sender.max_capacity() - sender.capacity(),
            None => 0,
        }
    }

    /// Number of events shed because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether [`start`](Self::start) has launched the workers.
    pub fn is_started(&self) -> bool {
        self.lock().started
    }
}

impl<T: Send + 'static> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.worker_count)
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_defaults_for_zero() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(None, 0, 0);
        assert_eq!(dispatcher.worker_count, DEFAULT_WORKERS);
        assert_eq!(dispatcher.capacity, DEFAULT_QUEUE_SIZE);
    }

    #[tokio::test]
    async fn test_drain_on_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let dispatcher = Dispatcher::with_handler(
            move |_: u32| {
                std::thread::sleep(Duration::from_millis(5));
                seen.fetch_add(1, Ordering::SeqCst);
            },
            2,
            10,
        );
        dispatcher.start();

        for i in 0..5 {
            assert!(dispatcher.dispatch(i));
        }
        dispatcher.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_idempotent_start() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let dispatcher = Dispatcher::with_handler(
            move |_: u32| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
            2,
            50,
        );
        dispatcher.start();
        dispatcher.start();
        dispatcher.start();

        for i in 0..20 {
            assert!(dispatcher.dispatch(i));
        }
        dispatcher.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backpressure_drops_when_full() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        let dispatcher = Dispatcher::with_handler(
            move |_: u32| {
                let _ = entered_tx.lock().unwrap().send(());
                let _ = release_rx.lock().unwrap().recv();
            },
            1,
            2,
        );
        dispatcher.start();

        assert!(dispatcher.dispatch(1));
        // Wait until the single worker holds event 1.
        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        assert!(dispatcher.dispatch(2));
        assert!(dispatcher.dispatch(3));
        assert!(!dispatcher.dispatch(4));
        assert_eq!(dispatcher.queue_len(), 2);
        assert_eq!(dispatcher.dropped(), 1);

        // Unblock the handler for the remaining events.
        for _ in 0..3 {
            let _ = release_tx.send(());
        }
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_none_handler_is_noop() {
        let dispatcher: Dispatcher<String> = Dispatcher::new(None, 1, 4);
        dispatcher.start();
        assert!(dispatcher.dispatch("ignored".to_string()));
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_fails() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(None, 1, 4);
        dispatcher.start();
        dispatcher.stop().await;
        assert!(!dispatcher.dispatch(1));
        assert!(!dispatcher.dispatch_blocking(2).await);
    }

    #[tokio::test]
    async fn test_dispatch_blocking_delivers() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let dispatcher = Dispatcher::with_handler(
            move |_: u32| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
            1,
            1,
        );
        dispatcher.start();
        for i in 0..10 {
            assert!(dispatcher.dispatch_blocking(i).await);
        }
        dispatcher.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new(None, 1, 1);
        dispatcher.stop().await;
        assert!(!dispatcher.is_started());
    }
}
