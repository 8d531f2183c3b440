// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event fan-out primitives.
//!
//! Every manager publishes its change events through a [`Dispatcher`], a
//! bounded worker pool that decouples the mutation path from whatever
//! consumes the events (SSE broadcast, logging).
//!
//! ```text
//!   producer ──dispatch()──▶ [ bounded queue ] ──▶ worker 1 ─▶ handler
//!                   │                           ──▶ worker 2 ─▶ handler
//!                   └─ queue full: event shed, returns false
//! ```

mod dispatcher;

pub use dispatcher::{Dispatcher, EventHandler, DEFAULT_QUEUE_SIZE, DEFAULT_WORKERS};
