// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Port leasing between agents.
//!
//! Agents that run dev servers (vite, storybook, ...) would otherwise fight
//! over well-known ports. The [`PortRegistry`] hands out exclusive leases and
//! keeps a FIFO queue of agents waiting for a busy port.
//!
//! ```text
//!   a1: acquire 5173          → acquired
//!   a2: acquire 5173 (wait)   → queued behind a1
//!   a1: release 5173          → lease handed to a2, a2's acquire returns
//! ```

mod models;
mod registry;

pub use models::{
    AcquireRequest, AcquireResponse, AcquireStatus, ForceReleaseRequest, PortEvent,
    PortEventKind, PortLease, PortState, PortStatus, PortWaiter, ReleaseRequest,
};
pub use registry::PortRegistry;

use thiserror::Error;

/// Errors from port leasing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("Port must be between 1 and 65535")]
    InvalidPort,

    #[error("agent_id is required")]
    MissingAgentId,

    #[error("Port {0} is not leased")]
    NotLeased(u16),

    #[error("Port {port} is held by {holder}, not the requesting agent")]
    NotHolder { port: u16, holder: String },

    #[error("No free port in range {start}-{end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("Wait for port {0} was cancelled")]
    WaitCancelled(u16),
}
