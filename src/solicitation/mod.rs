// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Human-input requests from agents.
//!
//! A solicitation is a question an agent cannot answer alone: a blocker,
//! an ambiguity, a decision. Pending solicitations are listed most urgent
//! first. An agent can block on one with
//! [`SolicitationManager::create_and_wait`] until someone responds.

mod manager;
mod models;

pub use manager::SolicitationManager;
pub use models::*;

/// Error type for solicitation operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolicitationError {
    #[error("Solicitation not found: {0}")]
    NotFound(String),

    #[error("Invalid solicitation: {0}")]
    Validation(String),

    #[error("Solicitation {id} is not pending ({status})")]
    NotPending {
        id: String,
        status: SolicitationStatus,
    },

    #[error("Timed out after {secs}s waiting for a response to {id}")]
    Timeout { id: String, secs: u64 },
}
