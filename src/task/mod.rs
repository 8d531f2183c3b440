// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task catalog.
//!
//! Tasks are plans of steps handed to agents. Each step carries a
//! definition of done and an autonomy level. Tasks stay in the catalog
//! after they finish so they can still be listed.

mod manager;
mod models;

pub use manager::TaskManager;
pub use models::*;

/// Error type for task operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Task {id} is {status}, cannot {action}")]
    InvalidState {
        id: String,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("Invalid step {step} for task {id}")]
    InvalidStep { id: String, step: usize },

    #[error("Task {0} has no current step")]
    NoCurrentStep(String),
}
