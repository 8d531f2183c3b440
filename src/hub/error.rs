// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP error responses.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::agent::AgentError;
use crate::error::StateError;
use crate::port::PortError;
use crate::solicitation::SolicitationError;
use crate::task::TaskError;

/// An error returned to API clients as `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let message = err.to_string();
        match err {
            AgentError::NotFound(_) => Self::not_found(message),
            AgentError::AlreadyExists(_) | AgentError::NotRunning(_) => Self::conflict(message),
            AgentError::InvalidRequest(_) => Self::bad_request(message),
            AgentError::Port(e) => e.into(),
            AgentError::Spawn { .. } | AgentError::Control(_) | AgentError::Worktree(_) => {
                Self::internal(message)
            }
        }
    }
}

impl From<PortError> for ApiError {
    fn from(err: PortError) -> Self {
        let message = err.to_string();
        match err {
            PortError::InvalidPort
            | PortError::MissingAgentId
            | PortError::NotLeased(_)
            | PortError::NotHolder { .. } => Self::bad_request(message),
            PortError::WaitCancelled(_) => Self::conflict(message),
            PortError::NoFreePort { .. } => Self::internal(message),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let message = err.to_string();
        match err {
            TaskError::NotFound(_) => Self::not_found(message),
            TaskError::Validation(_) | TaskError::InvalidStep { .. } => Self::bad_request(message),
            TaskError::InvalidState { .. } | TaskError::NoCurrentStep(_) => Self::conflict(message),
        }
    }
}

impl From<SolicitationError> for ApiError {
    fn from(err: SolicitationError) -> Self {
        let message = err.to_string();
        match err {
            SolicitationError::NotFound(_) => Self::not_found(message),
            SolicitationError::Validation(_) => Self::bad_request(message),
            SolicitationError::NotPending { .. } => Self::conflict(message),
            SolicitationError::Timeout { .. } => Self::new(StatusCode::REQUEST_TIMEOUT, message),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Malformed JSON, missing fields, wrong field types and a missing
/// content type are all client errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SpawnStage;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (AgentError::NotFound("x".into()).into(), StatusCode::NOT_FOUND),
            (AgentError::AlreadyExists("x".into()).into(), StatusCode::CONFLICT),
            (AgentError::InvalidRequest("x".into()).into(), StatusCode::BAD_REQUEST),
            (
                AgentError::spawn(SpawnStage::Readiness, "timeout").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PortError::NotHolder {
                    port: 5173,
                    holder: "a1".into(),
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (PortError::NotLeased(5173).into(), StatusCode::BAD_REQUEST),
            (TaskError::NotFound("t".into()).into(), StatusCode::NOT_FOUND),
            (
                TaskError::InvalidState {
                    id: "t".into(),
                    status: crate::task::TaskStatus::Completed,
                    action: "start",
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                SolicitationError::NotPending {
                    id: "s".into(),
                    status: crate::solicitation::SolicitationStatus::Expired,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (StateError::Write("disk full".into()).into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status, expected, "{}", err);
        }
    }

    #[test]
    fn test_response_body() {
        let response = ApiError::not_found("agent not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
