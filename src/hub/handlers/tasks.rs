// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `/tasks` handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{optional_body, ApiResult};
use crate::hub::{ApiError, Hub};
use crate::task::{
    AssignRequest, CompleteTaskRequest, CreateTaskRequest, FailTaskRequest, Task, TaskFilter,
    UpdateStepRequest,
};

const DEFAULT_CANCEL_REASON: &str = "cancelled by user";

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CancelQuery {
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) async fn list(
    State(hub): State<Arc<Hub>>,
    query: Result<Query<TaskFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<Task>>> {
    let Query(filter) = query?;
    Ok(Json(hub.tasks().list(&filter)))
}

pub(crate) async fn create(
    State(hub): State<Arc<Hub>>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let Json(req) = payload?;
    let task = hub.tasks().create(req)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub(crate) async fn get(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(hub.tasks().get(&id)?))
}

pub(crate) async fn assign(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let Json(req) = payload?;

    // Fill in the name from the agent table when the caller left it out.
    let agent_name = match req.agent_name {
        Some(name) => Some(name),
        None => hub.agents().resolve(&req.agent_id).await.map(|a| a.name),
    };
    Ok(Json(hub.tasks().assign(&id, &req.agent_id, agent_name)?))
}

pub(crate) async fn start(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(hub.tasks().start(&id)?))
}

pub(crate) async fn update_step(
    State(hub): State<Arc<Hub>>,
    Path((id, step)): Path<(String, String)>,
    payload: Result<Json<UpdateStepRequest>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let step: usize = step
        .parse()
        .map_err(|_| ApiError::bad_request("invalid step ID"))?;
    let Json(req) = payload?;
    Ok(Json(hub.tasks().update_step(&id, step, req)?))
}

pub(crate) async fn complete(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Task>> {
    let req: CompleteTaskRequest = optional_body(&body)?;
    Ok(Json(hub.tasks().complete(&id, req)?))
}

pub(crate) async fn fail(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    payload: Result<Json<FailTaskRequest>, JsonRejection>,
) -> ApiResult<Json<Task>> {
    let Json(req) = payload?;
    Ok(Json(hub.tasks().fail(&id, req)?))
}

pub(crate) async fn cancel(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    query: Result<Query<CancelQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let reason = query
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
    let task = hub.tasks().cancel(&id, &reason)?;
    Ok(Json(json!({ "status": "cancelled", "task": task })))
}
