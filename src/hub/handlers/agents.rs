// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `/agents` handlers. Path ids accept either an agent id or a name.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ApiResult;
use crate::agent::{Agent, AgentError, Conversation, SpawnOptions};
use crate::hub::{ApiError, Hub};

#[derive(Debug, Deserialize)]
pub(crate) struct MessageBody {
    #[serde(default)]
    content: String,
}

async fn lookup(hub: &Hub, id: &str) -> ApiResult<Agent> {
    hub.agents()
        .resolve(id)
        .await
        .ok_or_else(|| ApiError::not_found("agent not found"))
}

pub(crate) async fn list(State(hub): State<Arc<Hub>>) -> Json<Vec<Agent>> {
    Json(hub.agents().list_agents().await)
}

pub(crate) async fn spawn(
    State(hub): State<Arc<Hub>>,
    payload: Result<Json<SpawnOptions>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let Json(opts) = payload?;
    if opts.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let agent = hub.spawn_agent(opts).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub(crate) async fn get(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Agent>> {
    let agent = lookup(&hub, &id).await?;
    Ok(Json(hub.refresh_agent(&agent.id).await?))
}

pub(crate) async fn stop(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let agent = lookup(&hub, &id).await?;
    let stopped = hub.stop_agent(&agent.id).await?;
    Ok(Json(json!({ "status": "stopped", "agent": stopped })))
}

pub(crate) async fn destroy(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let agent = lookup(&hub, &id).await?;
    hub.destroy_agent(&agent.id).await?;
    Ok(Json(json!({ "status": "destroyed", "id": agent.id })))
}

pub(crate) async fn send_message(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    payload: Result<Json<MessageBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = payload?;
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }
    let agent = lookup(&hub, &id).await?;
    hub.agents().send_message(&agent.id, &body.content).await?;
    Ok(Json(json!({ "status": "sent" })))
}

pub(crate) async fn conversation(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    let agent = lookup(&hub, &id).await?;
    Ok(Json(hub.agents().conversation(&agent.id).await?))
}

pub(crate) async fn status(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let agent = lookup(&hub, &id).await?;
    let agent = match hub.refresh_agent(&agent.id).await {
        Ok(refreshed) => refreshed,
        // Removed concurrently; report what we saw.
        Err(AgentError::NotFound(_)) => agent,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(json!({
        "id": agent.id,
        "name": agent.name,
        "status": agent.status,
    })))
}
