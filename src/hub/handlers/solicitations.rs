// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `/solicitations` handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{optional_body, parse_param, ApiResult};
use crate::hub::Hub;
use crate::solicitation::{
    CreateRequest, DismissRequest, RespondRequest, Solicitation, SolicitationFilter,
    SolicitationStatus,
};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    agent_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    urgency: Option<String>,
    /// Defaults to `pending`; `all` disables the filter.
    status: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> ApiResult<SolicitationFilter> {
        let status = match self.status.as_deref() {
            None | Some("") => Some(SolicitationStatus::Pending),
            Some("all") => None,
            Some(s) => Some(parse_param("status", s)?),
        };
        Ok(SolicitationFilter {
            agent_id: self.agent_id.filter(|s| !s.is_empty()),
            kind: self
                .kind
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| parse_param("type", s))
                .transpose()?,
            urgency: self
                .urgency
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| parse_param("urgency", s))
                .transpose()?,
            status,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreateQuery {
    /// Seconds to wait for an answer. 0 waits until answered or dismissed.
    wait: Option<u64>,
}

pub(crate) async fn list(
    State(hub): State<Arc<Hub>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Solicitation>>> {
    let Query(query) = query?;
    let filter = query.into_filter()?;
    Ok(Json(hub.solicitations().list(&filter)))
}

pub(crate) async fn create(
    State(hub): State<Arc<Hub>>,
    query: Result<Query<CreateQuery>, QueryRejection>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let Json(req) = payload?;

    match query.wait {
        None => {
            let sol = hub.solicitations().create(req)?;
            Ok((StatusCode::CREATED, Json(sol)).into_response())
        }
        Some(secs) => {
            let (sol, response) = hub
                .solicitations()
                .create_and_wait(req, Duration::from_secs(secs))
                .await?;
            let body = json!({ "solicitation": sol, "response": response });
            Ok(Json(body).into_response())
        }
    }
}

pub(crate) async fn get(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Solicitation>> {
    Ok(Json(hub.solicitations().get(&id)?))
}

pub(crate) async fn respond(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    payload: Result<Json<RespondRequest>, JsonRejection>,
) -> ApiResult<Json<Solicitation>> {
    let Json(req) = payload?;
    Ok(Json(hub.solicitations().respond(&id, req)?))
}

pub(crate) async fn dismiss(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Solicitation>> {
    let req: DismissRequest = optional_body(&body)?;
    Ok(Json(hub.solicitations().dismiss(&id, req)?))
}
