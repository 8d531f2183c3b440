// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `/ports` handlers.
//!
//! Acquire always answers 200; whether the port was granted is in the
//! response's `status` field.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{optional_body, ApiResult};
use crate::hub::{ApiError, Hub};
use crate::port::{AcquireRequest, AcquireResponse, ForceReleaseRequest, PortStatus, ReleaseRequest};

fn parse_port(raw: &str) -> ApiResult<u16> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ApiError::bad_request("invalid port number")),
    }
}

pub(crate) async fn list(State(hub): State<Arc<Hub>>) -> Json<Value> {
    Json(json!({
        "leases": hub.ports().list_leases(),
        "waiters": hub.ports().list_waiters(),
    }))
}

pub(crate) async fn get(
    State(hub): State<Arc<Hub>>,
    Path(port): Path<String>,
) -> ApiResult<Json<PortStatus>> {
    let port = parse_port(&port)?;
    Ok(Json(hub.ports().get_status(port)))
}

pub(crate) async fn acquire(
    State(hub): State<Arc<Hub>>,
    payload: Result<Json<AcquireRequest>, JsonRejection>,
) -> ApiResult<Json<AcquireResponse>> {
    let Json(req) = payload?;
    Ok(Json(hub.ports().acquire(req).await?))
}

pub(crate) async fn release(
    State(hub): State<Arc<Hub>>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let port = req.port;
    hub.ports().release(req)?;
    Ok(Json(json!({ "status": "released", "port": port })))
}

pub(crate) async fn force_release(
    State(hub): State<Arc<Hub>>,
    Path(port): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let port = parse_port(&port)?;
    let mut req: ForceReleaseRequest = optional_body(&body)?;
    req.port = port;

    let lease = hub.force_release_port(req)?;
    Ok(Json(json!({ "status": "force_released", "lease": lease })))
}
