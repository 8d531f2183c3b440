// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::hub::{Hub, HubStatus};

pub(crate) async fn health(State(hub): State<Arc<Hub>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "agents_total": hub.agents().count().await,
        "agents_running": hub.agents().count_running().await,
        "uptime_secs": hub.uptime_secs(),
    }))
}

pub(crate) async fn status(State(hub): State<Arc<Hub>>) -> Json<HubStatus> {
    Json(hub.status().await)
}
