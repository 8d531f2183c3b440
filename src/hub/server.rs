// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Route table and middleware.

use std::any::Any;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{agents, ports, solicitations, status, tasks};
use super::{sse, Hub};

pub(crate) fn router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        // Agents
        .route("/agents", get(agents::list).post(agents::spawn))
        .route("/agents/:id", get(agents::get).delete(agents::stop))
        .route("/agents/:id/destroy", delete(agents::destroy))
        .route("/agents/:id/message", post(agents::send_message))
        .route("/agents/:id/messages", get(agents::conversation))
        .route("/agents/:id/conversation", get(agents::conversation))
        .route("/agents/:id/status", get(agents::status))
        // Tasks
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route("/tasks/:id", get(tasks::get).delete(tasks::cancel))
        .route("/tasks/:id/assign", post(tasks::assign))
        .route("/tasks/:id/start", post(tasks::start))
        .route("/tasks/:id/steps/:step", put(tasks::update_step))
        .route("/tasks/:id/complete", post(tasks::complete))
        .route("/tasks/:id/fail", post(tasks::fail))
        // Solicitations
        .route(
            "/solicitations",
            get(solicitations::list).post(solicitations::create),
        )
        .route("/solicitations/:id", get(solicitations::get))
        .route("/solicitations/:id/respond", post(solicitations::respond))
        .route("/solicitations/:id/dismiss", post(solicitations::dismiss))
        // Ports
        .route("/ports", get(ports::list))
        .route("/ports/acquire", post(ports::acquire))
        .route("/ports/release", post(ports::release))
        .route("/ports/:port", get(ports::get))
        .route("/ports/:port/force-release", post(ports::force_release))
        // Events
        .route("/events", get(sse::events))
        .route("/ws", get(sse::events))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);

    let body = Json(serde_json::json!({ "error": "internal server error" }));
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
