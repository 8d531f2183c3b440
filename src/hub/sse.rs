// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-sent event stream (`GET /events`).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{Hub, HubEvent};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

fn to_sse(event: &HubEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind.clone()).data(data)
}

pub(crate) async fn events(
    State(hub): State<Arc<Hub>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading counts so nothing published in between is lost.
    let mut rx = hub.events().subscribe();
    let connected = HubEvent::new(
        "connected",
        serde_json::json!({
            "agents_total": hub.agents().count().await,
            "agents_running": hub.agents().count_running().await,
        }),
    );
    debug!("SSE client connected ({} subscribers)", hub.events().subscriber_count());

    let stream = async_stream::stream! {
        yield Ok(to_sse(&connected));
        loop {
            match rx.recv().await {
                Ok(event) => yield Ok(to_sse(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}
