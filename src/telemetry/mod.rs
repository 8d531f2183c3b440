// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics for the hub.
//!
//! - **Tracing**: structured logs through `tracing-subscriber`, filtered by
//!   `RUST_LOG` or the hub's flags, as text or JSON.
//! - **Metrics**: in-process counters and latency histograms, surfaced on
//!   `GET /status`.
//!
//! ```rust,ignore
//! use hive::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::for_hub(false, LogFormat::Json))?;
//! ```
//!
//! Managers record their slow paths with [`OperationTimer`]:
//!
//! ```rust,ignore
//! let _timer = OperationTimer::start("agent.spawn");
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    Histogram, Metrics, MetricsSnapshot, MetricsSummary, OperationMetrics, OperationSummary,
    OperationTimer, GLOBAL_METRICS,
};
