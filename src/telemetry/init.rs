// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log subscriber setup for the hub.
//!
//! `RUST_LOG` always wins. Without it the filter keeps dependencies at
//! `warn`, the hub's own modules at the configured level, and `tower_http`
//! at `debug` when request logging is on.

use std::fmt;
use std::io::{self, IsTerminal};
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human oriented.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event, for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format {:?} (expected pretty, compact or json)",
                other
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// How the hub's log output is filtered and formatted.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for `hive` modules when `RUST_LOG` is unset.
    pub level: Level,
    /// Log every HTTP request through the trace layer.
    pub http_requests: bool,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            http_requests: false,
            format: LogFormat::Compact,
        }
    }
}

impl TelemetryConfig {
    /// Config for `hive hub`: `--debug` raises the level and logs requests.
    pub fn for_hub(debug: bool, format: LogFormat) -> Self {
        Self {
            level: if debug { Level::DEBUG } else { Level::INFO },
            http_requests: debug,
            format,
        }
    }

    /// Filter directive used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        let http = if self.http_requests { "debug" } else { "warn" };
        format!("warn,hive={},tower_http={}", level, http)
    }
}

/// Guard returned by [`init_telemetry`].
///
/// Dropping it logs the final metric totals at debug level.
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let snapshot = super::GLOBAL_METRICS.snapshot();
        tracing::debug!(
            "Hub metrics at exit (uptime {:.1?}):\n{}",
            snapshot.uptime,
            snapshot.format_report()
        );
    }
}

/// Install the global subscriber. A second call fails.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.default_directive())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?,
    };
    let ansi = io::stdout().is_terminal();
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(ansi))
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_ansi(ansi))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            )
            .try_init(),
    };
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}
