// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request handlers, one module per resource.

pub(crate) mod agents;
pub(crate) mod ports;
pub(crate) mod solicitations;
pub(crate) mod status;
pub(crate) mod tasks;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use super::ApiError;

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// Decode a JSON body that may be absent. An empty body yields the default.
pub(crate) fn optional_body<T>(body: &Bytes) -> ApiResult<T>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
}

/// Parse a query-string value into one of the serde-named enums.
pub(crate) fn parse_param<T>(field: &str, value: &str) -> ApiResult<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| ApiError::bad_request(format!("invalid {}: {}", field, value)))
}
