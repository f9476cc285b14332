//! HTTP envelope: auth headers, caller headers, response classification and
//! rate-limit bookkeeping (spec §4.3 "Request lifecycle").

use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use studio_core::model::RateLimitState;
use studio_core::StudioError;

use crate::auth::auth_headers;
use studio_core::model::Connection;

/// Merges connection auth headers with caller-supplied headers. Caller
/// headers win on collision (spec §4.3: "caller headers override
/// connector-provided defaults except Authorization").
pub fn build_request_headers(
    connection: &Connection,
    caller_headers: &HeaderMap,
) -> Result<HeaderMap, StudioError> {
    let mut headers = auth_headers(connection)?.unwrap_or_default();
    for (name, value) in caller_headers.iter() {
        if name == reqwest::header::AUTHORIZATION {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    Ok(headers)
}

/// Maps a provider's HTTP status into the stable error taxonomy (spec §7).
///
/// `retry_after_ms` is read from `Retry-After` (seconds or HTTP-date) or
/// `X-RateLimit-Reset` when the provider sends one; absence means the
/// retry policy falls back to its own backoff schedule.
pub fn classify_status(status: StatusCode, retry_after_ms: Option<u64>) -> Option<StudioError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::UNAUTHORIZED => StudioError::AuthInvalid(format!("http {status}")),
        StatusCode::FORBIDDEN => StudioError::Forbidden(format!("http {status}")),
        StatusCode::NOT_FOUND => StudioError::NotFound(format!("http {status}")),
        StatusCode::TOO_MANY_REQUESTS => StudioError::RateLimited { retry_after_ms },
        StatusCode::REQUEST_TIMEOUT => StudioError::Timeout(format!("http {status}")),
        s if s.is_client_error() => StudioError::BadInput(format!("http {status}")),
        s if s.is_server_error() => StudioError::ServerError(format!("http {status}")),
        s => StudioError::Internal(format!("unexpected http status {s}")),
    })
}

/// Sets `X-Correlation-Id` so downstream providers can link events back to
/// the execution that produced them (spec §4.7 dedup/correlation store).
pub fn with_correlation_id(mut headers: HeaderMap, correlation_id: &str) -> Result<HeaderMap, StudioError> {
    let value = reqwest::header::HeaderValue::from_str(correlation_id)
        .map_err(|e| StudioError::BadInput(format!("invalid correlation id: {e}")))?;
    headers.insert("x-correlation-id", value);
    Ok(headers)
}

/// Extracts a millisecond retry hint from standard rate-limit response
/// headers. Checks `Retry-After` (seconds) first, then `X-RateLimit-Reset`
/// (epoch seconds), matching the convention most REST connectors use.
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = v.parse::<u64>() {
            return Some(secs * 1000);
        }
    }
    if let Some(v) = headers.get("x-ratelimit-reset").and_then(|v| v.to_str().ok()) {
        if let Ok(epoch_secs) = v.parse::<i64>() {
            let now = chrono::Utc::now().timestamp();
            let delta = (epoch_secs - now).max(0) as u64;
            return Some(delta * 1000);
        }
    }
    None
}

/// Updates a [`RateLimitState`] from response headers, leaving prior values
/// in place when a header is absent for this call (spec §4.3).
pub fn update_rate_limit_state(state: &mut RateLimitState, headers: &HeaderMap) {
    if let Some(limit) = header_u64(headers, "x-ratelimit-limit") {
        state.limit = Some(limit);
    }
    if let Some(remaining) = header_u64(headers, "x-ratelimit-remaining") {
        state.remaining = Some(remaining);
    }
    if let Some(reset) = header_u64(headers, "x-ratelimit-reset") {
        state.reset_at = chrono::DateTime::from_timestamp(reset as i64, 0);
    }
    state.retry_after_hint_ms = retry_after_ms(headers).or(state.retry_after_hint_ms);
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

/// Result of issuing one HTTP call through the envelope: status, body and
/// the rate-limit state observed on this response.
pub struct EnvelopeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Reads the body as JSON, tolerating an empty body (some providers return
/// `204 No Content` on success).
pub async fn read_json_body(response: Response) -> Result<EnvelopeResponse, StudioError> {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.bytes().await.map_err(|e| StudioError::Network(e.to_string()))?;
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    Ok(EnvelopeResponse { status, headers, body })
}
