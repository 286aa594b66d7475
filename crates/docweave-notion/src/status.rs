use std::time::Duration;

use docweave_engine::ApiError;
use reqwest::StatusCode;
use serde_json::Value;

/// Seconds from a `Retry-After` header; HTTP dates are not supported.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Classifies a failed response from its status and error body.
pub fn classify(status: StatusCode, retry_after: Option<Duration>, body: &Value) -> ApiError {
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || code == "rate_limited" {
        return ApiError::RateLimited { retry_after };
    }
    if message.to_lowercase().contains("archived") {
        return ApiError::Archived(message);
    }
    match status {
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::BAD_REQUEST => ApiError::Validation(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ApiError::Transient(message)
        }
        _ => ApiError::Status {
            code: status.as_u16(),
            message,
        },
    }
}

/// Errors raised before any response arrived.
pub fn transport_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ApiError::Transient(err.to_string())
    } else {
        ApiError::Status {
            code: err.status().map(|s| s.as_u16()).unwrap_or_default(),
            message: err.to_string(),
        }
    }
}
