//! Error responses

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::Quota;
use crate::error::Error;

pub(crate) const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub(crate) const RATE_LIMIT_REMAINING: HeaderName =
    HeaderName::from_static("x-ratelimit-remaining");
pub(crate) const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Error response envelope
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A library error bound to the request it failed
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: Error, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

/// HTTP status for an error
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation { .. } => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::NotLoaded => StatusCode::SERVICE_UNAVAILABLE,
        Error::Repository(_) => StatusCode::BAD_GATEWAY,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::Engine(_) | Error::Io(_) | Error::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Rate-limit headers for a successful admission
pub fn quota_headers(quota: &Quota) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(quota.reset_after.as_secs()));
    headers
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        if status.is_server_error() {
            tracing::error!(request_id = %self.request_id, "{}", self.error);
        } else {
            tracing::debug!(request_id = %self.request_id, "{}", self.error);
        }

        let mut headers = HeaderMap::new();
        if let Error::RateLimited {
            limit, retry_after, ..
        } = &self.error
        {
            // Round up so a client that waits exactly this long is admitted.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let secs = secs.max(1);
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(*limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(RATE_LIMIT_RESET, HeaderValue::from(secs));
            headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
        }

        let field = match &self.error {
            Error::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error.category().as_str(),
                message: self.error.to_string(),
                field,
                request_id: self.request_id,
                timestamp: Utc::now(),
            },
        };
        (status, headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::validation("topK", "x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::conflict("busy")), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&Error::Timeout {
                timeout: Duration::from_secs(60)
            }),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(status_for(&Error::NotLoaded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&Error::engine("boom")), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(&Error::repository("gone")), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_rate_limited_response_headers_and_body() {
        let err = Error::RateLimited {
            window: "short",
            limit: 60,
            retry_after: Duration::from_millis(41_200),
        };
        let response = ApiError::new(err, "req-9").into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers["retry-after"], "42");
        assert_eq!(headers["x-ratelimit-limit"], "60");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "42");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "rate_limited");
        assert_eq!(body["error"]["requestId"], "req-9");
        assert!(body["error"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_validation_body_names_field() {
        let response = ApiError::new(Error::validation("topP", "out of range"), "r").into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["field"], "topP");
        assert_eq!(body["error"]["code"], "validation");
    }
}
