//! Errors the protection layer surfaces to the request layer.
//!
//! Store outages, upstream failures and malformed cache payloads are
//! recovered inside the layer (fail open, cache miss, partial data) and never
//! reach a client. The variants below are the only externally visible
//! conditions; both 429s carry distinct bodies so clients can tell "too fast"
//! from "plan exhausted".

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::middleware::rate_limit::RATELIMIT_REMAINING_HEADER;

pub enum GuardError {
    /// Internal errors - logged but return generic 500 to user
    Internal(anyhow::Error),
    /// Token bucket rejected the request.
    RateLimited { remaining: i64 },
    /// Daily plan allowance exhausted.
    QuotaExceeded { used: i64, date_key: String },
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        match self {
            GuardError::Internal(err) => {
                tracing::error!("internal error: {:?}", err);

                let body = serde_json::json!({ "error": "Internal server error" });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            GuardError::RateLimited { remaining } => {
                let body = serde_json::json!({ "error": "Rate limit exceeded" });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                response.headers_mut().insert(
                    RATELIMIT_REMAINING_HEADER,
                    HeaderValue::from_str(&remaining.to_string())
                        .expect("integer header value is always valid"),
                );
                response
            }
            GuardError::QuotaExceeded { used, date_key } => {
                tracing::info!(used, %date_key, "daily quota exhausted");

                let body = serde_json::json!({ "error": "Daily message limit reached" });
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
            }
        }
    }
}

impl<E> From<E> for GuardError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}
