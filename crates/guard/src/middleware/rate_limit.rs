//! Admission control: every authenticated request pays one token.
//!
//! The auth layer runs first and attaches [`Identity`]; unauthenticated
//! traffic (webhooks, health checks) passes through untouched. A Redis
//! outage fails open by default - availability over strict fairness - and
//! can be flipped to fail closed per deployment via
//! `GuardConfig::admission_fail_open`.
//!
//! Usage: layer the middleware over authenticated routes.
//!
//! ```ignore
//! Router::new()
//!     .nest("/chat", chat_router)
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), admission))
//! ```

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::{error::GuardError, state::GuardState};

/// Stable per-user identity key, inserted by the auth layer before admission
/// control runs.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

pub const RATELIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

pub async fn admission(
    State(state): State<GuardState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        return next.run(request).await;
    };

    let config = &state.config;
    let decision = state
        .stores
        .rate_limiter
        .consume(
            &identity.0,
            Utc::now().timestamp(),
            config.rate_limit_tokens_per_minute,
            config.rate_limit_bucket_size,
            config.rate_limit_idle_ttl_secs,
        )
        .await;

    match decision {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                RATELIMIT_REMAINING_HEADER,
                HeaderValue::from_str(&decision.remaining.to_string())
                    .expect("integer header value is always valid"),
            );
            response
        }
        Ok(decision) => GuardError::RateLimited {
            remaining: decision.remaining,
        }
        .into_response(),
        Err(err) if config.admission_fail_open => {
            tracing::warn!(identity = %identity.0, "rate limit check failed, allowing request: {:?}", err);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(identity = %identity.0, "rate limit check failed, rejecting request: {:?}", err);
            let body = serde_json::json!({ "error": "Service degraded, try again shortly" });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}
