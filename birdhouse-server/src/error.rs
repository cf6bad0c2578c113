//! Mapping from classified failures to HTTP responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use birdhouse::error::retry_after_secs;
use birdhouse::{ErrorCategory, ErrorRecord, GatewayError};
use serde_json::json;
use std::convert::Infallible;

/// Body returned when the admission limiter rejects a request.
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Try again later.";

pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Auth => StatusCode::UNAUTHORIZED,
        ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Network | ErrorCategory::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A classified, counted failure on its way back to the caller.
#[derive(Debug)]
pub struct ApiError(pub ErrorRecord);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(self.0.category), Json(self.0)).into_response()
    }
}

/// Turns an admission denial into `429` with a `Retry-After` header.
///
/// Denials are answered here and never reach a handler, so they do not count toward the
/// error statistics.
pub async fn admission_error(err: GatewayError<Infallible>) -> Response {
    match err {
        GatewayError::RateLimited { window, retry_after } => {
            let secs = retry_after_secs(retry_after);
            let body = Json(json!({
                "error": RATE_LIMIT_MESSAGE,
                "window": window.as_str(),
                "retry_after_secs": secs,
            }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
            response
        }
        GatewayError::RetryExhausted { last, .. } | GatewayError::Inner(last) => match last {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_a_status() {
        let statuses: Vec<u16> = ErrorCategory::ALL.iter().map(|c| status_for(*c).as_u16()).collect();
        assert_eq!(statuses, vec![401, 429, 404, 400, 502, 502, 500]);
    }

    #[tokio::test]
    async fn denial_carries_retry_after() {
        let response = admission_error(GatewayError::RateLimited {
            window: birdhouse::Window::Minute,
            retry_after: std::time::Duration::from_millis(1_200),
        })
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
