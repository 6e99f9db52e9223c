use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every terminal failure a handler can answer with. Callers always get a
/// JSON body with an `error` string; internal detail stays in the logs.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    InvalidRequest(&'static str),
    #[error("Endpoint not allowed")]
    EndpointForbidden,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after_secs: i64 },
    #[error("Rate limit exceeded. Please try again in a moment.")]
    AiRateLimited,
    #[error("AI credits exhausted. Please try again later.")]
    AiCreditsExhausted,
    #[error("{0} not configured")]
    Misconfigured(&'static str),
    #[error("TMDB API error: {0}")]
    Upstream(u16),
    #[error("{0}")]
    Internal(&'static str),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::EndpointForbidden => StatusCode::FORBIDDEN,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } | GatewayError::AiRateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::AiCreditsExhausted => StatusCode::PAYMENT_REQUIRED,
            GatewayError::Misconfigured(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            // Upstream statuses are relayed verbatim.
            GatewayError::Upstream(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({ "error": self.to_string() });
        if let GatewayError::RateLimited { retry_after_secs } = &self {
            body["retryAfter"] = json!(retry_after_secs);
            let mut response = (status, Json(body)).into_response();
            let secs = retry_after_secs.to_string();
            if let Ok(value) = HeaderValue::from_str(&secs) {
                response.headers_mut().insert("Retry-After", value.clone());
                response.headers_mut().insert("X-RateLimit-Reset", value);
            }
            response
                .headers_mut()
                .insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            return response;
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_is_relayed_verbatim() {
        assert_eq!(GatewayError::Upstream(404).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Upstream(503).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn misconfigured_message_does_not_name_the_env_var() {
        let message = GatewayError::Misconfigured("Movie database").to_string();
        assert_eq!(message, "Movie database not configured");
        assert!(!message.contains("TMDB_API_KEY"));
    }
}
