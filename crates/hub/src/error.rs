use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chill_monitor::MonitorError;
use serde_json::json;

/// Error type for HTTP handlers. Renders as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Wrap a store failure as a 503.
    pub fn backend(err: anyhow::Error) -> Self {
        Self::Monitor(MonitorError::BackendUnavailable(format!("{err:#}")))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Monitor(e) => match e {
                MonitorError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                MonitorError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                MonitorError::BackendUnavailable(msg) => {
                    tracing::error!(error = %msg, "backend unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "BACKEND_UNAVAILABLE",
                        "the alert store is unavailable".to_string(),
                    )
                }
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::from(MonitorError::alert_not_found("ALT-9"));
        assert_eq!(status_of(err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_maps_to_400() {
        let err = ApiError::from(MonitorError::Validation("bad band".into()));
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ApiError::BadRequest("nope".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn backend_maps_to_503() {
        let err = ApiError::backend(anyhow::anyhow!("pool closed"));
        assert!(matches!(
            &err,
            ApiError::Monitor(MonitorError::BackendUnavailable(msg)) if msg.contains("pool closed")
        ));
        assert_eq!(status_of(err), StatusCode::SERVICE_UNAVAILABLE);
    }
}
