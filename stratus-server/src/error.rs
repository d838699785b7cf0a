//! Mapping service errors to the Google-style error envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stratus_core::StratusError;

/// Wrapper giving [`StratusError`] an HTTP rendering. Handlers return
/// `Result<_, ApiError>` so `?` converts automatically.
#[derive(Debug)]
pub struct ApiError(pub StratusError);

impl From<StratusError> for ApiError {
    fn from(err: StratusError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.kind().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut detail = serde_json::json!({
            "reason": err.reason(),
            "message": err.message(),
            "domain": "global",
        });
        if let Some(resource) = err.resource() {
            detail["location"] = serde_json::Value::String(resource.to_string());
        }
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": err.message(),
                "errors": [detail],
            }
        });
        (status, Json(body)).into_response()
    }
}
