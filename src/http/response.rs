//! JSON response envelope.
//!
//! Every body the service produces, including the ones generated by
//! pipeline stages, has the shape `{"success": bool, "data"?: .., "error"?: ..}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Body sent with a `429`.
pub const RATE_LIMITED_MESSAGE: &str = "rate limit exceeded — try again shortly";

/// Body sent when a request handler panics.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Body sent when the request deadline elapses inside a handler.
pub const DEADLINE_EXCEEDED_MESSAGE: &str = "request deadline exceeded";

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Successful envelope with the given status.
pub fn json_ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(ApiResponse::ok(data))).into_response()
}

/// Failure envelope with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::error(message))).into_response()
}
