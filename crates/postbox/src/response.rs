//! Response envelopes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

/// Successful response body: `{"message": ..., "data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    message: &'static str,
    data: T,
}

impl<T> Envelope<T> {
    pub const fn new(message: &'static str, data: T) -> Json<Self> {
        Json(Self { message, data })
    }
}

/// A failed request, rendered as `{"message": ..., "error": true}`.
#[derive(Debug)]
pub struct ApiError(postbox_core::Error);

impl From<postbox_core::Error> for ApiError {
    fn from(err: postbox_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_client_error() {
            tracing::debug!(status = status.as_u16(), error = %self.0, "request rejected");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = json!({ "message": self.0.to_string(), "error": true });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
