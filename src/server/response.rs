// JSON error bodies for the HTTP surface

use crate::error::IpScopeError;
use crate::lookup::LookupError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error returned by a handler; rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<IpScopeError> for ApiError {
    fn from(err: IpScopeError) -> Self {
        match err {
            IpScopeError::BadRequest(message) => Self::bad_request(message),
            IpScopeError::Unauthorized(message) => Self::new(StatusCode::UNAUTHORIZED, message),
            IpScopeError::HostNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "IP address not found")
            }
            IpScopeError::Lookup(LookupError::Unauthorized(message)) => {
                Self::new(StatusCode::UNAUTHORIZED, message)
            }
            IpScopeError::Lookup(other) => Self::new(StatusCode::BAD_GATEWAY, other.to_string()),
            other => {
                tracing::error!("Request failed: {}", other);
                Self::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
