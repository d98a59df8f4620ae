// Error types for the API server

use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// API server error types. Every variant renders as `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    MethodNotAllowed(String),
    InternalServerError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::MethodNotAllowed(msg)
            | Self::InternalServerError(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "detail": self.detail() }));

        let mut response = (status, body).into_response();
        // Picked up by the logging middleware, which knows the method and path
        response.extensions_mut().insert(ErrorDetail(self.detail().to_string()));
        response
    }
}

/// Detail of an error response, attached as a response extension.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        if error.is_validation() {
            return Self::BadRequest(error.to_string());
        }

        // Keep paths and OS messages out of the response body
        tracing::error!("Storage failure: {}", error);
        let detail = match &error {
            StorageError::Io(err) => internal_detail(err),
            _ => "Internal server error.",
        };
        Self::InternalServerError(detail.to_string())
    }
}

fn internal_detail(err: &std::io::Error) -> &'static str {
    match err.kind() {
        std::io::ErrorKind::NotFound => "Images directory not found.",
        std::io::ErrorKind::PermissionDenied => "Permission denied.",
        _ => "Internal server error.",
    }
}
