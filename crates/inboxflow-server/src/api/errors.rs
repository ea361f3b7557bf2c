//! Error handling for the Inboxflow Server API
//!
//! This module contains standardized error handling for the API.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::error::ServerError;

/// Status code and stable error code for a server error
fn classify(err: &ServerError) -> (StatusCode, String) {
    match err {
        ServerError::NotFound { resource, .. } => (
            StatusCode::NOT_FOUND,
            format!("ERR_NOT_FOUND_{}", resource.to_uppercase()),
        ),
        ServerError::ValidationError(_) => {
            (StatusCode::BAD_REQUEST, "ERR_VALIDATION_ERROR".to_string())
        }
        ServerError::Conflict(_) => (StatusCode::CONFLICT, "ERR_CONFLICT".to_string()),
        ServerError::EngineError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_ENGINE_ERROR".to_string(),
        ),
        ServerError::ConfigError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_CONFIG_ERROR".to_string(),
        ),
        ServerError::InternalError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL_SERVER_ERROR".to_string(),
        ),
    }
}

/// Convert a server error into a standardized API error response
pub fn api_error_response(err: &ServerError) -> axum::response::Response {
    let (status_code, error_code) = classify(err);
    let error_message = err.to_string();

    if status_code.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }

    let error_response = json!({
        "error": error_message,
        "errorDetails": {
            "errorCode": error_code,
            "errorMessage": error_message,
        }
    });

    (status_code, Json(error_response)).into_response()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        api_error_response(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let (status, code) = classify(&ServerError::execution_not_found("e1"));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "ERR_NOT_FOUND_EXECUTION");

        let (status, _) = classify(&ServerError::Conflict("busy".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);

        let response = api_error_response(&ServerError::ValidationError("bad".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
