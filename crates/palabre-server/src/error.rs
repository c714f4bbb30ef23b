use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use palabre_hub::HubError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Hub(hub) => match hub {
                HubError::Forbidden(_) => (StatusCode::FORBIDDEN, hub.to_string()),
                HubError::Conflict(_) => (StatusCode::CONFLICT, hub.to_string()),
                HubError::InvalidState { .. } => (StatusCode::CONFLICT, hub.to_string()),
                HubError::InvalidOperation(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, hub.to_string())
                }
                HubError::NotFound => (StatusCode::NOT_FOUND, hub.to_string()),
                // Never leak raw storage errors to the boundary.
                HubError::Store(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal storage error".to_string(),
                ),
            },
        };

        // Transient failures are retryable by the client; validation
        // failures are not. Surface the distinction alongside the message.
        let retryable = status == StatusCode::INTERNAL_SERVER_ERROR;

        let body = serde_json::json!({
            "error": message,
            "retryable": retryable,
        });

        (status, axum::Json(body)).into_response()
    }
}
