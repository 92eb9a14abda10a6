use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use murmur_shared::ProtocolError;
use murmur_store::StoreError;

/// Errors returned by the HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

/// Failure of a single inbound event. The connection stays open; the error
/// is reported back to the client as an `error` event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl DispatchError {
    /// Text sent to the client. Persistence details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            DispatchError::Store(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Invalid(reason) => DispatchError::BadRequest(reason),
            StoreError::NotFound => DispatchError::NotFound("record not found".to_string()),
            other => DispatchError::Store(other),
        }
    }
}
