use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::core::SimulationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("usage: {0}")]
    Usage(String),

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal server error")]
    Internal,
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Simulation(_) | ApiError::InvalidBody(_) | ApiError::Usage(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Io { .. } | ApiError::Serialization(_) | ApiError::Internal => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        super::error_response(status, &message)
    }
}
