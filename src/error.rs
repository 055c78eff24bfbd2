use axum::{
    response::{IntoResponse, Response},
    Json,
    http::StatusCode,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("Backend unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Backend rejected the request: {0}")]
    UpstreamRejected(String),

    #[error("Conversion task not found: {0}")]
    TaskNotFound(String),

    #[error("Conversion failed: {0}")]
    TaskFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Converter subprocess failed: {0}")]
    Subprocess(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidApiKey(_) => StatusCode::UNAUTHORIZED,
            AppError::UpstreamUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamRejected(_)
            | AppError::TaskNotFound(_)
            | AppError::TaskFailed(_)
            | AppError::Timeout(_)
            | AppError::Subprocess(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::UpstreamUnreachable(err.to_string())
    }
}

impl From<std::env::VarError> for AppError {
    fn from(err: std::env::VarError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Subprocess(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
