use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Database connection failed: {0}")]
    Connection(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Extraction failed for table '{table}': {message}")]
    Extraction { table: String, message: String },
    #[error("Index build failed: {0}")]
    IndexBuild(String),
    #[error("Proper-noun lookup failed: {0}")]
    Lookup(String),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Agent produced no answer: {0}")]
    Agent(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Parse(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Llm(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Connection(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Agent(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::IndexBuild(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Lookup(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Extraction { table, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("extraction failed for {}: {}", table, message),
            ),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(err: tokio_postgres::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}
