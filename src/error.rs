use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Tag bytes that are not a usable payload.
    #[error("Malformed tag payload: {0}")]
    MalformedPayload(String),

    /// The store was unavailable or rejected a write.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// The tag reader is missing or disabled.
    #[error("Tag reader unavailable: {0}")]
    TagUnavailable(String),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A connection pool configuration error.
    #[error("Connection pool configuration error: {0}")]
    PoolConfig(#[from] deadpool_postgres::CreatePoolError),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a store failure met while applying a session change.
    pub fn persistence(context: &str, err: AppError) -> AppError {
        match err {
            AppError::PersistenceFailed(_) => err,
            other => AppError::PersistenceFailed(format!("{}: {}", context, other)),
        }
    }
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::MalformedPayload(ref msg) => {
                tracing::debug!("Malformed tag payload: {}", msg);
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AppError::PersistenceFailed(ref msg) => {
                tracing::error!("Persistence failed: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Workout store unavailable".to_string())
            }

            AppError::TagUnavailable(ref msg) => {
                tracing::warn!("Tag reader unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Connection pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable".to_string())
            }

            AppError::PoolConfig(ref e) => {
                tracing::error!("Connection pool configuration error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
