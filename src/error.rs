//! Error types for Jewelbox

use thiserror::Error;

use crate::di::DiError;
use crate::http::ApiError;

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Remote API error
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Service resolution error
    #[error("Service resolution error: {0}")]
    Di(#[from] DiError),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable reason, used in structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::Config(_) => "configuration_error",
            AppError::Api(_) => "api_error",
            AppError::Di(_) => "service_resolution_error",
            AppError::Validation(_) => "validation_failed",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
