//! Generic HTTP client with retry and error normalization

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiClientConfig, ApiResponse, RetryCondition};
pub use error::ApiError;
