//! Normalized HTTP error
//!
//! Produced once at the transport boundary so callers never inspect
//! `reqwest` errors directly.

use serde_json::Value;
use thiserror::Error;

/// Error kind for every request made through [`super::ApiClient`]
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No response was received
    #[error("Network error: {message}")]
    Network { message: String },

    /// The request exceeded the client timeout
    #[error("Request timed out: {message}")]
    Timeout { message: String },

    /// The server answered with a non-2xx status
    #[error("HTTP {status} {status_text}: {message}")]
    Status {
        status: u16,
        status_text: String,
        message: String,
        details: Option<Value>,
    },

    /// The response body did not match the expected shape
    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    /// The request could not be built (bad URL, header, ...)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Human-readable message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message }
            | Self::Timeout { message }
            | Self::Status { message, .. }
            | Self::Decode { message }
            | Self::InvalidRequest { message } => message,
        }
    }

    /// HTTP status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Timeout { .. } => "ECONNABORTED",
            Self::Status { .. } => "HTTP_ERROR",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
        }
    }

    /// Parsed error body, if the server sent JSON
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Status { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// Default retry policy: network failures, timeouts and 5xx
    ///
    /// 4xx responses are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => (500..600).contains(status),
            Self::Decode { .. } | Self::InvalidRequest { .. } => false,
        }
    }

    /// Classify a transport error
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                message: e.to_string(),
            }
        } else if e.is_builder() {
            Self::InvalidRequest {
                message: e.to_string(),
            }
        } else if e.is_decode() {
            Self::Decode {
                message: e.to_string(),
            }
        } else {
            Self::Network {
                message: e.to_string(),
            }
        }
    }

    /// Build a status error from a response body
    pub(crate) fn from_status(status: u16, status_text: &str, body: &[u8]) -> Self {
        let details: Option<Value> = serde_json::from_slice(body).ok();
        let message = details
            .as_ref()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                if status_text.is_empty() {
                    format!("Request failed with status {}", status)
                } else {
                    status_text.to_string()
                }
            });

        Self::Status {
            status,
            status_text: status_text.to_string(),
            message,
            details,
        }
    }
}
