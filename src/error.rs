use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::{ApiEnvelope, AUTHOR, EMAIL};
use crate::security::apply_security_headers;

/// Result type alias for service operations
pub type CdnResult<T> = Result<T, CdnError>;

/// Main error type for the file CDN service
#[derive(Error, Debug)]
pub enum CdnError {
    // Validation errors
    #[error("File size exceeds {max_size} byte limit")]
    FileTooLarge { size: u64, max_size: u64 },

    #[error("File type is not allowed for security reasons")]
    BlockedExtension { extension: String },

    #[error("File type \"{mime_type}\" is not supported")]
    UnsupportedFileType { mime_type: String },

    #[error("File type mismatch detected")]
    TypeMismatch { declared: String, detected: String },

    #[error("File contains potentially malicious content")]
    MaliciousContent { pattern: String },

    #[error("File has executable signature but wrong extension")]
    ExecutableSignature { magic: String },

    #[error("Empty file rejected")]
    EmptyFile,

    #[error("Invalid {field}")]
    InvalidInput { field: String },

    #[error("{message}")]
    BadRequest { message: String },

    // Security errors
    #[error("Security violation detected")]
    SecurityViolation { indicators: Vec<String> },

    #[error("Rate limit exceeded. Try again in {retry_after} seconds.")]
    RateLimited { retry_after: u64 },

    // Lookup errors
    #[error("File not found")]
    FileNotFound { file_id: String },

    // Authentication errors
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid or expired token")]
    InvalidToken { message: String },

    // Backend errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Metadata write acknowledged by {acks} of {required} required replicas")]
    QuorumNotMet { acks: usize, required: usize },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    // Configuration and internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal server error")]
    Internal { message: String },
}

impl CdnError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            CdnError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            CdnError::BlockedExtension { .. }
            | CdnError::UnsupportedFileType { .. }
            | CdnError::TypeMismatch { .. }
            | CdnError::MaliciousContent { .. }
            | CdnError::ExecutableSignature { .. }
            | CdnError::EmptyFile
            | CdnError::InvalidInput { .. }
            | CdnError::BadRequest { .. } => StatusCode::BAD_REQUEST,

            CdnError::SecurityViolation { .. } => StatusCode::FORBIDDEN,

            CdnError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            CdnError::FileNotFound { .. } => StatusCode::NOT_FOUND,

            CdnError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            CdnError::InvalidToken { .. } => StatusCode::FORBIDDEN,

            CdnError::Storage { .. }
            | CdnError::Database { .. }
            | CdnError::QuorumNotMet { .. }
            | CdnError::Network { .. } => StatusCode::BAD_GATEWAY,

            CdnError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            CdnError::Cache { .. }
            | CdnError::Configuration { .. }
            | CdnError::Serialization { .. }
            | CdnError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            CdnError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            CdnError::BlockedExtension { .. } => "BLOCKED_EXTENSION",
            CdnError::UnsupportedFileType { .. } => "UNSUPPORTED_FILE_TYPE",
            CdnError::TypeMismatch { .. } => "TYPE_MISMATCH",
            CdnError::MaliciousContent { .. } => "MALICIOUS_CONTENT",
            CdnError::ExecutableSignature { .. } => "EXECUTABLE_SIGNATURE",
            CdnError::EmptyFile => "EMPTY_FILE",
            CdnError::InvalidInput { .. } => "INVALID_INPUT",
            CdnError::BadRequest { .. } => "BAD_REQUEST",
            CdnError::SecurityViolation { .. } => "SECURITY_VIOLATION",
            CdnError::RateLimited { .. } => "RATE_LIMITED",
            CdnError::FileNotFound { .. } => "FILE_NOT_FOUND",
            CdnError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            CdnError::InvalidToken { .. } => "INVALID_TOKEN",
            CdnError::Storage { .. } => "STORAGE_ERROR",
            CdnError::Database { .. } => "DATABASE_ERROR",
            CdnError::QuorumNotMet { .. } => "QUORUM_NOT_MET",
            CdnError::Cache { .. } => "CACHE_ERROR",
            CdnError::Network { .. } => "NETWORK_ERROR",
            CdnError::Timeout { .. } => "TIMEOUT",
            CdnError::Configuration { .. } => "CONFIGURATION_ERROR",
            CdnError::Serialization { .. } => "SERIALIZATION_ERROR",
            CdnError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(field: S) -> Self {
        Self::InvalidInput {
            field: field.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for CdnError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            CdnError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };

        // Internal detail stays in the logs, not in the response body.
        let message = match &self {
            CdnError::Internal { message } => {
                tracing::error!("internal error: {}", message);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let envelope: ApiEnvelope<()> = ApiEnvelope {
            author: AUTHOR,
            email: EMAIL,
            success: false,
            data: None,
            error: Some(serde_json::json!({
                "code": self.error_code(),
                "message": message,
            })),
            message: None,
        };

        let mut response = (status, Json(envelope)).into_response();
        apply_security_headers(response.headers_mut());
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

// Conversion implementations for common error types

impl From<sqlx::Error> for CdnError {
    fn from(err: sqlx::Error) -> Self {
        CdnError::Database {
            message: err.to_string(),
        }
    }
}

impl From<mongodb::error::Error> for CdnError {
    fn from(err: mongodb::error::Error) -> Self {
        CdnError::Database {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for CdnError {
    fn from(err: redis::RedisError) -> Self {
        CdnError::Cache {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for CdnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CdnError::Timeout { seconds: 30 }
        } else {
            CdnError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for CdnError {
    fn from(err: serde_json::Error) -> Self {
        CdnError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for CdnError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        CdnError::InvalidToken {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for CdnError {
    fn from(err: config::ConfigError) -> Self {
        CdnError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            CdnError::FileTooLarge {
                size: 200,
                max_size: 100
            }
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            CdnError::SecurityViolation { indicators: vec![] }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CdnError::RateLimited { retry_after: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            CdnError::FileNotFound {
                file_id: "abc".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CdnError::AuthenticationRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CdnError::EmptyFile.error_code(), "EMPTY_FILE");
        assert_eq!(
            CdnError::QuorumNotMet { acks: 0, required: 1 }.error_code(),
            "QUORUM_NOT_MET"
        );
        assert_eq!(
            CdnError::invalid_input("file ID").error_code(),
            "INVALID_INPUT"
        );
    }

    #[test]
    fn test_invalid_input_message() {
        let err = CdnError::invalid_input("file ID");
        assert_eq!(err.to_string(), "Invalid file ID");
    }
}
