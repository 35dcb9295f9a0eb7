use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the quorum feed service
#[derive(Debug)]
pub enum QuorumError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Data package schema validation errors
    Validation(String),

    /// Signature decoding or signer recovery errors
    Signature(String),

    /// Pub/sub transport errors
    Transport(String),

    /// Subscription lifecycle errors (double subscribe, stopped subscriber)
    Subscription(String),

    /// Fallback data source errors
    Fallback(String),

    /// API/HTTP related errors
    Api(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// Internal lock poisoning or closed channels
    Concurrency(String),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors
    Json(serde_json::Error),

    /// Base64 or hex decoding errors
    Encoding(String),
}

impl fmt::Display for QuorumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumError::Config(msg) => write!(f, "Configuration error: {}", msg),
            QuorumError::Validation(msg) => write!(f, "Schema validation error: {}", msg),
            QuorumError::Signature(msg) => write!(f, "Signature error: {}", msg),
            QuorumError::Transport(msg) => write!(f, "Transport error: {}", msg),
            QuorumError::Subscription(msg) => write!(f, "Subscription error: {}", msg),
            QuorumError::Fallback(msg) => write!(f, "Fallback error: {}", msg),
            QuorumError::Api(msg) => write!(f, "API error: {}", msg),
            QuorumError::Io(err) => write!(f, "I/O error: {}", err),
            QuorumError::Serialization(err) => write!(f, "Serialization error: {}", err),
            QuorumError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
            SerializationError::Encoding(msg) => write!(f, "Encoding: {}", msg),
        }
    }
}

impl std::error::Error for QuorumError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QuorumError::Io(err) => Some(err),
            QuorumError::Serialization(SerializationError::Json(err)) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
            SerializationError::Encoding(_) => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, QuorumError>;

impl QuorumError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            QuorumError::Config(_) => StatusCode::BAD_REQUEST,
            QuorumError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            QuorumError::Signature(_) => StatusCode::UNPROCESSABLE_ENTITY,
            QuorumError::Transport(_) => StatusCode::BAD_GATEWAY,
            QuorumError::Subscription(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuorumError::Fallback(_) => StatusCode::BAD_GATEWAY,
            QuorumError::Api(_) => StatusCode::BAD_REQUEST,
            QuorumError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuorumError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            QuorumError::Concurrency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            QuorumError::Config(_) => "configuration_error",
            QuorumError::Validation(_) => "validation_error",
            QuorumError::Signature(_) => "signature_error",
            QuorumError::Transport(_) => "transport_error",
            QuorumError::Subscription(_) => "subscription_error",
            QuorumError::Fallback(_) => "fallback_error",
            QuorumError::Api(_) => "api_error",
            QuorumError::Io(_) => "io_error",
            QuorumError::Serialization(_) => "serialization_error",
            QuorumError::Concurrency(_) => "concurrency_error",
        }
    }
}

// Axum IntoResponse implementation for HTTP error responses
impl IntoResponse for QuorumError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

// Conversions from common error types
impl From<std::io::Error> for QuorumError {
    fn from(err: std::io::Error) -> Self {
        QuorumError::Io(err)
    }
}

impl From<serde_json::Error> for QuorumError {
    fn from(err: serde_json::Error) -> Self {
        QuorumError::Serialization(SerializationError::Json(err))
    }
}

impl From<SerializationError> for QuorumError {
    fn from(err: SerializationError) -> Self {
        QuorumError::Serialization(err)
    }
}

impl From<reqwest::Error> for QuorumError {
    fn from(err: reqwest::Error) -> Self {
        QuorumError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for QuorumError {
    fn from(err: url::ParseError) -> Self {
        QuorumError::Config(format!("Invalid url: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::QuorumError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::QuorumError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::error::QuorumError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::QuorumError::Validation(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::QuorumError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::QuorumError::Transport(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! subscription_error {
    ($msg:expr) => {
        $crate::error::QuorumError::Subscription($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::QuorumError::Subscription(format!($fmt, $($arg)*))
    };
}
