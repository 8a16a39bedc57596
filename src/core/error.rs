//! Error taxonomy for reqdesk
//!
//! Every lifecycle operation reports one of these variants. The HTTP layer
//! maps them to status codes in one place (`DeskError::status_code`).

use std::fmt;

use http::StatusCode;

/// Errors produced by the lifecycle manager and the stores.
#[derive(Debug)]
pub enum DeskError {
    /// Required input missing or empty; the caller must fix the request
    Validation(String),

    /// The referenced id does not exist in the expected set
    NotFound(String),

    /// Underlying persistence fault
    Storage(String),

    /// A transition found the record already present in its destination set
    Consistency(String),
}

impl DeskError {
    /// HTTP status the API answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeskError::Validation(_) => StatusCode::BAD_REQUEST,
            DeskError::NotFound(_) => StatusCode::NOT_FOUND,
            DeskError::Consistency(_) => StatusCode::CONFLICT,
            DeskError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to API callers.
    ///
    /// Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            DeskError::Validation(msg) | DeskError::NotFound(msg) => msg.clone(),
            DeskError::Consistency(_) => {
                "Request is present in both open and closed sets.".to_string()
            }
            DeskError::Storage(_) => "Internal storage error.".to_string(),
        }
    }
}

impl fmt::Display for DeskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeskError::Validation(msg) => write!(f, "Validation error: {msg}"),
            DeskError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DeskError::Storage(msg) => write!(f, "Storage error: {msg}"),
            DeskError::Consistency(msg) => write!(f, "Consistency warning: {msg}"),
        }
    }
}

impl std::error::Error for DeskError {}

impl From<etcd_client::Error> for DeskError {
    fn from(err: etcd_client::Error) -> Self {
        DeskError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DeskError {
    fn from(err: serde_json::Error) -> Self {
        DeskError::Storage(format!("record encoding: {err}"))
    }
}

/// Result type alias for reqdesk operations
pub type DeskResult<T> = std::result::Result<T, DeskError>;

/// Helper trait for turning foreign errors into storage faults with context
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> DeskResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> DeskResult<T> {
        self.map_err(|e| DeskError::Storage(format!("{context}: {e}")))
    }
}

#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::core::error::DeskError::Validation(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! storage_error {
    ($($arg:tt)*) => {
        $crate::core::error::DeskError::Storage(format!($($arg)*))
    };
}
