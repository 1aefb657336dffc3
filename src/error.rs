use thiserror::Error;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum AppError {
    /// Required context is missing (e.g. no user id); rejected before any I/O.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (database and integrity failures).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, AppError>;
