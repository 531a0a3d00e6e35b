//! Common error types for Koinonia services

use thiserror::Error;

/// Common result type for Koinonia operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Koinonia microservices
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Check-in window code unknown or already expired
    #[error("Window not found: {0}")]
    WindowNotFound(String),

    /// Referenced scoring rule or level tier absent from configuration.
    /// Fatal for the grant in question; never substituted with a zero value.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Storage-layer write conflict that survived bounded retries.
    /// Transient; safe to resubmit because ledger uniqueness prevents
    /// duplicate side effects.
    #[error("Concurrent update conflict: {0}")]
    ConcurrentUpdateConflict(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
