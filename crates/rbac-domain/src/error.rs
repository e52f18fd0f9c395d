//! Domain error types for resolution and authorization.

use thiserror::Error;

/// Domain-specific errors.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The actor does not hold the required permissions.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Malformed request.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Resource is not part of the configured catalog.
    #[error("unknown resource: {resource}")]
    UnknownResource { resource: String },

    /// Operation is not declared for the resource in the configured catalog.
    #[error("unknown operation '{operation}' on resource '{resource}'")]
    UnknownOperation { resource: String, operation: String },

    /// Depth limit exceeded while walking the inheritance graph.
    #[error("depth limit exceeded (max: {max_depth})")]
    DepthLimitExceeded { max_depth: u32 },

    /// A record the reader was asked about does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The reader hit a uniqueness conflict.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Failure reported by the underlying reader.
    #[error("storage error: {message}")]
    StorageError { message: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
