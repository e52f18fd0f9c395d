//! Error type surfaced by sagas, workflows and the service facade.

use rbac_domain::DomainError;
use rbac_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigLoadError;

/// Coarse classification callers use to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced role, policy, edge or assignment does not exist.
    NotFound,
    /// A unique constraint was violated.
    Conflict,
    /// The actor lacks the required permissions.
    Unauthorized,
    /// The request itself is malformed.
    InvalidInput,
    Internal,
}

/// Errors raised by the RBAC business layer.
#[derive(Debug, Error)]
pub enum RbacError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Adding `role_id -> parent_id` would create an inheritance cycle.
    #[error("inheritance cycle: {role_id} cannot inherit from {parent_id}")]
    CycleDetected { role_id: String, parent_id: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error(transparent)]
    Config(#[from] ConfigLoadError),
}

impl RbacError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RbacError::Storage(e) if e.is_not_found() => ErrorKind::NotFound,
            RbacError::Storage(e) if e.is_conflict() => ErrorKind::Conflict,
            RbacError::Storage(e) if e.is_invalid_input() => ErrorKind::InvalidInput,
            RbacError::Storage(_) => ErrorKind::Internal,
            RbacError::Domain(DomainError::Unauthorized { .. }) => ErrorKind::Unauthorized,
            RbacError::Domain(DomainError::NotFound { .. }) => ErrorKind::NotFound,
            RbacError::Domain(DomainError::Conflict { .. }) => ErrorKind::Conflict,
            RbacError::Domain(
                DomainError::InvalidInput { .. }
                | DomainError::UnknownResource { .. }
                | DomainError::UnknownOperation { .. }
                | DomainError::DepthLimitExceeded { .. },
            ) => ErrorKind::InvalidInput,
            RbacError::Domain(_) => ErrorKind::Internal,
            RbacError::CycleDetected { .. } | RbacError::InvalidInput { .. } => {
                ErrorKind::InvalidInput
            }
            RbacError::Config(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        RbacError::Domain(DomainError::Unauthorized {
            message: message.into(),
        })
    }
}

/// Result type for the business layer.
pub type RbacResult<T> = Result<T, RbacError>;
