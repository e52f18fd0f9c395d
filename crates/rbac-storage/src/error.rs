//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Policy not found (or soft-deleted).
    #[error("policy not found: {id}")]
    PolicyNotFound { id: String },

    /// Role not found (or soft-deleted).
    #[error("role not found: {id}")]
    RoleNotFound { id: String },

    /// Role parent edge not found (or soft-deleted).
    #[error("role parent edge not found: {id}")]
    RoleParentNotFound { id: String },

    /// Role policy assignment not found (or soft-deleted).
    #[error("role policy assignment not found: {id}")]
    RolePolicyNotFound { id: String },

    /// A live policy already uses this `resource:operation` key.
    #[error("duplicate policy: {key}")]
    DuplicatePolicy { key: String },

    /// A live role already uses this name.
    #[error("duplicate role name: {name}")]
    DuplicateRole { name: String },

    /// The edge `role_id -> parent_id` already exists.
    #[error("duplicate role parent edge: {role_id} -> {parent_id}")]
    DuplicateRoleParent { role_id: String, parent_id: String },

    /// The policy is already assigned to the role.
    #[error("duplicate role policy assignment: {role_id} -> {policy_id}")]
    DuplicateRolePolicy { role_id: String, policy_id: String },

    /// A role cannot inherit from itself.
    #[error("role cannot be its own parent: {role_id}")]
    SelfReferentialParent { role_id: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Returns true for errors caused by a missing or deleted record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::PolicyNotFound { .. }
                | StorageError::RoleNotFound { .. }
                | StorageError::RoleParentNotFound { .. }
                | StorageError::RolePolicyNotFound { .. }
        )
    }

    /// Returns true for unique-constraint violations.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::DuplicatePolicy { .. }
                | StorageError::DuplicateRole { .. }
                | StorageError::DuplicateRoleParent { .. }
                | StorageError::DuplicateRolePolicy { .. }
        )
    }

    /// Returns true for errors caused by malformed input.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            StorageError::SelfReferentialParent { .. } | StorageError::InvalidInput { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
