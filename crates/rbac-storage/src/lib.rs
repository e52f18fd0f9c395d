//! rbac-storage: Storage abstraction layer
//!
//! This crate provides the persistence boundary for the RBAC engine:
//! - DataStore trait for policies, roles, parent edges and assignments
//! - Record, filter and patch types shared by every backend
//! - In-memory implementation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rbac-storage                   │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - DataStore trait + records    │
//! │  memory.rs   - In-memory implementation     │
//! │  error.rs    - StorageError                 │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDataStore;
pub use traits::{
    normalize_segment, policy_key, DataStore, Metadata, NewPolicy, NewRole, NewRoleParent,
    NewRolePolicy, Policy, PolicyFilter, PolicyPatch, Role, RoleFilter, RoleParent,
    RoleParentFilter, RolePatch, RolePolicy, RolePolicyFilter, RolePolicyPatch,
};
