//! rbac-domain: Core RBAC domain logic
//!
//! This crate contains the storage-independent parts of the engine:
//! - Policy key normalization and provenance types
//! - The resource/operation catalog
//! - The policy resolver (inheritance closure with cycle guard)
//! - The authorization validator
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                rbac-domain                   │
//! ├─────────────────────────────────────────────┤
//! │  model/         - Keys, PolicyRef, provenance│
//! │  catalog/       - Resource vocabulary        │
//! │  resolver/      - Effective policy closure   │
//! │  authorization/ - Actor permission checks    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod authorization;
pub mod catalog;
pub mod error;
pub mod model;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use authorization::{ActorRef, AuthorizationValidator, GrantScope, RequiredPermissions};
pub use catalog::PolicyCatalog;
pub use error::{DomainError, DomainResult};
pub use resolver::{PolicyResolver, ResolverConfig, RoleGraphReader};
