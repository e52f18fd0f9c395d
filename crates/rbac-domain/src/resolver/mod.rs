//! Policy resolver for effective permission sets.
//!
//! This module provides the recursive closure over the role inheritance
//! graph:
//! - Level-by-level upward walk with batched parent lookups
//! - Per-branch path tracking as a cycle guard
//! - Diamond-safe deduplication with provenance tagging
//! - Depth limiting

mod config;
mod context;
mod policy_resolver;
mod traits;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{ResolverConfig, DEFAULT_MAX_DEPTH};
pub use policy_resolver::PolicyResolver;
pub use traits::RoleGraphReader;
