//! Traits for graph reads needed by the resolver.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::PolicyRef;

/// Read access to the role inheritance graph.
///
/// Implementations must hide soft-deleted roles, edges and assignments.
#[async_trait]
pub trait RoleGraphReader: Send + Sync {
    /// Direct parent ids for each of `role_ids`. Roles without parents may be
    /// omitted from the map.
    async fn parent_ids(&self, role_ids: &[String]) -> DomainResult<HashMap<String, Vec<String>>>;

    /// Policies directly assigned to each of `role_ids`. Roles without
    /// assignments may be omitted from the map.
    async fn direct_policies(
        &self,
        role_ids: &[String],
    ) -> DomainResult<HashMap<String, Vec<PolicyRef>>>;
}
