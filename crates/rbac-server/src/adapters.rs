//! Adapters that bridge the storage layer to the domain layer.
//!
//! The domain layer reads the role graph through `RoleGraphReader` and actor
//! role memberships through `ActorRoleReader`. `DataStoreRoleGraph`
//! implements both on top of any `DataStore`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use rbac_domain::authorization::{ActorRef, ActorRoleReader};
use rbac_domain::error::{DomainError, DomainResult};
use rbac_domain::model::PolicyRef;
use rbac_domain::resolver::RoleGraphReader;
use rbac_storage::{DataStore, Policy, PolicyFilter, RoleParentFilter, RolePolicyFilter, StorageError};

fn storage_error(e: StorageError) -> DomainError {
    let message = e.to_string();
    if e.is_not_found() {
        DomainError::NotFound { message }
    } else if e.is_conflict() {
        DomainError::Conflict { message }
    } else if e.is_invalid_input() {
        DomainError::InvalidInput { message }
    } else {
        DomainError::StorageError { message }
    }
}

/// Converts a stored policy into the domain's view of it.
pub fn policy_ref(policy: Policy) -> PolicyRef {
    PolicyRef {
        id: policy.id,
        key: policy.key,
        resource: policy.resource,
        operation: policy.operation,
        name: policy.name,
    }
}

/// Role graph and actor lookups backed by a `DataStore`.
pub struct DataStoreRoleGraph<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> DataStoreRoleGraph<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: DataStore> RoleGraphReader for DataStoreRoleGraph<S> {
    async fn parent_ids(&self, role_ids: &[String]) -> DomainResult<HashMap<String, Vec<String>>> {
        let edges = self
            .storage
            .list_role_parents(&RoleParentFilter {
                role_ids: Some(role_ids.to_vec()),
                ..Default::default()
            })
            .await
            .map_err(storage_error)?;

        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in edges {
            parents.entry(edge.role_id).or_default().push(edge.parent_id);
        }
        Ok(parents)
    }

    async fn direct_policies(
        &self,
        role_ids: &[String],
    ) -> DomainResult<HashMap<String, Vec<PolicyRef>>> {
        let assignments = self
            .storage
            .list_role_policies(&RolePolicyFilter {
                role_ids: Some(role_ids.to_vec()),
                ..Default::default()
            })
            .await
            .map_err(storage_error)?;
        if assignments.is_empty() {
            return Ok(HashMap::new());
        }

        let mut policy_ids: Vec<String> = assignments.iter().map(|a| a.policy_id.clone()).collect();
        policy_ids.sort();
        policy_ids.dedup();

        // Listing never fails on missing ids; assignments are already limited
        // to live policies.
        let policies: HashMap<String, PolicyRef> = self
            .storage
            .list_policies(&PolicyFilter::by_ids(policy_ids))
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(|p| (p.id.clone(), policy_ref(p)))
            .collect();

        let mut direct: HashMap<String, Vec<PolicyRef>> = HashMap::new();
        for assignment in assignments {
            if let Some(policy) = policies.get(&assignment.policy_id) {
                direct
                    .entry(assignment.role_id)
                    .or_default()
                    .push(policy.clone());
            }
        }
        Ok(direct)
    }
}

#[async_trait]
impl<S: DataStore> ActorRoleReader for DataStoreRoleGraph<S> {
    async fn actor_role_ids(&self, actor: &ActorRef) -> DomainResult<Vec<String>> {
        self.storage
            .list_actor_roles(&actor.kind, &actor.id)
            .await
            .map_err(storage_error)
    }
}
