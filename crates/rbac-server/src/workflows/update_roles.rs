//! Update roles together with their parents and policies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rbac_domain::RequiredPermissions;
use rbac_storage::{DataStore, RoleFilter, RoleParentFilter, RolePolicyFilter, StorageError};
use tracing::{info, instrument};

use super::types::{RoleWithRelations, UpdateRolesInput};
use super::{dedup_ids, finish};
use crate::error::{RbacError, RbacResult};
use crate::saga::{
    RoleParents, RolePolicies, SagaRunner, SetRoleParentsStep, SyncRolePoliciesStep,
    UpdateInput, UpdateRolesStep, ValidateActorInput, ValidateActorPermissionsStep,
};

pub struct UpdateRolesWorkflow<S: DataStore> {
    store: Arc<S>,
    authorize: Arc<ValidateActorPermissionsStep<S>>,
    update_roles: Arc<UpdateRolesStep<S>>,
    set_parents: Arc<SetRoleParentsStep<S>>,
    sync_policies: Arc<SyncRolePoliciesStep<S>>,
}

impl<S: DataStore> UpdateRolesWorkflow<S> {
    pub const NAME: &'static str = "update_roles_with_relations";

    pub fn new(store: Arc<S>, authorize: Arc<ValidateActorPermissionsStep<S>>) -> Self {
        Self {
            authorize,
            update_roles: Arc::new(UpdateRolesStep::new(Arc::clone(&store))),
            set_parents: Arc::new(SetRoleParentsStep::new(Arc::clone(&store))),
            sync_policies: Arc::new(SyncRolePoliciesStep::new(Arc::clone(&store))),
            store,
        }
    }

    /// Applies each role's patch and replaces the relation lists it
    /// declares. Returned roles are in input order.
    #[instrument(skip_all, fields(roles = input.roles.len()))]
    pub async fn execute(&self, input: UpdateRolesInput) -> RbacResult<Vec<RoleWithRelations>> {
        let mut saga = SagaRunner::new(Self::NAME);
        let result = self.run(&mut saga, input).await;
        finish(&mut saga, result).await
    }

    async fn run(
        &self,
        saga: &mut SagaRunner,
        input: UpdateRolesInput,
    ) -> RbacResult<Vec<RoleWithRelations>> {
        if input.roles.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        for entry in &input.roles {
            if !seen.insert(entry.role_id.as_str()) {
                return Err(RbacError::InvalidInput {
                    message: format!("role {} listed more than once", entry.role_id),
                });
            }
        }
        let role_ids: Vec<String> = input.roles.iter().map(|r| r.role_id.clone()).collect();
        self.require_roles(&role_ids).await?;

        let granted = dedup_ids(input.roles.iter().flat_map(|r| r.policy_ids.iter().flatten()));
        if !granted.is_empty() {
            saga.run(
                &self.authorize,
                ValidateActorInput {
                    actor: input.actor.clone(),
                    required: RequiredPermissions::policy_ids(granted),
                },
            )
            .await?;
        }

        for entry in input.roles.iter().filter(|r| !r.patch.is_empty()) {
            saga.run(
                &self.update_roles,
                UpdateInput {
                    filter: RoleFilter::by_ids([entry.role_id.as_str()]),
                    patch: entry.patch.clone(),
                },
            )
            .await?;
        }

        let parents: Vec<RoleParents> = input
            .roles
            .iter()
            .filter_map(|r| {
                r.parent_ids
                    .as_ref()
                    .map(|ids| RoleParents::new(&r.role_id, dedup_ids(ids)))
            })
            .collect();
        if !parents.is_empty() {
            saga.run(&self.set_parents, parents).await?;
        }

        let policies: Vec<RolePolicies> = input
            .roles
            .iter()
            .filter_map(|r| {
                r.policy_ids
                    .as_ref()
                    .map(|ids| RolePolicies::new(&r.role_id, dedup_ids(ids)))
            })
            .collect();
        if !policies.is_empty() {
            saga.run(&self.sync_policies, policies).await?;
        }

        info!(updated = role_ids.len(), "roles updated");
        self.load_relations(&role_ids).await
    }

    async fn require_roles(&self, role_ids: &[String]) -> RbacResult<()> {
        let live: HashSet<String> = self
            .store
            .list_roles(&RoleFilter::by_ids(role_ids.iter().cloned()))
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        match role_ids.iter().find(|id| !live.contains(*id)) {
            Some(missing) => Err(StorageError::RoleNotFound {
                id: missing.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Reads back the roles with their current direct relations.
    async fn load_relations(&self, role_ids: &[String]) -> RbacResult<Vec<RoleWithRelations>> {
        let mut roles: HashMap<String, _> = self
            .store
            .list_roles(&RoleFilter::by_ids(role_ids.iter().cloned()))
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in self
            .store
            .list_role_parents(&RoleParentFilter {
                role_ids: Some(role_ids.to_vec()),
                ..Default::default()
            })
            .await?
        {
            parents.entry(edge.role_id).or_default().push(edge.parent_id);
        }

        let mut policies: HashMap<String, Vec<String>> = HashMap::new();
        for assignment in self
            .store
            .list_role_policies(&RolePolicyFilter {
                role_ids: Some(role_ids.to_vec()),
                ..Default::default()
            })
            .await?
        {
            policies
                .entry(assignment.role_id)
                .or_default()
                .push(assignment.policy_id);
        }

        role_ids
            .iter()
            .map(|id| -> RbacResult<RoleWithRelations> {
                let role = roles
                    .remove(id)
                    .ok_or_else(|| StorageError::RoleNotFound { id: id.clone() })?;
                Ok(RoleWithRelations {
                    role,
                    parent_ids: parents.remove(id).unwrap_or_default(),
                    policy_ids: policies.remove(id).unwrap_or_default(),
                })
            })
            .collect()
    }
}
