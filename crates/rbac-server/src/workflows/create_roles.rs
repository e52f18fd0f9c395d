//! Create roles together with their parents and policies.

use std::sync::Arc;

use rbac_domain::RequiredPermissions;
use rbac_storage::{DataStore, NewRolePolicy};
use tracing::{info, instrument};

use super::types::{CreateRolesInput, RoleWithRelations};
use super::{dedup_ids, finish};
use crate::error::RbacResult;
use crate::saga::{
    CreateRolePoliciesStep, CreateRolesStep, RoleParents, SagaRunner, SetRoleParentsStep,
    ValidateActorInput, ValidateActorPermissionsStep,
};

pub struct CreateRolesWorkflow<S: DataStore> {
    authorize: Arc<ValidateActorPermissionsStep<S>>,
    create_roles: Arc<CreateRolesStep<S>>,
    set_parents: Arc<SetRoleParentsStep<S>>,
    assign_policies: Arc<CreateRolePoliciesStep<S>>,
}

impl<S: DataStore> CreateRolesWorkflow<S> {
    pub const NAME: &'static str = "create_roles_with_relations";

    pub fn new(store: Arc<S>, authorize: Arc<ValidateActorPermissionsStep<S>>) -> Self {
        Self {
            authorize,
            create_roles: Arc::new(CreateRolesStep::new(Arc::clone(&store))),
            set_parents: Arc::new(SetRoleParentsStep::new(Arc::clone(&store))),
            assign_policies: Arc::new(CreateRolePoliciesStep::new(store)),
        }
    }

    /// Creates the roles, links their parents and grants their policies.
    ///
    /// Returned roles are in input order.
    #[instrument(skip_all, fields(roles = input.roles.len()))]
    pub async fn execute(&self, input: CreateRolesInput) -> RbacResult<Vec<RoleWithRelations>> {
        let mut saga = SagaRunner::new(Self::NAME);
        let result = self.run(&mut saga, input).await;
        finish(&mut saga, result).await
    }

    async fn run(
        &self,
        saga: &mut SagaRunner,
        input: CreateRolesInput,
    ) -> RbacResult<Vec<RoleWithRelations>> {
        if input.roles.is_empty() {
            return Ok(Vec::new());
        }

        let granted = dedup_ids(input.roles.iter().flat_map(|r| r.policy_ids.iter()));
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

        let new_roles = input.roles.iter().map(|r| r.role.clone()).collect();
        let created = saga.run(&self.create_roles, new_roles).await?;

        let relations: Vec<(Vec<String>, Vec<String>)> = input
            .roles
            .iter()
            .map(|r| (dedup_ids(&r.parent_ids), dedup_ids(&r.policy_ids)))
            .collect();

        let parents: Vec<RoleParents> = created
            .iter()
            .zip(&relations)
            .filter(|(_, (parent_ids, _))| !parent_ids.is_empty())
            .map(|(role, (parent_ids, _))| RoleParents::new(&role.id, parent_ids))
            .collect();
        if !parents.is_empty() {
            saga.run(&self.set_parents, parents).await?;
        }

        let assignments: Vec<NewRolePolicy> = created
            .iter()
            .zip(&relations)
            .flat_map(|(role, (_, policy_ids))| {
                policy_ids
                    .iter()
                    .map(move |policy_id| NewRolePolicy::new(&role.id, policy_id))
            })
            .collect();
        if !assignments.is_empty() {
            saga.run(&self.assign_policies, assignments).await?;
        }

        info!(created = created.len(), "roles created");
        Ok(created
            .into_iter()
            .zip(relations)
            .map(|(role, (parent_ids, policy_ids))| RoleWithRelations {
                role,
                parent_ids,
                policy_ids,
            })
            .collect())
    }
}
