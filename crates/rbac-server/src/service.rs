//! Entry point wiring storage, resolver, validator and workflows together.

use std::collections::HashMap;
use std::sync::Arc;

use rbac_domain::model::{PolicyRef, ResolvedPolicy};
use rbac_domain::{ActorRef, AuthorizationValidator, PolicyCatalog, PolicyResolver, RequiredPermissions, ResolverConfig};
use rbac_storage::{DataStore, MemoryDataStore, RoleParent};
use tracing::info;

use crate::adapters::DataStoreRoleGraph;
use crate::config::{ConfigLoadError, RbacConfig};
use crate::error::RbacResult;
use crate::saga::{
    CreatePoliciesStep, CreateRoleParentsStep, CreateRolePoliciesStep, CreateRolesStep,
    DeletePoliciesStep, DeleteRolePoliciesStep, DeleteRolesStep, SetRoleParentsStep,
    StoreValidator, SyncRolePoliciesStep, UpdatePoliciesStep, UpdateRolePoliciesStep,
    UpdateRolesStep, ValidateActorPermissionsStep,
};
use crate::workflows::{
    CreateRolesInput, CreateRolesWorkflow, RoleWithRelations, UpdateRolesInput, UpdateRolesWorkflow,
};

/// RBAC engine over a `DataStore`.
///
/// Reads go straight through the resolver and validator. Mutations are
/// exposed as saga steps and composite workflows so callers can compose
/// them with their own compensation handling.
pub struct RbacService<S: DataStore> {
    store: Arc<S>,
    resolver: PolicyResolver<DataStoreRoleGraph<S>>,
    validator: Arc<StoreValidator<S>>,
    catalog: Option<Arc<PolicyCatalog>>,
    config: RbacConfig,
}

impl RbacService<MemoryDataStore> {
    /// Builds a service over the backend named by `storage.backend`.
    pub fn from_config(config: RbacConfig) -> RbacResult<Self> {
        config.validate()?;
        match config.storage.backend.as_str() {
            "memory" => Ok(Self::new(MemoryDataStore::new_shared(), config)),
            other => Err(ConfigLoadError::Invalid {
                message: format!("unsupported storage backend: {other}"),
            }
            .into()),
        }
    }
}

impl<S: DataStore> RbacService<S> {
    pub fn new(store: Arc<S>, config: RbacConfig) -> Self {
        let graph = Arc::new(DataStoreRoleGraph::new(Arc::clone(&store)));
        let resolver_config = ResolverConfig::default().with_max_depth(config.resolver.max_depth);
        let resolver = PolicyResolver::with_config(Arc::clone(&graph), resolver_config.clone());
        let validator = Arc::new(
            AuthorizationValidator::new(Arc::clone(&graph), Arc::clone(&graph))
                .with_scope(config.authorization.scope)
                .with_resolver_config(resolver_config),
        );
        let catalog = config.catalog.to_catalog().map(Arc::new);

        info!(
            backend = %config.storage.backend,
            scope = ?config.authorization.scope,
            require_actor = config.authorization.require_actor,
            catalog = catalog.is_some(),
            "rbac service ready"
        );

        Self {
            store,
            resolver,
            validator,
            catalog,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RbacConfig {
        &self.config
    }

    /// The enforced catalog, if any.
    pub fn catalog(&self) -> Option<&PolicyCatalog> {
        self.catalog.as_deref()
    }

    // ========== Reads ==========

    /// Effective policies of each role, keyed by input role id.
    pub async fn list_effective_policies(
        &self,
        role_ids: &[String],
    ) -> RbacResult<HashMap<String, Vec<ResolvedPolicy>>> {
        Ok(self.resolver.resolve(role_ids).await?)
    }

    /// Merged effective policies across every role the actor holds.
    pub async fn actor_effective_policies(&self, actor: &ActorRef) -> RbacResult<Vec<PolicyRef>> {
        let role_ids = self
            .store
            .list_actor_roles(&actor.kind, &actor.id)
            .await?;
        Ok(self.resolver.resolve_merged(&role_ids).await?)
    }

    /// Fails with an unauthorized error unless `actor` holds `required`.
    pub async fn validate_actor(&self, actor: &ActorRef, required: &RequiredPermissions) -> RbacResult<()> {
        Ok(self.validator.validate(actor, required).await?)
    }

    pub async fn is_allowed(&self, actor: &ActorRef, required: &RequiredPermissions) -> RbacResult<bool> {
        Ok(self.validator.is_allowed(actor, required).await?)
    }

    /// Whether adding `role_id -> candidate_parent_id` would close a cycle.
    pub async fn has_cycle(&self, role_id: &str, candidate_parent_id: &str) -> RbacResult<bool> {
        Ok(self.store.has_cycle(role_id, candidate_parent_id).await?)
    }

    /// Direct parent edges of a role.
    pub async fn list_parent_edges(&self, role_id: &str) -> RbacResult<Vec<RoleParent>> {
        Ok(self.store.list_parent_edges(role_id).await?)
    }

    /// Ancestors of a role, nearest first.
    pub async fn ancestors(&self, role_id: &str) -> RbacResult<Vec<String>> {
        Ok(self.resolver.ancestors(role_id).await?)
    }

    // ========== Saga steps ==========

    pub fn authorize_step(&self) -> Arc<ValidateActorPermissionsStep<S>> {
        Arc::new(
            ValidateActorPermissionsStep::new(Arc::clone(&self.validator))
                .with_require_actor(self.config.authorization.require_actor),
        )
    }

    pub fn create_policies_step(&self) -> Arc<CreatePoliciesStep<S>> {
        let step = CreatePoliciesStep::new(Arc::clone(&self.store));
        Arc::new(match &self.catalog {
            Some(catalog) => step.with_catalog(Arc::clone(catalog)),
            None => step,
        })
    }

    pub fn update_policies_step(&self) -> Arc<UpdatePoliciesStep<S>> {
        let step = UpdatePoliciesStep::new(Arc::clone(&self.store));
        Arc::new(match &self.catalog {
            Some(catalog) => step.with_catalog(Arc::clone(catalog)),
            None => step,
        })
    }

    pub fn delete_policies_step(&self) -> Arc<DeletePoliciesStep<S>> {
        Arc::new(DeletePoliciesStep::new(Arc::clone(&self.store)))
    }

    pub fn create_roles_step(&self) -> Arc<CreateRolesStep<S>> {
        Arc::new(CreateRolesStep::new(Arc::clone(&self.store)))
    }

    pub fn update_roles_step(&self) -> Arc<UpdateRolesStep<S>> {
        Arc::new(UpdateRolesStep::new(Arc::clone(&self.store)))
    }

    pub fn delete_roles_step(&self) -> Arc<DeleteRolesStep<S>> {
        Arc::new(DeleteRolesStep::new(Arc::clone(&self.store)))
    }

    pub fn create_role_parents_step(&self) -> Arc<CreateRoleParentsStep<S>> {
        Arc::new(CreateRoleParentsStep::new(Arc::clone(&self.store)))
    }

    pub fn set_role_parents_step(&self) -> Arc<SetRoleParentsStep<S>> {
        Arc::new(SetRoleParentsStep::new(Arc::clone(&self.store)))
    }

    pub fn create_role_policies_step(&self) -> Arc<CreateRolePoliciesStep<S>> {
        Arc::new(CreateRolePoliciesStep::new(Arc::clone(&self.store)))
    }

    pub fn update_role_policies_step(&self) -> Arc<UpdateRolePoliciesStep<S>> {
        Arc::new(UpdateRolePoliciesStep::new(Arc::clone(&self.store)))
    }

    pub fn delete_role_policies_step(&self) -> Arc<DeleteRolePoliciesStep<S>> {
        Arc::new(DeleteRolePoliciesStep::new(Arc::clone(&self.store)))
    }

    pub fn sync_role_policies_step(&self) -> Arc<SyncRolePoliciesStep<S>> {
        Arc::new(SyncRolePoliciesStep::new(Arc::clone(&self.store)))
    }

    // ========== Workflows ==========

    pub fn create_roles_workflow(&self) -> CreateRolesWorkflow<S> {
        CreateRolesWorkflow::new(Arc::clone(&self.store), self.authorize_step())
    }

    pub fn update_roles_workflow(&self) -> UpdateRolesWorkflow<S> {
        UpdateRolesWorkflow::new(Arc::clone(&self.store), self.authorize_step())
    }

    pub async fn create_roles_with_relations(
        &self,
        input: CreateRolesInput,
    ) -> RbacResult<Vec<RoleWithRelations>> {
        self.create_roles_workflow().execute(input).await
    }

    pub async fn update_roles_with_relations(
        &self,
        input: UpdateRolesInput,
    ) -> RbacResult<Vec<RoleWithRelations>> {
        self.update_roles_workflow().execute(input).await
    }
}
