//! Role mutation steps.

use std::sync::Arc;

use async_trait::async_trait;
use rbac_storage::{DataStore, NewRole, Role, RoleFilter, RolePatch};
use tracing::{debug, instrument};

use super::{SagaStep, StepOutcome, UpdateInput, UpdateSnapshot};
use crate::error::RbacResult;

/// Creates roles; compensation soft-deletes them.
pub struct CreateRolesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> CreateRolesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for CreateRolesStep<S> {
    type Input = Vec<NewRole>;
    type Output = Vec<Role>;
    type Token = Vec<String>;

    const NAME: &'static str = "create_roles";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(&self, input: Vec<NewRole>) -> RbacResult<StepOutcome<Vec<Role>, Vec<String>>> {
        let created = self.store.create_roles(input).await?;
        let ids = created.iter().map(|r| r.id.clone()).collect();
        Ok(StepOutcome::new(created, ids))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.delete_roles(&ids).await?;
        debug!(count = ids.len(), "created roles rolled back");
        Ok(())
    }
}

/// Patches roles; compensation writes back the previous values of the
/// patched fields.
pub struct UpdateRolesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> UpdateRolesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for UpdateRolesStep<S> {
    type Input = UpdateInput<RoleFilter, RolePatch>;
    type Output = Vec<Role>;
    type Token = UpdateSnapshot<RolePatch>;

    const NAME: &'static str = "update_roles";

    #[instrument(skip_all)]
    async fn forward(
        &self,
        input: Self::Input,
    ) -> RbacResult<StepOutcome<Vec<Role>, UpdateSnapshot<RolePatch>>> {
        let UpdateInput { filter, patch } = input;
        let current = self.store.list_roles(&filter).await?;
        let updated = self.store.update_roles(&filter, &patch).await?;

        let changed_fields = patch.changed_fields();
        let previous = current
            .iter()
            .filter(|r| updated.iter().any(|u| u.id == r.id))
            .map(|r| (r.id.clone(), RolePatch::snapshot(r, &changed_fields)))
            .collect();
        Ok(StepOutcome::new(
            updated,
            UpdateSnapshot {
                changed_fields,
                previous,
            },
        ))
    }

    async fn compensate(&self, token: Option<UpdateSnapshot<RolePatch>>) -> RbacResult<()> {
        let Some(snapshot) = token else {
            return Ok(());
        };
        for (id, patch) in &snapshot.previous {
            if patch.is_empty() {
                continue;
            }
            self.store
                .update_roles(&RoleFilter::by_ids([id.as_str()]), patch)
                .await?;
        }
        debug!(
            count = snapshot.previous.len(),
            fields = ?snapshot.changed_fields,
            "role updates rolled back"
        );
        Ok(())
    }
}

/// Soft-deletes roles. Their edges and assignments become invisible until
/// the roles are restored.
pub struct DeleteRolesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> DeleteRolesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for DeleteRolesStep<S> {
    type Input = Vec<String>;
    type Output = Vec<String>;
    type Token = Vec<String>;

    const NAME: &'static str = "delete_roles";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(&self, input: Vec<String>) -> RbacResult<StepOutcome<Vec<String>, Vec<String>>> {
        let deleted = self.store.delete_roles(&input).await?;
        Ok(StepOutcome::new(deleted.clone(), deleted))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.restore_roles(&ids).await?;
        debug!(count = ids.len(), "deleted roles restored");
        Ok(())
    }
}
