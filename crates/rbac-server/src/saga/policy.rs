//! Policy mutation steps.

use std::sync::Arc;

use async_trait::async_trait;
use rbac_domain::PolicyCatalog;
use rbac_storage::{DataStore, NewPolicy, Policy, PolicyFilter, PolicyPatch};
use tracing::{debug, instrument};

use super::{SagaStep, StepOutcome, UpdateInput, UpdateSnapshot};
use crate::error::RbacResult;

fn check_catalog(catalog: Option<&PolicyCatalog>, resource: &str, operation: &str) -> RbacResult<()> {
    if let Some(catalog) = catalog {
        catalog.validate(resource, operation)?;
    }
    Ok(())
}

/// Creates policies; compensation soft-deletes them.
pub struct CreatePoliciesStep<S: DataStore> {
    store: Arc<S>,
    catalog: Option<Arc<PolicyCatalog>>,
}

impl<S: DataStore> CreatePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, catalog: None }
    }

    /// Rejects resources and operations missing from `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<PolicyCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for CreatePoliciesStep<S> {
    type Input = Vec<NewPolicy>;
    type Output = Vec<Policy>;
    type Token = Vec<String>;

    const NAME: &'static str = "create_policies";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(&self, input: Vec<NewPolicy>) -> RbacResult<StepOutcome<Vec<Policy>, Vec<String>>> {
        for policy in &input {
            check_catalog(self.catalog.as_deref(), &policy.resource, &policy.operation)?;
        }
        let created = self.store.create_policies(input).await?;
        let ids = created.iter().map(|p| p.id.clone()).collect();
        Ok(StepOutcome::new(created, ids))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.delete_policies(&ids).await?;
        debug!(count = ids.len(), "created policies rolled back");
        Ok(())
    }
}

/// Patches policies; compensation writes back the previous values of the
/// patched fields.
pub struct UpdatePoliciesStep<S: DataStore> {
    store: Arc<S>,
    catalog: Option<Arc<PolicyCatalog>>,
}

impl<S: DataStore> UpdatePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store, catalog: None }
    }

    pub fn with_catalog(mut self, catalog: Arc<PolicyCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for UpdatePoliciesStep<S> {
    type Input = UpdateInput<PolicyFilter, PolicyPatch>;
    type Output = Vec<Policy>;
    type Token = UpdateSnapshot<PolicyPatch>;

    const NAME: &'static str = "update_policies";

    #[instrument(skip_all)]
    async fn forward(
        &self,
        input: Self::Input,
    ) -> RbacResult<StepOutcome<Vec<Policy>, UpdateSnapshot<PolicyPatch>>> {
        let UpdateInput { filter, patch } = input;
        let current = self.store.list_policies(&filter).await?;

        if patch.resource.is_some() || patch.operation.is_some() {
            for policy in &current {
                let resource = patch.resource.as_deref().unwrap_or(&policy.resource);
                let operation = patch.operation.as_deref().unwrap_or(&policy.operation);
                check_catalog(self.catalog.as_deref(), resource, operation)?;
            }
        }

        let updated = self.store.update_policies(&filter, &patch).await?;

        let changed_fields = patch.changed_fields();
        let previous = current
            .iter()
            .filter(|p| updated.iter().any(|u| u.id == p.id))
            .map(|p| (p.id.clone(), PolicyPatch::snapshot(p, &changed_fields)))
            .collect();
        Ok(StepOutcome::new(
            updated,
            UpdateSnapshot {
                changed_fields,
                previous,
            },
        ))
    }

    async fn compensate(&self, token: Option<UpdateSnapshot<PolicyPatch>>) -> RbacResult<()> {
        let Some(snapshot) = token else {
            return Ok(());
        };
        for (id, patch) in &snapshot.previous {
            if patch.is_empty() {
                continue;
            }
            self.store
                .update_policies(&PolicyFilter::by_ids([id.as_str()]), patch)
                .await?;
        }
        debug!(
            count = snapshot.previous.len(),
            fields = ?snapshot.changed_fields,
            "policy updates rolled back"
        );
        Ok(())
    }
}

/// Soft-deletes policies. Assignments pointing at them disappear from reads
/// without being touched, so compensation only needs to restore the policies.
pub struct DeletePoliciesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> DeletePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for DeletePoliciesStep<S> {
    type Input = Vec<String>;
    type Output = Vec<String>;
    type Token = Vec<String>;

    const NAME: &'static str = "delete_policies";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(&self, input: Vec<String>) -> RbacResult<StepOutcome<Vec<String>, Vec<String>>> {
        let deleted = self.store.delete_policies(&input).await?;
        Ok(StepOutcome::new(deleted.clone(), deleted))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.restore_policies(&ids).await?;
        debug!(count = ids.len(), "deleted policies restored");
        Ok(())
    }
}
