//! Role policy assignment steps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rbac_storage::{
    DataStore, NewRolePolicy, RoleFilter, RolePolicy, RolePolicyFilter, RolePolicyPatch,
    StorageError,
};
use tracing::{debug, instrument, warn};

use super::role_parent::diff_parents;
use super::{SagaStep, StepOutcome, UpdateInput, UpdateSnapshot};
use crate::error::{RbacError, RbacResult};

/// Creates assignments; compensation soft-deletes them.
pub struct CreateRolePoliciesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> CreateRolePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for CreateRolePoliciesStep<S> {
    type Input = Vec<NewRolePolicy>;
    type Output = Vec<RolePolicy>;
    type Token = Vec<String>;

    const NAME: &'static str = "create_role_policies";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(
        &self,
        input: Vec<NewRolePolicy>,
    ) -> RbacResult<StepOutcome<Vec<RolePolicy>, Vec<String>>> {
        let created = self.store.create_role_policies(input).await?;
        let ids = created.iter().map(|a| a.id.clone()).collect();
        Ok(StepOutcome::new(created, ids))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.delete_role_policies(&ids).await?;
        debug!(count = ids.len(), "created assignments rolled back");
        Ok(())
    }
}

/// Patches assignment metadata; compensation writes back the prior values.
pub struct UpdateRolePoliciesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> UpdateRolePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for UpdateRolePoliciesStep<S> {
    type Input = UpdateInput<RolePolicyFilter, RolePolicyPatch>;
    type Output = Vec<RolePolicy>;
    type Token = UpdateSnapshot<RolePolicyPatch>;

    const NAME: &'static str = "update_role_policies";

    #[instrument(skip_all)]
    async fn forward(
        &self,
        input: Self::Input,
    ) -> RbacResult<StepOutcome<Vec<RolePolicy>, UpdateSnapshot<RolePolicyPatch>>> {
        let UpdateInput { filter, patch } = input;
        let current = self.store.list_role_policies(&filter).await?;
        let updated = self.store.update_role_policies(&filter, &patch).await?;

        let changed_fields = patch.changed_fields();
        let previous = current
            .iter()
            .filter(|a| updated.iter().any(|u| u.id == a.id))
            .map(|a| (a.id.clone(), RolePolicyPatch::snapshot(a, &changed_fields)))
            .collect();
        Ok(StepOutcome::new(
            updated,
            UpdateSnapshot {
                changed_fields,
                previous,
            },
        ))
    }

    async fn compensate(&self, token: Option<UpdateSnapshot<RolePolicyPatch>>) -> RbacResult<()> {
        let Some(snapshot) = token else {
            return Ok(());
        };
        for (id, patch) in &snapshot.previous {
            if patch.is_empty() {
                continue;
            }
            self.store
                .update_role_policies(&RolePolicyFilter::by_ids([id.as_str()]), patch)
                .await?;
        }
        debug!(count = snapshot.previous.len(), "assignment updates rolled back");
        Ok(())
    }
}

/// Soft-deletes assignments; compensation restores them.
pub struct DeleteRolePoliciesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> DeleteRolePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for DeleteRolePoliciesStep<S> {
    type Input = Vec<String>;
    type Output = Vec<String>;
    type Token = Vec<String>;

    const NAME: &'static str = "delete_role_policies";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(&self, input: Vec<String>) -> RbacResult<StepOutcome<Vec<String>, Vec<String>>> {
        let deleted = self.store.delete_role_policies(&input).await?;
        Ok(StepOutcome::new(deleted.clone(), deleted))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.restore_role_policies(&ids).await?;
        debug!(count = ids.len(), "deleted assignments restored");
        Ok(())
    }
}

/// The declared direct policy list of one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicies {
    pub role_id: String,
    pub policy_ids: Vec<String>,
}

impl RolePolicies {
    pub fn new<I, S>(role_id: impl Into<String>, policy_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role_id: role_id.into(),
            policy_ids: policy_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Policy ids granted to and revoked from one role by a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePoliciesChange {
    pub role_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Assignment ids a sync created and soft-deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncToken {
    pub created: Vec<String>,
    pub removed: Vec<String>,
}

/// Reconciles each role's direct policies with a declared list.
///
/// Unlike parent reconciliation, the token records only the delta:
/// compensation deletes the assignments the sync created and restores the
/// ones it removed, so the original assignment rows come back.
pub struct SyncRolePoliciesStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> SyncRolePoliciesStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for SyncRolePoliciesStep<S> {
    type Input = Vec<RolePolicies>;
    type Output = Vec<RolePoliciesChange>;
    type Token = SyncToken;

    const NAME: &'static str = "sync_role_policies";

    #[instrument(skip_all, fields(roles = input.len()))]
    async fn forward(
        &self,
        input: Vec<RolePolicies>,
    ) -> RbacResult<StepOutcome<Vec<RolePoliciesChange>, SyncToken>> {
        if input.is_empty() {
            return Ok(StepOutcome::new(Vec::new(), SyncToken::default()));
        }

        let mut seen = HashSet::new();
        for entry in &input {
            if !seen.insert(entry.role_id.as_str()) {
                return Err(RbacError::InvalidInput {
                    message: format!("role {} listed more than once", entry.role_id),
                });
            }
        }

        let role_ids: Vec<String> = input.iter().map(|e| e.role_id.clone()).collect();
        let live: HashSet<String> = self
            .store
            .list_roles(&RoleFilter::by_ids(role_ids.iter().cloned()))
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        if let Some(missing) = role_ids.iter().find(|id| !live.contains(*id)) {
            return Err(StorageError::RoleNotFound {
                id: missing.clone(),
            }
            .into());
        }

        let mut current: HashMap<String, Vec<RolePolicy>> = HashMap::new();
        for assignment in self
            .store
            .list_role_policies(&RolePolicyFilter {
                role_ids: Some(role_ids),
                ..Default::default()
            })
            .await?
        {
            current
                .entry(assignment.role_id.clone())
                .or_default()
                .push(assignment);
        }

        let mut changes = Vec::with_capacity(input.len());
        let mut to_create = Vec::new();
        let mut to_remove = Vec::new();

        for entry in input {
            let assignments = current.remove(&entry.role_id).unwrap_or_default();
            let held: Vec<String> = assignments.iter().map(|a| a.policy_id.clone()).collect();
            let diff = diff_parents(&held, &entry.policy_ids);

            to_create.extend(
                diff.to_add
                    .iter()
                    .map(|policy_id| NewRolePolicy::new(&entry.role_id, policy_id)),
            );
            to_remove.extend(
                assignments
                    .iter()
                    .filter(|a| diff.to_remove.contains(&a.policy_id))
                    .map(|a| a.id.clone()),
            );
            changes.push(RolePoliciesChange {
                role_id: entry.role_id,
                added: diff.to_add,
                removed: diff.to_remove,
            });
        }

        let created: Vec<String> = if to_create.is_empty() {
            Vec::new()
        } else {
            self.store
                .create_role_policies(to_create)
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect()
        };

        if !to_remove.is_empty() {
            if let Err(e) = self.store.delete_role_policies(&to_remove).await {
                if !created.is_empty() {
                    if let Err(undo) = self.store.delete_role_policies(&created).await {
                        warn!(error = %undo, "failed to drop assignments added by a failed sync");
                    }
                }
                return Err(e.into());
            }
        }

        debug!(
            added = created.len(),
            removed = to_remove.len(),
            "role policies synced"
        );
        Ok(StepOutcome::new(
            changes,
            SyncToken {
                created,
                removed: to_remove,
            },
        ))
    }

    async fn compensate(&self, token: Option<SyncToken>) -> RbacResult<()> {
        let Some(token) = token else {
            return Ok(());
        };
        if !token.created.is_empty() {
            self.store.delete_role_policies(&token.created).await?;
        }
        if !token.removed.is_empty() {
            self.store.restore_role_policies(&token.removed).await?;
        }
        debug!(
            created = token.created.len(),
            removed = token.removed.len(),
            "role policy sync rolled back"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rbac_storage::{MemoryDataStore, NewPolicy, NewRole};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryDataStore>,
        role_id: String,
        policy_ids: Vec<String>,
    }

    async fn fixture() -> Fixture {
        let store = MemoryDataStore::new_shared();
        let role = store.create_roles(vec![NewRole::new("editor")]).await.unwrap();
        let policies = store
            .create_policies(vec![
                NewPolicy::new("order", "read"),
                NewPolicy::new("order", "update"),
                NewPolicy::new("order", "delete"),
            ])
            .await
            .unwrap();
        Fixture {
            store,
            role_id: role[0].id.clone(),
            policy_ids: policies.into_iter().map(|p| p.id).collect(),
        }
    }

    async fn held(store: &MemoryDataStore, role_id: &str) -> Vec<RolePolicy> {
        store
            .list_role_policies(&RolePolicyFilter {
                role_ids: Some(vec![role_id.to_string()]),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assignment_twice_conflicts() {
        let f = fixture().await;
        let step = CreateRolePoliciesStep::new(Arc::clone(&f.store));
        let input = vec![NewRolePolicy::new(&f.role_id, &f.policy_ids[0])];

        let outcome = step.forward(input.clone()).await.unwrap();
        let err = step.forward(input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        step.compensate(Some(outcome.token)).await.unwrap();
        assert!(held(&f.store, &f.role_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_assigning_missing_policy_is_not_found() {
        let f = fixture().await;
        let step = CreateRolePoliciesStep::new(Arc::clone(&f.store));
        let err = step
            .forward(vec![NewRolePolicy::new(&f.role_id, "pol_missing")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_and_delete_compensations() {
        let f = fixture().await;
        let created = f
            .store
            .create_role_policies(vec![NewRolePolicy::new(&f.role_id, &f.policy_ids[0])])
            .await
            .unwrap();
        let assignment_id = created[0].id.clone();

        let update = UpdateRolePoliciesStep::new(Arc::clone(&f.store));
        let outcome = update
            .forward(UpdateInput {
                filter: RolePolicyFilter::by_ids([assignment_id.as_str()]),
                patch: RolePolicyPatch {
                    metadata: Some(json!({"granted_by": "ops"}).as_object().cloned()),
                },
            })
            .await
            .unwrap();
        assert!(outcome.output[0].metadata.is_some());
        update.compensate(Some(outcome.token)).await.unwrap();
        assert!(held(&f.store, &f.role_id).await[0].metadata.is_none());

        let delete = DeleteRolePoliciesStep::new(Arc::clone(&f.store));
        let outcome = delete.forward(vec![assignment_id.clone()]).await.unwrap();
        assert!(held(&f.store, &f.role_id).await.is_empty());
        delete.compensate(Some(outcome.token)).await.unwrap();
        assert_eq!(held(&f.store, &f.role_id).await[0].id, assignment_id);
    }

    #[tokio::test]
    async fn test_sync_applies_delta_and_compensation_restores_rows() {
        let f = fixture().await;
        let original = f
            .store
            .create_role_policies(vec![
                NewRolePolicy::new(&f.role_id, &f.policy_ids[0]),
                NewRolePolicy::new(&f.role_id, &f.policy_ids[1]),
            ])
            .await
            .unwrap();

        let step = SyncRolePoliciesStep::new(Arc::clone(&f.store));
        let outcome = step
            .forward(vec![RolePolicies::new(
                &f.role_id,
                [&f.policy_ids[1], &f.policy_ids[2]],
            )])
            .await
            .unwrap();
        assert_eq!(outcome.output[0].added, vec![f.policy_ids[2].clone()]);
        assert_eq!(outcome.output[0].removed, vec![f.policy_ids[0].clone()]);

        let mut now: Vec<String> = held(&f.store, &f.role_id)
            .await
            .into_iter()
            .map(|a| a.policy_id)
            .collect();
        now.sort();
        let mut expected = vec![f.policy_ids[1].clone(), f.policy_ids[2].clone()];
        expected.sort();
        assert_eq!(now, expected);

        step.compensate(Some(outcome.token)).await.unwrap();
        let mut restored: Vec<String> = held(&f.store, &f.role_id)
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();
        restored.sort();
        let mut original_ids: Vec<String> = original.into_iter().map(|a| a.id).collect();
        original_ids.sort();
        assert_eq!(restored, original_ids);
    }

    #[tokio::test]
    async fn test_sync_with_missing_policy_writes_nothing() {
        let f = fixture().await;
        f.store
            .create_role_policies(vec![NewRolePolicy::new(&f.role_id, &f.policy_ids[0])])
            .await
            .unwrap();

        let step = SyncRolePoliciesStep::new(Arc::clone(&f.store));
        let err = step
            .forward(vec![RolePolicies::new(&f.role_id, ["pol_missing"])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(held(&f.store, &f.role_id).await.len(), 1);
    }
}
