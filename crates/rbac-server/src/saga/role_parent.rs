//! Parent edge steps and the parent-set diff engine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rbac_storage::{
    DataStore, NewRoleParent, RoleFilter, RoleParent, RoleParentFilter, StorageError,
};
use tracing::{debug, instrument, warn};

use super::{SagaStep, StepOutcome};
use crate::error::{RbacError, RbacResult};

/// The declared parent list of one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParents {
    pub role_id: String,
    pub parent_ids: Vec<String>,
}

impl RoleParents {
    pub fn new<I, S>(role_id: impl Into<String>, parent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role_id: role_id.into(),
            parent_ids: parent_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Edges to create and remove to move from one parent set to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl ParentDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = desired - current`, `to_remove = current - desired`.
///
/// Duplicates are ignored and both lists keep their input order.
pub fn diff_parents(current: &[String], desired: &[String]) -> ParentDiff {
    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
    let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let to_add = desired
        .iter()
        .filter(|id| !current_set.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let to_remove = current
        .iter()
        .filter(|id| !desired_set.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();

    ParentDiff { to_add, to_remove }
}

/// What a set-parents call changed for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParentsChange {
    pub role_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Parent edges a call is about to add and remove, layered over the
/// committed graph so cycle checks see the graph as it will be once the
/// call lands.
#[derive(Debug, Default)]
struct PendingEdges {
    added: HashMap<String, Vec<String>>,
    removed: HashSet<(String, String)>,
}

impl PendingEdges {
    fn add(&mut self, role_id: &str, parent_id: &str) {
        self.added
            .entry(role_id.to_string())
            .or_default()
            .push(parent_id.to_string());
    }

    fn remove(&mut self, role_id: &str, parent_id: &str) {
        self.removed
            .insert((role_id.to_string(), parent_id.to_string()));
    }

    /// Whether `target` is an ancestor of `from`, walking stored edges that
    /// survive the call plus the edges it adds. One store call per level.
    async fn reaches<S: DataStore>(&self, store: &S, from: &str, target: &str) -> RbacResult<bool> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from.to_string());
        let mut frontier = vec![from.to_string()];

        while !frontier.is_empty() {
            let stored = store
                .list_role_parents(&RoleParentFilter {
                    role_ids: Some(frontier.clone()),
                    ..Default::default()
                })
                .await?;

            let mut parents: Vec<String> = stored
                .into_iter()
                .filter(|e| !self.removed.contains(&(e.role_id.clone(), e.parent_id.clone())))
                .map(|e| e.parent_id)
                .collect();
            for role_id in &frontier {
                if let Some(added) = self.added.get(role_id) {
                    parents.extend(added.iter().cloned());
                }
            }

            frontier.clear();
            for parent_id in parents {
                if parent_id == target {
                    return Ok(true);
                }
                if visited.insert(parent_id.clone()) {
                    frontier.push(parent_id);
                }
            }
        }

        Ok(false)
    }

    /// Rejects self-parents first, then any added edge whose parent can
    /// reach its child in the resulting graph.
    async fn ensure_acyclic<S: DataStore>(&self, store: &S) -> RbacResult<()> {
        for (role_id, parent_ids) in &self.added {
            if parent_ids.iter().any(|p| p == role_id) {
                return Err(StorageError::SelfReferentialParent {
                    role_id: role_id.clone(),
                }
                .into());
            }
        }
        for (role_id, parent_ids) in &self.added {
            for parent_id in parent_ids {
                if self.reaches(store, parent_id, role_id).await? {
                    return Err(RbacError::CycleDetected {
                        role_id: role_id.clone(),
                        parent_id: parent_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Creates parent edges; compensation soft-deletes them.
///
/// The whole batch is checked for cycles, including loops formed only by
/// edges within the batch.
pub struct CreateRoleParentsStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> CreateRoleParentsStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for CreateRoleParentsStep<S> {
    type Input = Vec<NewRoleParent>;
    type Output = Vec<RoleParent>;
    type Token = Vec<String>;

    const NAME: &'static str = "create_role_parents";

    #[instrument(skip_all, fields(count = input.len()))]
    async fn forward(
        &self,
        input: Vec<NewRoleParent>,
    ) -> RbacResult<StepOutcome<Vec<RoleParent>, Vec<String>>> {
        let mut pending = PendingEdges::default();
        for edge in &input {
            pending.add(&edge.role_id, &edge.parent_id);
        }
        pending.ensure_acyclic(self.store.as_ref()).await?;

        let created = self.store.create_role_parents(input).await?;
        let ids = created.iter().map(|e| e.id.clone()).collect();
        Ok(StepOutcome::new(created, ids))
    }

    async fn compensate(&self, token: Option<Vec<String>>) -> RbacResult<()> {
        let Some(ids) = token.filter(|ids| !ids.is_empty()) else {
            return Ok(());
        };
        self.store.delete_role_parents(&ids).await?;
        debug!(count = ids.len(), "created parent edges rolled back");
        Ok(())
    }
}

/// Reconciles each role's parent edges with a declared parent list.
///
/// The token holds every role's full parent list from before the call.
/// Compensation moves each role back to that list, keeping edges that are
/// in both states.
///
/// Added edges are checked for cycles against the graph the call would
/// leave behind: committed edges minus the removed ones plus every added
/// edge. Nothing is written when a cycle is found.
pub struct SetRoleParentsStep<S: DataStore> {
    store: Arc<S>,
}

impl<S: DataStore> SetRoleParentsStep<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
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

    async fn current_edges(&self, role_ids: &[String]) -> RbacResult<HashMap<String, Vec<RoleParent>>> {
        let edges = self
            .store
            .list_role_parents(&RoleParentFilter {
                role_ids: Some(role_ids.to_vec()),
                ..Default::default()
            })
            .await?;
        let mut by_role: HashMap<String, Vec<RoleParent>> = HashMap::new();
        for edge in edges {
            by_role.entry(edge.role_id.clone()).or_default().push(edge);
        }
        Ok(by_role)
    }

    /// Creates `to_create`, then deletes `to_delete`. A failed delete drops
    /// the edges just created so the store is left as it was.
    async fn apply(
        &self,
        to_create: Vec<NewRoleParent>,
        to_delete: &[String],
    ) -> RbacResult<Vec<RoleParent>> {
        let created = if to_create.is_empty() {
            Vec::new()
        } else {
            self.store.create_role_parents(to_create).await?
        };

        if !to_delete.is_empty() {
            if let Err(e) = self.store.delete_role_parents(to_delete).await {
                let created_ids: Vec<String> = created.iter().map(|e| e.id.clone()).collect();
                if !created_ids.is_empty() {
                    if let Err(undo) = self.store.delete_role_parents(&created_ids).await {
                        warn!(error = %undo, "failed to drop parent edges added before a failed delete");
                    }
                }
                return Err(e.into());
            }
        }

        Ok(created)
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for SetRoleParentsStep<S> {
    type Input = Vec<RoleParents>;
    type Output = Vec<RoleParentsChange>;
    type Token = Vec<RoleParents>;

    const NAME: &'static str = "set_role_parents";

    #[instrument(skip_all, fields(roles = input.len()))]
    async fn forward(
        &self,
        input: Vec<RoleParents>,
    ) -> RbacResult<StepOutcome<Vec<RoleParentsChange>, Vec<RoleParents>>> {
        if input.is_empty() {
            return Ok(StepOutcome::new(Vec::new(), Vec::new()));
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
        self.require_roles(&role_ids).await?;
        let mut current = self.current_edges(&role_ids).await?;

        let mut pending = PendingEdges::default();
        let mut previous = Vec::with_capacity(input.len());
        let mut changes = Vec::with_capacity(input.len());
        let mut to_create = Vec::new();
        let mut to_delete = Vec::new();

        for entry in input {
            let edges = current.remove(&entry.role_id).unwrap_or_default();
            let current_ids: Vec<String> = edges.iter().map(|e| e.parent_id.clone()).collect();
            let diff = diff_parents(&current_ids, &entry.parent_ids);

            for parent_id in &diff.to_add {
                pending.add(&entry.role_id, parent_id);
                to_create.push(NewRoleParent::new(&entry.role_id, parent_id));
            }
            for edge in edges.iter().filter(|e| diff.to_remove.contains(&e.parent_id)) {
                pending.remove(&edge.role_id, &edge.parent_id);
                to_delete.push(edge.id.clone());
            }

            previous.push(RoleParents {
                role_id: entry.role_id.clone(),
                parent_ids: current_ids,
            });
            changes.push(RoleParentsChange {
                role_id: entry.role_id,
                added: diff.to_add,
                removed: diff.to_remove,
            });
        }

        pending.ensure_acyclic(self.store.as_ref()).await?;
        let created = self.apply(to_create, &to_delete).await?;

        debug!(
            added = created.len(),
            removed = to_delete.len(),
            "parent edges reconciled"
        );
        Ok(StepOutcome::new(changes, previous))
    }

    /// Brings each role back to its captured parent list. Missing parents
    /// are recreated before stale edges are deleted, so a failure leaves the
    /// role with the parents it had when compensation started.
    async fn compensate(&self, token: Option<Vec<RoleParents>>) -> RbacResult<()> {
        let Some(previous) = token.filter(|p| !p.is_empty()) else {
            return Ok(());
        };

        let role_ids: Vec<String> = previous.iter().map(|p| p.role_id.clone()).collect();
        let mut current = self.current_edges(&role_ids).await?;

        let mut to_create = Vec::new();
        let mut to_delete = Vec::new();
        for entry in &previous {
            let edges = current.remove(&entry.role_id).unwrap_or_default();
            let current_ids: Vec<String> = edges.iter().map(|e| e.parent_id.clone()).collect();
            let diff = diff_parents(&current_ids, &entry.parent_ids);

            to_create.extend(
                diff.to_add
                    .iter()
                    .map(|parent_id| NewRoleParent::new(&entry.role_id, parent_id)),
            );
            to_delete.extend(
                edges
                    .iter()
                    .filter(|e| diff.to_remove.contains(&e.parent_id))
                    .map(|e| e.id.clone()),
            );
        }

        self.apply(to_create, &to_delete).await?;
        debug!(roles = previous.len(), "parent sets reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rbac_storage::{MemoryDataStore, NewRole};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    async fn parents_of(store: &MemoryDataStore, role_id: &str) -> Vec<String> {
        let mut parents: Vec<String> = store
            .list_parent_edges(role_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.parent_id)
            .collect();
        parents.sort();
        parents
    }

    /// Creates roles named after `names` and returns their ids in order.
    async fn seed(store: &MemoryDataStore, names: &[&str]) -> Vec<String> {
        store
            .create_roles(names.iter().map(|n| NewRole::new(*n)).collect())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[test]
    fn test_diff_parents() {
        let diff = diff_parents(&ids(&["a", "b"]), &ids(&["b", "c"]));
        assert_eq!(diff.to_add, ids(&["c"]));
        assert_eq!(diff.to_remove, ids(&["a"]));

        let diff = diff_parents(&ids(&["a"]), &ids(&["a", "a"]));
        assert!(diff.is_empty());

        let diff = diff_parents(&[], &ids(&["x", "y", "x"]));
        assert_eq!(diff.to_add, ids(&["x", "y"]));

        let diff = diff_parents(&ids(&["x", "y"]), &[]);
        assert_eq!(diff.to_remove, ids(&["x", "y"]));
    }

    #[tokio::test]
    async fn test_set_parents_then_compensate_restores_previous_set() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["r", "a", "b", "c"]).await;
        let (role, a, b, c) = (&r[0], &r[1], &r[2], &r[3]);
        store
            .create_role_parents(vec![NewRoleParent::new(role, a), NewRoleParent::new(role, b)])
            .await
            .unwrap();

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let outcome = step
            .forward(vec![RoleParents::new(role, [b, c])])
            .await
            .unwrap();

        assert_eq!(outcome.output[0].added, vec![c.clone()]);
        assert_eq!(outcome.output[0].removed, vec![a.clone()]);
        let mut expected = vec![b.clone(), c.clone()];
        expected.sort();
        assert_eq!(parents_of(&store, role).await, expected);

        let mut previous = outcome.token[0].parent_ids.clone();
        previous.sort();
        let mut original = vec![a.clone(), b.clone()];
        original.sort();
        assert_eq!(previous, original);

        step.compensate(Some(outcome.token)).await.unwrap();
        assert_eq!(parents_of(&store, role).await, original);
    }

    #[tokio::test]
    async fn test_set_parents_rejects_cycle_before_writing() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a", "b", "c"]).await;
        let (a, b, c) = (&r[0], &r[1], &r[2]);
        // a -> b -> c
        store
            .create_role_parents(vec![NewRoleParent::new(a, b), NewRoleParent::new(b, c)])
            .await
            .unwrap();

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let err = step
            .forward(vec![RoleParents::new(c, [a])])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CycleDetected { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(parents_of(&store, c).await.is_empty());
    }

    #[tokio::test]
    async fn test_set_parents_rejects_self_parent() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a"]).await;

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let err = step
            .forward(vec![RoleParents::new(&r[0], [&r[0]])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::Storage(StorageError::SelfReferentialParent { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_parents_unknown_role_is_not_found() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a"]).await;

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let err = step
            .forward(vec![RoleParents::new("role_missing", [&r[0]])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = step
            .forward(vec![RoleParents::new(&r[0], ["role_missing"])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(parents_of(&store, &r[0]).await.is_empty());
    }

    #[tokio::test]
    async fn test_clearing_parents_and_compensating() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["child", "parent"]).await;
        store
            .create_role_parents(vec![NewRoleParent::new(&r[0], &r[1])])
            .await
            .unwrap();

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let empty: [&str; 0] = [];
        let outcome = step
            .forward(vec![RoleParents::new(&r[0], empty)])
            .await
            .unwrap();
        assert!(parents_of(&store, &r[0]).await.is_empty());

        step.compensate(Some(outcome.token)).await.unwrap();
        assert_eq!(parents_of(&store, &r[0]).await, vec![r[1].clone()]);
    }

    #[tokio::test]
    async fn test_compensation_with_empty_token_is_noop() {
        let store = MemoryDataStore::new_shared();
        let step = SetRoleParentsStep::new(Arc::clone(&store));
        step.compensate(None).await.unwrap();
        step.compensate(Some(Vec::new())).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_parents_rejects_cycle_and_compensates() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a", "b"]).await;
        let step = CreateRoleParentsStep::new(Arc::clone(&store));

        let outcome = step
            .forward(vec![NewRoleParent::new(&r[0], &r[1])])
            .await
            .unwrap();
        let err = step
            .forward(vec![NewRoleParent::new(&r[1], &r[0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CycleDetected { .. }));

        step.compensate(Some(outcome.token)).await.unwrap();
        assert!(parents_of(&store, &r[0]).await.is_empty());
    }

    #[tokio::test]
    async fn test_set_parents_rejects_cycle_formed_within_one_call() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a", "b"]).await;
        let (a, b) = (&r[0], &r[1]);

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let err = step
            .forward(vec![RoleParents::new(a, [b]), RoleParents::new(b, [a])])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CycleDetected { .. }));
        assert!(parents_of(&store, a).await.is_empty());
        assert!(parents_of(&store, b).await.is_empty());
    }

    #[tokio::test]
    async fn test_set_parents_can_reverse_an_edge_in_one_call() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a", "b"]).await;
        let (a, b) = (&r[0], &r[1]);
        store
            .create_role_parents(vec![NewRoleParent::new(a, b)])
            .await
            .unwrap();

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let empty: [&str; 0] = [];
        step.forward(vec![RoleParents::new(a, empty), RoleParents::new(b, [a])])
            .await
            .unwrap();
        assert!(parents_of(&store, a).await.is_empty());
        assert_eq!(parents_of(&store, b).await, vec![a.clone()]);
    }

    #[tokio::test]
    async fn test_create_parents_rejects_cycle_within_batch() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["a", "b", "c"]).await;
        let (a, b, c) = (&r[0], &r[1], &r[2]);

        let step = CreateRoleParentsStep::new(Arc::clone(&store));
        let err = step
            .forward(vec![NewRoleParent::new(a, b), NewRoleParent::new(b, a)])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CycleDetected { .. }));

        let err = step
            .forward(vec![
                NewRoleParent::new(a, b),
                NewRoleParent::new(b, c),
                NewRoleParent::new(c, a),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::CycleDetected { .. }));
        for role in [a, b, c] {
            assert!(parents_of(&store, role).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_compensation_keeps_shared_parent_edge() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["r", "a", "b", "c"]).await;
        let (role, a, b, c) = (&r[0], &r[1], &r[2], &r[3]);
        let edges = store
            .create_role_parents(vec![NewRoleParent::new(role, a), NewRoleParent::new(role, b)])
            .await
            .unwrap();
        let shared_edge = edges[1].id.clone();

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let outcome = step
            .forward(vec![RoleParents::new(role, [b, c])])
            .await
            .unwrap();
        step.compensate(Some(outcome.token)).await.unwrap();

        let edge_ids: Vec<String> = store
            .list_parent_edges(role)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(edge_ids.len(), 2);
        assert!(edge_ids.contains(&shared_edge));
    }

    #[tokio::test]
    async fn test_failed_compensation_leaves_current_parents() {
        let store = MemoryDataStore::new_shared();
        let r = seed(&store, &["r", "a", "b", "c"]).await;
        let (role, a, b, c) = (&r[0], &r[1], &r[2], &r[3]);
        store
            .create_role_parents(vec![NewRoleParent::new(role, a), NewRoleParent::new(role, b)])
            .await
            .unwrap();

        let step = SetRoleParentsStep::new(Arc::clone(&store));
        let outcome = step
            .forward(vec![RoleParents::new(role, [b, c])])
            .await
            .unwrap();

        // The captured parent disappears before rollback.
        store.delete_roles(&[a.clone()]).await.unwrap();

        let err = step.compensate(Some(outcome.token)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut expected = vec![b.clone(), c.clone()];
        expected.sort();
        assert_eq!(parents_of(&store, role).await, expected);
    }
}
