//! In-memory storage implementation.
//!
//! Every table lives in a `DashMap` keyed by record id. Writers are
//! serialized by a single async mutex so a uniqueness check and the insert
//! that follows it cannot interleave with another writer; readers never take
//! the mutex.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    generate_id, normalize_segment, policy_key, validate_id, validate_role_name,
    validate_segment, DataStore, NewPolicy, NewRole, NewRoleParent, NewRolePolicy, Policy,
    PolicyFilter, PolicyPatch, Role, RoleFilter, RoleParent, RoleParentFilter, RolePatch,
    RolePolicy, RolePolicyFilter, RolePolicyPatch,
};

/// In-memory implementation of DataStore.
///
/// # Performance Characteristics
///
/// - **Create/update/delete**: O(N) per batch for uniqueness scans
/// - **List**: O(N) linear scan with filtering, sorted by creation time
/// - **Lookup by id**: O(1) (DashMap)
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    policies: DashMap<String, Policy>,
    roles: DashMap<String, Role>,
    role_parents: DashMap<String, RoleParent>,
    role_policies: DashMap<String, RolePolicy>,
    /// (actor_kind, actor_id) -> role ids
    actor_roles: DashMap<(String, String), BTreeSet<String>>,
    write_lock: Mutex<()>,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn policy_is_live(&self, id: &str) -> bool {
        self.policies
            .get(id)
            .is_some_and(|p| p.deleted_at.is_none())
    }

    fn role_is_live(&self, id: &str) -> bool {
        self.roles.get(id).is_some_and(|r| r.deleted_at.is_none())
    }

    fn edge_is_visible(&self, edge: &RoleParent) -> bool {
        edge.deleted_at.is_none()
            && self.role_is_live(&edge.role_id)
            && self.role_is_live(&edge.parent_id)
    }

    fn assignment_is_visible(&self, assignment: &RolePolicy) -> bool {
        assignment.deleted_at.is_none()
            && self.role_is_live(&assignment.role_id)
            && self.policy_is_live(&assignment.policy_id)
    }

    /// Whether a live policy other than those in `exclude` uses `key`.
    fn live_policy_key_taken(&self, key: &str, exclude: &HashSet<String>) -> bool {
        self.policies
            .iter()
            .any(|p| p.deleted_at.is_none() && p.key == key && !exclude.contains(&p.id))
    }

    fn live_role_name_taken(&self, name: &str, exclude: &HashSet<String>) -> bool {
        self.roles
            .iter()
            .any(|r| r.deleted_at.is_none() && r.name == name && !exclude.contains(&r.id))
    }

    fn live_edge_exists(&self, role_id: &str, parent_id: &str, exclude: &HashSet<String>) -> bool {
        self.role_parents.iter().any(|e| {
            e.deleted_at.is_none()
                && e.role_id == role_id
                && e.parent_id == parent_id
                && !exclude.contains(&e.id)
        })
    }

    fn live_assignment_exists(
        &self,
        role_id: &str,
        policy_id: &str,
        exclude: &HashSet<String>,
    ) -> bool {
        self.role_policies.iter().any(|a| {
            a.deleted_at.is_none()
                && a.role_id == role_id
                && a.policy_id == policy_id
                && !exclude.contains(&a.id)
        })
    }

    fn require_live_role(&self, id: &str) -> StorageResult<()> {
        if self.role_is_live(id) {
            Ok(())
        } else {
            Err(StorageError::RoleNotFound { id: id.to_string() })
        }
    }

    /// Resolves the live policy ids selected by `filter`. An explicit id that
    /// is missing or deleted is an error rather than a silent skip.
    fn select_policies(&self, filter: &PolicyFilter) -> StorageResult<Vec<Policy>> {
        if let Some(ids) = &filter.ids {
            for id in ids {
                if !self.policy_is_live(id) {
                    return Err(StorageError::PolicyNotFound { id: id.clone() });
                }
            }
        }
        let mut rows: Vec<Policy> = self
            .policies
            .iter()
            .filter(|p| p.deleted_at.is_none() && filter.matches(p))
            .map(|p| p.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn select_roles(&self, filter: &RoleFilter) -> StorageResult<Vec<Role>> {
        if let Some(ids) = &filter.ids {
            for id in ids {
                if !self.role_is_live(id) {
                    return Err(StorageError::RoleNotFound { id: id.clone() });
                }
            }
        }
        let mut rows: Vec<Role> = self
            .roles
            .iter()
            .filter(|r| r.deleted_at.is_none() && filter.matches(r))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn select_role_policies(&self, filter: &RolePolicyFilter) -> StorageResult<Vec<RolePolicy>> {
        if let Some(ids) = &filter.ids {
            for id in ids {
                let visible = self
                    .role_policies
                    .get(id)
                    .is_some_and(|a| self.assignment_is_visible(&a));
                if !visible {
                    return Err(StorageError::RolePolicyNotFound { id: id.clone() });
                }
            }
        }
        let mut rows: Vec<RolePolicy> = self
            .role_policies
            .iter()
            .filter(|a| self.assignment_is_visible(a) && filter.matches(a))
            .map(|a| a.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }
}

/// Removes duplicate ids while keeping first-seen order.
fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

fn contains(values: &Option<Vec<String>>, value: &str) -> bool {
    values
        .as_ref()
        .map_or(true, |v| v.iter().any(|x| x == value))
}

impl PolicyFilter {
    fn matches(&self, policy: &Policy) -> bool {
        contains(&self.ids, &policy.id)
            && contains(&self.keys, &policy.key)
            && self
                .resource
                .as_deref()
                .map_or(true, |r| normalize_segment(r) == policy.resource)
            && self
                .operation
                .as_deref()
                .map_or(true, |o| normalize_segment(o) == policy.operation)
    }
}

impl RoleFilter {
    fn matches(&self, role: &Role) -> bool {
        contains(&self.ids, &role.id) && contains(&self.names, &role.name)
    }
}

impl RoleParentFilter {
    fn matches(&self, edge: &RoleParent) -> bool {
        contains(&self.ids, &edge.id)
            && contains(&self.role_ids, &edge.role_id)
            && contains(&self.parent_ids, &edge.parent_id)
    }
}

impl RolePolicyFilter {
    fn matches(&self, assignment: &RolePolicy) -> bool {
        contains(&self.ids, &assignment.id)
            && contains(&self.role_ids, &assignment.role_id)
            && contains(&self.policy_ids, &assignment.policy_id)
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    #[instrument(skip_all, fields(count = policies.len()))]
    async fn create_policies(&self, policies: Vec<NewPolicy>) -> StorageResult<Vec<Policy>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let none = HashSet::new();
        let mut batch_keys = HashSet::new();
        let mut rows = Vec::with_capacity(policies.len());

        for input in policies {
            validate_segment("resource", &input.resource)?;
            validate_segment("operation", &input.operation)?;
            let resource = normalize_segment(&input.resource);
            let operation = normalize_segment(&input.operation);
            let key = policy_key(&resource, &operation);

            if !batch_keys.insert(key.clone()) || self.live_policy_key_taken(&key, &none) {
                return Err(StorageError::DuplicatePolicy { key });
            }

            rows.push(Policy {
                id: generate_id("pol"),
                key,
                resource,
                operation,
                name: input.name,
                description: input.description,
                metadata: input.metadata,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        }

        for row in &rows {
            self.policies.insert(row.id.clone(), row.clone());
        }
        debug!(created = rows.len(), "policies created");
        Ok(rows)
    }

    #[instrument(skip_all)]
    async fn update_policies(
        &self,
        filter: &PolicyFilter,
        patch: &PolicyPatch,
    ) -> StorageResult<Vec<Policy>> {
        if let Some(resource) = &patch.resource {
            validate_segment("resource", resource)?;
        }
        if let Some(operation) = &patch.operation {
            validate_segment("operation", operation)?;
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let selected = self.select_policies(filter)?;
        let selected_ids: HashSet<String> = selected.iter().map(|p| p.id.clone()).collect();
        let mut batch_keys = HashSet::new();
        let mut rows = Vec::with_capacity(selected.len());

        for mut policy in selected {
            if let Some(resource) = &patch.resource {
                policy.resource = normalize_segment(resource);
            }
            if let Some(operation) = &patch.operation {
                policy.operation = normalize_segment(operation);
            }
            if let Some(name) = &patch.name {
                policy.name = name.clone();
            }
            if let Some(description) = &patch.description {
                policy.description = description.clone();
            }
            if let Some(metadata) = &patch.metadata {
                policy.metadata = metadata.clone();
            }
            policy.key = policy_key(&policy.resource, &policy.operation);
            policy.updated_at = now;

            if !batch_keys.insert(policy.key.clone())
                || self.live_policy_key_taken(&policy.key, &selected_ids)
            {
                return Err(StorageError::DuplicatePolicy { key: policy.key });
            }
            rows.push(policy);
        }

        for row in &rows {
            self.policies.insert(row.id.clone(), row.clone());
        }
        debug!(updated = rows.len(), "policies updated");
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn delete_policies(&self, ids: &[String]) -> StorageResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        for id in &ids {
            if !self.policy_is_live(id) {
                return Err(StorageError::PolicyNotFound { id: id.clone() });
            }
        }

        let now = Utc::now();
        for id in &ids {
            if let Some(mut policy) = self.policies.get_mut(id) {
                policy.deleted_at = Some(now);
            }
        }
        debug!(deleted = ids.len(), "policies soft-deleted");
        Ok(ids)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn restore_policies(&self, ids: &[String]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        let none = HashSet::new();
        let mut batch_keys = HashSet::new();
        let mut to_restore = Vec::new();

        for id in &ids {
            let policy = self
                .policies
                .get(id)
                .map(|p| p.value().clone())
                .ok_or_else(|| StorageError::PolicyNotFound { id: id.clone() })?;
            if policy.deleted_at.is_none() {
                continue;
            }
            if !batch_keys.insert(policy.key.clone())
                || self.live_policy_key_taken(&policy.key, &none)
            {
                return Err(StorageError::DuplicatePolicy { key: policy.key });
            }
            to_restore.push(policy.id);
        }

        for id in &to_restore {
            if let Some(mut policy) = self.policies.get_mut(id) {
                policy.deleted_at = None;
            }
        }
        debug!(restored = to_restore.len(), "policies restored");
        Ok(())
    }

    async fn list_policies(&self, filter: &PolicyFilter) -> StorageResult<Vec<Policy>> {
        let mut rows: Vec<Policy> = self
            .policies
            .iter()
            .filter(|p| p.deleted_at.is_none() && filter.matches(p))
            .map(|p| p.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = roles.len()))]
    async fn create_roles(&self, roles: Vec<NewRole>) -> StorageResult<Vec<Role>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let none = HashSet::new();
        let mut batch_names = HashSet::new();
        let mut rows = Vec::with_capacity(roles.len());

        for input in roles {
            validate_role_name(&input.name)?;
            let name = input.name.trim().to_string();
            if !batch_names.insert(name.clone()) || self.live_role_name_taken(&name, &none) {
                return Err(StorageError::DuplicateRole { name });
            }
            rows.push(Role {
                id: generate_id("role"),
                name,
                description: input.description,
                metadata: input.metadata,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        }

        for row in &rows {
            self.roles.insert(row.id.clone(), row.clone());
        }
        debug!(created = rows.len(), "roles created");
        Ok(rows)
    }

    #[instrument(skip_all)]
    async fn update_roles(&self, filter: &RoleFilter, patch: &RolePatch) -> StorageResult<Vec<Role>> {
        if let Some(name) = &patch.name {
            validate_role_name(name)?;
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let selected = self.select_roles(filter)?;
        let selected_ids: HashSet<String> = selected.iter().map(|r| r.id.clone()).collect();
        let mut batch_names = HashSet::new();
        let mut rows = Vec::with_capacity(selected.len());

        for mut role in selected {
            if let Some(name) = &patch.name {
                role.name = name.trim().to_string();
            }
            if let Some(description) = &patch.description {
                role.description = description.clone();
            }
            if let Some(metadata) = &patch.metadata {
                role.metadata = metadata.clone();
            }
            role.updated_at = now;

            if !batch_names.insert(role.name.clone())
                || self.live_role_name_taken(&role.name, &selected_ids)
            {
                return Err(StorageError::DuplicateRole { name: role.name });
            }
            rows.push(role);
        }

        for row in &rows {
            self.roles.insert(row.id.clone(), row.clone());
        }
        debug!(updated = rows.len(), "roles updated");
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn delete_roles(&self, ids: &[String]) -> StorageResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        for id in &ids {
            self.require_live_role(id)?;
        }

        let now = Utc::now();
        for id in &ids {
            if let Some(mut role) = self.roles.get_mut(id) {
                role.deleted_at = Some(now);
            }
        }
        debug!(deleted = ids.len(), "roles soft-deleted");
        Ok(ids)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn restore_roles(&self, ids: &[String]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        let none = HashSet::new();
        let mut batch_names = HashSet::new();
        let mut to_restore = Vec::new();

        for id in &ids {
            let role = self
                .roles
                .get(id)
                .map(|r| r.value().clone())
                .ok_or_else(|| StorageError::RoleNotFound { id: id.clone() })?;
            if role.deleted_at.is_none() {
                continue;
            }
            if !batch_names.insert(role.name.clone()) || self.live_role_name_taken(&role.name, &none)
            {
                return Err(StorageError::DuplicateRole { name: role.name });
            }
            to_restore.push(role.id);
        }

        for id in &to_restore {
            if let Some(mut role) = self.roles.get_mut(id) {
                role.deleted_at = None;
            }
        }
        debug!(restored = to_restore.len(), "roles restored");
        Ok(())
    }

    async fn list_roles(&self, filter: &RoleFilter) -> StorageResult<Vec<Role>> {
        let mut rows: Vec<Role> = self
            .roles
            .iter()
            .filter(|r| r.deleted_at.is_none() && filter.matches(r))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = edges.len()))]
    async fn create_role_parents(&self, edges: Vec<NewRoleParent>) -> StorageResult<Vec<RoleParent>> {
        // Self-edges are rejected before any lookup so the error is the same
        // whether or not the role exists.
        for edge in &edges {
            validate_id("role_id", &edge.role_id)?;
            validate_id("parent_id", &edge.parent_id)?;
            if edge.role_id == edge.parent_id {
                return Err(StorageError::SelfReferentialParent {
                    role_id: edge.role_id.clone(),
                });
            }
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let none = HashSet::new();
        let mut batch_pairs = HashSet::new();
        let mut rows = Vec::with_capacity(edges.len());

        for input in edges {
            self.require_live_role(&input.role_id)?;
            self.require_live_role(&input.parent_id)?;
            let pair = (input.role_id.clone(), input.parent_id.clone());
            if !batch_pairs.insert(pair)
                || self.live_edge_exists(&input.role_id, &input.parent_id, &none)
            {
                return Err(StorageError::DuplicateRoleParent {
                    role_id: input.role_id,
                    parent_id: input.parent_id,
                });
            }
            rows.push(RoleParent {
                id: generate_id("rlpar"),
                role_id: input.role_id,
                parent_id: input.parent_id,
                metadata: input.metadata,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        }

        for row in &rows {
            self.role_parents.insert(row.id.clone(), row.clone());
        }
        debug!(created = rows.len(), "role parent edges created");
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn delete_role_parents(&self, ids: &[String]) -> StorageResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        for id in &ids {
            let live = self
                .role_parents
                .get(id)
                .is_some_and(|e| e.deleted_at.is_none());
            if !live {
                return Err(StorageError::RoleParentNotFound { id: id.clone() });
            }
        }

        let now = Utc::now();
        for id in &ids {
            if let Some(mut edge) = self.role_parents.get_mut(id) {
                edge.deleted_at = Some(now);
            }
        }
        debug!(deleted = ids.len(), "role parent edges soft-deleted");
        Ok(ids)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn restore_role_parents(&self, ids: &[String]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        let none = HashSet::new();
        let mut batch_pairs = HashSet::new();
        let mut to_restore = Vec::new();

        for id in &ids {
            let edge = self
                .role_parents
                .get(id)
                .map(|e| e.value().clone())
                .ok_or_else(|| StorageError::RoleParentNotFound { id: id.clone() })?;
            if edge.deleted_at.is_none() {
                continue;
            }
            let pair = (edge.role_id.clone(), edge.parent_id.clone());
            if !batch_pairs.insert(pair) || self.live_edge_exists(&edge.role_id, &edge.parent_id, &none)
            {
                return Err(StorageError::DuplicateRoleParent {
                    role_id: edge.role_id,
                    parent_id: edge.parent_id,
                });
            }
            to_restore.push(edge.id);
        }

        for id in &to_restore {
            if let Some(mut edge) = self.role_parents.get_mut(id) {
                edge.deleted_at = None;
            }
        }
        debug!(restored = to_restore.len(), "role parent edges restored");
        Ok(())
    }

    async fn list_role_parents(&self, filter: &RoleParentFilter) -> StorageResult<Vec<RoleParent>> {
        let mut rows: Vec<RoleParent> = self
            .role_parents
            .iter()
            .filter(|e| self.edge_is_visible(e) && filter.matches(e))
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = assignments.len()))]
    async fn create_role_policies(
        &self,
        assignments: Vec<NewRolePolicy>,
    ) -> StorageResult<Vec<RolePolicy>> {
        for assignment in &assignments {
            validate_id("role_id", &assignment.role_id)?;
            validate_id("policy_id", &assignment.policy_id)?;
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let none = HashSet::new();
        let mut batch_pairs = HashSet::new();
        let mut rows = Vec::with_capacity(assignments.len());

        for input in assignments {
            self.require_live_role(&input.role_id)?;
            if !self.policy_is_live(&input.policy_id) {
                return Err(StorageError::PolicyNotFound {
                    id: input.policy_id,
                });
            }
            let pair = (input.role_id.clone(), input.policy_id.clone());
            if !batch_pairs.insert(pair)
                || self.live_assignment_exists(&input.role_id, &input.policy_id, &none)
            {
                return Err(StorageError::DuplicateRolePolicy {
                    role_id: input.role_id,
                    policy_id: input.policy_id,
                });
            }
            rows.push(RolePolicy {
                id: generate_id("rlpol"),
                role_id: input.role_id,
                policy_id: input.policy_id,
                metadata: input.metadata,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        }

        for row in &rows {
            self.role_policies.insert(row.id.clone(), row.clone());
        }
        debug!(created = rows.len(), "role policy assignments created");
        Ok(rows)
    }

    #[instrument(skip_all)]
    async fn update_role_policies(
        &self,
        filter: &RolePolicyFilter,
        patch: &RolePolicyPatch,
    ) -> StorageResult<Vec<RolePolicy>> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut rows = self.select_role_policies(filter)?;

        for assignment in &mut rows {
            if let Some(metadata) = &patch.metadata {
                assignment.metadata = metadata.clone();
            }
            assignment.updated_at = now;
        }

        for row in &rows {
            self.role_policies.insert(row.id.clone(), row.clone());
        }
        debug!(updated = rows.len(), "role policy assignments updated");
        Ok(rows)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn delete_role_policies(&self, ids: &[String]) -> StorageResult<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        for id in &ids {
            let live = self
                .role_policies
                .get(id)
                .is_some_and(|a| a.deleted_at.is_none());
            if !live {
                return Err(StorageError::RolePolicyNotFound { id: id.clone() });
            }
        }

        let now = Utc::now();
        for id in &ids {
            if let Some(mut assignment) = self.role_policies.get_mut(id) {
                assignment.deleted_at = Some(now);
            }
        }
        debug!(deleted = ids.len(), "role policy assignments soft-deleted");
        Ok(ids)
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn restore_role_policies(&self, ids: &[String]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let ids = dedup_ids(ids);
        let none = HashSet::new();
        let mut batch_pairs = HashSet::new();
        let mut to_restore = Vec::new();

        for id in &ids {
            let assignment = self
                .role_policies
                .get(id)
                .map(|a| a.value().clone())
                .ok_or_else(|| StorageError::RolePolicyNotFound { id: id.clone() })?;
            if assignment.deleted_at.is_none() {
                continue;
            }
            let pair = (assignment.role_id.clone(), assignment.policy_id.clone());
            if !batch_pairs.insert(pair)
                || self.live_assignment_exists(&assignment.role_id, &assignment.policy_id, &none)
            {
                return Err(StorageError::DuplicateRolePolicy {
                    role_id: assignment.role_id,
                    policy_id: assignment.policy_id,
                });
            }
            to_restore.push(assignment.id);
        }

        for id in &to_restore {
            if let Some(mut assignment) = self.role_policies.get_mut(id) {
                assignment.deleted_at = None;
            }
        }
        debug!(restored = to_restore.len(), "role policy assignments restored");
        Ok(())
    }

    async fn list_role_policies(&self, filter: &RolePolicyFilter) -> StorageResult<Vec<RolePolicy>> {
        let mut rows: Vec<RolePolicy> = self
            .role_policies
            .iter()
            .filter(|a| self.assignment_is_visible(a) && filter.matches(a))
            .map(|a| a.value().clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    #[instrument(skip(self, role_ids), fields(count = role_ids.len()))]
    async fn assign_actor_roles(
        &self,
        actor_kind: &str,
        actor_id: &str,
        role_ids: &[String],
    ) -> StorageResult<()> {
        validate_id("actor_kind", actor_kind)?;
        validate_id("actor_id", actor_id)?;

        let _guard = self.write_lock.lock().await;
        for role_id in role_ids {
            self.require_live_role(role_id)?;
        }
        self.actor_roles
            .entry((actor_kind.to_string(), actor_id.to_string()))
            .or_default()
            .extend(role_ids.iter().cloned());
        Ok(())
    }

    #[instrument(skip(self, role_ids), fields(count = role_ids.len()))]
    async fn unassign_actor_roles(
        &self,
        actor_kind: &str,
        actor_id: &str,
        role_ids: &[String],
    ) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut held) = self
            .actor_roles
            .get_mut(&(actor_kind.to_string(), actor_id.to_string()))
        {
            for role_id in role_ids {
                held.remove(role_id);
            }
        }
        Ok(())
    }

    async fn list_actor_roles(&self, actor_kind: &str, actor_id: &str) -> StorageResult<Vec<String>> {
        let held: Vec<String> = self
            .actor_roles
            .get(&(actor_kind.to_string(), actor_id.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        Ok(held.into_iter().filter(|id| self.role_is_live(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_roles(store: &MemoryDataStore, names: &[&str]) -> Vec<String> {
        store
            .create_roles(names.iter().map(|n| NewRole::new(*n)).collect())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn test_create_policy_normalizes_resource_and_operation() {
        let store = MemoryDataStore::new();
        let created = store
            .create_policies(vec![NewPolicy::new("Product", "READ")])
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].resource, "product");
        assert_eq!(created[0].operation, "read");
        assert_eq!(created[0].key, "product:read");
        assert!(created[0].id.starts_with("pol_"));
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts_across_case() {
        let store = MemoryDataStore::new();
        store
            .create_policies(vec![NewPolicy::new("Order", "Read")])
            .await
            .unwrap();

        let err = store
            .create_policies(vec![NewPolicy::new("order", "read")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicatePolicy { ref key } if key == "order:read"));
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_duplicate_key_within_batch_writes_nothing() {
        let store = MemoryDataStore::new();
        let err = store
            .create_policies(vec![
                NewPolicy::new("order", "read"),
                NewPolicy::new("ORDER", "READ"),
            ])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store
            .list_policies(&PolicyFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_soft_deleted_policy_frees_its_key() {
        let store = MemoryDataStore::new();
        let first = store
            .create_policies(vec![NewPolicy::new("order", "read")])
            .await
            .unwrap();
        store.delete_policies(&[first[0].id.clone()]).await.unwrap();

        let second = store
            .create_policies(vec![NewPolicy::new("order", "read")])
            .await
            .unwrap();
        assert_ne!(first[0].id, second[0].id);

        // Restoring the first one now collides with the live replacement.
        let err = store
            .restore_policies(&[first[0].id.clone()])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_policy_rederives_key_and_checks_conflicts() {
        let store = MemoryDataStore::new();
        let created = store
            .create_policies(vec![
                NewPolicy::new("order", "read"),
                NewPolicy::new("order", "write"),
            ])
            .await
            .unwrap();

        let updated = store
            .update_policies(
                &PolicyFilter::by_ids([created[0].id.clone()]),
                &PolicyPatch {
                    operation: Some("List".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated[0].key, "order:list");

        let err = store
            .update_policies(
                &PolicyFilter::by_ids([created[0].id.clone()]),
                &PolicyPatch {
                    operation: Some("WRITE".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_missing_policy_is_not_found() {
        let store = MemoryDataStore::new();
        let err = store
            .update_policies(
                &PolicyFilter::by_ids(["pol_missing"]),
                &PolicyPatch {
                    name: Some(Some("x".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_self_edge_is_rejected() {
        let store = MemoryDataStore::new();
        let ids = seed_roles(&store, &["admin"]).await;

        let err = store
            .create_role_parents(vec![NewRoleParent::new(&ids[0], &ids[0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SelfReferentialParent { .. }));
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_edge_requires_live_roles() {
        let store = MemoryDataStore::new();
        let ids = seed_roles(&store, &["admin"]).await;

        let err = store
            .create_role_parents(vec![NewRoleParent::new(&ids[0], "role_missing")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RoleNotFound { ref id } if id == "role_missing"));
    }

    #[tokio::test]
    async fn test_edges_of_deleted_role_are_hidden_until_restore() {
        let store = MemoryDataStore::new();
        let ids = seed_roles(&store, &["child", "parent"]).await;
        store
            .create_role_parents(vec![NewRoleParent::new(&ids[0], &ids[1])])
            .await
            .unwrap();

        store.delete_roles(&[ids[1].clone()]).await.unwrap();
        assert!(store.list_parent_edges(&ids[0]).await.unwrap().is_empty());

        store.restore_roles(&[ids[1].clone()]).await.unwrap();
        let edges = store.list_parent_edges(&ids[0]).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].parent_id, ids[1]);
    }

    #[tokio::test]
    async fn test_has_cycle_walks_ancestors() {
        let store = MemoryDataStore::new();
        let ids = seed_roles(&store, &["a", "b", "c"]).await;
        // a -> b -> c
        store
            .create_role_parents(vec![
                NewRoleParent::new(&ids[0], &ids[1]),
                NewRoleParent::new(&ids[1], &ids[2]),
            ])
            .await
            .unwrap();

        // c -> a would close the loop.
        assert!(store.has_cycle(&ids[2], &ids[0]).await.unwrap());
        // a -> c is a shortcut, not a cycle.
        assert!(!store.has_cycle(&ids[0], &ids[2]).await.unwrap());
        assert!(store.has_cycle(&ids[1], &ids[1]).await.unwrap());
    }

    #[tokio::test]
    async fn test_actor_roles_exclude_deleted_roles() {
        let store = MemoryDataStore::new();
        let ids = seed_roles(&store, &["viewer", "editor"]).await;
        store
            .assign_actor_roles("user", "alice", &ids)
            .await
            .unwrap();
        store.delete_roles(&[ids[1].clone()]).await.unwrap();

        let held = store.list_actor_roles("user", "alice").await.unwrap();
        assert_eq!(held, vec![ids[0].clone()]);

        store
            .unassign_actor_roles("user", "alice", &[ids[0].clone()])
            .await
            .unwrap();
        assert!(store
            .list_actor_roles("user", "alice")
            .await
            .unwrap()
            .is_empty());
    }
}
