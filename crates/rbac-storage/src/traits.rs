//! DataStore trait definition and the records it persists.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Free-form metadata attached to every record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Maximum length for role names and policy resource/operation segments.
pub const MAX_NAME_LENGTH: usize = 256;

// ========== Policies ==========

/// A permission atom: one operation on one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    /// Canonical `resource:operation`, unique among live policies.
    pub key: String,
    pub resource: String,
    pub operation: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a policy. Resource and operation are lowercased on write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPolicy {
    pub resource: String,
    pub operation: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewPolicy {
    /// Creates a policy input for `resource:operation`.
    pub fn new(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Partial update for policies. `None` leaves the field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyPatch {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub name: Option<Option<String>>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub metadata: Option<Option<Metadata>>,
}

impl PolicyPatch {
    /// Names of the fields this patch touches.
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.resource.is_some() {
            fields.push("resource".to_string());
        }
        if self.operation.is_some() {
            fields.push("operation".to_string());
        }
        if self.name.is_some() {
            fields.push("name".to_string());
        }
        if self.description.is_some() {
            fields.push("description".to_string());
        }
        if self.metadata.is_some() {
            fields.push("metadata".to_string());
        }
        fields
    }

    /// Captures the current values of `fields` from `policy` as a patch.
    pub fn snapshot(policy: &Policy, fields: &[String]) -> Self {
        let has = |f: &str| fields.iter().any(|x| x == f);
        Self {
            resource: has("resource").then(|| policy.resource.clone()),
            operation: has("operation").then(|| policy.operation.clone()),
            name: has("name").then(|| policy.name.clone()),
            description: has("description").then(|| policy.description.clone()),
            metadata: has("metadata").then(|| policy.metadata.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

/// Selector for policies. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyFilter {
    pub ids: Option<Vec<String>>,
    pub keys: Option<Vec<String>>,
    pub resource: Option<String>,
    pub operation: Option<String>,
}

impl PolicyFilter {
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }
}

// ========== Roles ==========

/// A named bundle of policies that may inherit from parent roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    /// Unique among live roles.
    pub name: String,
    pub description: Option<String>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update for roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub metadata: Option<Option<Metadata>>,
}

impl RolePatch {
    /// Names of the fields this patch touches.
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name".to_string());
        }
        if self.description.is_some() {
            fields.push("description".to_string());
        }
        if self.metadata.is_some() {
            fields.push("metadata".to_string());
        }
        fields
    }

    /// Captures the current values of `fields` from `role` as a patch.
    pub fn snapshot(role: &Role, fields: &[String]) -> Self {
        let has = |f: &str| fields.iter().any(|x| x == f);
        Self {
            name: has("name").then(|| role.name.clone()),
            description: has("description").then(|| role.description.clone()),
            metadata: has("metadata").then(|| role.metadata.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

/// Selector for roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleFilter {
    pub ids: Option<Vec<String>>,
    pub names: Option<Vec<String>>,
}

impl RoleFilter {
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }
}

// ========== Role parent edges ==========

/// Directed edge meaning "`role_id` inherits from `parent_id`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleParent {
    pub id: String,
    pub role_id: String,
    pub parent_id: String,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for creating a parent edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRoleParent {
    pub role_id: String,
    pub parent_id: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewRoleParent {
    pub fn new(role_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            parent_id: parent_id.into(),
            metadata: None,
        }
    }
}

/// Selector for parent edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleParentFilter {
    pub ids: Option<Vec<String>>,
    pub role_ids: Option<Vec<String>>,
    pub parent_ids: Option<Vec<String>>,
}

// ========== Role policy assignments ==========

/// A policy granted directly to a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub id: String,
    pub role_id: String,
    pub policy_id: String,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for assigning a policy to a role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRolePolicy {
    pub role_id: String,
    pub policy_id: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl NewRolePolicy {
    pub fn new(role_id: impl Into<String>, policy_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            policy_id: policy_id.into(),
            metadata: None,
        }
    }
}

/// Partial update for assignments. Only metadata is mutable; moving an
/// assignment is a delete plus a create.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePolicyPatch {
    #[serde(default)]
    pub metadata: Option<Option<Metadata>>,
}

impl RolePolicyPatch {
    pub fn changed_fields(&self) -> Vec<String> {
        if self.metadata.is_some() {
            vec!["metadata".to_string()]
        } else {
            Vec::new()
        }
    }

    pub fn snapshot(assignment: &RolePolicy, fields: &[String]) -> Self {
        Self {
            metadata: fields
                .iter()
                .any(|f| f == "metadata")
                .then(|| assignment.metadata.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_none()
    }
}

/// Selector for assignments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePolicyFilter {
    pub ids: Option<Vec<String>>,
    pub role_ids: Option<Vec<String>>,
    pub policy_ids: Option<Vec<String>>,
}

impl RolePolicyFilter {
    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }
}

// ========== Validation helpers ==========

/// Lowercases and trims a resource or operation segment.
pub fn normalize_segment(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Derives the canonical policy key from already-normalized segments.
pub fn policy_key(resource: &str, operation: &str) -> String {
    format!("{resource}:{operation}")
}

/// Validates a resource or operation segment before normalization.
pub fn validate_segment(field: &str, value: &str) -> StorageResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidInput {
            message: format!("policy {field} cannot be empty"),
        });
    }
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("policy {field} exceeds {MAX_NAME_LENGTH} characters"),
        });
    }
    // The key separator would make `a:b` + `c` and `a` + `b:c` collide.
    if trimmed.contains(':') {
        return Err(StorageError::InvalidInput {
            message: format!("policy {field} cannot contain ':'"),
        });
    }
    Ok(())
}

/// Validates a role name.
pub fn validate_role_name(name: &str) -> StorageResult<()> {
    if name.trim().is_empty() {
        return Err(StorageError::InvalidInput {
            message: "role name cannot be empty".to_string(),
        });
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(StorageError::InvalidInput {
            message: format!("role name exceeds {MAX_NAME_LENGTH} characters"),
        });
    }
    Ok(())
}

/// Validates that an id reference is present.
pub fn validate_id(field: &str, id: &str) -> StorageResult<()> {
    if id.trim().is_empty() {
        return Err(StorageError::InvalidInput {
            message: format!("{field} cannot be empty"),
        });
    }
    Ok(())
}

/// Generates a prefixed, time-sortable identifier.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", ulid::Ulid::new())
}

// ========== DataStore ==========

/// Abstract storage interface for RBAC data.
///
/// Implementations must be thread-safe (Send + Sync). Deletes are soft:
/// soft-deleted rows are invisible to every `list_*` call and to uniqueness
/// checks, but keep their attributes so `restore_*` can bring them back.
/// Edges and assignments that point at a soft-deleted role or policy are
/// likewise invisible without being modified.
///
/// Each batch call is one round trip: either every element is applied or
/// none is.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Policy operations

    /// Creates policies. Fails with a conflict if a key is already live.
    async fn create_policies(&self, policies: Vec<NewPolicy>) -> StorageResult<Vec<Policy>>;

    /// Applies `patch` to every live policy matching `filter`.
    async fn update_policies(
        &self,
        filter: &PolicyFilter,
        patch: &PolicyPatch,
    ) -> StorageResult<Vec<Policy>>;

    /// Soft-deletes policies, returning the deleted ids.
    async fn delete_policies(&self, ids: &[String]) -> StorageResult<Vec<String>>;

    /// Clears `deleted_at` on the given policies.
    async fn restore_policies(&self, ids: &[String]) -> StorageResult<()>;

    /// Lists live policies matching `filter`.
    async fn list_policies(&self, filter: &PolicyFilter) -> StorageResult<Vec<Policy>>;

    // Role operations

    async fn create_roles(&self, roles: Vec<NewRole>) -> StorageResult<Vec<Role>>;

    async fn update_roles(&self, filter: &RoleFilter, patch: &RolePatch)
        -> StorageResult<Vec<Role>>;

    async fn delete_roles(&self, ids: &[String]) -> StorageResult<Vec<String>>;

    async fn restore_roles(&self, ids: &[String]) -> StorageResult<()>;

    async fn list_roles(&self, filter: &RoleFilter) -> StorageResult<Vec<Role>>;

    // Parent edge operations

    /// Creates parent edges. Self-edges are rejected before anything else.
    async fn create_role_parents(
        &self,
        edges: Vec<NewRoleParent>,
    ) -> StorageResult<Vec<RoleParent>>;

    async fn delete_role_parents(&self, ids: &[String]) -> StorageResult<Vec<String>>;

    async fn restore_role_parents(&self, ids: &[String]) -> StorageResult<()>;

    async fn list_role_parents(&self, filter: &RoleParentFilter)
        -> StorageResult<Vec<RoleParent>>;

    /// Direct (non-transitive) parent edges of a role.
    async fn list_parent_edges(&self, role_id: &str) -> StorageResult<Vec<RoleParent>> {
        self.list_role_parents(&RoleParentFilter {
            role_ids: Some(vec![role_id.to_string()]),
            ..Default::default()
        })
        .await
    }

    /// Whether adding `role_id -> candidate_parent_id` would make `role_id`
    /// reachable from itself.
    ///
    /// Walks parents upward from `candidate_parent_id`, one store call per
    /// level, and reports whether `role_id` is reached.
    async fn has_cycle(&self, role_id: &str, candidate_parent_id: &str) -> StorageResult<bool> {
        if role_id == candidate_parent_id {
            return Ok(true);
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(candidate_parent_id.to_string());
        let mut frontier = vec![candidate_parent_id.to_string()];

        while !frontier.is_empty() {
            let edges = self
                .list_role_parents(&RoleParentFilter {
                    role_ids: Some(std::mem::take(&mut frontier)),
                    ..Default::default()
                })
                .await?;

            for edge in edges {
                if edge.parent_id == role_id {
                    return Ok(true);
                }
                if visited.insert(edge.parent_id.clone()) {
                    frontier.push(edge.parent_id);
                }
            }
        }

        Ok(false)
    }

    // Role policy assignment operations

    async fn create_role_policies(
        &self,
        assignments: Vec<NewRolePolicy>,
    ) -> StorageResult<Vec<RolePolicy>>;

    async fn update_role_policies(
        &self,
        filter: &RolePolicyFilter,
        patch: &RolePolicyPatch,
    ) -> StorageResult<Vec<RolePolicy>>;

    async fn delete_role_policies(&self, ids: &[String]) -> StorageResult<Vec<String>>;

    async fn restore_role_policies(&self, ids: &[String]) -> StorageResult<()>;

    async fn list_role_policies(&self, filter: &RolePolicyFilter)
        -> StorageResult<Vec<RolePolicy>>;

    // Actor role assignments

    /// Grants roles to an actor. Already-held roles are ignored.
    async fn assign_actor_roles(
        &self,
        actor_kind: &str,
        actor_id: &str,
        role_ids: &[String],
    ) -> StorageResult<()>;

    /// Revokes roles from an actor. Roles the actor does not hold are ignored.
    async fn unassign_actor_roles(
        &self,
        actor_kind: &str,
        actor_id: &str,
        role_ids: &[String],
    ) -> StorageResult<()>;

    /// Live roles held by an actor, sorted by id.
    async fn list_actor_roles(&self, actor_kind: &str, actor_id: &str)
        -> StorageResult<Vec<String>>;
}
