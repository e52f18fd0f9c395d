//! Workflow inputs and outputs.

use rbac_domain::ActorRef;
use rbac_storage::{NewRole, Role, RolePatch};
use serde::{Deserialize, Serialize};

/// One role to create together with its relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRoleInput {
    pub role: NewRole,
    /// Existing roles to inherit from.
    #[serde(default)]
    pub parent_ids: Vec<String>,
    /// Existing policies to grant directly.
    #[serde(default)]
    pub policy_ids: Vec<String>,
}

impl CreateRoleInput {
    pub fn new(role: NewRole) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    pub fn with_parents<I, S>(mut self, parent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parent_ids = parent_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_policies<I, S>(mut self, policy_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy_ids = policy_ids.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRolesInput {
    /// The caller; when absent the permission check is skipped unless the
    /// engine is configured to require an actor.
    #[serde(default)]
    pub actor: Option<ActorRef>,
    pub roles: Vec<CreateRoleInput>,
}

/// Changes to one existing role. `None` relation lists are left alone;
/// `Some` lists replace the current set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRoleInput {
    pub role_id: String,
    #[serde(default)]
    pub patch: RolePatch,
    #[serde(default)]
    pub parent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub policy_ids: Option<Vec<String>>,
}

impl UpdateRoleInput {
    pub fn new(role_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            ..Default::default()
        }
    }

    pub fn with_patch(mut self, patch: RolePatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_parents<I, S>(mut self, parent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parent_ids = Some(parent_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_policies<I, S>(mut self, policy_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy_ids = Some(policy_ids.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRolesInput {
    #[serde(default)]
    pub actor: Option<ActorRef>,
    pub roles: Vec<UpdateRoleInput>,
}

/// A role with its direct parents and direct policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleWithRelations {
    pub role: Role,
    pub parent_ids: Vec<String>,
    pub policy_ids: Vec<String>,
}
