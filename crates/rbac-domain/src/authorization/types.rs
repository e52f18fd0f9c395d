//! Request types for authorization checks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Actor kind used when the caller does not specify one.
pub const DEFAULT_ACTOR_KIND: &str = "user";

/// An actor identity as supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    #[serde(default = "default_actor_kind")]
    pub kind: String,
}

fn default_actor_kind() -> String {
    DEFAULT_ACTOR_KIND.to_string()
}

impl ActorRef {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }

    /// An actor of the default kind.
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, DEFAULT_ACTOR_KIND)
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A requested `(resource, operation)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceOperation {
    pub resource: String,
    pub operation: String,
}

impl ResourceOperation {
    pub fn new(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for ResourceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.operation)
    }
}

/// What an actor must hold to pass validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredPermissions {
    /// Exact policy ids the actor must hold.
    #[serde(default)]
    pub policy_ids: Vec<String>,
    /// Pairs the actor must be able to perform; `resource:*` satisfies any
    /// operation on that resource.
    #[serde(default)]
    pub permissions: Vec<ResourceOperation>,
}

impl RequiredPermissions {
    pub fn policy_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            policy_ids: ids.into_iter().map(Into::into).collect(),
            permissions: Vec::new(),
        }
    }

    pub fn permission(resource: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            policy_ids: Vec::new(),
            permissions: vec![ResourceOperation::new(resource, operation)],
        }
    }

    /// Adds another `(resource, operation)` requirement.
    pub fn and_permission(mut self, resource: impl Into<String>, operation: impl Into<String>) -> Self {
        self.permissions
            .push(ResourceOperation::new(resource, operation));
        self
    }

    /// Nothing requested; validation passes without any lookup.
    pub fn is_empty(&self) -> bool {
        self.policy_ids.is_empty() && self.permissions.is_empty()
    }
}

/// Which of an actor's policies count towards a check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// Only policies assigned directly to the actor's own roles.
    #[default]
    Direct,
    /// The full inherited closure of the actor's roles.
    Effective,
}
