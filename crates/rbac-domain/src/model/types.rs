//! Core policy types shared by the resolver and the validator.

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

/// Operation value that grants every operation on its resource.
pub const WILDCARD_OPERATION: &str = "*";

/// Case-folds a resource name.
pub fn normalize_resource(resource: &str) -> String {
    resource.trim().to_lowercase()
}

/// Converts an operation to its snake_case form, so `"readAll"`,
/// `"Read-All"`, `"read all"` and `"READ_ALL"` all become `"read_all"`.
/// The wildcard is kept as is.
pub fn normalize_operation(operation: &str) -> String {
    let trimmed = operation.trim();
    if trimmed == WILDCARD_OPERATION {
        return WILDCARD_OPERATION.to_string();
    }
    trimmed.to_snake_case()
}

/// Builds the canonical `resource:operation` lookup key.
pub fn permission_key(resource: &str, operation: &str) -> String {
    format!(
        "{}:{}",
        normalize_resource(resource),
        normalize_operation(operation)
    )
}

/// A live policy as seen by the domain layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRef {
    pub id: String,
    pub key: String,
    pub resource: String,
    pub operation: String,
    pub name: Option<String>,
}

impl PolicyRef {
    /// Creates a policy reference, deriving the key.
    pub fn new(id: impl Into<String>, resource: &str, operation: &str) -> Self {
        Self {
            id: id.into(),
            key: permission_key(resource, operation),
            resource: normalize_resource(resource),
            operation: normalize_operation(operation),
            name: None,
        }
    }

    /// Whether this policy is a wildcard over its resource.
    pub fn is_wildcard(&self) -> bool {
        self.operation == WILDCARD_OPERATION
    }

    /// Whether holding this policy permits `operation` on `resource`.
    pub fn grants(&self, resource: &str, operation: &str) -> bool {
        normalize_resource(&self.resource) == normalize_resource(resource)
            && (self.is_wildcard()
                || normalize_operation(&self.operation) == normalize_operation(operation))
    }
}

/// Where a resolved policy came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    /// Assigned directly to the role being resolved.
    Direct,
    /// Assigned to an ancestor role.
    Inherited { role_id: String },
}

impl Provenance {
    pub fn is_direct(&self) -> bool {
        matches!(self, Provenance::Direct)
    }

    /// The ancestor role the policy was inherited from, if any.
    pub fn inherited_from(&self) -> Option<&str> {
        match self {
            Provenance::Direct => None,
            Provenance::Inherited { role_id } => Some(role_id),
        }
    }
}

/// A policy in a role's effective set, tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    #[serde(flatten)]
    pub policy: PolicyRef,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_operation_produces_snake_case() {
        assert_eq!(normalize_operation("READ"), "read");
        assert_eq!(normalize_operation(" Read-All "), "read_all");
        assert_eq!(normalize_operation("read all"), "read_all");
        assert_eq!(normalize_operation("readAll"), "read_all");
        assert_eq!(normalize_operation("bulkDeleteItems"), "bulk_delete_items");
        assert_eq!(normalize_operation("READ_ALL"), "read_all");
        assert_eq!(normalize_operation(" * "), "*");
    }

    #[test]
    fn test_policy_ref_new_derives_key() {
        let policy = PolicyRef::new("pol_1", "Product", "READ");
        assert_eq!(policy.key, "product:read");
        assert_eq!(policy.resource, "product");
        assert_eq!(policy.operation, "read");
    }

    #[test]
    fn test_wildcard_grants_every_operation_on_its_resource() {
        let policy = PolicyRef::new("pol_1", "order", "*");
        assert!(policy.grants("order", "update"));
        assert!(policy.grants("ORDER", "Delete"));
        assert!(!policy.grants("product", "update"));
    }

    #[test]
    fn test_exact_policy_grants_only_its_operation() {
        let policy = PolicyRef::new("pol_1", "order", "read");
        assert!(policy.grants("Order", "READ"));
        assert!(!policy.grants("order", "update"));
    }

    #[test]
    fn test_provenance_accessors() {
        assert!(Provenance::Direct.is_direct());
        let inherited = Provenance::Inherited {
            role_id: "role_parent".to_string(),
        };
        assert!(!inherited.is_direct());
        assert_eq!(inherited.inherited_from(), Some("role_parent"));
    }
}
