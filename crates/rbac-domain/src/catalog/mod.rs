//! Resource/operation vocabulary.
//!
//! The catalog is an explicit value handed to whoever needs it (policy
//! creation, configuration) instead of a process-wide registry. An empty
//! catalog is permissive: every resource and operation is accepted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::model::{normalize_operation, normalize_resource, WILDCARD_OPERATION};

/// The set of valid resources and the operations each one supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyCatalog {
    resources: BTreeMap<String, BTreeSet<String>>,
}

impl PolicyCatalog {
    /// Creates an empty (permissive) catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource with its operations. Names are normalized.
    pub fn with_resource<I, S>(mut self, resource: &str, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert(resource, operations);
        self
    }

    /// Adds a resource with its operations, merging with any existing entry.
    pub fn insert<I, S>(&mut self, resource: &str, operations: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resources
            .entry(normalize_resource(resource))
            .or_default()
            .extend(operations.into_iter().map(|o| normalize_operation(o.as_ref())));
    }

    /// Builds a catalog from a resource -> operations map.
    pub fn from_map<I, O, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, O)>,
        O: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::new();
        for (resource, operations) in entries {
            catalog.insert(&resource, operations);
        }
        catalog
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Known resources in sorted order.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Operations declared for `resource`, if it is known.
    pub fn operations(&self, resource: &str) -> Option<impl Iterator<Item = &str>> {
        self.resources
            .get(&normalize_resource(resource))
            .map(|ops| ops.iter().map(String::as_str))
    }

    /// Whether `operation` on `resource` is part of the vocabulary.
    pub fn contains(&self, resource: &str, operation: &str) -> bool {
        self.validate(resource, operation).is_ok()
    }

    /// Checks a resource/operation pair against the catalog.
    ///
    /// The wildcard operation is valid for every known resource.
    pub fn validate(&self, resource: &str, operation: &str) -> DomainResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let resource = normalize_resource(resource);
        let operation = normalize_operation(operation);
        let operations = self
            .resources
            .get(&resource)
            .ok_or_else(|| DomainError::UnknownResource {
                resource: resource.clone(),
            })?;
        if operation == WILDCARD_OPERATION || operations.contains(&operation) {
            Ok(())
        } else {
            Err(DomainError::UnknownOperation {
                resource,
                operation,
            })
        }
    }
}
