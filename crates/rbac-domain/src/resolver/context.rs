//! Per-branch traversal state for the policy resolver.

use std::sync::Arc;

/// One branch of the upward walk: the ordered roles visited from the input
/// role down to the branch head.
#[derive(Debug, Clone)]
pub(crate) struct TraversalContext {
    /// Parent edges followed so far.
    pub(crate) depth: u32,
    /// Roles on this branch, input role first. Shared between sibling
    /// branches until one of them extends it.
    pub(crate) path: Arc<Vec<String>>,
}

impl TraversalContext {
    pub(crate) fn new(role_id: &str) -> Self {
        Self {
            depth: 0,
            path: Arc::new(vec![role_id.to_string()]),
        }
    }

    /// The role at the head of this branch.
    pub(crate) fn head(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    pub(crate) fn contains(&self, role_id: &str) -> bool {
        self.path.iter().any(|r| r == role_id)
    }

    /// Extends the branch by one parent edge.
    pub(crate) fn descend(&self, role_id: &str) -> Self {
        let mut path = (*self.path).clone();
        path.push(role_id.to_string());
        Self {
            depth: self.depth + 1,
            path: Arc::new(path),
        }
    }

    pub(crate) fn display_path(&self) -> String {
        self.path.join(" -> ")
    }
}
