//! Configuration for the policy resolver.

/// Default maximum inheritance depth.
pub const DEFAULT_MAX_DEPTH: u32 = 25;

/// Configuration for the policy resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Maximum number of parent edges followed from an input role.
    ///
    /// This is a hard limit, not a cycle heuristic: an acyclic chain longer
    /// than `max_depth` fails with `DomainError::DepthLimitExceeded` instead
    /// of being truncated. Callers see it as invalid input.
    pub max_depth: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ResolverConfig {
    /// Creates a new configuration with the specified max depth.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }
}
