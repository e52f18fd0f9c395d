//! Policy resolver: flattens a role's inheritance DAG into its effective
//! policy set.
//!
//! # Algorithm
//!
//! - **Upward walk**: starting at each input role, follow parent edges
//!   level by level. Every frontier, across all input roles, is fetched with
//!   a single `parent_ids` call.
//!
//! - **Cycle guard**: each branch carries its own ordered path and refuses
//!   to step onto a role already on that path. The write path rejects
//!   cycles, so hitting the guard means the graph was corrupted; it is logged
//!   and the walk still terminates with the correct reachable set.
//!
//! - **Diamonds**: a role reachable through several branches is expanded
//!   once per input role, so shared ancestors contribute their policies once.
//!
//! - **Provenance**: a policy is `Direct` when the input role holds it
//!   itself; otherwise it is inherited from the shallowest ancestor that
//!   holds it (ties broken by role id).
//!
//! - **Depth Limiting**: default max depth of 25 parent edges.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{DomainError, DomainResult};
use crate::model::{PolicyRef, Provenance, ResolvedPolicy};

use super::config::ResolverConfig;
use super::context::TraversalContext;
use super::traits::RoleGraphReader;

/// Walk state for one input role.
struct SeedWalk {
    seed: String,
    /// Reachable roles with the depth they were first reached at, in
    /// discovery order. Includes the seed at depth 0.
    reached: Vec<(String, u32)>,
    expanded: HashSet<String>,
    frontier: Vec<TraversalContext>,
}

impl SeedWalk {
    fn new(seed: &str) -> Self {
        let mut expanded = HashSet::new();
        expanded.insert(seed.to_string());
        Self {
            seed: seed.to_string(),
            reached: vec![(seed.to_string(), 0)],
            expanded,
            frontier: vec![TraversalContext::new(seed)],
        }
    }
}

/// Resolves effective policies for roles.
pub struct PolicyResolver<R> {
    reader: Arc<R>,
    config: ResolverConfig,
}

impl<R> PolicyResolver<R>
where
    R: RoleGraphReader + 'static,
{
    /// Creates a new resolver with the default configuration.
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            reader,
            config: ResolverConfig::default(),
        }
    }

    /// Creates a new resolver with custom configuration.
    pub fn with_config(reader: Arc<R>, config: ResolverConfig) -> Self {
        Self { reader, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves each input role independently.
    ///
    /// The result has one entry per distinct input id; unknown or deleted
    /// roles map to an empty list. Each list is sorted by resource, then
    /// operation, then key.
    #[instrument(skip(self), fields(roles = role_ids.len()))]
    pub async fn resolve(
        &self,
        role_ids: &[String],
    ) -> DomainResult<HashMap<String, Vec<ResolvedPolicy>>> {
        let mut walks: Vec<SeedWalk> = Vec::new();
        let mut seen = HashSet::new();
        for role_id in role_ids {
            if seen.insert(role_id.as_str()) {
                walks.push(SeedWalk::new(role_id));
            }
        }

        self.walk_ancestors(&mut walks).await?;

        let reachable: Vec<String> = walks
            .iter()
            .flat_map(|w| w.reached.iter().map(|(role, _)| role.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let direct = if reachable.is_empty() {
            HashMap::new()
        } else {
            self.reader.direct_policies(&reachable).await?
        };

        let resolved: HashMap<String, Vec<ResolvedPolicy>> = walks
            .iter()
            .map(|walk| (walk.seed.clone(), collect_policies(walk, &direct)))
            .collect();

        debug!(
            roles = resolved.len(),
            policies = resolved.values().map(Vec::len).sum::<usize>(),
            "resolved effective policies"
        );
        Ok(resolved)
    }

    /// Resolves a single role.
    pub async fn resolve_role(&self, role_id: &str) -> DomainResult<Vec<ResolvedPolicy>> {
        let mut resolved = self.resolve(&[role_id.to_string()]).await?;
        Ok(resolved.remove(role_id).unwrap_or_default())
    }

    /// Union of the effective policies of several roles, deduplicated by
    /// policy id and sorted like [`resolve`](Self::resolve).
    pub async fn resolve_merged(&self, role_ids: &[String]) -> DomainResult<Vec<PolicyRef>> {
        let resolved = self.resolve(role_ids).await?;
        let mut merged: BTreeMap<String, PolicyRef> = BTreeMap::new();
        for policy in resolved.into_values().flatten() {
            merged
                .entry(policy.policy.id.clone())
                .or_insert(policy.policy);
        }
        let mut policies: Vec<PolicyRef> = merged.into_values().collect();
        policies.sort_by(policy_order);
        Ok(policies)
    }

    /// Ancestors of `role_id` (not including itself) in discovery order.
    pub async fn ancestors(&self, role_id: &str) -> DomainResult<Vec<String>> {
        let mut walks = vec![SeedWalk::new(role_id)];
        self.walk_ancestors(&mut walks).await?;
        Ok(walks
            .remove(0)
            .reached
            .into_iter()
            .skip(1)
            .map(|(role, _)| role)
            .collect())
    }

    /// Advances every walk one level per iteration until all frontiers drain.
    async fn walk_ancestors(&self, walks: &mut [SeedWalk]) -> DomainResult<()> {
        loop {
            let heads: Vec<String> = walks
                .iter()
                .flat_map(|w| w.frontier.iter().map(|ctx| ctx.head().to_string()))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if heads.is_empty() {
                return Ok(());
            }

            let parents = self.reader.parent_ids(&heads).await?;

            for walk in walks.iter_mut() {
                let mut next = Vec::new();
                for ctx in std::mem::take(&mut walk.frontier) {
                    let Some(parent_ids) = parents.get(ctx.head()) else {
                        continue;
                    };
                    for parent_id in parent_ids {
                        if ctx.contains(parent_id) {
                            warn!(
                                seed = %walk.seed,
                                role_id = %parent_id,
                                path = %ctx.display_path(),
                                "inheritance cycle detected; not re-entering role"
                            );
                            continue;
                        }
                        if !walk.expanded.insert(parent_id.clone()) {
                            continue;
                        }
                        let child = ctx.descend(parent_id);
                        if child.depth > self.config.max_depth {
                            return Err(DomainError::DepthLimitExceeded {
                                max_depth: self.config.max_depth,
                            });
                        }
                        walk.reached.push((parent_id.clone(), child.depth));
                        next.push(child);
                    }
                }
                walk.frontier = next;
            }
        }
    }
}

/// Collects and tags the policies of every role reached by `walk`.
fn collect_policies(
    walk: &SeedWalk,
    direct: &HashMap<String, Vec<PolicyRef>>,
) -> Vec<ResolvedPolicy> {
    // policy id -> (depth, holder role id, policy)
    let mut best: HashMap<&str, (u32, &str, &PolicyRef)> = HashMap::new();

    for (role_id, depth) in &walk.reached {
        let Some(policies) = direct.get(role_id) else {
            continue;
        };
        for policy in policies {
            let candidate = (*depth, role_id.as_str(), policy);
            best.entry(policy.id.as_str())
                .and_modify(|current| {
                    if (candidate.0, candidate.1) < (current.0, current.1) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }

    let mut resolved: Vec<ResolvedPolicy> = best
        .into_values()
        .map(|(_, holder, policy)| ResolvedPolicy {
            policy: policy.clone(),
            provenance: if holder == walk.seed {
                Provenance::Direct
            } else {
                Provenance::Inherited {
                    role_id: holder.to_string(),
                }
            },
        })
        .collect();
    resolved.sort_by(|a, b| policy_order(&a.policy, &b.policy));
    resolved
}

fn policy_order(a: &PolicyRef, b: &PolicyRef) -> std::cmp::Ordering {
    a.resource
        .cmp(&b.resource)
        .then_with(|| a.operation.cmp(&b.operation))
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| a.id.cmp(&b.id))
}
