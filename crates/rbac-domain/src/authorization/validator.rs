//! Authorization validator implementation.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{DomainError, DomainResult};
use crate::model::{permission_key, PolicyRef, WILDCARD_OPERATION};
use crate::resolver::{PolicyResolver, ResolverConfig, RoleGraphReader};

use super::types::{ActorRef, GrantScope, RequiredPermissions};

/// Lookup of the roles held by an actor.
#[async_trait]
pub trait ActorRoleReader: Send + Sync {
    /// Live role ids assigned to the actor.
    async fn actor_role_ids(&self, actor: &ActorRef) -> DomainResult<Vec<String>>;
}

/// Validates that an actor holds a set of permissions.
pub struct AuthorizationValidator<A, R> {
    actors: Arc<A>,
    graph: Arc<R>,
    resolver: PolicyResolver<R>,
    scope: GrantScope,
}

impl<A, R> AuthorizationValidator<A, R>
where
    A: ActorRoleReader + 'static,
    R: RoleGraphReader + 'static,
{
    /// Creates a validator that only counts direct role policies.
    pub fn new(actors: Arc<A>, graph: Arc<R>) -> Self {
        Self {
            actors,
            resolver: PolicyResolver::new(Arc::clone(&graph)),
            graph,
            scope: GrantScope::Direct,
        }
    }

    /// Sets which policies count towards a check.
    pub fn with_scope(mut self, scope: GrantScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the resolver configuration used for `GrantScope::Effective`.
    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver = PolicyResolver::with_config(Arc::clone(&self.graph), config);
        self
    }

    pub fn scope(&self) -> GrantScope {
        self.scope
    }

    /// Passes when the actor holds everything in `required`, otherwise fails
    /// with `DomainError::Unauthorized`.
    ///
    /// An empty requirement always passes, even for an actor without roles.
    /// A non-empty requirement fails immediately for an actor without roles.
    #[instrument(skip(self, required), fields(actor = %actor, scope = ?self.scope))]
    pub async fn validate(&self, actor: &ActorRef, required: &RequiredPermissions) -> DomainResult<()> {
        if required.is_empty() {
            return Ok(());
        }

        let role_ids = self.actors.actor_role_ids(actor).await?;
        if role_ids.is_empty() {
            return Err(DomainError::Unauthorized {
                message: format!("actor {actor} has no roles"),
            });
        }

        let held = self.held_policies(&role_ids).await?;
        let held_ids: HashSet<&str> = held.iter().map(|p| p.id.as_str()).collect();
        let held_keys: HashSet<String> = held
            .iter()
            .map(|p| permission_key(&p.resource, &p.operation))
            .collect();

        let mut missing: BTreeSet<String> = BTreeSet::new();

        for policy_id in &required.policy_ids {
            if !held_ids.contains(policy_id.as_str()) {
                missing.insert(policy_id.clone());
            }
        }

        for requested in &required.permissions {
            let exact = permission_key(&requested.resource, &requested.operation);
            let wildcard = permission_key(&requested.resource, WILDCARD_OPERATION);
            if !held_keys.contains(&exact) && !held_keys.contains(&wildcard) {
                missing.insert(exact);
            }
        }

        if !missing.is_empty() {
            let missing: Vec<String> = missing.into_iter().collect();
            debug!(missing = ?missing, "authorization denied");
            return Err(DomainError::Unauthorized {
                message: format!("actor {actor} lacks: {}", missing.join(", ")),
            });
        }

        debug!(roles = role_ids.len(), "authorization granted");
        Ok(())
    }

    /// Boolean form of [`validate`](Self::validate). Only `Unauthorized`
    /// becomes `false`; other failures still propagate.
    pub async fn is_allowed(&self, actor: &ActorRef, required: &RequiredPermissions) -> DomainResult<bool> {
        match self.validate(actor, required).await {
            Ok(()) => Ok(true),
            Err(DomainError::Unauthorized { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Policies the actor holds under the configured scope.
    async fn held_policies(&self, role_ids: &[String]) -> DomainResult<Vec<PolicyRef>> {
        match self.scope {
            GrantScope::Direct => {
                let direct = self.graph.direct_policies(role_ids).await?;
                Ok(direct.into_values().flatten().collect())
            }
            GrantScope::Effective => self.resolver.resolve_merged(role_ids).await,
        }
    }
}
