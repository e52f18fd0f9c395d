//! Permission check run at the head of privileged workflows.

use std::sync::Arc;

use async_trait::async_trait;
use rbac_domain::{ActorRef, AuthorizationValidator, RequiredPermissions};
use rbac_storage::DataStore;
use tracing::debug;

use super::{SagaStep, StepOutcome};
use crate::adapters::DataStoreRoleGraph;
use crate::error::{RbacError, RbacResult};

/// Validator wired to a `DataStore`.
pub type StoreValidator<S> = AuthorizationValidator<DataStoreRoleGraph<S>, DataStoreRoleGraph<S>>;

#[derive(Debug, Clone, Default)]
pub struct ValidateActorInput {
    pub actor: Option<ActorRef>,
    pub required: RequiredPermissions,
}

/// Checks that the calling actor holds what it is about to grant.
///
/// Without an actor the check is skipped unless `require_actor` is set, in
/// which case a non-empty requirement fails as unauthorized. The step writes
/// nothing, so its compensation does nothing.
pub struct ValidateActorPermissionsStep<S: DataStore> {
    validator: Arc<StoreValidator<S>>,
    require_actor: bool,
}

impl<S: DataStore> ValidateActorPermissionsStep<S> {
    pub fn new(validator: Arc<StoreValidator<S>>) -> Self {
        Self {
            validator,
            require_actor: false,
        }
    }

    pub fn with_require_actor(mut self, require_actor: bool) -> Self {
        self.require_actor = require_actor;
        self
    }
}

#[async_trait]
impl<S: DataStore> SagaStep for ValidateActorPermissionsStep<S> {
    type Input = ValidateActorInput;
    type Output = ();
    type Token = ();

    const NAME: &'static str = "validate_actor_permissions";

    async fn forward(&self, input: ValidateActorInput) -> RbacResult<StepOutcome<(), ()>> {
        match &input.actor {
            Some(actor) => self.validator.validate(actor, &input.required).await?,
            None if self.require_actor && !input.required.is_empty() => {
                return Err(RbacError::unauthorized(
                    "an actor is required to grant policies",
                ));
            }
            None => debug!("no actor supplied; skipping permission check"),
        }
        Ok(StepOutcome::new((), ()))
    }

    async fn compensate(&self, _token: Option<()>) -> RbacResult<()> {
        Ok(())
    }
}
