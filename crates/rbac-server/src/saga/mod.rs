//! Compensable mutation steps and the runner that rolls them back.
//!
//! Every store mutation the engine performs is wrapped in a [`SagaStep`]:
//! `forward` applies the change and returns a compensation token, and
//! `compensate` uses that token to undo it. A [`SagaRunner`] records each
//! successful step; when a later step fails, the caller invokes
//! [`SagaRunner::rollback`] to compensate in reverse order.
//!
//! # Limitations
//!
//! Pending compensations live in memory only. If the process dies between a
//! forward step and its compensation, the partial effect stays in the store.

mod authorize;
mod policy;
mod role;
mod role_parent;
mod role_policy;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::RbacResult;

pub use authorize::{StoreValidator, ValidateActorInput, ValidateActorPermissionsStep};
pub use policy::{CreatePoliciesStep, DeletePoliciesStep, UpdatePoliciesStep};
pub use role::{CreateRolesStep, DeleteRolesStep, UpdateRolesStep};
pub use role_parent::{
    diff_parents, CreateRoleParentsStep, ParentDiff, RoleParents, RoleParentsChange,
    SetRoleParentsStep,
};
pub use role_policy::{
    CreateRolePoliciesStep, DeleteRolePoliciesStep, RolePolicies, RolePoliciesChange,
    SyncRolePoliciesStep, SyncToken, UpdateRolePoliciesStep,
};

/// Result of a successful forward step.
#[derive(Debug, Clone)]
pub struct StepOutcome<O, T> {
    pub output: O,
    /// Everything `compensate` needs to undo the step.
    pub token: T,
}

impl<O, T> StepOutcome<O, T> {
    pub fn new(output: O, token: T) -> Self {
        Self { output, token }
    }
}

/// Input for steps that patch every row matched by a filter.
#[derive(Debug, Clone, Default)]
pub struct UpdateInput<F, P> {
    pub filter: F,
    pub patch: P,
}

/// Prior values of the fields an update touched, one patch per row.
#[derive(Debug, Clone)]
pub struct UpdateSnapshot<P> {
    pub changed_fields: Vec<String>,
    pub previous: Vec<(String, P)>,
}

/// A single compensable mutation.
#[async_trait]
pub trait SagaStep: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;
    type Token: Send + Sync + 'static;

    /// Stable identifier used in logs.
    const NAME: &'static str;

    /// Applies the mutation.
    async fn forward(&self, input: Self::Input) -> RbacResult<StepOutcome<Self::Output, Self::Token>>;

    /// Undoes a prior `forward`. `None` means there is nothing to undo and
    /// must succeed without touching the store.
    async fn compensate(&self, token: Option<Self::Token>) -> RbacResult<()>;
}

/// A completed step waiting to be compensated, with its types erased.
#[async_trait]
trait PendingCompensation: Send + Sync {
    fn step_name(&self) -> &'static str;

    async fn run(self: Box<Self>) -> RbacResult<()>;
}

struct Pending<S: SagaStep> {
    step: Arc<S>,
    token: S::Token,
}

#[async_trait]
impl<S: SagaStep> PendingCompensation for Pending<S> {
    fn step_name(&self) -> &'static str {
        S::NAME
    }

    async fn run(self: Box<Self>) -> RbacResult<()> {
        let Pending { step, token } = *self;
        step.compensate(Some(token)).await
    }
}

/// Runs steps in order and remembers how to undo them.
pub struct SagaRunner {
    name: &'static str,
    completed: Vec<Box<dyn PendingCompensation>>,
}

impl SagaRunner {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            completed: Vec::new(),
        }
    }

    /// Runs `step` forward. On success its compensation is recorded; on
    /// failure nothing is recorded and the error is returned unchanged.
    pub async fn run<S: SagaStep>(&mut self, step: &Arc<S>, input: S::Input) -> RbacResult<S::Output> {
        let outcome = step.forward(input).await.map_err(|e| {
            warn!(saga = self.name, step = S::NAME, error = %e, "saga step failed");
            e
        })?;
        debug!(saga = self.name, step = S::NAME, "saga step completed");
        self.completed.push(Box::new(Pending {
            step: Arc::clone(step),
            token: outcome.token,
        }));
        Ok(outcome.output)
    }

    /// Names of the steps that would be compensated, oldest first.
    pub fn completed_steps(&self) -> Vec<&'static str> {
        self.completed.iter().map(|p| p.step_name()).collect()
    }

    /// Compensates every completed step, newest first.
    ///
    /// A failing compensation is logged and the remaining ones still run.
    /// Returns the number of compensations that failed.
    pub async fn rollback(&mut self) -> usize {
        let mut failures = 0;
        while let Some(pending) = self.completed.pop() {
            let step = pending.step_name();
            match pending.run().await {
                Ok(()) => debug!(saga = self.name, step, "compensation applied"),
                Err(e) => {
                    failures += 1;
                    error!(saga = self.name, step, error = %e, "compensation failed");
                }
            }
        }
        failures
    }

    /// Forgets all recorded compensations once the saga has succeeded.
    pub fn commit(&mut self) {
        self.completed.clear();
    }
}
