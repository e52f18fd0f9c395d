//! Composite role workflows.
//!
//! Both workflows run the same sequence through a [`SagaRunner`]:
//!
//! 1. permission check for the policies being granted
//! 2. role create or update
//! 3. parent reconciliation, for roles that declare parents
//! 4. policy assignment, for roles that declare policies
//!
//! If any step fails, the completed ones are compensated newest first and
//! the original error is returned.
//!
//! [`SagaRunner`]: crate::saga::SagaRunner

mod create_roles;
mod types;
mod update_roles;


pub use create_roles::CreateRolesWorkflow;
pub use types::{CreateRoleInput, CreateRolesInput, RoleWithRelations, UpdateRoleInput, UpdateRolesInput};
pub use update_roles::UpdateRolesWorkflow;

use std::collections::HashSet;

use tracing::error;

use crate::error::RbacResult;
use crate::saga::SagaRunner;

/// Removes duplicate ids while keeping first-seen order.
pub(crate) fn dedup_ids<'a, I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Commits the saga on success and rolls it back on failure.
pub(crate) async fn finish<T>(saga: &mut SagaRunner, result: RbacResult<T>) -> RbacResult<T> {
    match result {
        Ok(value) => {
            saga.commit();
            Ok(value)
        }
        Err(e) => {
            let steps = saga.completed_steps();
            let failed = saga.rollback().await;
            if failed > 0 {
                error!(
                    failed,
                    steps = ?steps,
                    error = %e,
                    "workflow rollback incomplete; store may hold partial changes"
                );
            }
            Err(e)
        }
    }
}
