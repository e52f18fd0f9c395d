//! Authorization validation.
//!
//! Answers "may this actor grant or use these permissions?" against the
//! policies held through the actor's roles. Validation is pass/raise: a
//! failure is always `DomainError::Unauthorized`, never a partial result.

mod types;
mod validator;


pub use types::{
    ActorRef, GrantScope, RequiredPermissions, ResourceOperation, DEFAULT_ACTOR_KIND,
};
pub use validator::{ActorRoleReader, AuthorizationValidator};
