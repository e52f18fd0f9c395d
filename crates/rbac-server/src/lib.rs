//! rbac-server: Mutation sagas, workflows and wiring for the RBAC engine
//!
//! This crate contains the business layer including:
//! - Adapters from `DataStore` to the domain's graph and actor readers
//! - Compensable saga steps for every mutation
//! - Composite create/update role workflows
//! - Configuration and logging setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rbac-server                   │
//! ├─────────────────────────────────────────────┤
//! │  config.rs     - Configuration management   │
//! │  adapters.rs   - Storage -> domain readers  │
//! │  saga/         - Steps and the runner       │
//! │  workflows/    - Role workflows             │
//! │  service.rs    - RbacService facade         │
//! │  observability - Logging setup              │
//! └─────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod observability;
pub mod saga;
pub mod service;
pub mod workflows;

pub use config::{ConfigLoadError, RbacConfig};
pub use error::{ErrorKind, RbacError, RbacResult};
pub use saga::{SagaRunner, SagaStep, StepOutcome};
pub use service::RbacService;
