//! Policy model types.
//!
//! This module contains:
//! - Key normalization shared by the resolver and validator
//! - `PolicyRef`, `ResolvedPolicy` and provenance tagging

mod types;
#[cfg(test)]
mod types_proptest;

pub use types::*;
