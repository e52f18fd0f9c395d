//! Tests for the policy resolver module.
//!
//! Organized by functionality:
//! - Direct assignment resolution
//! - Inheritance and diamond deduplication
//! - Safety features (cycle guard, depth limiting)
