//! Context management for pipeline execution.
//!
//! This module provides:
//! - Run identities for correlating logs across nested pipelines
//! - The explicit pipeline context that replaces global output prefixes

mod execution;
mod identity;

pub use execution::PipelineContext;
pub use identity::RunIdentity;
