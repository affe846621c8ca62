//! Composite processes.
//!
//! A [`SuperProcess`] wraps a whole [`Pipeline`](crate::pipeline::Pipeline)
//! so it can be placed in another pipeline as a single node. Composites nest
//! to any depth; the inner pipeline never refers back to its owner.

pub(crate) mod relay;
mod super_process;

#[cfg(test)]
pub use super_process::MockFailureRecovery;
pub use super_process::{FailureRecovery, SuperProcess};
