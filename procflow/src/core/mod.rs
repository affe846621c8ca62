//! Core domain model types for procflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Step status and the status combination rule
//! - Type-erased payloads carried across edges
//! - Namespaced configuration blocks

mod config;
mod payload;
mod status;

pub use config::{ConfigBlock, ConfigEntry, BLOCK_SEPARATOR};
pub use payload::{Payload, PortData};
pub use status::{combine_statuses, StepStatus};
