//! # Procflow
//!
//! A dataflow engine for video analytics pipelines.
//!
//! Processes are wired into a graph through typed, named ports and executed
//! by one of two schedulers:
//!
//! - **Synchronous**: every tick visits each node once in topological order,
//!   with a single-slot edge between producer and consumer
//! - **Asynchronous**: one worker thread per node, bounded queues between
//!   them, and backpressure when a consumer falls behind
//! - **Composition**: a whole pipeline can be wrapped as a single process
//!   and nested in another, in either execution model
//!
//! Each cycle ends in a [`StepStatus`](core::StepStatus). Failures travel
//! downstream and end the stream; skips only withhold one cycle's output.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use procflow::prelude::*;
//!
//! let mut pipeline = PipelineBuilder::new("tracking")
//!     .add(reader)?
//!     .add(detector)?
//!     .add(writer)?
//!     .connect("reader", "image", "detector", "image")?
//!     .connect("detector", "tracks", "writer", "tracks")?
//!     .build_async()?;
//!
//! pipeline.initialize()?;
//! pipeline.run()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod process;
pub mod subpipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::InterruptToken;
    pub use crate::context::{PipelineContext, RunIdentity};
    pub use crate::core::{ConfigBlock, Payload, StepStatus};
    pub use crate::errors::{
        ConfigError, ContractErrorInfo, CycleDetectedError, LifecycleError,
        PipelineValidationError, PortError, ProcflowError,
    };
    pub use crate::observability::{init_tracing, QueueMonitor};
    pub use crate::pipeline::{
        AsyncPipeline, GraphView, Pipeline, PipelineBuilder, SyncPipeline,
    };
    pub use crate::process::{Legacy, LegacyProcess, OutputPusher, PortSpec, Process};
    pub use crate::subpipeline::{FailureRecovery, SuperProcess};
}
