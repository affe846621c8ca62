//! The process contract.
//!
//! A [`Process`] is the unit of computation placed in a pipeline. It owns its
//! configuration, its input buffers and the values it last produced. The
//! scheduler writes inputs through [`Process::set_input`], calls
//! [`Process::step`], and reads results back through [`Process::output`].
//! Values are always handed over as owned [`Payload`]s.

mod function;
mod legacy;
mod pads;

pub use function::FnProcess;
pub use legacy::{Legacy, LegacyProcess};
pub use pads::{Pad, PadKind, PAD_PORT};

use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, PortError, ProcflowError};
use crate::subpipeline::SuperProcess;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Written by the scheduler before a step.
    Input,
    /// Read by the scheduler after a successful step.
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Declaration of one named, typed port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Port name, unique per direction.
    pub name: String,
    /// Port direction.
    pub direction: PortDirection,
    /// Type carried by the port.
    pub type_id: TypeId,
    /// Readable form of the type.
    pub type_name: &'static str,
}

impl PortSpec {
    /// Declares an input port carrying `T`.
    #[must_use]
    pub fn input<T: Any>(name: impl Into<String>) -> Self {
        Self::typed::<T>(name, PortDirection::Input)
    }

    /// Declares an output port carrying `T`.
    #[must_use]
    pub fn output<T: Any>(name: impl Into<String>) -> Self {
        Self::typed::<T>(name, PortDirection::Output)
    }

    fn typed<T: Any>(name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Same port with another name and direction.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }

    /// Returns true if the payload has this port's type.
    #[must_use]
    pub fn accepts(&self, payload: &Payload) -> bool {
        payload.type_id() == self.type_id
    }
}

/// Finds a port by name and direction.
#[must_use]
pub fn find_port<'a>(
    ports: &'a [PortSpec],
    name: &str,
    direction: PortDirection,
) -> Option<&'a PortSpec> {
    ports
        .iter()
        .find(|port| port.direction == direction && port.name == name)
}

type PushFn = dyn Fn(StepStatus, &dyn Process) -> bool + Send + Sync;

/// Lets a step hand over extra rounds of output before it returns.
///
/// The thread-per-node scheduler gives one to each process through
/// [`Process::set_output_pusher`]. A push reads the process's current
/// outputs and sends them downstream with the given status, exactly as if
/// `step` had returned. It blocks while a downstream queue is full.
#[derive(Clone)]
pub struct OutputPusher(Arc<PushFn>);

impl OutputPusher {
    /// Wraps the scheduler's push function.
    pub fn new<F>(push: F) -> Self
    where
        F: Fn(StepStatus, &dyn Process) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(push))
    }

    /// Sends `process`'s current outputs downstream with `status`.
    ///
    /// Returns false if the round could not be delivered.
    pub fn push(&self, status: StepStatus, process: &dyn Process) -> bool {
        (self.0)(status, process)
    }
}

impl fmt::Debug for OutputPusher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPusher").finish_non_exhaustive()
    }
}

/// Trait for pipeline processes.
///
/// Lifecycle: created, configured with [`set_params`](Process::set_params),
/// initialized once, stepped repeatedly, optionally reset.
pub trait Process: Send + fmt::Debug {
    /// Returns the instance name; it doubles as the node name.
    fn name(&self) -> &str;

    /// Returns the implementation's class name.
    fn class_name(&self) -> &str {
        "process"
    }

    /// Lists the ports of this process.
    fn ports(&self) -> Vec<PortSpec>;

    /// Returns the recognized parameters with their current values.
    fn params(&self) -> ConfigBlock;

    /// Validates and applies a configuration.
    ///
    /// Must leave the previous configuration untouched when it fails.
    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError>;

    /// Acquires resources. Called once before the first step.
    fn initialize(&mut self) -> Result<(), ProcflowError>;

    /// Consumes the latest inputs and computes outputs.
    fn step(&mut self) -> StepStatus;

    /// Returns the process to its freshly initialized state.
    fn reset(&mut self) -> Result<(), ProcflowError> {
        Ok(())
    }

    /// Stops any threads owned by the process.
    fn cancel(&mut self) {}

    /// Writes a value to an input port.
    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError>;

    /// Returns an owned copy of an output port's last value.
    fn output(&self, port: &str) -> Result<Payload, PortError>;

    /// Returns the composite view when the process wraps a whole pipeline.
    fn as_super_process(&self) -> Option<&SuperProcess> {
        None
    }

    /// Mutable form of [`as_super_process`](Process::as_super_process).
    fn as_super_process_mut(&mut self) -> Option<&mut SuperProcess> {
        None
    }

    /// Receives the scheduler's pusher before stepping starts and `None`
    /// once it stops.
    ///
    /// Processes that emit several results per input keep the pusher and
    /// call [`OutputPusher::push`] inside `step`. The returned status still
    /// produces the final round. The single-threaded scheduler never
    /// installs one, so there extra pushes are dropped.
    fn set_output_pusher(&mut self, _pusher: Option<OutputPusher>) {}

    /// Updates a single parameter, keeping the others.
    fn set_param(&mut self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        let mut block = self.params();
        block.set(key, value)?;
        self.set_params(&block)
    }
}
