//! Boundary processes of a composite pipeline.
//!
//! Input pads receive values from outside the inner pipeline and hand them to
//! the nodes wired to them. Output pads collect values for the enclosing
//! process to publish. Both expose the same single port, named
//! [`PAD_PORT`], as input and output.

use super::{PortDirection, PortSpec, Process};
use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, PortError, ProcflowError};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};

/// The name of a pad's only port.
pub const PAD_PORT: &str = "value";

/// Which side of the boundary a pad sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadKind {
    /// Carries data into the inner pipeline.
    Input,
    /// Carries data out of the inner pipeline.
    Output,
}

/// A typed pass-through process standing at a pipeline boundary.
#[derive(Debug)]
pub struct Pad {
    name: String,
    kind: PadKind,
    port: PortSpec,
    value: Option<Payload>,
    set_this_cycle: bool,
}

impl Pad {
    /// Creates an input pad carrying `T`.
    #[must_use]
    pub fn input<T: Any + Send + Clone>(name: impl Into<String>) -> Self {
        Self::new(name.into(), PadKind::Input, PortSpec::input::<T>(PAD_PORT))
    }

    /// Creates an output pad carrying `T`.
    #[must_use]
    pub fn output<T: Any + Send + Clone>(name: impl Into<String>) -> Self {
        Self::new(name.into(), PadKind::Output, PortSpec::input::<T>(PAD_PORT))
    }

    fn new(name: String, kind: PadKind, port: PortSpec) -> Self {
        Self {
            name,
            kind,
            port,
            value: None,
            set_this_cycle: false,
        }
    }

    /// Returns the pad kind.
    #[must_use]
    pub fn kind(&self) -> PadKind {
        self.kind
    }

    /// Returns the type carried by the pad.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.port.type_id
    }

    /// Returns the pad's port declaration, as seen from inside.
    #[must_use]
    pub fn port(&self) -> &PortSpec {
        &self.port
    }
}

impl Process for Pad {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        match self.kind {
            PadKind::Input => "input_pad",
            PadKind::Output => "output_pad",
        }
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            self.port.clone(),
            self.port.renamed(PAD_PORT, PortDirection::Output),
        ]
    }

    fn params(&self) -> ConfigBlock {
        ConfigBlock::new()
    }

    fn set_params(&mut self, _block: &ConfigBlock) -> Result<(), ConfigError> {
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        Ok(())
    }

    /// Publishes the value written this cycle, or skips if none was.
    fn step(&mut self) -> StepStatus {
        if self.set_this_cycle {
            self.set_this_cycle = false;
            StepStatus::Success
        } else {
            self.value = None;
            StepStatus::Skip
        }
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.value = None;
        self.set_this_cycle = false;
        Ok(())
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        if port != PAD_PORT {
            return Err(PortError::unknown(&self.name, port));
        }
        if !self.port.accepts(&data) {
            return Err(PortError::TypeMismatch {
                port: port.to_string(),
                expected: self.port.type_name.to_string(),
                found: data.type_name().to_string(),
            });
        }
        self.value = Some(data);
        self.set_this_cycle = true;
        Ok(())
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        if port != PAD_PORT {
            return Err(PortError::unknown(&self.name, port));
        }
        self.value
            .clone()
            .ok_or_else(|| PortError::no_value(&self.name, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_passes_value_once() {
        let mut pad = Pad::input::<i32>("frames");
        pad.set_input(PAD_PORT, Payload::new(7_i32)).unwrap();
        assert_eq!(pad.step(), StepStatus::Success);
        assert_eq!(pad.output(PAD_PORT).unwrap().downcast_ref::<i32>(), Some(&7));

        assert_eq!(pad.step(), StepStatus::Skip);
        assert!(pad.output(PAD_PORT).is_err());
    }

    #[test]
    fn test_pad_rejects_wrong_type() {
        let mut pad = Pad::output::<String>("tracks");
        let err = pad.set_input(PAD_PORT, Payload::new(1_u8)).unwrap_err();
        assert!(matches!(err, PortError::TypeMismatch { .. }));
    }

    #[test]
    fn test_pad_ports_share_type() {
        let pad = Pad::input::<f64>("score");
        let ports = pad.ports();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].type_id, ports[1].type_id);
        assert_eq!(pad.class_name(), "input_pad");
    }
}
