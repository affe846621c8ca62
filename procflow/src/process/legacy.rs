//! Adapter for processes written against the boolean step contract.
//!
//! Older processes report every operation as a plain `bool`. Wrapping one in
//! [`Legacy`] maps `true` to success and `false` to failure so it can be
//! placed in any pipeline.

use super::{PortSpec, Process};
use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, PortError, ProcflowError};
use std::fmt;

/// A process whose lifecycle methods return `bool`.
pub trait LegacyProcess: Send + fmt::Debug {
    /// Returns the instance name.
    fn name(&self) -> &str;

    /// Returns the implementation's class name.
    fn class_name(&self) -> &str {
        "legacy_process"
    }

    /// Lists the ports of this process.
    fn ports(&self) -> Vec<PortSpec>;

    /// Returns the recognized parameters.
    fn params(&self) -> ConfigBlock;

    /// Applies a configuration; `false` means rejected.
    fn set_params(&mut self, block: &ConfigBlock) -> bool;

    /// Acquires resources; `false` means failed.
    fn initialize(&mut self) -> bool;

    /// Runs one cycle; `false` means no more output will ever come.
    fn step(&mut self) -> bool;

    /// Resets the process; `false` means refused.
    fn reset(&mut self) -> bool {
        true
    }

    /// Writes a value to an input port.
    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError>;

    /// Returns an owned copy of an output port's last value.
    fn output(&self, port: &str) -> Result<Payload, PortError>;
}

/// Wraps a [`LegacyProcess`] so it implements [`Process`].
#[derive(Debug)]
pub struct Legacy<P>(pub P);

impl<P: LegacyProcess> Legacy<P> {
    /// Wraps a legacy process.
    #[must_use]
    pub fn new(process: P) -> Self {
        Self(process)
    }
}

impl<P: LegacyProcess> Process for Legacy<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn class_name(&self) -> &str {
        self.0.class_name()
    }

    fn ports(&self) -> Vec<PortSpec> {
        self.0.ports()
    }

    fn params(&self) -> ConfigBlock {
        self.0.params()
    }

    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError> {
        if self.0.set_params(block) {
            Ok(())
        } else {
            Err(ConfigError::Rejected {
                nodes: vec![self.0.name().to_string()],
                reasons: vec!["set_params returned false".to_string()],
            })
        }
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        if self.0.initialize() {
            Ok(())
        } else {
            Err(ProcflowError::initialization(
                self.0.name(),
                "initialize returned false",
            ))
        }
    }

    fn step(&mut self) -> StepStatus {
        StepStatus::from(self.0.step())
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        if self.0.reset() {
            Ok(())
        } else {
            Err(ProcflowError::Internal(format!(
                "reset of '{}' returned false",
                self.0.name()
            )))
        }
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        self.0.set_input(port, data)
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        self.0.output(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Countdown {
        remaining: u32,
        last: u32,
    }

    impl LegacyProcess for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::output::<u32>("value")]
        }

        fn params(&self) -> ConfigBlock {
            ConfigBlock::new().with_parameter("start", 3, "First value")
        }

        fn set_params(&mut self, block: &ConfigBlock) -> bool {
            match block.get::<u32>("start") {
                Ok(start) => {
                    self.remaining = start;
                    true
                }
                Err(_) => false,
            }
        }

        fn initialize(&mut self) -> bool {
            true
        }

        fn step(&mut self) -> bool {
            if self.remaining == 0 {
                return false;
            }
            self.last = self.remaining;
            self.remaining -= 1;
            true
        }

        fn set_input(&mut self, port: &str, _data: Payload) -> Result<(), PortError> {
            Err(PortError::unknown("countdown", port))
        }

        fn output(&self, port: &str) -> Result<Payload, PortError> {
            match port {
                "value" => Ok(Payload::new(self.last)),
                _ => Err(PortError::unknown("countdown", port)),
            }
        }
    }

    #[test]
    fn test_legacy_step_maps_to_status() {
        let mut process = Legacy::new(Countdown { remaining: 2, last: 0 });
        assert_eq!(process.step(), StepStatus::Success);
        assert_eq!(process.step(), StepStatus::Success);
        assert_eq!(process.step(), StepStatus::Failure);
    }

    #[test]
    fn test_legacy_rejected_params() {
        let mut process = Legacy::new(Countdown { remaining: 2, last: 0 });
        let bad = ConfigBlock::new().with_parameter("start", "many", "");
        assert!(matches!(
            process.set_params(&bad),
            Err(ConfigError::Rejected { .. })
        ));
        assert_eq!(process.0.remaining, 2);
    }

    #[test]
    fn test_legacy_output() {
        let mut process = Legacy::new(Countdown { remaining: 1, last: 0 });
        process.step();
        let value = process.output("value").unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&1));
    }
}
