//! A simple function-based process.

use super::{PortSpec, Process};
use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, PortError, ProcflowError};
use std::any::Any;
use std::fmt::Debug;

/// A process that maps its `input` port to its `output` port with a closure.
///
/// Returning `None` from the closure skips the cycle. A cycle without a
/// fresh input also skips.
pub struct FnProcess<I, O, F>
where
    F: FnMut(I) -> Option<O> + Send,
{
    name: String,
    func: F,
    input: Option<I>,
    output: Option<O>,
}

impl<I, O, F> FnProcess<I, O, F>
where
    I: Any + Send + Clone,
    O: Any + Send + Clone,
    F: FnMut(I) -> Option<O> + Send,
{
    /// Creates a new function-based process.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            input: None,
            output: None,
        }
    }
}

impl<I, O, F> Debug for FnProcess<I, O, F>
where
    F: FnMut(I) -> Option<O> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcess")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<I, O, F> Process for FnProcess<I, O, F>
where
    I: Any + Send + Clone,
    O: Any + Send + Clone,
    F: FnMut(I) -> Option<O> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "fn_process"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<I>("input"), PortSpec::output::<O>("output")]
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

    fn step(&mut self) -> StepStatus {
        let Some(input) = self.input.take() else {
            return StepStatus::Skip;
        };
        match (self.func)(input) {
            Some(value) => {
                self.output = Some(value);
                StepStatus::Success
            }
            None => StepStatus::Skip,
        }
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.input = None;
        self.output = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        match port {
            "input" => {
                self.input = Some(data.downcast::<I>(port)?);
                Ok(())
            }
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "output" => self
                .output
                .clone()
                .map(Payload::new)
                .ok_or_else(|| PortError::no_value(&self.name, port)),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_process_maps_value() {
        let mut double = FnProcess::new("double", |x: i32| Some(x * 2));
        double.set_input("input", Payload::new(21_i32)).unwrap();
        assert_eq!(double.step(), StepStatus::Success);
        assert_eq!(
            double.output("output").unwrap().downcast_ref::<i32>(),
            Some(&42)
        );
    }

    #[test]
    fn test_fn_process_skips_without_input() {
        let mut double = FnProcess::new("double", |x: i32| Some(x * 2));
        assert_eq!(double.step(), StepStatus::Skip);
    }

    #[test]
    fn test_fn_process_none_skips() {
        let mut evens = FnProcess::new("evens", |x: i32| (x % 2 == 0).then_some(x));
        evens.set_input("input", Payload::new(3_i32)).unwrap();
        assert_eq!(evens.step(), StepStatus::Skip);
    }

    #[test]
    fn test_fn_process_wrong_input_type() {
        let mut double = FnProcess::new("double", |x: i32| Some(x * 2));
        assert!(double.set_input("input", Payload::new("text")).is_err());
        assert!(double.set_input("bogus", Payload::new(1_i32)).is_err());
    }
}
