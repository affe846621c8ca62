//! Small processes for exercising pipelines.

use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, PortError, ProcflowError};
use crate::process::{OutputPusher, PortSpec, Process};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

fn take_input<T: Any>(slot: &mut Option<T>, port: &str, data: Payload) -> Result<(), PortError> {
    *slot = Some(data.downcast::<T>(port)?);
    Ok(())
}

fn read_output<T: Any + Send + Clone>(
    value: Option<&T>,
    process: &str,
    port: &str,
) -> Result<Payload, PortError> {
    value
        .cloned()
        .map(Payload::new)
        .ok_or_else(|| PortError::no_value(process, port))
}

/// Emits a fixed list of numbers on `number`, then fails.
///
/// Parameter `offset` is added to every value.
#[derive(Debug, Clone)]
pub struct NumberSource {
    name: String,
    values: Vec<i32>,
    offset: i32,
    position: usize,
    current: Option<i32>,
}

impl NumberSource {
    /// Creates a source emitting `values` in order.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<i32>) -> Self {
        Self {
            name: name.into(),
            values,
            offset: 0,
            position: 0,
            current: None,
        }
    }
}

impl Process for NumberSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "number_source"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<i32>("number")]
    }

    fn params(&self) -> ConfigBlock {
        ConfigBlock::new()
            .with_parameter("offset", 0, "Added to every emitted value")
            .with_current("offset", self.offset)
    }

    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError> {
        self.offset = block.get("offset")?;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        Ok(())
    }

    fn step(&mut self) -> StepStatus {
        match self.values.get(self.position) {
            Some(value) => {
                self.position += 1;
                self.current = Some(value + self.offset);
                StepStatus::Success
            }
            None => StepStatus::Failure,
        }
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.position = 0;
        self.current = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, _data: Payload) -> Result<(), PortError> {
        Err(PortError::unknown(&self.name, port))
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "number" => read_output(self.current.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Replays a script of `(status, value)` pairs on `number`, then fails.
///
/// The value of a non-success entry is ignored.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    name: String,
    script: Vec<(StepStatus, i32)>,
    position: usize,
    current: Option<i32>,
}

impl ScriptedSource {
    /// Creates a scripted source.
    #[must_use]
    pub fn new(name: impl Into<String>, script: Vec<(StepStatus, i32)>) -> Self {
        Self {
            name: name.into(),
            script,
            position: 0,
            current: None,
        }
    }
}

impl Process for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "scripted_source"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<i32>("number")]
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
        let Some(&(status, value)) = self.script.get(self.position) else {
            return StepStatus::Failure;
        };
        self.position += 1;
        if status.is_success() {
            self.current = Some(value);
        }
        status
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.position = 0;
        self.current = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, _data: Payload) -> Result<(), PortError> {
        Err(PortError::unknown(&self.name, port))
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "number" => read_output(self.current.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Copies `input` to `output`; skips when no input arrived.
///
/// With a visit log, appends its name on every step.
pub struct PassThrough<T> {
    name: String,
    input: Option<T>,
    output: Option<T>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl<T> PassThrough<T> {
    /// Creates a pass-through.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: None,
            output: None,
            log: None,
        }
    }

    /// Records every step into `log`.
    #[must_use]
    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }
}

impl<T> std::fmt::Debug for PassThrough<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassThrough")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T: Any + Send + Clone> Process for PassThrough<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "pass_through"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<T>("input"), PortSpec::output::<T>("output")]
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
        if let Some(log) = &self.log {
            log.lock().push(self.name.clone());
        }
        match self.input.take() {
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
            "input" => take_input(&mut self.input, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "output" => read_output(self.output.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Stores every value arriving on `input`.
///
/// The collected values outlive resets so a test can compare runs.
/// Parameter `delay_ms` makes every step sleep.
pub struct Collector<T> {
    name: String,
    input: Option<T>,
    values: Arc<Mutex<Vec<T>>>,
    delay: Duration,
}

impl<T> Collector<T> {
    /// Creates a collector.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: None,
            values: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Sleeps for `delay` on every step.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle to the collected values.
    #[must_use]
    pub fn values(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.values)
    }
}

impl<T> std::fmt::Debug for Collector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl<T: Any + Send + Clone> Process for Collector<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "collector"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<T>("input")]
    }

    fn params(&self) -> ConfigBlock {
        let delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
        ConfigBlock::new()
            .with_parameter("delay_ms", 0, "Sleep per step, in milliseconds")
            .with_current("delay_ms", delay_ms)
    }

    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError> {
        self.delay = Duration::from_millis(block.get("delay_ms")?);
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        Ok(())
    }

    fn step(&mut self) -> StepStatus {
        let Some(value) = self.input.take() else {
            return StepStatus::Skip;
        };
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.values.lock().push(value);
        StepStatus::Success
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.input = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        match port {
            "input" => take_input(&mut self.input, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        Err(PortError::unknown(&self.name, port))
    }
}

/// Adds `a` and `b` into `sum`; `b` counts as zero when absent.
#[derive(Debug, Clone)]
pub struct Adder {
    name: String,
    a: Option<i32>,
    b: Option<i32>,
    sum: Option<i32>,
}

impl Adder {
    /// Creates an adder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            a: None,
            b: None,
            sum: None,
        }
    }
}

impl Process for Adder {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "adder"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::input::<i32>("a"),
            PortSpec::input::<i32>("b"),
            PortSpec::output::<i32>("sum"),
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

    fn step(&mut self) -> StepStatus {
        let Some(a) = self.a.take() else {
            return StepStatus::Skip;
        };
        self.sum = Some(a + self.b.take().unwrap_or(0));
        StepStatus::Success
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.a = None;
        self.b = None;
        self.sum = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        match port {
            "a" => take_input(&mut self.a, port, data),
            "b" => take_input(&mut self.b, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "sum" => read_output(self.sum.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Multiplies `input` by the `factor` parameter.
///
/// A factor of zero is rejected.
#[derive(Debug, Clone)]
pub struct Multiplier {
    name: String,
    factor: i32,
    input: Option<i32>,
    output: Option<i32>,
}

impl Multiplier {
    /// Creates a multiplier with factor 2.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factor: 2,
            input: None,
            output: None,
        }
    }

    /// Sets the factor.
    #[must_use]
    pub fn with_factor(mut self, factor: i32) -> Self {
        self.factor = factor;
        self
    }
}

impl Process for Multiplier {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "multiplier"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<i32>("input"), PortSpec::output::<i32>("output")]
    }

    fn params(&self) -> ConfigBlock {
        ConfigBlock::new()
            .with_parameter("factor", 2, "Multiplier applied to every input")
            .with_current("factor", self.factor)
    }

    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError> {
        let factor: i32 = block.get("factor")?;
        if factor == 0 {
            return Err(ConfigError::invalid_value("factor", "must not be zero"));
        }
        self.factor = factor;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        Ok(())
    }

    fn step(&mut self) -> StepStatus {
        match self.input.take() {
            Some(value) => {
                self.output = Some(value * self.factor);
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
            "input" => take_input(&mut self.input, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "output" => read_output(self.output.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Emits several values per input on `output`.
///
/// For input `x` the values are `x`, `x + 10`, ... `x + 10 * pushes`. All
/// but the last go through the installed pusher; the last is the step's
/// own output.
#[derive(Debug, Clone)]
pub struct MultiPush {
    name: String,
    pushes: u32,
    input: Option<i32>,
    value: Option<i32>,
    pusher: Option<OutputPusher>,
}

impl MultiPush {
    /// Creates a process that pushes `pushes` extra values per input.
    #[must_use]
    pub fn new(name: impl Into<String>, pushes: u32) -> Self {
        Self {
            name: name.into(),
            pushes,
            input: None,
            value: None,
            pusher: None,
        }
    }
}

impl Process for MultiPush {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "multi_push"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<i32>("input"), PortSpec::output::<i32>("output")]
    }

    fn params(&self) -> ConfigBlock {
        ConfigBlock::new()
            .with_parameter("pushes", 2, "Extra values pushed per input")
            .with_current("pushes", self.pushes)
    }

    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError> {
        self.pushes = block.get("pushes")?;
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        Ok(())
    }

    fn step(&mut self) -> StepStatus {
        let Some(mut value) = self.input.take() else {
            return StepStatus::Skip;
        };
        for _ in 0..self.pushes {
            self.value = Some(value);
            if let Some(pusher) = &self.pusher {
                pusher.push(StepStatus::Success, &*self);
            }
            value += 10;
        }
        self.value = Some(value);
        StepStatus::Success
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.input = None;
        self.value = None;
        Ok(())
    }

    fn set_output_pusher(&mut self, pusher: Option<OutputPusher>) {
        self.pusher = pusher;
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        match port {
            "input" => take_input(&mut self.input, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "output" => read_output(self.value.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Pass-through that blocks inside every step until released.
///
/// Sends on `entered` once inside the step, then waits for a message on
/// `release`. A disconnected `release` lets every step through.
#[derive(Debug)]
pub struct GatedPass {
    name: String,
    entered: Sender<()>,
    release: Receiver<()>,
    input: Option<i32>,
    output: Option<i32>,
}

impl GatedPass {
    /// Creates a gated pass-through.
    #[must_use]
    pub fn new(name: impl Into<String>, entered: Sender<()>, release: Receiver<()>) -> Self {
        Self {
            name: name.into(),
            entered,
            release,
            input: None,
            output: None,
        }
    }
}

impl Process for GatedPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "gated_pass"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<i32>("input"), PortSpec::output::<i32>("output")]
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
        let Some(value) = self.input.take() else {
            return StepStatus::Skip;
        };
        let _ = self.entered.send(());
        let _ = self.release.recv();
        self.output = Some(value);
        StepStatus::Success
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.input = None;
        self.output = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        match port {
            "input" => take_input(&mut self.input, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "output" => read_output(self.output.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

/// Passes `input` through a fixed number of times, then fails or panics.
#[derive(Debug)]
pub struct FailAfter<T> {
    name: String,
    limit: usize,
    stepped: usize,
    panic: bool,
    input: Option<T>,
    output: Option<T>,
}

impl<T> FailAfter<T> {
    /// Fails on the step after `limit` successful ones.
    #[must_use]
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit,
            stepped: 0,
            panic: false,
            input: None,
            output: None,
        }
    }

    /// Panics instead of failing.
    #[must_use]
    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }
}

impl<T: Any + Send + Clone + std::fmt::Debug> Process for FailAfter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        "fail_after"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::input::<T>("input"), PortSpec::output::<T>("output")]
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
        let Some(value) = self.input.take() else {
            return StepStatus::Skip;
        };
        if self.stepped >= self.limit {
            if self.panic {
                panic!("'{}' gave up after {} values", self.name, self.limit);
            }
            return StepStatus::Failure;
        }
        self.stepped += 1;
        self.output = Some(value);
        StepStatus::Success
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        self.stepped = 0;
        self.input = None;
        self.output = None;
        Ok(())
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        match port {
            "input" => take_input(&mut self.input, port, data),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        match port {
            "output" => read_output(self.output.as_ref(), &self.name, port),
            _ => Err(PortError::unknown(&self.name, port)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_source_offset() {
        let mut src = NumberSource::new("src", vec![1, 2]);
        let mut block = src.params();
        block.set("offset", 10).unwrap();
        src.set_params(&block).unwrap();

        assert_eq!(src.step(), StepStatus::Success);
        assert_eq!(src.output("number").unwrap().downcast_ref::<i32>(), Some(&11));
        assert_eq!(src.step(), StepStatus::Success);
        assert_eq!(src.step(), StepStatus::Failure);
        src.reset().unwrap();
        assert_eq!(src.step(), StepStatus::Success);
    }

    #[test]
    fn test_multiplier_rejects_zero() {
        let mut mul = Multiplier::new("mul").with_factor(3);
        let mut block = mul.params();
        block.set("factor", 0).unwrap();
        assert!(mul.set_params(&block).is_err());
        assert_eq!(mul.params().get::<i32>("factor").unwrap(), 3);
    }

    #[test]
    fn test_collector_keeps_values_across_reset() {
        let mut sink = Collector::<i32>::new("sink");
        let values = sink.values();
        sink.set_input("input", Payload::new(4_i32)).unwrap();
        assert_eq!(sink.step(), StepStatus::Success);
        sink.reset().unwrap();
        assert_eq!(sink.step(), StepStatus::Skip);
        assert_eq!(*values.lock(), vec![4]);
    }

    #[test]
    fn test_fail_after_limit() {
        let mut gate = FailAfter::<i32>::new("gate", 1);
        gate.set_input("input", Payload::new(1_i32)).unwrap();
        assert_eq!(gate.step(), StepStatus::Success);
        gate.set_input("input", Payload::new(2_i32)).unwrap();
        assert_eq!(gate.step(), StepStatus::Failure);
    }
}
