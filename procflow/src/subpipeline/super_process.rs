//! Processes implemented by a whole pipeline.

use crate::context::PipelineContext;
use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, PortError, ProcflowError};
use crate::pipeline::{AsyncPipeline, NodeRole, Pipeline};
use crate::process::{find_port, PortDirection, PortSpec, Process, PAD_PORT};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Hook consulted when the inner pipeline of a [`SuperProcess`] fails.
///
/// Returning true resets the inner pipeline and starts it again; the
/// failed cycle is reported as a skip.
#[cfg_attr(test, mockall::automock)]
pub trait FailureRecovery: Send {
    /// Tries to recover; true if the inner pipeline should be restarted.
    fn recover(&mut self) -> bool;
}

impl<F> FailureRecovery for F
where
    F: FnMut() -> bool + Send,
{
    fn recover(&mut self) -> bool {
        self()
    }
}

/// A process whose work is done by an inner pipeline.
///
/// Configuration, initialization, reset and cancel are delegated to the
/// inner pipeline. Its input pads become this process's input ports and its
/// output pads become output ports, under the pads' names.
pub struct SuperProcess {
    name: String,
    class_name: String,
    inner: Pipeline,
    ports: Vec<PortSpec>,
    inputs: HashMap<String, Payload>,
    outputs: HashMap<String, Payload>,
    recovery: Option<Box<dyn FailureRecovery>>,
    prefixed_keys: Vec<String>,
    /// Inner workers started by `step`.
    started: bool,
}

impl fmt::Debug for SuperProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperProcess")
            .field("name", &self.name)
            .field("inner", &self.inner.name())
            .field("is_async", &self.inner.is_async())
            .field("recovery", &self.recovery.is_some())
            .finish_non_exhaustive()
    }
}

impl SuperProcess {
    /// Wraps `inner` as a process named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, inner: impl Into<Pipeline>) -> Self {
        let inner = inner.into();
        let ports = pad_ports(&inner);
        Self {
            name: name.into(),
            class_name: "super_process".to_string(),
            inner,
            ports,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            recovery: None,
            prefixed_keys: Vec::new(),
            started: false,
        }
    }

    /// Sets the class name reported to the pipeline.
    #[must_use]
    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// Installs a recovery hook.
    #[must_use]
    pub fn with_recovery<R: FailureRecovery + 'static>(mut self, recovery: R) -> Self {
        self.recovery = Some(Box::new(recovery));
        self
    }

    /// Prefixes the file name under the inner key `key` with the context's
    /// output prefix during [`initialize`](Process::initialize).
    #[must_use]
    pub fn with_prefixed_key(mut self, key: impl Into<String>) -> Self {
        self.prefixed_keys.push(key.into());
        self
    }

    /// Returns the inner pipeline.
    #[must_use]
    pub fn inner(&self) -> &Pipeline {
        &self.inner
    }

    /// Mutable access to the inner pipeline.
    pub fn inner_mut(&mut self) -> &mut Pipeline {
        &mut self.inner
    }

    /// Handle to the inner pipeline when it is asynchronous.
    #[must_use]
    pub fn async_inner(&self) -> Option<AsyncPipeline> {
        self.inner.as_async().cloned()
    }

    /// Returns the inner pipeline's context.
    #[must_use]
    pub fn context(&self) -> PipelineContext {
        self.inner.context()
    }

    pub(crate) fn set_context(&mut self, context: PipelineContext) {
        self.inner.set_context(context);
    }

    /// Runs the recovery hook. Returns false without a hook.
    pub fn attempt_recovery(&mut self) -> bool {
        let Some(recovery) = self.recovery.as_mut() else {
            return false;
        };
        let recovered = recovery.recover();
        if recovered {
            info!(process = %self.name, "Inner pipeline recovered");
        } else {
            warn!(process = %self.name, "Recovery declined");
        }
        recovered
    }

    /// Forwards end of stream to inner workers started by `step`.
    ///
    /// Called when upstream fails and `step` will not run again. Each input
    /// pad gets a failure and the output pads are drained until the failure
    /// comes out, so every inner worker leaves its loop on its own. Without
    /// input pads the workers are stopped instead.
    pub fn end_stream(&mut self) {
        let Some(inner) = self.inner.as_async().cloned() else {
            return;
        };
        if !std::mem::take(&mut self.started) {
            return;
        }
        self.inputs.clear();
        self.outputs.clear();

        let pads = inner.input_pads();
        let token = inner.session_token().unwrap_or_default();
        let forwarded = !pads.is_empty()
            && pads.iter().all(|pad| {
                inner
                    .push_input_pad(pad, StepStatus::Failure, None, &token)
                    .map_err(|e| warn!(process = %self.name, pad, error = %e, "End of stream not delivered"))
                    .is_ok()
            });
        if !forwarded {
            inner.stop_workers("end of stream");
            return;
        }

        for pad in inner.output_pads() {
            loop {
                match inner.pop_output_pad(pad, &token) {
                    Ok(packet) if packet.status == StepStatus::Failure => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(process = %self.name, pad, error = %e, "Draining output pad failed");
                        break;
                    }
                }
            }
        }
        inner.wait();
        debug!(process = %self.name, "End of stream forwarded to inner pipeline");
    }

    /// Handles a failed inner pipeline; returns the status for this cycle.
    fn inner_failed(&mut self) -> StepStatus {
        if let Some(inner) = self.inner.as_async() {
            if self.started {
                inner.stop_workers("inner pipeline failed");
                inner.clear_queues();
            }
        }
        self.started = false;
        if !self.attempt_recovery() {
            return StepStatus::Failure;
        }
        match self.inner.reset() {
            Ok(()) => StepStatus::Skip,
            Err(e) => {
                error!(process = %self.name, error = %e, "Reset after recovery failed");
                StepStatus::Failure
            }
        }
    }

    fn step_sync(&mut self) -> StepStatus {
        let Some(inner) = self.inner.as_sync_mut() else {
            return StepStatus::Failure;
        };
        for (pad, payload) in self.inputs.drain() {
            if let Err(e) = inner.set_pad_input(&pad, payload) {
                error!(process = %self.name, pad = %pad, error = %e, "Pad rejected input");
                return StepStatus::Failure;
            }
        }

        let status = inner.execute();
        self.outputs.clear();
        for pad in inner.output_pads() {
            if let Ok(payload) = inner.pad_output(pad) {
                self.outputs.insert(pad.to_string(), payload);
            }
        }

        if status == StepStatus::Failure {
            self.inner_failed()
        } else {
            status
        }
    }

    /// One item in, one item out of a running inner pipeline.
    fn step_relay(&mut self, inner: &AsyncPipeline) -> StepStatus {
        if !self.started {
            if let Err(e) = inner.run_async() {
                error!(process = %self.name, error = %e, "Inner pipeline did not start");
                return StepStatus::Failure;
            }
            self.started = true;
        }
        let token = inner.session_token().unwrap_or_default();

        for pad in inner.input_pads() {
            let (status, payload) = match self.inputs.remove(pad) {
                Some(payload) => (StepStatus::Success, Some(payload)),
                None => (StepStatus::Skip, None),
            };
            if let Err(e) = inner.push_input_pad(pad, status, payload, &token) {
                warn!(process = %self.name, pad, error = %e, "Feeding the inner pipeline failed");
                return self.inner_failed();
            }
        }

        self.outputs.clear();
        let mut statuses = Vec::new();
        for pad in inner.output_pads() {
            match inner.pop_output_pad(pad, &token) {
                Ok(packet) => {
                    statuses.push(packet.status);
                    if let Some(payload) = packet.payload {
                        self.outputs.insert(pad.to_string(), payload);
                    }
                }
                Err(e) => {
                    warn!(process = %self.name, pad, error = %e, "Reading the inner pipeline failed");
                    statuses.push(StepStatus::Failure);
                }
            }
        }

        match summarize_outputs(&statuses) {
            StepStatus::Failure => self.inner_failed(),
            status => status,
        }
    }
}

impl Process for SuperProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn ports(&self) -> Vec<PortSpec> {
        self.ports.clone()
    }

    fn params(&self) -> ConfigBlock {
        self.inner.params()
    }

    fn set_params(&mut self, block: &ConfigBlock) -> Result<(), ConfigError> {
        self.inner.set_params(block)
    }

    fn initialize(&mut self) -> Result<(), ProcflowError> {
        if !self.prefixed_keys.is_empty() {
            let context = self.inner.context();
            let mut block = self.inner.params();
            let mut changed = false;
            for key in &self.prefixed_keys {
                changed |= context.prefix_path(&mut block, key)?;
            }
            if changed {
                self.inner.set_params(&block)?;
            }
        }
        self.inner.initialize()
    }

    fn step(&mut self) -> StepStatus {
        match self.async_inner() {
            Some(inner) => self.step_relay(&inner),
            None => self.step_sync(),
        }
    }

    fn reset(&mut self) -> Result<(), ProcflowError> {
        if let Some(inner) = self.inner.as_async() {
            if self.started {
                inner.stop_workers("reset");
                inner.clear_queues();
            }
        }
        self.started = false;
        self.inputs.clear();
        self.outputs.clear();
        debug!(process = %self.name, "Resetting inner pipeline");
        self.inner.reset()
    }

    fn cancel(&mut self) {
        self.inner.cancel();
        self.started = false;
    }

    fn set_input(&mut self, port: &str, data: Payload) -> Result<(), PortError> {
        let spec = find_port(&self.ports, port, PortDirection::Input)
            .ok_or_else(|| PortError::unknown(&self.name, port))?;
        if !spec.accepts(&data) {
            return Err(PortError::TypeMismatch {
                port: port.to_string(),
                expected: spec.type_name.to_string(),
                found: data.type_name().to_string(),
            });
        }
        self.inputs.insert(port.to_string(), data);
        Ok(())
    }

    fn output(&self, port: &str) -> Result<Payload, PortError> {
        if find_port(&self.ports, port, PortDirection::Output).is_none() {
            return Err(PortError::unknown(&self.name, port));
        }
        self.outputs
            .get(port)
            .cloned()
            .ok_or_else(|| PortError::no_value(&self.name, port))
    }

    fn as_super_process(&self) -> Option<&SuperProcess> {
        Some(self)
    }

    fn as_super_process_mut(&mut self) -> Option<&mut SuperProcess> {
        Some(self)
    }
}

/// Ports seen from outside: one per pad, named after the pad.
fn pad_ports(inner: &Pipeline) -> Vec<PortSpec> {
    inner
        .nodes()
        .into_iter()
        .filter_map(|node| {
            let direction = match node.role() {
                NodeRole::InputPad => PortDirection::Input,
                NodeRole::OutputPad => PortDirection::Output,
                NodeRole::Process => return None,
            };
            find_port(node.ports(), PAD_PORT, PortDirection::Input)
                .map(|port| port.renamed(node.name(), direction))
        })
        .collect()
}

/// Status of one round of output pads.
///
/// Failure once every pad has failed, skip if any pad did not succeed.
pub(crate) fn summarize_outputs(statuses: &[StepStatus]) -> StepStatus {
    if statuses.is_empty() {
        StepStatus::Skip
    } else if statuses.iter().all(|status| *status == StepStatus::Failure) {
        StepStatus::Failure
    } else if statuses.iter().all(StepStatus::is_success) {
        StepStatus::Success
    } else {
        StepStatus::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{Multiplier, PassThrough};

    fn doubler() -> PipelineBuilder {
        PipelineBuilder::new("doubler")
            .add_input_pad::<i32>("in")
            .unwrap()
            .add(Multiplier::new("mul"))
            .unwrap()
            .add_output_pad::<i32>("out")
            .unwrap()
            .connect("in", "value", "mul", "input")
            .unwrap()
            .connect("mul", "output", "out", "value")
            .unwrap()
    }

    fn feed(process: &mut SuperProcess, value: i32) -> StepStatus {
        process.set_input("in", Payload::new(value)).unwrap();
        process.step()
    }

    fn read(process: &SuperProcess) -> i32 {
        process.output("out").unwrap().downcast::<i32>("out").unwrap()
    }

    #[test]
    fn test_ports_follow_pads() {
        let process = SuperProcess::new("double", doubler().build_sync().unwrap());
        let ports = process.ports();
        assert_eq!(ports.len(), 2);
        let input = find_port(&ports, "in", PortDirection::Input).unwrap();
        assert!(input.accepts(&Payload::new(1_i32)));
        assert!(find_port(&ports, "out", PortDirection::Output).is_some());
    }

    #[test]
    fn test_sync_inner_step() {
        let mut process = SuperProcess::new("double", doubler().build_sync().unwrap());
        process.initialize().unwrap();

        assert_eq!(feed(&mut process, 4), StepStatus::Success);
        assert_eq!(read(&process), 8);
        assert_eq!(process.step(), StepStatus::Skip);
        assert!(process.output("out").is_err());
    }

    #[test]
    fn test_params_are_delegated() {
        let mut process = SuperProcess::new("double", doubler().build_sync().unwrap());
        let mut block = process.params();
        assert!(block.contains("mul:factor"));

        block.set("mul:factor", 5).unwrap();
        process.set_params(&block).unwrap();
        assert_eq!(feed(&mut process, 2), StepStatus::Success);
        assert_eq!(read(&process), 10);
    }

    #[test]
    fn test_set_input_checks_ports() {
        let mut process = SuperProcess::new("double", doubler().build_sync().unwrap());
        assert!(matches!(
            process.set_input("missing", Payload::new(1_i32)),
            Err(PortError::UnknownPort { .. })
        ));
        assert!(matches!(
            process.set_input("in", Payload::new("text")),
            Err(PortError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_async_inner_stepped_synchronously() {
        let mut process = SuperProcess::new("double", doubler().build_async().unwrap());
        process.initialize().unwrap();

        for value in 1..=5 {
            assert_eq!(feed(&mut process, value), StepStatus::Success);
            assert_eq!(read(&process), value * 2);
        }
        assert_eq!(process.step(), StepStatus::Skip);
        process.reset().unwrap();
        assert_eq!(feed(&mut process, 7), StepStatus::Success);
        assert_eq!(read(&process), 14);
        process.cancel();
    }

    #[test]
    fn test_recovery_hook_consulted_on_failure() {
        let inner = PipelineBuilder::new("fails")
            .add_input_pad::<i32>("in")
            .unwrap()
            .add(crate::testing::FailAfter::<i32>::new("gate", 1))
            .unwrap()
            .add_output_pad::<i32>("out")
            .unwrap()
            .connect("in", "value", "gate", "input")
            .unwrap()
            .connect("gate", "output", "out", "value")
            .unwrap()
            .build_sync()
            .unwrap();

        let mut recovery = MockFailureRecovery::new();
        recovery.expect_recover().times(1).return_const(true);
        let mut process = SuperProcess::new("guarded", inner).with_recovery(recovery);

        assert_eq!(feed(&mut process, 1), StepStatus::Success);
        assert_eq!(feed(&mut process, 2), StepStatus::Skip);
        assert_eq!(feed(&mut process, 3), StepStatus::Success);
        assert_eq!(read(&process), 3);
    }

    #[test]
    fn test_failure_without_recovery() {
        let inner = PipelineBuilder::new("fails")
            .add_input_pad::<i32>("in")
            .unwrap()
            .add(crate::testing::FailAfter::<i32>::new("gate", 0))
            .unwrap()
            .add_output_pad::<i32>("out")
            .unwrap()
            .connect("in", "value", "gate", "input")
            .unwrap()
            .connect("gate", "output", "out", "value")
            .unwrap()
            .build_sync()
            .unwrap();
        let mut process = SuperProcess::new("plain", inner);
        assert_eq!(feed(&mut process, 1), StepStatus::Failure);
        assert!(!process.attempt_recovery());
    }

    #[test]
    fn test_closure_recovery() {
        let mut calls = 0;
        let mut process = SuperProcess::new(
            "closure",
            PipelineBuilder::new("inner")
                .add(PassThrough::<i32>::new("pass"))
                .unwrap()
                .build_sync()
                .unwrap(),
        )
        .with_recovery(move || {
            calls += 1;
            calls < 2
        });
        assert!(process.attempt_recovery());
        assert!(!process.attempt_recovery());
    }

    #[test]
    fn test_prefixed_key_applied_on_initialize() {
        use crate::context::RunIdentity;
        use crate::process::{Legacy, LegacyProcess};

        #[derive(Debug, Default)]
        struct Writer {
            filename: String,
        }

        impl LegacyProcess for Writer {
            fn name(&self) -> &str {
                "writer"
            }
            fn ports(&self) -> Vec<PortSpec> {
                Vec::new()
            }
            fn params(&self) -> ConfigBlock {
                ConfigBlock::new()
                    .with_parameter("filename", "", "Output file")
                    .with_current("filename", self.filename.as_str())
            }
            fn set_params(&mut self, block: &ConfigBlock) -> bool {
                block.get("filename").map(|f| self.filename = f).is_ok()
            }
            fn initialize(&mut self) -> bool {
                true
            }
            fn step(&mut self) -> bool {
                true
            }
            fn set_input(&mut self, port: &str, _data: Payload) -> Result<(), PortError> {
                Err(PortError::unknown("writer", port))
            }
            fn output(&self, port: &str) -> Result<Payload, PortError> {
                Err(PortError::unknown("writer", port))
            }
        }

        let inner = PipelineBuilder::new("inner")
            .add(Legacy::new(Writer::default()))
            .unwrap()
            .build_sync()
            .unwrap();
        let process = SuperProcess::new("output", inner).with_prefixed_key("writer:filename");
        let mut outer = PipelineBuilder::new("outer")
            .with_context(PipelineContext::new(RunIdentity::new()).with_output_prefix("clip"))
            .add(process)
            .unwrap()
            .build_sync()
            .unwrap();
        outer
            .set_param("output:writer:filename", serde_json::json!("tracks.kw18"))
            .unwrap();
        outer.initialize().unwrap();

        assert_eq!(
            outer.params().get::<String>("output:writer:filename").unwrap(),
            "clip_tracks.kw18"
        );
        let _ = outer.execute();
    }
}
