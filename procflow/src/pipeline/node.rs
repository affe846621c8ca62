//! Graph nodes wrapping processes.
//!
//! A [`Node`] is shared by both schedulers. It owns the process behind a
//! mutex, remembers how it was added to the graph, and keeps timing
//! statistics. The scheduler-specific parts (slots, queues, worker threads)
//! live in [`SyncPipeline`](super::SyncPipeline) and
//! [`AsyncNode`](super::AsyncNode).

use crate::core::{ConfigBlock, Payload, StepStatus, BLOCK_SEPARATOR};
use crate::errors::{ConfigError, ProcflowError};
use crate::observability::SpanTimer;
use crate::process::{PortSpec, Process};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// A process behind a lock, shared between a node and its worker.
pub type SharedProcess = Arc<Mutex<Box<dyn Process>>>;

/// How a node takes part in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// A regular process.
    Process,
    /// Boundary node receiving data from an enclosing process.
    InputPad,
    /// Boundary node handing data to an enclosing process.
    OutputPad,
}

impl NodeRole {
    /// Returns true for either kind of pad.
    #[must_use]
    pub fn is_pad(&self) -> bool {
        !matches!(self, Self::Process)
    }
}

/// Step counters of one node.
#[derive(Debug, Default)]
pub struct NodeStats {
    steps: AtomicU64,
    busy_micros: AtomicU64,
}

impl NodeStats {
    /// Records one step of the given duration.
    pub fn record(&self, elapsed: Duration) {
        self.steps.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Number of times the process stepped.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Total time spent inside the process's step.
    #[must_use]
    pub fn busy_time(&self) -> Duration {
        Duration::from_micros(self.busy_micros.load(Ordering::Relaxed))
    }
}

/// A process placed in a pipeline.
#[derive(Debug)]
pub struct Node {
    name: String,
    class_name: String,
    role: NodeRole,
    executable: bool,
    output: bool,
    composite: bool,
    ports: Vec<PortSpec>,
    /// Output ports read by at least one outgoing edge.
    used_outputs: Vec<String>,
    process: SharedProcess,
    stats: NodeStats,
}

impl Node {
    pub(crate) fn new(process: Box<dyn Process>, role: NodeRole) -> Self {
        let composite = process.as_super_process().is_some();
        Self {
            name: process.name().to_string(),
            class_name: process.class_name().to_string(),
            ports: process.ports(),
            role,
            executable: true,
            output: false,
            composite,
            used_outputs: Vec::new(),
            process: Arc::new(Mutex::new(process)),
            stats: NodeStats::default(),
        }
    }

    pub(crate) fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    pub(crate) fn with_output(mut self, output: bool) -> Self {
        self.output = output;
        self
    }

    pub(crate) fn with_used_outputs(mut self, ports: Vec<String>) -> Self {
        self.used_outputs = ports;
        self
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the class name of the wrapped process.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the node role.
    #[must_use]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Returns false for nodes added without execute.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Returns true if the node counts towards the pipeline result.
    #[must_use]
    pub fn is_output(&self) -> bool {
        self.output
    }

    /// Returns true if the process wraps a whole pipeline.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.composite
    }

    /// Returns the ports declared by the process.
    #[must_use]
    pub fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    /// Returns the shared process handle.
    #[must_use]
    pub fn process(&self) -> &SharedProcess {
        &self.process
    }

    /// Returns the step statistics.
    #[must_use]
    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Writes `inputs`, steps the process and collects the used outputs.
    ///
    /// A panic inside the process is reported as failure. Outputs are only
    /// collected after a success; ports without a value are left out.
    pub(crate) fn step_with(
        &self,
        inputs: Vec<(String, Payload)>,
    ) -> (StepStatus, HashMap<String, Payload>) {
        let mut process = self.process.lock();

        for (port, payload) in inputs {
            if let Err(e) = process.set_input(&port, payload) {
                error!(node = %self.name, port = %port, error = %e, "Input rejected");
                return (StepStatus::Failure, HashMap::new());
            }
        }

        let timer = SpanTimer::start(&self.name);
        let status = match catch_unwind(AssertUnwindSafe(|| process.step())) {
            Ok(status) => status,
            Err(_) => {
                error!(node = %self.name, "Process panicked during step");
                StepStatus::Failure
            }
        };
        self.stats.record(timer.finish());
        trace!(node = %self.name, status = %status, "Stepped");

        let outputs = if status.is_success() {
            collect_outputs(&self.name, &**process, &self.used_outputs)
        } else {
            HashMap::new()
        };
        (status, outputs)
    }

    pub(crate) fn used_outputs(&self) -> &[String] {
        &self.used_outputs
    }
}

/// Reads `ports` from `process`; ports without a value are left out.
pub(crate) fn collect_outputs(
    name: &str,
    process: &dyn Process,
    ports: &[String],
) -> HashMap<String, Payload> {
    let mut outputs = HashMap::new();
    for port in ports {
        match process.output(port) {
            Ok(payload) => {
                outputs.insert(port.clone(), payload);
            }
            Err(e) => debug!(node = %name, port = %port, error = %e, "No output"),
        }
    }
    outputs
}

/// Merges every node's parameters under `node_name:`.
pub(crate) fn collect_params<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> ConfigBlock {
    let mut block = ConfigBlock::new();
    for node in nodes {
        block.add_subblock(&node.process.lock().params(), node.name());
    }
    block
}

/// Hands each node its sub-block.
///
/// Each node applies its part atomically. Nodes whose part is rejected keep
/// their previous configuration and are reported together.
pub(crate) fn apply_params<'a>(
    nodes: impl IntoIterator<Item = &'a Node> + Clone,
    block: &ConfigBlock,
) -> Result<(), ConfigError> {
    if let Some(stray) = block.keys().find(|key| {
        let owner = key.split(BLOCK_SEPARATOR).next().unwrap_or_default();
        !nodes.clone().into_iter().any(|node| node.name() == owner)
    }) {
        return Err(ConfigError::unknown_key(stray));
    }

    let mut failed = Vec::new();
    let mut reasons = Vec::new();
    for node in nodes {
        let part = block.subblock(node.name());
        if part.is_empty() {
            continue;
        }
        let mut process = node.process.lock();
        let mut merged = process.params();
        let result = merged
            .update(&part)
            .and_then(|()| process.set_params(&merged));
        if let Err(e) = result {
            warn!(node = %node.name, error = %e, "Configuration rejected");
            failed.push(node.name.clone());
            reasons.push(e.to_string());
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Rejected {
            nodes: failed,
            reasons,
        })
    }
}

/// Sets a single `node_name:key` parameter.
pub(crate) fn apply_param<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    key: &str,
    value: serde_json::Value,
) -> Result<(), ConfigError> {
    let (owner, rest) = key
        .split_once(BLOCK_SEPARATOR)
        .ok_or_else(|| ConfigError::unknown_key(key))?;
    let node = nodes
        .into_iter()
        .find(|node| node.name() == owner)
        .ok_or_else(|| ConfigError::unknown_key(key))?;
    node.process.lock().set_param(rest, value)
}

/// Initializes every process, stopping at the first failure.
pub(crate) fn initialize_all<'a>(
    pipeline: &str,
    nodes: impl IntoIterator<Item = &'a Node>,
) -> Result<(), ProcflowError> {
    for node in nodes {
        node.process.lock().initialize().map_err(|e| {
            error!(pipeline, node = %node.name, error = %e, "Initialization failed");
            e
        })?;
        debug!(pipeline, node = %node.name, "Initialized");
    }
    info!(pipeline, "Pipeline initialized");
    Ok(())
}

/// Calls `cancel` on every process.
pub(crate) fn cancel_all<'a>(nodes: impl IntoIterator<Item = &'a Node>) {
    for node in nodes {
        node.process.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Multiplier, NumberSource};

    #[test]
    fn test_step_with_collects_used_outputs() {
        let node = Node::new(Box::new(NumberSource::new("src", vec![4, 5])), NodeRole::Process)
            .with_used_outputs(vec!["number".to_string()]);

        let (status, outputs) = node.step_with(Vec::new());
        assert_eq!(status, StepStatus::Success);
        assert_eq!(outputs["number"].downcast_ref::<i32>(), Some(&4));
        assert_eq!(node.stats().steps(), 1);
    }

    #[test]
    fn test_step_with_rejected_input_fails() {
        let node = Node::new(Box::new(Multiplier::new("mul")), NodeRole::Process);
        let (status, outputs) = node.step_with(vec![("input".to_string(), Payload::new("x"))]);
        assert_eq!(status, StepStatus::Failure);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_params_are_namespaced() {
        let nodes = [
            Node::new(Box::new(NumberSource::new("src", vec![1])), NodeRole::Process),
            Node::new(Box::new(Multiplier::new("mul")), NodeRole::Process),
        ];
        let block = collect_params(&nodes);
        assert!(block.contains("src:offset"));
        assert!(block.contains("mul:factor"));
    }

    #[test]
    fn test_apply_params_reports_rejections() {
        let nodes = [Node::new(Box::new(Multiplier::new("mul")), NodeRole::Process)];
        let mut block = collect_params(&nodes);
        block.set("mul:factor", 0).unwrap();

        let err = apply_params(&nodes, &block).unwrap_err();
        assert!(matches!(err, ConfigError::Rejected { ref nodes, .. } if nodes == &["mul"]));
        assert_eq!(collect_params(&nodes).get::<i32>("mul:factor").unwrap(), 2);
    }

    #[test]
    fn test_apply_params_unknown_node() {
        let nodes = [Node::new(Box::new(Multiplier::new("mul")), NodeRole::Process)];
        let block = ConfigBlock::new().with_parameter("other:factor", 3, "");
        assert_eq!(
            apply_params(&nodes, &block),
            Err(ConfigError::unknown_key("other:factor"))
        );
    }

    #[test]
    fn test_apply_param_single_key() {
        let nodes = [Node::new(Box::new(Multiplier::new("mul")), NodeRole::Process)];
        apply_param(&nodes, "mul:factor", serde_json::json!(5)).unwrap();
        assert_eq!(collect_params(&nodes).get::<i32>("mul:factor").unwrap(), 5);
    }
}
