//! Single-threaded scheduler.
//!
//! Each call to [`SyncPipeline::execute`] visits every node once in a fixed
//! topological order. An edge is a single slot holding the producer's most
//! recent status and value; it is overwritten on every tick, so nothing is
//! ever queued.

use super::builder::GraphParts;
use super::graph::{EdgeInfo, GraphView, Link, NodeInfo};
use super::node::{self, Node, NodeRole};
use crate::context::PipelineContext;
use crate::core::{combine_statuses, ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, LifecycleError, PortError, ProcflowError};
use crate::process::PAD_PORT;
use std::collections::HashMap;
use tracing::{debug, info, trace};

#[derive(Debug)]
struct Slot {
    status: StepStatus,
    payload: Option<Payload>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            status: StepStatus::Skip,
            payload: None,
        }
    }
}

/// A pipeline stepped from the caller's thread.
#[derive(Debug)]
pub struct SyncPipeline {
    name: String,
    context: PipelineContext,
    nodes: Vec<Node>,
    links: Vec<Link>,
    slots: Vec<Slot>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    order: Vec<usize>,
    index: HashMap<String, usize>,
    statuses: Vec<Option<StepStatus>>,
    ticks: u64,
}

impl SyncPipeline {
    pub(crate) fn from_parts(parts: GraphParts) -> Self {
        let count = parts.nodes.len();
        let mut incoming = vec![Vec::new(); count];
        let mut outgoing = vec![Vec::new(); count];
        for (idx, link) in parts.links.iter().enumerate() {
            outgoing[link.from].push(idx);
            incoming[link.to].push(idx);
        }
        debug!(
            pipeline = %parts.name,
            nodes = count,
            edges = parts.links.len(),
            "Built synchronous pipeline"
        );
        Self {
            name: parts.name,
            context: parts.context,
            slots: parts.links.iter().map(|_| Slot::default()).collect(),
            nodes: parts.nodes,
            links: parts.links,
            incoming,
            outgoing,
            order: parts.order,
            index: parts.index,
            statuses: vec![None; count],
            ticks: 0,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the execution context.
    #[must_use]
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub(crate) fn set_context(&mut self, context: PipelineContext) {
        for node in &self.nodes {
            if let Some(inner) = node.process().lock().as_super_process_mut() {
                inner.set_context(context.child(node.name()));
            }
        }
        self.context = context;
    }

    /// Returns the nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks a node up by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Returns node names in the order `execute` visits them.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&idx| self.nodes[idx].name()).collect()
    }

    /// Returns the status a node reported on the last tick it was visited.
    #[must_use]
    pub fn last_status(&self, name: &str) -> Option<StepStatus> {
        self.index.get(name).and_then(|&idx| self.statuses[idx])
    }

    /// Number of ticks since construction or the last reset.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Returns the merged parameters of all nodes.
    #[must_use]
    pub fn params(&self) -> ConfigBlock {
        node::collect_params(&self.nodes)
    }

    /// Applies a merged configuration.
    pub fn set_params(&self, block: &ConfigBlock) -> Result<(), ConfigError> {
        node::apply_params(&self.nodes, block)
    }

    /// Sets a single `node:key` parameter.
    pub fn set_param(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        node::apply_param(&self.nodes, key, value)
    }

    /// Initializes every process.
    pub fn initialize(&self) -> Result<(), ProcflowError> {
        node::initialize_all(&self.name, &self.nodes)
    }

    /// Runs one tick.
    ///
    /// Returns success if any output node succeeded, failure once every
    /// output node has failed, and skip otherwise.
    pub fn execute(&mut self) -> StepStatus {
        self.ticks += 1;
        for pos in 0..self.order.len() {
            let idx = self.order[pos];
            self.visit(idx);
        }

        let mut outputs = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_executable() && node.is_output())
            .map(|(idx, _)| idx)
            .peekable();
        let status = if outputs.peek().is_some() {
            summarize(outputs.map(|idx| self.statuses[idx]))
        } else {
            summarize(
                (0..self.nodes.len())
                    .filter(|&idx| self.nodes[idx].is_executable())
                    .map(|idx| self.statuses[idx]),
            )
        };
        trace!(pipeline = %self.name, tick = self.ticks, status = %status, "Tick finished");
        status
    }

    fn visit(&mut self, idx: usize) {
        let node = &self.nodes[idx];
        if !node.is_executable() {
            return;
        }

        let status = if self.statuses[idx] == Some(StepStatus::Failure) {
            StepStatus::Failure
        } else {
            let mut required = Vec::with_capacity(self.incoming[idx].len());
            let mut inputs = Vec::new();
            for &link_idx in &self.incoming[idx] {
                let link = &self.links[link_idx];
                let slot = &mut self.slots[link_idx];
                if !link.optional {
                    required.push(slot.status);
                }
                if slot.status.is_success() {
                    if let (Some(port), Some(payload)) = (&link.to_port, slot.payload.take()) {
                        inputs.push((port.clone(), payload));
                    }
                }
            }

            match combine_statuses(required) {
                StepStatus::Success => {
                    let (status, outputs) = node.step_with(inputs);
                    for &link_idx in &self.outgoing[idx] {
                        let link = &self.links[link_idx];
                        self.slots[link_idx] = match (&link.from_port, status) {
                            (Some(port), StepStatus::Success) => match outputs.get(port) {
                                Some(payload) => Slot {
                                    status,
                                    payload: Some(payload.clone()),
                                },
                                None => Slot::default(),
                            },
                            _ => Slot {
                                status,
                                payload: None,
                            },
                        };
                    }
                    self.statuses[idx] = Some(status);
                    return;
                }
                combined => combined,
            }
        };

        if self.statuses[idx] != Some(status) {
            debug!(pipeline = %self.name, node = %node.name(), status = %status, "Status changed");
            if status == StepStatus::Failure {
                if let Some(composite) = node.process().lock().as_super_process_mut() {
                    composite.end_stream();
                }
            }
        }
        self.statuses[idx] = Some(status);
        for &link_idx in &self.outgoing[idx] {
            self.slots[link_idx] = Slot {
                status,
                payload: None,
            };
        }
    }

    /// Calls [`execute`](Self::execute) until it reports failure.
    ///
    /// Returns the number of ticks run. Never returns if the output nodes
    /// never fail.
    pub fn run(&mut self) -> u64 {
        let start = self.ticks;
        while self.execute() != StepStatus::Failure {}
        let ticks = self.ticks - start;
        info!(pipeline = %self.name, ticks, "Pipeline finished");
        ticks
    }

    /// Resets every process and clears all slots.
    pub fn reset(&mut self) -> Result<(), ProcflowError> {
        for node in &self.nodes {
            node.process().lock().reset()?;
        }
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
        self.statuses.fill(None);
        self.ticks = 0;
        debug!(pipeline = %self.name, "Pipeline reset");
        Ok(())
    }

    /// Calls `cancel` on every process.
    pub fn cancel(&self) {
        node::cancel_all(&self.nodes);
    }

    /// Names of the input pads.
    #[must_use]
    pub fn input_pads(&self) -> Vec<&str> {
        self.pads(NodeRole::InputPad)
    }

    /// Names of the output pads.
    #[must_use]
    pub fn output_pads(&self) -> Vec<&str> {
        self.pads(NodeRole::OutputPad)
    }

    fn pads(&self, role: NodeRole) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.role() == role)
            .map(Node::name)
            .collect()
    }

    fn pad(&self, name: &str, role: NodeRole) -> Result<usize, ProcflowError> {
        match self.index.get(name) {
            Some(&idx) if self.nodes[idx].role() == role => Ok(idx),
            Some(_) => Err(PortError::unknown(&self.name, name).into()),
            None => Err(LifecycleError::UnknownNode {
                node: name.to_string(),
            }
            .into()),
        }
    }

    /// Writes the value an input pad publishes on the next tick.
    pub fn set_pad_input(&self, pad: &str, payload: Payload) -> Result<(), ProcflowError> {
        let idx = self.pad(pad, NodeRole::InputPad)?;
        self.nodes[idx].process().lock().set_input(PAD_PORT, payload)?;
        Ok(())
    }

    /// Reads what an output pad received on the last tick.
    pub fn pad_output(&self, pad: &str) -> Result<Payload, ProcflowError> {
        let idx = self.pad(pad, NodeRole::OutputPad)?;
        if self.statuses[idx] != Some(StepStatus::Success) {
            return Err(PortError::no_value(pad, PAD_PORT).into());
        }
        let payload = self.nodes[idx].process().lock().output(PAD_PORT)?;
        Ok(payload)
    }

    /// Status of an output pad on the last tick.
    #[must_use]
    pub fn pad_status(&self, pad: &str) -> Option<StepStatus> {
        self.last_status(pad)
    }

    /// Returns a read-only description of the graph.
    #[must_use]
    pub fn graph(&self) -> GraphView {
        GraphView {
            name: self.name.clone(),
            is_async: false,
            nodes: self.nodes.iter().map(NodeInfo::from).collect(),
            edges: self
                .links
                .iter()
                .map(|link| EdgeInfo {
                    from: self.nodes[link.from].name().to_string(),
                    from_port: link.from_port.clone(),
                    to: self.nodes[link.to].name().to_string(),
                    to_port: link.to_port.clone(),
                    optional: link.optional,
                    capacity: None,
                    type_name: link.type_name.map(str::to_string),
                })
                .collect(),
            execution_order: self
                .execution_order()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Any success wins; all failures fail; anything else skips.
pub(crate) fn summarize(statuses: impl Iterator<Item = Option<StepStatus>>) -> StepStatus {
    let mut all_failed = true;
    let mut any = false;
    for status in statuses {
        any = true;
        match status {
            Some(StepStatus::Success) => return StepStatus::Success,
            Some(StepStatus::Failure) => {}
            _ => all_failed = false,
        }
    }
    if any && all_failed {
        StepStatus::Failure
    } else {
        StepStatus::Skip
    }
}
