//! Thread-per-node scheduler.
//!
//! Every executable node gets a worker thread; workers only talk through
//! their [`AsyncEdge`]s. A failure travelling down the graph ends each
//! worker in turn. Output nodes are critical: [`AsyncPipeline::wait`] joins
//! them first, then interrupts whatever is still parked on a queue.

use super::async_node::AsyncNode;
use super::builder::GraphParts;
use super::edge::{AsyncEdge, Packet};
use super::graph::{EdgeInfo, GraphView, NodeInfo};
use super::node::{self, Node, NodeRole};
use crate::cancellation::InterruptToken;
use crate::context::PipelineContext;
use crate::core::{ConfigBlock, Payload, StepStatus};
use crate::errors::{ConfigError, LifecycleError, PortError, ProcflowError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

struct Session {
    token: InterruptToken,
    critical: Vec<JoinHandle<()>>,
    others: Vec<JoinHandle<()>>,
}

struct Shared {
    name: String,
    context: RwLock<PipelineContext>,
    nodes: Vec<Arc<AsyncNode>>,
    edges: Vec<Arc<AsyncEdge>>,
    order: Vec<usize>,
    index: HashMap<String, usize>,
    session: Mutex<Option<Session>>,
    active: Arc<AtomicUsize>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.token.cancel("pipeline dropped");
            for handle in session.critical.into_iter().chain(session.others) {
                let _ = handle.join();
            }
        }
    }
}

/// A pipeline running one worker thread per node.
///
/// Cloning is cheap and yields a handle to the same pipeline.
#[derive(Clone)]
pub struct AsyncPipeline {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AsyncPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPipeline")
            .field("name", &self.shared.name)
            .field("nodes", &self.shared.nodes.len())
            .field("edges", &self.shared.edges.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl AsyncPipeline {
    pub(crate) fn from_parts(parts: GraphParts) -> Self {
        let GraphParts {
            name,
            context,
            nodes,
            links,
            order,
            index,
            edge_capacity,
        } = parts;

        let edges: Vec<Arc<AsyncEdge>> = links
            .iter()
            .map(|link| {
                let mut edge = AsyncEdge::new(
                    nodes[link.from].name(),
                    nodes[link.to].name(),
                    link.capacity.unwrap_or(edge_capacity),
                )
                .with_optional(link.optional);
                if let (Some(from_port), Some(to_port)) = (&link.from_port, &link.to_port) {
                    edge = edge.with_ports(
                        from_port.as_str(),
                        to_port.as_str(),
                        link.type_name.unwrap_or("?"),
                    );
                }
                Arc::new(edge)
            })
            .collect();

        // Output pads are never spawned, so whoever feeds them is critical.
        let feeds_output_pad: Vec<bool> = (0..nodes.len())
            .map(|idx| {
                links
                    .iter()
                    .any(|link| link.from == idx && nodes[link.to].role() == NodeRole::OutputPad)
            })
            .collect();

        let nodes: Vec<Arc<AsyncNode>> = nodes
            .into_iter()
            .enumerate()
            .map(|(idx, node)| {
                let incoming = links
                    .iter()
                    .enumerate()
                    .filter(|(_, link)| link.to == idx)
                    .map(|(edge_idx, _)| Arc::clone(&edges[edge_idx]))
                    .collect();
                let outgoing = links
                    .iter()
                    .enumerate()
                    .filter(|(_, link)| link.from == idx)
                    .map(|(edge_idx, _)| Arc::clone(&edges[edge_idx]))
                    .collect();
                let critical = node.is_executable()
                    && ((node.role() == NodeRole::Process && node.is_output())
                        || feeds_output_pad[idx]);
                Arc::new(AsyncNode::new(node, incoming, outgoing, critical))
            })
            .collect();

        debug!(pipeline = %name, nodes = nodes.len(), edges = edges.len(), "Built asynchronous pipeline");
        Self {
            shared: Arc::new(Shared {
                name,
                context: RwLock::new(context),
                nodes,
                edges,
                order,
                index,
                session: Mutex::new(None),
                active: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Returns a copy of the execution context.
    #[must_use]
    pub fn context(&self) -> PipelineContext {
        self.shared.context.read().clone()
    }

    pub(crate) fn set_context(&self, context: PipelineContext) {
        for node in self.node_iter() {
            if let Some(inner) = node.process().lock().as_super_process_mut() {
                inner.set_context(context.child(node.name()));
            }
        }
        *self.shared.context.write() = context;
    }

    fn node_iter(&self) -> impl Iterator<Item = &Node> + Clone {
        self.shared.nodes.iter().map(|node| node.node())
    }

    /// Returns the nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[Arc<AsyncNode>] {
        &self.shared.nodes
    }

    /// Looks a node up by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Arc<AsyncNode>> {
        self.shared.index.get(name).map(|&idx| &self.shared.nodes[idx])
    }

    /// Returns every edge in connection order.
    #[must_use]
    pub fn edges(&self) -> &[Arc<AsyncEdge>] {
        &self.shared.edges
    }

    /// Returns node names in topological order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.shared
            .order
            .iter()
            .map(|&idx| self.shared.nodes[idx].name())
            .collect()
    }

    /// Returns the merged parameters of all nodes.
    #[must_use]
    pub fn params(&self) -> ConfigBlock {
        node::collect_params(self.node_iter())
    }

    /// Applies a merged configuration.
    pub fn set_params(&self, block: &ConfigBlock) -> Result<(), ConfigError> {
        node::apply_params(self.node_iter(), block)
    }

    /// Sets a single `node:key` parameter.
    pub fn set_param(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        node::apply_param(self.node_iter(), key, value)
    }

    /// Initializes every process.
    pub fn initialize(&self) -> Result<(), ProcflowError> {
        node::initialize_all(&self.shared.name, self.node_iter())
    }

    /// Returns true while any worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst) > 0
    }

    /// Starts the workers and returns immediately.
    pub fn run_async(&self) -> Result<(), LifecycleError> {
        let mut session = self.shared.session.lock();
        if session.is_some() || self.is_running() {
            warn!(pipeline = %self.shared.name, "Refusing to start a running pipeline");
            return Err(LifecycleError::PipelineRunning {
                pipeline: self.shared.name.clone(),
            });
        }

        let token = InterruptToken::new();
        let mut critical = Vec::new();
        let mut others = Vec::new();
        for &idx in &self.shared.order {
            let node = &self.shared.nodes[idx];
            if !node.node().is_executable() || node.node().role().is_pad() {
                continue;
            }
            match node.spawn(token.clone(), &self.shared.active) {
                Ok(handle) if node.is_critical() => critical.push(handle),
                Ok(handle) => others.push(handle),
                Err(e) => {
                    error!(pipeline = %self.shared.name, error = %e, "Failed to start worker");
                    token.cancel("startup failed");
                    for handle in critical.into_iter().chain(others) {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(
            pipeline = %self.shared.name,
            workers = critical.len() + others.len(),
            "Pipeline started"
        );
        *session = Some(Session {
            token,
            critical,
            others,
        });
        Ok(())
    }

    /// Blocks until the pipeline has finished.
    ///
    /// Joins the output nodes' workers, then interrupts and joins the rest.
    /// Without output nodes, waits for every worker.
    pub fn wait(&self) {
        let (token, critical, others) = {
            let mut guard = self.shared.session.lock();
            match guard.as_mut() {
                Some(session) => (
                    session.token.clone(),
                    std::mem::take(&mut session.critical),
                    std::mem::take(&mut session.others),
                ),
                None => return,
            }
        };

        let has_critical = !critical.is_empty();
        for handle in critical {
            join_worker(&self.shared.name, handle);
        }
        if has_critical {
            token.cancel("output nodes finished");
        }
        for handle in others {
            join_worker(&self.shared.name, handle);
        }

        *self.shared.session.lock() = None;
        info!(pipeline = %self.shared.name, "Pipeline finished");
    }

    /// Starts the workers and waits for them.
    pub fn run(&self) -> Result<(), LifecycleError> {
        self.run_async()?;
        self.wait();
        Ok(())
    }

    /// Interrupts and joins every worker. Steps in progress complete first.
    pub(crate) fn stop_workers(&self, reason: &str) {
        if let Some(token) = self.session_token() {
            token.cancel(reason);
        }
        self.wait();
    }

    /// Stops the workers and calls `cancel` on every process.
    pub fn cancel(&self) {
        self.stop_workers("cancelled");
        node::cancel_all(self.node_iter());
        info!(pipeline = %self.shared.name, "Pipeline cancelled");
    }

    /// Interrupt token of the current run, if any.
    #[must_use]
    pub fn session_token(&self) -> Option<InterruptToken> {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|session| session.token.clone())
    }

    /// Resets every node.
    ///
    /// Refused while workers are alive or while any queue holds packets; in
    /// that case nothing is reset.
    pub fn reset(&self) -> Result<(), ProcflowError> {
        if self.is_running() {
            error!(pipeline = %self.shared.name, "Reset refused: pipeline is running");
            return Err(LifecycleError::PipelineRunning {
                pipeline: self.shared.name.clone(),
            }
            .into());
        }
        if let Some(node) = self.shared.nodes.iter().find(|node| node.queued() > 0) {
            error!(pipeline = %self.shared.name, node = %node.name(), "Reset refused: queues not empty");
            return Err(LifecycleError::QueuesNotEmpty {
                node: node.name().to_string(),
                queued: node.queued(),
            }
            .into());
        }
        for node in &self.shared.nodes {
            node.reset()?;
        }
        debug!(pipeline = %self.shared.name, "Pipeline reset");
        Ok(())
    }

    /// Discards every queued packet. Returns how many were dropped.
    pub fn clear_queues(&self) -> usize {
        let dropped = self.shared.edges.iter().map(|edge| edge.drain()).sum();
        debug!(pipeline = %self.shared.name, dropped, "Queues cleared");
        dropped
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
        self.shared
            .nodes
            .iter()
            .filter(|node| node.node().role() == role)
            .map(|node| node.name())
            .collect()
    }

    fn pad(&self, name: &str, role: NodeRole) -> Result<&Arc<AsyncNode>, ProcflowError> {
        match self.node(name) {
            Some(node) if node.node().role() == role => Ok(node),
            Some(_) => Err(PortError::unknown(&self.shared.name, name).into()),
            None => Err(LifecycleError::UnknownNode {
                node: name.to_string(),
            }
            .into()),
        }
    }

    /// Pushes one packet into every edge leaving an input pad.
    pub fn push_input_pad(
        &self,
        pad: &str,
        status: StepStatus,
        payload: Option<Payload>,
        token: &InterruptToken,
    ) -> Result<(), ProcflowError> {
        let node = self.pad(pad, NodeRole::InputPad)?;
        node.record(status);
        for edge in node.outgoing() {
            edge.push(status, payload.clone(), token)?;
        }
        Ok(())
    }

    /// Pops one packet from the edge entering an output pad.
    ///
    /// A pad with nothing connected reports failure.
    pub fn pop_output_pad(&self, pad: &str, token: &InterruptToken) -> Result<Packet, ProcflowError> {
        let node = self.pad(pad, NodeRole::OutputPad)?;
        let packet = match node.incoming().first() {
            Some(edge) => edge.pop(token)?,
            None => Packet::failure(),
        };
        node.record(packet.status);
        Ok(packet)
    }

    /// Returns a read-only description of the graph.
    #[must_use]
    pub fn graph(&self) -> GraphView {
        GraphView {
            name: self.shared.name.clone(),
            is_async: true,
            nodes: self.node_iter().map(NodeInfo::from).collect(),
            edges: self
                .shared
                .edges
                .iter()
                .map(|edge| EdgeInfo {
                    from: edge.producer().to_string(),
                    from_port: edge.from_port().map(str::to_string),
                    to: edge.consumer().to_string(),
                    to_port: edge.to_port().map(str::to_string),
                    optional: edge.is_optional(),
                    capacity: Some(edge.capacity()),
                    type_name: edge.type_name().map(str::to_string),
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

fn join_worker(pipeline: &str, handle: JoinHandle<()>) {
    let worker = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        error!(pipeline, worker = %worker, "Worker thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{Collector, NumberSource, PassThrough};
    use pretty_assertions::assert_eq;

    fn linear(values: Vec<i32>) -> (AsyncPipeline, Arc<Mutex<Vec<i32>>>) {
        let sink = Collector::<i32>::new("sink");
        let seen = sink.values();
        let pipeline = PipelineBuilder::new("linear")
            .add(NumberSource::new("src", values))
            .unwrap()
            .add(PassThrough::<i32>::new("pass"))
            .unwrap()
            .add(sink)
            .unwrap()
            .connect("src", "number", "pass", "input")
            .unwrap()
            .connect("pass", "output", "sink", "input")
            .unwrap()
            .build_async()
            .unwrap();
        (pipeline, seen)
    }

    #[test]
    fn test_async_linear_run() {
        let (pipeline, seen) = linear((1..=50).collect());
        pipeline.initialize().unwrap();
        pipeline.run().unwrap();

        assert_eq!(*seen.lock(), (1..=50).collect::<Vec<_>>());
        assert!(!pipeline.is_running());
        for name in ["src", "pass", "sink"] {
            assert_eq!(
                pipeline.node(name).unwrap().last_status(),
                Some(StepStatus::Failure)
            );
        }
    }

    #[test]
    fn test_run_twice_after_reset() {
        let (pipeline, seen) = linear(vec![1, 2]);
        pipeline.run().unwrap();
        pipeline.reset().unwrap();
        pipeline.run().unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_start_twice_is_refused() {
        let (pipeline, _) = linear(vec![1]);
        pipeline.run_async().unwrap();
        assert!(matches!(
            pipeline.run_async(),
            Err(LifecycleError::PipelineRunning { .. })
        ));
        pipeline.wait();
    }

    #[test]
    fn test_critical_nodes() {
        let (pipeline, _) = linear(vec![1]);
        assert!(pipeline.node("sink").unwrap().is_critical());
        assert!(!pipeline.node("src").unwrap().is_critical());
    }

    #[test]
    fn test_graph_reports_capacities() {
        let (pipeline, _) = linear(vec![1]);
        let view = pipeline.graph();
        assert!(view.is_async);
        assert_eq!(view.edges[0].capacity, Some(10));
        assert_eq!(view.execution_order, vec!["src", "pass", "sink"]);
    }
}
