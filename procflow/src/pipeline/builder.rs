//! Pipeline builder with validation.
//!
//! Every wiring mistake is reported when the offending call is made:
//! duplicate or malformed names, unknown nodes or ports, mismatched port
//! types, a second edge into the same input port, and cycles. A successful
//! build therefore never fails at run time because of its shape.

use super::graph::{detect_cycles, topological_order, Link};
use super::node::{Node, NodeRole};
use super::{AsyncPipeline, SyncPipeline, DEFAULT_EDGE_CAPACITY};
use crate::context::PipelineContext;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::process::{find_port, Pad, PortDirection, PortSpec, Process};
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

const NODE_NAME_PATTERN: &str = r"^[A-Za-z0-9_.\-]+$";

/// Returns true if `name` can be used as a node name.
///
/// Names may not contain the configuration separator `:`.
#[must_use]
pub fn is_valid_node_name(name: &str) -> bool {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    match PATTERN.get_or_init(|| Regex::new(NODE_NAME_PATTERN)) {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    }
}

#[derive(Debug)]
struct NodeSpec {
    name: String,
    role: NodeRole,
    executable: bool,
    output: Option<bool>,
    ports: Vec<PortSpec>,
    process: Box<dyn Process>,
}

/// Everything a scheduler needs from a finished builder.
pub(crate) struct GraphParts {
    pub name: String,
    pub context: PipelineContext,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    pub order: Vec<usize>,
    pub index: HashMap<String, usize>,
    pub edge_capacity: usize,
}

/// Builder for creating validated pipelines.
#[derive(Debug)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Context handed to the pipeline and its nested pipelines.
    context: PipelineContext,
    /// Capacity used for edges without an explicit one.
    edge_capacity: usize,
    /// Nodes in insertion order.
    nodes: Vec<NodeSpec>,
    /// Node name to index.
    index: HashMap<String, usize>,
    /// Links in connection order.
    links: Vec<Link>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: PipelineContext::default(),
            edge_capacity: DEFAULT_EDGE_CAPACITY,
            nodes: Vec::new(),
            index: HashMap::new(),
            links: Vec::new(),
        }
    }

    /// Sets the execution context.
    #[must_use]
    pub fn with_context(mut self, context: PipelineContext) -> Self {
        self.context = context;
        self
    }

    /// Sets the default edge capacity; 0 means unbounded.
    #[must_use]
    pub fn with_edge_capacity(mut self, capacity: usize) -> Self {
        self.edge_capacity = capacity;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of nodes added so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Adds a process; its name becomes the node name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed or already taken.
    pub fn add<P: Process + 'static>(mut self, process: P) -> Result<Self, PipelineValidationError> {
        self.add_boxed(Box::new(process))?;
        Ok(self)
    }

    /// Adds a process that is configured and initialized but never stepped.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed or already taken.
    pub fn add_without_execute<P: Process + 'static>(
        mut self,
        process: P,
    ) -> Result<Self, PipelineValidationError> {
        self.insert(Box::new(process), NodeRole::Process, false)?;
        Ok(self)
    }

    /// Adds an input pad carrying `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed or already taken.
    pub fn add_input_pad<T: Any + Send + Clone>(
        mut self,
        name: impl Into<String>,
    ) -> Result<Self, PipelineValidationError> {
        self.insert(Box::new(Pad::input::<T>(name)), NodeRole::InputPad, true)?;
        Ok(self)
    }

    /// Adds an output pad carrying `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed or already taken.
    pub fn add_output_pad<T: Any + Send + Clone>(
        mut self,
        name: impl Into<String>,
    ) -> Result<Self, PipelineValidationError> {
        self.insert(Box::new(Pad::output::<T>(name)), NodeRole::OutputPad, true)?;
        Ok(self)
    }

    /// Adds an already boxed process.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed or already taken.
    pub fn add_boxed(&mut self, process: Box<dyn Process>) -> Result<(), PipelineValidationError> {
        self.insert(process, NodeRole::Process, true)
    }

    /// Connects `from.from_port` to `to.to_port`.
    ///
    /// # Errors
    ///
    /// Returns an error if a node or port is unknown, the types differ, the
    /// input port is already connected, or the edge closes a cycle.
    pub fn connect(
        mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
    ) -> Result<Self, PipelineValidationError> {
        self.link(from, Some(from_port), to, Some(to_port), false, None)?;
        Ok(self)
    }

    /// Like [`connect`](Self::connect), but a non-success on the edge only
    /// withholds its data.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn connect_optional(
        mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
    ) -> Result<Self, PipelineValidationError> {
        self.link(from, Some(from_port), to, Some(to_port), true, None)?;
        Ok(self)
    }

    /// Like [`connect`](Self::connect), with an explicit queue capacity.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn connect_with_capacity(
        mut self,
        from: &str,
        from_port: &str,
        to: &str,
        to_port: &str,
        capacity: usize,
    ) -> Result<Self, PipelineValidationError> {
        self.link(from, Some(from_port), to, Some(to_port), false, Some(capacity))?;
        Ok(self)
    }

    /// Makes `to` wait for `from` without passing data.
    ///
    /// # Errors
    ///
    /// Returns an error if a node is unknown or the edge closes a cycle.
    pub fn add_execution_dependency(
        mut self,
        from: &str,
        to: &str,
    ) -> Result<Self, PipelineValidationError> {
        self.link(from, None, to, None, false, None)?;
        Ok(self)
    }

    /// Optional form of [`add_execution_dependency`](Self::add_execution_dependency).
    ///
    /// # Errors
    ///
    /// Same as [`add_execution_dependency`](Self::add_execution_dependency).
    pub fn add_optional_execution_dependency(
        mut self,
        from: &str,
        to: &str,
    ) -> Result<Self, PipelineValidationError> {
        self.link(from, None, to, None, true, None)?;
        Ok(self)
    }

    /// Overrides whether `name` counts as an output node.
    ///
    /// By default executable nodes without outgoing edges are output nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is unknown.
    pub fn set_output_node(mut self, name: &str, output: bool) -> Result<Self, PipelineValidationError> {
        let idx = self.lookup(name)?;
        self.nodes[idx].output = Some(output);
        Ok(self)
    }

    /// Builds a single-threaded pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if no node was added.
    pub fn build_sync(self) -> Result<SyncPipeline, PipelineValidationError> {
        Ok(SyncPipeline::from_parts(self.finish()?))
    }

    /// Builds a thread-per-node pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if no node was added.
    pub fn build_async(self) -> Result<AsyncPipeline, PipelineValidationError> {
        Ok(AsyncPipeline::from_parts(self.finish()?))
    }

    fn insert(
        &mut self,
        process: Box<dyn Process>,
        role: NodeRole,
        executable: bool,
    ) -> Result<(), PipelineValidationError> {
        let name = process.name().to_string();
        if !is_valid_node_name(&name) {
            return Err(PipelineValidationError::new(format!("Invalid node name '{name}'"))
                .with_nodes(vec![name.clone()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-NAME", format!("'{name}' is not a valid node name"))
                        .with_fix_hint("Use letters, digits, '_', '.' or '-' only."),
                ));
        }
        if self.index.contains_key(&name) {
            return Err(PipelineValidationError::new(format!("Duplicate node name '{name}'"))
                .with_nodes(vec![name.clone()])
                .with_error_info(ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("A node named '{name}' already exists"),
                )));
        }

        debug!(pipeline = %self.name, node = %name, ?role, executable, "Adding node");
        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(NodeSpec {
            name,
            role,
            executable,
            output: None,
            ports: process.ports(),
            process,
        });
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<usize, PipelineValidationError> {
        self.index.get(name).copied().ok_or_else(|| {
            PipelineValidationError::new(format!("Unknown node '{name}'"))
                .with_nodes(vec![name.to_string()])
                .with_error_info(ContractErrorInfo::new(
                    "CONTRACT-004-MISSING_NODE",
                    format!("Node '{name}' has not been added"),
                ))
        })
    }

    fn port(
        &self,
        node: usize,
        port: &str,
        direction: PortDirection,
    ) -> Result<&PortSpec, PipelineValidationError> {
        let spec = &self.nodes[node];
        find_port(&spec.ports, port, direction).ok_or_else(|| {
            PipelineValidationError::new(format!(
                "Node '{}' has no {direction} port '{port}'",
                spec.name
            ))
            .with_nodes(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-005-PORT", format!("Unknown {direction} port '{port}'"))
                    .with_context_entry("node", spec.name.clone()),
            )
        })
    }

    fn link(
        &mut self,
        from: &str,
        from_port: Option<&str>,
        to: &str,
        to_port: Option<&str>,
        optional: bool,
        capacity: Option<usize>,
    ) -> Result<(), PipelineValidationError> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;

        for idx in [from_idx, to_idx] {
            if !self.nodes[idx].executable {
                let name = self.nodes[idx].name.clone();
                return Err(PipelineValidationError::new(format!(
                    "Node '{name}' was added without execute and cannot be connected"
                ))
                .with_nodes(vec![name])
                .with_error_info(ContractErrorInfo::new(
                    "CONTRACT-006-NO_EXECUTE",
                    "Configuration-only nodes take no edges",
                )));
            }
        }
        if self.nodes[from_idx].role == NodeRole::OutputPad
            || self.nodes[to_idx].role == NodeRole::InputPad
        {
            return Err(PipelineValidationError::new(format!(
                "Edge '{from}' -> '{to}' points the wrong way across a pad"
            ))
            .with_nodes(vec![from.to_string(), to.to_string()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-005-PORT", "Pads only carry data across the boundary")
                    .with_fix_hint("Feed output pads and read from input pads."),
            ));
        }

        let type_name = match (from_port, to_port) {
            (Some(out_name), Some(in_name)) => {
                let out = self.port(from_idx, out_name, PortDirection::Output)?;
                let input = self.port(to_idx, in_name, PortDirection::Input)?;
                if out.type_id != input.type_id {
                    return Err(PipelineValidationError::new(format!(
                        "Cannot connect {from}.{out_name} ({}) to {to}.{in_name} ({})",
                        out.type_name, input.type_name
                    ))
                    .with_nodes(vec![from.to_string(), to.to_string()])
                    .with_error_info(
                        ContractErrorInfo::new("CONTRACT-005-TYPE", "Port types differ")
                            .with_context_entry("expected", input.type_name)
                            .with_context_entry("found", out.type_name),
                    ));
                }
                let taken = self.links.iter().any(|link| {
                    link.to == to_idx && link.to_port.as_deref() == Some(in_name)
                });
                if taken {
                    return Err(PipelineValidationError::new(format!(
                        "Input port {to}.{in_name} is already connected"
                    ))
                    .with_nodes(vec![to.to_string()])
                    .with_error_info(ContractErrorInfo::new(
                        "CONTRACT-005-FANIN",
                        format!("'{in_name}' accepts a single edge"),
                    )));
                }
                Some(out.type_name)
            }
            _ => None,
        };

        self.links.push(Link {
            from: from_idx,
            from_port: from_port.map(str::to_string),
            to: to_idx,
            to_port: to_port.map(str::to_string),
            optional,
            capacity,
            type_name,
        });

        let names: Vec<String> = self.nodes.iter().map(|spec| spec.name.clone()).collect();
        if let Err(cycle) = detect_cycles(&names, &self.links) {
            self.links.pop();
            return Err(cycle.into());
        }

        debug!(
            pipeline = %self.name,
            from,
            to,
            from_port = from_port.unwrap_or("-"),
            to_port = to_port.unwrap_or("-"),
            optional,
            "Connected"
        );
        Ok(())
    }

    fn finish(self) -> Result<GraphParts, PipelineValidationError> {
        if self.nodes.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no nodes").with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one process before building."),
            ));
        }

        let order = topological_order(self.nodes.len(), &self.links);
        let context = self.context;
        let links = self.links;

        let nodes: Vec<Node> = self
            .nodes
            .into_iter()
            .enumerate()
            .map(|(idx, mut spec)| {
                let outgoing: Vec<&Link> = links.iter().filter(|link| link.from == idx).collect();
                let output = spec.output.unwrap_or(
                    spec.executable && spec.role != NodeRole::InputPad && outgoing.is_empty(),
                );
                let mut used: Vec<String> = Vec::new();
                for port in outgoing.iter().filter_map(|link| link.from_port.as_ref()) {
                    if !used.contains(port) {
                        used.push(port.clone());
                    }
                }
                if let Some(composite) = spec.process.as_super_process_mut() {
                    composite.set_context(context.child(spec.name.as_str()));
                }
                Node::new(spec.process, spec.role)
                    .with_executable(spec.executable)
                    .with_output(output)
                    .with_used_outputs(used)
            })
            .collect();

        Ok(GraphParts {
            name: self.name,
            context,
            nodes,
            links,
            order,
            index: self.index,
            edge_capacity: self.edge_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Collector, Multiplier, NumberSource, PassThrough};

    fn source() -> NumberSource {
        NumberSource::new("src", vec![1, 2, 3])
    }

    #[test]
    fn test_node_name_validation() {
        assert!(is_valid_node_name("tracker.kalman-2_a"));
        assert!(!is_valid_node_name("outer:inner"));
        assert!(!is_valid_node_name(""));
        assert!(!is_valid_node_name("with space"));
    }

    #[test]
    fn test_builder_duplicate_name() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add(source())
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-DUPLICATE"));
    }

    #[test]
    fn test_builder_missing_node() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-MISSING_NODE"));
    }

    #[test]
    fn test_builder_unknown_port() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add(Collector::<i32>::new("sink"))
            .unwrap()
            .connect("src", "frames", "sink", "input")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-005-PORT"));
    }

    #[test]
    fn test_builder_type_mismatch() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add(Collector::<String>::new("sink"))
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-005-TYPE"));
    }

    #[test]
    fn test_builder_double_connected_input() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add(NumberSource::new("other", vec![4]))
            .unwrap()
            .add(Collector::<i32>::new("sink"))
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap()
            .connect("other", "number", "sink", "input")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-005-FANIN"));
    }

    #[test]
    fn test_builder_cycle_rejected() {
        let builder = PipelineBuilder::new("p")
            .add(PassThrough::<i32>::new("a"))
            .unwrap()
            .add(PassThrough::<i32>::new("b"))
            .unwrap()
            .connect("a", "output", "b", "input")
            .unwrap();
        let err = builder
            .add_execution_dependency("b", "a")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(err.nodes, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_builder_no_execute_cannot_connect() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add_without_execute(Multiplier::new("cfg"))
            .unwrap()
            .connect("src", "number", "cfg", "input")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-006-NO_EXECUTE"));
    }

    #[test]
    fn test_builder_pad_direction() {
        let err = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add_input_pad::<i32>("in")
            .unwrap()
            .connect("src", "number", "in", "value")
            .unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-005-PORT"));
    }

    #[test]
    fn test_builder_empty() {
        let err = PipelineBuilder::new("p").build_sync().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
    }

    #[test]
    fn test_output_nodes_default_to_sinks() {
        let pipeline = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add(Collector::<i32>::new("sink"))
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap()
            .build_sync()
            .unwrap();
        let view = pipeline.graph();
        assert!(!view.node("src").unwrap().output);
        assert!(view.node("sink").unwrap().output);
    }

    #[test]
    fn test_set_output_node_override() {
        let pipeline = PipelineBuilder::new("p")
            .add(source())
            .unwrap()
            .add(Collector::<i32>::new("sink"))
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap()
            .set_output_node("src", true)
            .unwrap()
            .build_sync()
            .unwrap();
        assert!(pipeline.graph().node("src").unwrap().output);
    }
}
