//! Graph structure shared by both schedulers.
//!
//! Holds the link records produced by the builder, the ordering and cycle
//! checks run over them, and [`GraphView`], the read-only reflection of a
//! built pipeline.

use super::node::{Node, NodeRole};
use crate::errors::CycleDetectedError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// A connection recorded by the builder, by node index.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub from: usize,
    pub from_port: Option<String>,
    pub to: usize,
    pub to_port: Option<String>,
    pub optional: bool,
    pub capacity: Option<usize>,
    pub type_name: Option<&'static str>,
}

impl Link {
    pub fn is_dependency(&self) -> bool {
        self.from_port.is_none()
    }
}

/// Orders nodes so every producer precedes its consumers.
///
/// Nodes are visited in insertion order; before a node is placed, the
/// producers of its incoming links are visited in the order the links were
/// added. The result is fixed for a given sequence of builder calls.
pub(crate) fn topological_order(node_count: usize, links: &[Link]) -> Vec<usize> {
    fn visit(
        node: usize,
        links: &[Link],
        visited: &mut [bool],
        in_progress: &mut [bool],
        result: &mut Vec<usize>,
    ) {
        if visited[node] || in_progress[node] {
            return;
        }
        in_progress[node] = true;
        for link in links.iter().filter(|link| link.to == node) {
            visit(link.from, links, visited, in_progress, result);
        }
        in_progress[node] = false;
        visited[node] = true;
        result.push(node);
    }

    let mut result = Vec::with_capacity(node_count);
    let mut visited = vec![false; node_count];
    let mut in_progress = vec![false; node_count];
    for node in 0..node_count {
        visit(node, links, &mut visited, &mut in_progress, &mut result);
    }
    result
}

/// Finds a cycle among the links, naming it by node.
pub(crate) fn detect_cycles(names: &[String], links: &[Link]) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in 0..names.len() {
        if !visited.contains(&node) {
            if let Some(cycle) = dfs_cycle(node, links, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(
                    cycle.into_iter().map(|idx| names[idx].clone()).collect(),
                ));
            }
        }
    }
    Ok(())
}

fn dfs_cycle(
    node: usize,
    links: &[Link],
    visited: &mut HashSet<usize>,
    rec_stack: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for next in links.iter().filter(|link| link.from == node).map(|link| link.to) {
        if !visited.contains(&next) {
            if let Some(cycle) = dfs_cycle(next, links, visited, rec_stack, path) {
                return Some(cycle);
            }
        } else if rec_stack.contains(&next) {
            let start = path.iter().position(|&n| n == next).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(next);
            return Some(cycle);
        }
    }

    path.pop();
    rec_stack.remove(&node);
    None
}

/// Reflection of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Class name of the process.
    pub class_name: String,
    /// Role in the pipeline.
    pub role: NodeRole,
    /// False for configuration-only nodes.
    pub executable: bool,
    /// True if the node counts towards the pipeline result.
    pub output: bool,
    /// True if the process wraps a nested pipeline.
    pub composite: bool,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name().to_string(),
            class_name: node.class_name().to_string(),
            role: node.role(),
            executable: node.is_executable(),
            output: node.is_output(),
            composite: node.is_composite(),
        }
    }
}

/// Reflection of one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Producer node.
    pub from: String,
    /// Producer port; absent for execution dependencies.
    pub from_port: Option<String>,
    /// Consumer node.
    pub to: String,
    /// Consumer port; absent for execution dependencies.
    pub to_port: Option<String>,
    /// Whether the edge is optional.
    pub optional: bool,
    /// Queue capacity for asynchronous pipelines.
    pub capacity: Option<usize>,
    /// Carried type.
    pub type_name: Option<String>,
}

/// Read-only description of a built pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    /// Pipeline name.
    pub name: String,
    /// Whether the pipeline runs one thread per node.
    pub is_async: bool,
    /// Nodes in insertion order.
    pub nodes: Vec<NodeInfo>,
    /// Edges in connection order.
    pub edges: Vec<EdgeInfo>,
    /// Node names in execution order.
    pub execution_order: Vec<String>,
}

impl GraphView {
    /// Looks a node up by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Edges leaving `name`.
    pub fn edges_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EdgeInfo> + 'a {
        self.edges.iter().filter(move |edge| edge.from == name)
    }

    /// Edges entering `name`.
    pub fn edges_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a EdgeInfo> + 'a {
        self.edges.iter().filter(move |edge| edge.to == name)
    }

    /// Renders the graph in Graphviz DOT syntax.
    ///
    /// Composite nodes are drawn as `box3d`, pads as ellipses, optional
    /// edges dashed and execution dependencies dotted.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", escape(&self.name));
        let _ = writeln!(dot, "  rankdir=TB;");

        for node in &self.nodes {
            let shape = if node.composite {
                "box3d"
            } else if node.role.is_pad() {
                "ellipse"
            } else {
                "box"
            };
            let style = if node.executable { "solid" } else { "dashed" };
            let _ = writeln!(
                dot,
                "  \"{}\" [label=\"{}\\n:: {}\", shape={shape}, style={style}];",
                escape(&node.name),
                escape(&node.name),
                escape(&node.class_name),
            );
        }

        for edge in &self.edges {
            let mut attrs = Vec::new();
            match (&edge.from_port, &edge.to_port) {
                (Some(from), Some(to)) if from == to => {
                    attrs.push(format!("label=\"{}\"", escape(from)));
                }
                (Some(from), Some(to)) => {
                    attrs.push(format!("label=\"{} -> {}\"", escape(from), escape(to)));
                }
                _ => attrs.push("style=dotted".to_string()),
            }
            if edge.optional {
                attrs.push("style=dashed".to_string());
            }
            let _ = writeln!(
                dot,
                "  \"{}\" -> \"{}\" [{}];",
                escape(&edge.from),
                escape(&edge.to),
                attrs.join(", ")
            );
        }

        dot.push_str("}\n");
        dot
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(from: usize, to: usize) -> Link {
        Link {
            from,
            from_port: Some("out".to_string()),
            to,
            to_port: Some("in".to_string()),
            optional: false,
            capacity: None,
            type_name: None,
        }
    }

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("n{i}")).collect()
    }

    #[test]
    fn test_topological_order_follows_links() {
        // n0 consumes n2, n2 consumes n1.
        let links = vec![link(2, 0), link(1, 2)];
        assert_eq!(topological_order(3, &links), vec![1, 2, 0]);
    }

    #[test]
    fn test_topological_order_uses_link_insertion_order() {
        // n0 consumes n2 then n1.
        let links = vec![link(2, 0), link(1, 0)];
        assert_eq!(topological_order(3, &links), vec![2, 1, 0]);
    }

    #[test]
    fn test_detect_cycle_names_nodes() {
        let links = vec![link(0, 1), link(1, 2), link(2, 0)];
        let err = detect_cycles(&names(3), &links).unwrap_err();
        assert_eq!(err.cycle_path, vec!["n0", "n1", "n2", "n0"]);
    }

    #[test]
    fn test_no_cycle_in_diamond() {
        let links = vec![link(0, 1), link(0, 2), link(1, 3), link(2, 3)];
        assert!(detect_cycles(&names(4), &links).is_ok());
    }

    #[test]
    fn test_dot_rendering() {
        let view = GraphView {
            name: "demo".to_string(),
            is_async: false,
            nodes: vec![
                NodeInfo {
                    name: "src".to_string(),
                    class_name: "number_source".to_string(),
                    role: NodeRole::Process,
                    executable: true,
                    output: false,
                    composite: false,
                },
                NodeInfo {
                    name: "inner".to_string(),
                    class_name: "super_process".to_string(),
                    role: NodeRole::Process,
                    executable: true,
                    output: true,
                    composite: true,
                },
            ],
            edges: vec![EdgeInfo {
                from: "src".to_string(),
                from_port: Some("number".to_string()),
                to: "inner".to_string(),
                to_port: Some("number".to_string()),
                optional: true,
                capacity: Some(10),
                type_name: Some("i32".to_string()),
            }],
            execution_order: vec!["src".to_string(), "inner".to_string()],
        };

        let dot = view.to_dot();
        assert!(dot.starts_with("digraph \"demo\""));
        assert!(dot.contains("shape=box3d"));
        assert!(dot.contains("\"src\" -> \"inner\" [label=\"number\", style=dashed];"));
        assert_eq!(view.edges_from("src").count(), 1);
        assert_eq!(view.edges_to("src").count(), 0);
    }
}
