//! Queue depth monitoring across nested pipelines.

use crate::pipeline::{AsyncNode, Pipeline};
use std::sync::Arc;
use tracing::{debug, warn};

/// Watches the outgoing queues of selected asynchronous nodes.
#[derive(Debug, Default)]
pub struct QueueMonitor {
    monitored: Vec<Arc<AsyncNode>>,
}

impl QueueMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching the node called `name`.
    ///
    /// Searches `pipeline` depth first, descending into composite processes,
    /// and registers the first asynchronous node with that name. Returns
    /// false if there is none.
    pub fn monitor_node(&mut self, name: &str, pipeline: &Pipeline) -> bool {
        match find_async_node(name, pipeline) {
            Some(node) => {
                debug!(node = %name, pipeline = %pipeline.name(), "Monitoring node");
                self.monitored.push(node);
                true
            }
            None => {
                warn!(node = %name, pipeline = %pipeline.name(), "No asynchronous node to monitor");
                false
            }
        }
    }

    /// Longest outgoing queue among the monitored nodes, 0 if none.
    #[must_use]
    pub fn current_max_queue_length(&self) -> usize {
        self.monitored
            .iter()
            .map(|node| node.max_queue_len())
            .max()
            .unwrap_or(0)
    }

    /// Names of the monitored nodes.
    #[must_use]
    pub fn monitored_nodes(&self) -> Vec<&str> {
        self.monitored.iter().map(|node| node.name()).collect()
    }

    /// Forgets every monitored node.
    pub fn reset(&mut self) {
        self.monitored.clear();
    }
}

fn find_async_node(name: &str, pipeline: &Pipeline) -> Option<Arc<AsyncNode>> {
    if let Pipeline::Async(p) = pipeline {
        if let Some(node) = p.node(name) {
            return Some(Arc::clone(node));
        }
    }
    pipeline.nodes().into_iter().find_map(|node| {
        node.process()
            .lock()
            .as_super_process()
            .and_then(|composite| find_async_node(name, composite.inner()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{Collector, NumberSource};

    fn pipeline(asynchronous: bool) -> Pipeline {
        let builder = PipelineBuilder::new("watched")
            .add(NumberSource::new("src", vec![1, 2, 3]))
            .unwrap()
            .add(Collector::<i32>::new("sink"))
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap();
        if asynchronous {
            builder.build_async().unwrap().into()
        } else {
            builder.build_sync().unwrap().into()
        }
    }

    #[test]
    fn test_monitor_async_node() {
        let pipeline = pipeline(true);
        let mut monitor = QueueMonitor::new();
        assert!(monitor.monitor_node("src", &pipeline));
        assert!(!monitor.monitor_node("missing", &pipeline));
        assert_eq!(monitor.monitored_nodes(), vec!["src"]);
        assert_eq!(monitor.current_max_queue_length(), 0);

        monitor.reset();
        assert!(monitor.monitored_nodes().is_empty());
    }

    #[test]
    fn test_sync_nodes_are_not_monitored() {
        let pipeline = pipeline(false);
        let mut monitor = QueueMonitor::new();
        assert!(!monitor.monitor_node("src", &pipeline));
    }

    #[test]
    fn test_queue_length_after_run() {
        let mut pipeline = pipeline(true);
        let mut monitor = QueueMonitor::new();
        monitor.monitor_node("src", &pipeline);
        pipeline.run().unwrap();
        assert_eq!(monitor.current_max_queue_length(), 0);
    }
}
