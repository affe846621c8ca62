//! A pipeline of either execution model.
//!
//! [`Pipeline`] is what composite processes own and what tooling such as
//! [`QueueMonitor`](crate::observability::QueueMonitor) walks. Besides
//! delegating the common surface to the concrete scheduler it provides the
//! recursive views: timing reports and DOT export descend into every nested
//! pipeline.

use super::graph::GraphView;
use super::node::Node;
use super::{AsyncPipeline, SyncPipeline};
use crate::context::PipelineContext;
use crate::core::ConfigBlock;
use crate::errors::{ConfigError, ProcflowError};
use crate::observability::NodeTiming;
use std::path::{Path, PathBuf};
use tracing::info;

/// A synchronous or asynchronous pipeline.
#[derive(Debug)]
pub enum Pipeline {
    /// Stepped from the caller's thread.
    Sync(SyncPipeline),
    /// One worker thread per node.
    Async(AsyncPipeline),
}

impl From<SyncPipeline> for Pipeline {
    fn from(pipeline: SyncPipeline) -> Self {
        Self::Sync(pipeline)
    }
}

impl From<AsyncPipeline> for Pipeline {
    fn from(pipeline: AsyncPipeline) -> Self {
        Self::Async(pipeline)
    }
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Sync(p) => p.name(),
            Self::Async(p) => p.name(),
        }
    }

    /// Returns a copy of the execution context.
    #[must_use]
    pub fn context(&self) -> PipelineContext {
        match self {
            Self::Sync(p) => p.context().clone(),
            Self::Async(p) => p.context(),
        }
    }

    pub(crate) fn set_context(&mut self, context: PipelineContext) {
        match self {
            Self::Sync(p) => p.set_context(context),
            Self::Async(p) => p.set_context(context),
        }
    }

    /// Returns true for the thread-per-node model.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Returns the synchronous pipeline, if that is what this is.
    #[must_use]
    pub fn as_sync(&self) -> Option<&SyncPipeline> {
        match self {
            Self::Sync(p) => Some(p),
            Self::Async(_) => None,
        }
    }

    /// Mutable form of [`as_sync`](Self::as_sync).
    pub fn as_sync_mut(&mut self) -> Option<&mut SyncPipeline> {
        match self {
            Self::Sync(p) => Some(p),
            Self::Async(_) => None,
        }
    }

    /// Returns the asynchronous pipeline, if that is what this is.
    #[must_use]
    pub fn as_async(&self) -> Option<&AsyncPipeline> {
        match self {
            Self::Sync(_) => None,
            Self::Async(p) => Some(p),
        }
    }

    /// Returns the nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> Vec<&Node> {
        match self {
            Self::Sync(p) => p.nodes().iter().collect(),
            Self::Async(p) => p.nodes().iter().map(|node| node.node()).collect(),
        }
    }

    /// Looks a node up by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        match self {
            Self::Sync(p) => p.node(name),
            Self::Async(p) => p.node(name).map(|node| node.node()),
        }
    }

    /// Names of the input pads.
    #[must_use]
    pub fn input_pads(&self) -> Vec<&str> {
        match self {
            Self::Sync(p) => p.input_pads(),
            Self::Async(p) => p.input_pads(),
        }
    }

    /// Names of the output pads.
    #[must_use]
    pub fn output_pads(&self) -> Vec<&str> {
        match self {
            Self::Sync(p) => p.output_pads(),
            Self::Async(p) => p.output_pads(),
        }
    }

    /// Returns the merged parameters of all nodes, keyed `node:key`.
    #[must_use]
    pub fn params(&self) -> ConfigBlock {
        match self {
            Self::Sync(p) => p.params(),
            Self::Async(p) => p.params(),
        }
    }

    /// Applies a merged configuration.
    pub fn set_params(&self, block: &ConfigBlock) -> Result<(), ConfigError> {
        match self {
            Self::Sync(p) => p.set_params(block),
            Self::Async(p) => p.set_params(block),
        }
    }

    /// Sets a single `node:key` parameter.
    pub fn set_param(&self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        match self {
            Self::Sync(p) => p.set_param(key, value),
            Self::Async(p) => p.set_param(key, value),
        }
    }

    /// Initializes every process.
    pub fn initialize(&self) -> Result<(), ProcflowError> {
        match self {
            Self::Sync(p) => p.initialize(),
            Self::Async(p) => p.initialize(),
        }
    }

    /// Runs until the output nodes have failed.
    pub fn run(&mut self) -> Result<(), ProcflowError> {
        match self {
            Self::Sync(p) => {
                p.run();
            }
            Self::Async(p) => p.run()?,
        }
        Ok(())
    }

    /// Resets every node.
    pub fn reset(&mut self) -> Result<(), ProcflowError> {
        match self {
            Self::Sync(p) => p.reset(),
            Self::Async(p) => p.reset(),
        }
    }

    /// Stops the pipeline and calls `cancel` on every process.
    pub fn cancel(&self) {
        match self {
            Self::Sync(p) => p.cancel(),
            Self::Async(p) => p.cancel(),
        }
    }

    /// Returns a read-only description of this level of the graph.
    #[must_use]
    pub fn graph(&self) -> GraphView {
        match self {
            Self::Sync(p) => p.graph(),
            Self::Async(p) => p.graph(),
        }
    }

    /// Step counts and times of every executable node, nested pipelines
    /// included. Nested nodes are named `outer/inner`.
    #[must_use]
    pub fn collect_node_timing(&self) -> Vec<NodeTiming> {
        let mut timings = Vec::new();
        self.collect_timing_into("", &mut timings);
        timings
    }

    fn collect_timing_into(&self, prefix: &str, timings: &mut Vec<NodeTiming>) {
        for node in self.nodes() {
            if !node.is_executable() || node.role().is_pad() {
                continue;
            }
            let path = if prefix.is_empty() {
                node.name().to_string()
            } else {
                format!("{prefix}/{}", node.name())
            };
            timings.push(NodeTiming {
                path: path.clone(),
                steps: node.stats().steps(),
                busy_ms: node.stats().busy_time().as_secs_f64() * 1000.0,
            });
            if let Some(composite) = node.process().lock().as_super_process() {
                composite.inner().collect_timing_into(&path, timings);
            }
        }
    }

    /// Logs steps per second of every node at `info`, indented by depth.
    pub fn log_detailed_report(&self) {
        info!(pipeline = %self.name(), "Node timing report");
        for timing in self.collect_node_timing() {
            let indent = "    ".repeat(timing.depth() + 1);
            let name = timing.path.rsplit('/').next().unwrap_or(&timing.path);
            info!(
                node = %timing.path,
                steps = timing.steps,
                busy_ms = timing.busy_ms,
                "{indent}{name}: steps/second = {:.2}",
                timing.steps_per_second()
            );
        }
    }

    /// Writes the graph to `path` in DOT syntax.
    ///
    /// Every nested pipeline goes to its own file next to `path`, named
    /// `<stem>_<node>.<ext>`. Returns the paths written, outermost first.
    pub fn write_dot(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>, ProcflowError> {
        let mut written = Vec::new();
        self.write_dot_into(path.as_ref(), &mut written)?;
        Ok(written)
    }

    fn write_dot_into(&self, path: &Path, written: &mut Vec<PathBuf>) -> Result<(), ProcflowError> {
        std::fs::write(path, self.graph().to_dot())?;
        written.push(path.to_path_buf());

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name().to_string());
        let extension = path
            .extension()
            .map_or_else(|| "dot".to_string(), |ext| ext.to_string_lossy().into_owned());
        for node in self.nodes() {
            if let Some(composite) = node.process().lock().as_super_process() {
                let nested = path.with_file_name(format!("{stem}_{}.{extension}", node.name()));
                composite.inner().write_dot_into(&nested, written)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{Collector, NumberSource};

    fn build(values: Vec<i32>) -> PipelineBuilder {
        PipelineBuilder::new("unified")
            .add(NumberSource::new("src", values))
            .unwrap()
            .add(Collector::<i32>::new("sink"))
            .unwrap()
            .connect("src", "number", "sink", "input")
            .unwrap()
    }

    #[test]
    fn test_conversions() {
        let sync: Pipeline = build(vec![1]).build_sync().unwrap().into();
        let asynchronous: Pipeline = build(vec![1]).build_async().unwrap().into();
        assert!(!sync.is_async());
        assert!(sync.as_sync().is_some());
        assert!(asynchronous.is_async());
        assert!(asynchronous.as_async().is_some());
        assert_eq!(asynchronous.nodes().len(), 2);
    }

    #[test]
    fn test_run_either_kind() {
        for mut pipeline in [
            Pipeline::from(build(vec![1, 2]).build_sync().unwrap()),
            Pipeline::from(build(vec![1, 2]).build_async().unwrap()),
        ] {
            pipeline.initialize().unwrap();
            pipeline.run().unwrap();
            pipeline.reset().unwrap();
        }
    }

    #[test]
    fn test_collect_node_timing() {
        let mut pipeline = Pipeline::from(build(vec![1, 2, 3]).build_sync().unwrap());
        pipeline.run().unwrap();

        let timings = pipeline.collect_node_timing();
        let paths: Vec<&str> = timings.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["src", "sink"]);
        assert_eq!(timings[0].steps, 4);
        assert_eq!(timings[1].steps, 3);
        pipeline.log_detailed_report();
    }

    #[test]
    fn test_write_dot() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::from(build(vec![1]).build_sync().unwrap());
        let written = pipeline.write_dot(dir.path().join("graph.dot")).unwrap();

        assert_eq!(written.len(), 1);
        let dot = std::fs::read_to_string(&written[0]).unwrap();
        assert!(dot.starts_with("digraph \"unified\""));
        assert!(dot.contains("\"src\" -> \"sink\""));
    }
}
