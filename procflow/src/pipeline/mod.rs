//! Pipeline building and execution.
//!
//! This module provides:
//! - The validating [`PipelineBuilder`]
//! - The single-threaded [`SyncPipeline`]
//! - The thread-per-node [`AsyncPipeline`] and its queues
//! - [`Pipeline`], either of the two
//! - Graph reflection and DOT export

mod async_node;
mod async_pipeline;
mod builder;
mod edge;
mod graph;
mod node;
mod sync_pipeline;
mod unified;

pub use async_node::{AsyncNode, RUNNING_SETTLE_TIME};
pub use async_pipeline::AsyncPipeline;
pub use builder::{is_valid_node_name, PipelineBuilder};
pub use edge::{AsyncEdge, Packet, DEFAULT_EDGE_CAPACITY};
pub use graph::{EdgeInfo, GraphView, NodeInfo};
pub use node::{Node, NodeRole, NodeStats, SharedProcess};
pub use sync_pipeline::SyncPipeline;
pub use unified::Pipeline;
