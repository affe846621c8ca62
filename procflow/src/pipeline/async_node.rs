//! Nodes driven by their own worker thread.

use super::edge::AsyncEdge;
use super::node::{self, Node};
use crate::cancellation::InterruptToken;
use crate::core::{combine_statuses, Payload, StepStatus};
use crate::errors::{Interrupted, LifecycleError, ProcflowError};
use crate::process::OutputPusher;
use crate::subpipeline::{relay, SuperProcess};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long `is_running` waits for a finishing step.
pub const RUNNING_SETTLE_TIME: Duration = Duration::from_millis(100);

/// Tracks whether a worker is inside a step.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    running: Mutex<bool>,
    idle: Condvar,
}

impl RunState {
    pub fn enter(&self) {
        *self.running.lock() = true;
    }

    pub fn leave(&self) {
        let mut running = self.running.lock();
        *running = false;
        self.idle.notify_all();
    }
}

/// Decrements the live worker count when a worker exits, even by panic.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A node with its queues, run by one worker thread.
#[derive(Debug)]
pub struct AsyncNode {
    node: Node,
    incoming: Vec<Arc<AsyncEdge>>,
    outgoing: Vec<Arc<AsyncEdge>>,
    run_state: RunState,
    last_status: Mutex<Option<StepStatus>>,
    critical: bool,
}

impl AsyncNode {
    pub(crate) fn new(
        node: Node,
        incoming: Vec<Arc<AsyncEdge>>,
        outgoing: Vec<Arc<AsyncEdge>>,
        critical: bool,
    ) -> Self {
        Self {
            node,
            incoming,
            outgoing,
            run_state: RunState::default(),
            last_status: Mutex::new(None),
            critical,
        }
    }

    /// Returns the wrapped node.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Edges this node pops from, in connection order.
    #[must_use]
    pub fn incoming(&self) -> &[Arc<AsyncEdge>] {
        &self.incoming
    }

    /// Edges this node pushes to, in connection order.
    #[must_use]
    pub fn outgoing(&self) -> &[Arc<AsyncEdge>] {
        &self.outgoing
    }

    /// Whether the pipeline waits for this worker before stopping the others.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.critical
    }

    /// Status recorded by the last cycle.
    #[must_use]
    pub fn last_status(&self) -> Option<StepStatus> {
        *self.last_status.lock()
    }

    /// Longest outgoing queue right now.
    #[must_use]
    pub fn max_queue_len(&self) -> usize {
        self.outgoing.iter().map(|edge| edge.len()).max().unwrap_or(0)
    }

    /// Total packets queued on this node's edges.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.incoming
            .iter()
            .chain(&self.outgoing)
            .map(|edge| edge.len())
            .sum()
    }

    /// Returns true if the worker is inside a step.
    ///
    /// Waits up to [`RUNNING_SETTLE_TIME`] for a step in progress to finish.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let mut running = self.run_state.running.lock();
        if *running {
            let _ = self.run_state.idle.wait_for(&mut running, RUNNING_SETTLE_TIME);
        }
        *running
    }

    /// Resets the process and the incoming edges.
    ///
    /// Refused, with nothing changed, while the worker is inside a step or
    /// while any edge of the node still holds packets.
    pub fn reset(&self) -> Result<(), ProcflowError> {
        let mut running = self.run_state.running.lock();
        if *running {
            let _ = self.run_state.idle.wait_for(&mut running, RUNNING_SETTLE_TIME);
        }
        if *running {
            error!(node = %self.name(), "Reset refused: node is running");
            return Err(LifecycleError::NodeRunning {
                node: self.name().to_string(),
            }
            .into());
        }
        let queued = self.queued();
        if queued > 0 {
            error!(node = %self.name(), queued, "Reset refused: queues not empty");
            return Err(LifecycleError::QueuesNotEmpty {
                node: self.name().to_string(),
                queued,
            }
            .into());
        }

        for edge in &self.incoming {
            edge.reset()?;
        }
        self.node.process().lock().reset()?;
        *self.last_status.lock() = None;
        drop(running);
        debug!(node = %self.name(), "Node reset");
        Ok(())
    }

    pub(crate) fn record(&self, status: StepStatus) {
        let mut last = self.last_status.lock();
        if *last != Some(status) {
            debug!(node = %self.name(), status = %status, "Status changed");
        }
        *last = Some(status);
    }

    pub(crate) fn run_state(&self) -> &RunState {
        &self.run_state
    }

    /// Starts the worker thread.
    pub(crate) fn spawn(
        self: &Arc<Self>,
        token: InterruptToken,
        active: &Arc<AtomicUsize>,
    ) -> Result<JoinHandle<()>, LifecycleError> {
        let node = Arc::clone(self);
        active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(active));
        thread::Builder::new()
            .name(format!("procflow-{}", self.name()))
            .spawn(move || {
                let _guard = guard;
                node.work(&token);
            })
            .map_err(|e| LifecycleError::SpawnFailed {
                node: self.name().to_string(),
                reason: e.to_string(),
            })
    }

    fn work(&self, token: &InterruptToken) {
        let composite = self
            .node
            .process()
            .lock()
            .as_super_process()
            .and_then(SuperProcess::async_inner);
        if let Some(inner) = composite {
            relay::run_with_pads(self, &inner, token);
            return;
        }

        debug!(node = %self.name(), "Worker started");
        self.node
            .process()
            .lock()
            .set_output_pusher(Some(self.output_pusher(token)));
        loop {
            if token.is_cancelled() {
                debug!(node = %self.name(), "Worker interrupted");
                break;
            }
            match self.cycle(token) {
                Ok(StepStatus::Failure) => break,
                Ok(_) => {}
                Err(Interrupted) => {
                    warn!(node = %self.name(), "Worker interrupted while blocked on an edge");
                    self.record(StepStatus::Failure);
                    break;
                }
            }
        }
        self.node.process().lock().set_output_pusher(None);
        debug!(node = %self.name(), "Worker finished");
    }

    /// One pop, step, push round.
    fn cycle(&self, token: &InterruptToken) -> Result<StepStatus, Interrupted> {
        let mut required = Vec::with_capacity(self.incoming.len());
        let mut inputs = Vec::new();
        for edge in &self.incoming {
            let packet = edge.pop(token)?;
            if !edge.is_optional() {
                required.push(packet.status);
            }
            if let (Some(port), Some(payload)) = (edge.to_port(), packet.payload) {
                inputs.push((port.to_string(), payload));
            }
        }

        let (status, outputs) = match combine_statuses(required) {
            StepStatus::Success => {
                self.run_state.enter();
                let result = self.node.step_with(inputs);
                self.run_state.leave();
                result
            }
            combined => (combined, Default::default()),
        };
        self.record(status);
        self.push_outputs(status, &outputs, token)?;
        Ok(status)
    }

    /// Pushes one packet into every outgoing edge, in connection order.
    ///
    /// An edge whose port produced nothing gets a skip instead of success.
    pub(crate) fn push_outputs(
        &self,
        status: StepStatus,
        outputs: &HashMap<String, Payload>,
        token: &InterruptToken,
    ) -> Result<(), Interrupted> {
        push_round(&self.outgoing, status, outputs, token)
    }

    /// Pusher that sends extra rounds from inside a step.
    ///
    /// Captures the edges rather than the node, so the process never holds
    /// a reference back to its own node.
    fn output_pusher(&self, token: &InterruptToken) -> OutputPusher {
        let name = self.name().to_string();
        let ports = self.node.used_outputs().to_vec();
        let outgoing = self.outgoing.clone();
        let token = token.clone();
        OutputPusher::new(move |status, process| {
            let outputs = if status.is_success() {
                node::collect_outputs(&name, process, &ports)
            } else {
                HashMap::new()
            };
            trace!(node = %name, status = %status, "Pushing extra output");
            match push_round(&outgoing, status, &outputs, &token) {
                Ok(()) => true,
                Err(Interrupted) => {
                    warn!(node = %name, "Interrupted while pushing extra output");
                    false
                }
            }
        })
    }
}

fn push_round(
    outgoing: &[Arc<AsyncEdge>],
    status: StepStatus,
    outputs: &HashMap<String, Payload>,
    token: &InterruptToken,
) -> Result<(), Interrupted> {
    for edge in outgoing {
        let payload = edge.from_port().and_then(|port| outputs.get(port).cloned());
        let edge_status = if status.is_success() && edge.from_port().is_some() && payload.is_none() {
            StepStatus::Skip
        } else {
            status
        };
        edge.push(edge_status, payload, token)?;
    }
    Ok(())
}
