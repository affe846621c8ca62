//! Running an asynchronous inner pipeline inside an asynchronous node.
//!
//! The outer worker does not step the composite process. It starts the
//! inner workers, spawns a feeder that moves every outer input packet into
//! the input pads, and itself moves every round of output pad packets to
//! the outer edges. One packet per pad per round keeps inputs and outputs
//! paired.

use super::super_process::summarize_outputs;
use super::SuperProcess;
use crate::cancellation::InterruptToken;
use crate::core::{combine_statuses, Payload, StepStatus};
use crate::observability::SpanTimer;
use crate::pipeline::{AsyncNode, AsyncPipeline};
use std::collections::HashMap;
use std::thread;
use tracing::{debug, error, info, warn};

/// Drives `inner` on behalf of `node` until the stream ends.
///
/// When the inner pipeline fails while the outer inputs are still live,
/// the composite's recovery hook decides whether to reset and restart it.
/// A restart is announced downstream with a skip.
pub(crate) fn run_with_pads(node: &AsyncNode, inner: &AsyncPipeline, token: &InterruptToken) {
    debug!(node = %node.name(), inner = %inner.name(), "Relay started");
    node.run_state().enter();

    loop {
        if let Err(e) = inner.run_async() {
            error!(node = %node.name(), error = %e, "Inner pipeline did not start");
            break;
        }

        let attempt = token.child();
        thread::scope(|scope| {
            scope.spawn(|| feed(node, inner, &attempt));
            relay_outputs(node, inner, &attempt);
            attempt.cancel("relay finished");
        });
        inner.stop_workers("relay finished");

        if token.is_cancelled() || !recover(node) {
            break;
        }
        inner.clear_queues();
        if let Err(e) = inner.reset() {
            error!(node = %node.name(), error = %e, "Inner pipeline could not be reset");
            break;
        }
        info!(node = %node.name(), "Restarting inner pipeline");
        node.record(StepStatus::Skip);
        if node
            .push_outputs(StepStatus::Skip, &HashMap::new(), token)
            .is_err()
        {
            break;
        }
    }

    node.record(StepStatus::Failure);
    if node
        .push_outputs(StepStatus::Failure, &HashMap::new(), token)
        .is_err()
    {
        warn!(node = %node.name(), "Interrupted while forwarding end of stream");
    }
    node.run_state().leave();
    debug!(node = %node.name(), "Relay finished");
}

/// Asks the composite's hook for a restart, unless upstream has ended.
fn recover(node: &AsyncNode) -> bool {
    let upstream_ended = node
        .incoming()
        .iter()
        .any(|edge| !edge.is_optional() && edge.is_exhausted());
    if upstream_ended {
        return false;
    }
    node.node()
        .process()
        .lock()
        .as_super_process_mut()
        .is_some_and(SuperProcess::attempt_recovery)
}

/// Moves outer input packets into the input pads until a failure passes.
fn feed(node: &AsyncNode, inner: &AsyncPipeline, token: &InterruptToken) {
    let pads = inner.input_pads();
    if pads.is_empty() || node.incoming().is_empty() {
        return;
    }

    loop {
        let mut required = Vec::with_capacity(node.incoming().len());
        let mut inputs: HashMap<&str, Payload> = HashMap::new();
        for edge in node.incoming() {
            let Ok(packet) = edge.pop(token) else {
                return;
            };
            if !edge.is_optional() {
                required.push(packet.status);
            }
            if let (Some(port), Some(payload)) = (edge.to_port(), packet.payload) {
                inputs.insert(port, payload);
            }
        }

        let status = combine_statuses(required);
        for pad in &pads {
            let (pad_status, payload) = match (status, inputs.remove(*pad)) {
                (StepStatus::Success, Some(payload)) => (StepStatus::Success, Some(payload)),
                (StepStatus::Success, None) => (StepStatus::Skip, None),
                (other, _) => (other, None),
            };
            if let Err(e) = inner.push_input_pad(pad, pad_status, payload, token) {
                debug!(node = %node.name(), pad, error = %e, "Feeder stopped");
                return;
            }
        }
        if status == StepStatus::Failure {
            return;
        }
    }
}

/// Moves rounds of output pad packets to the outer edges until the inner
/// pipeline fails or the relay is interrupted.
fn relay_outputs(node: &AsyncNode, inner: &AsyncPipeline, token: &InterruptToken) {
    let pads = inner.output_pads();
    if pads.is_empty() {
        inner.wait();
        return;
    }

    loop {
        let timer = SpanTimer::start(node.name());
        let mut statuses = Vec::with_capacity(pads.len());
        let mut outputs = HashMap::new();
        for pad in &pads {
            match inner.pop_output_pad(pad, token) {
                Ok(packet) => {
                    statuses.push(packet.status);
                    if let Some(payload) = packet.payload {
                        outputs.insert((*pad).to_string(), payload);
                    }
                }
                Err(_) => return,
            }
        }

        let status = summarize_outputs(&statuses);
        if status == StepStatus::Failure {
            return;
        }
        node.node().stats().record(timer.finish());
        node.record(status);
        if node.push_outputs(status, &outputs, token).is_err() {
            return;
        }
    }
}
