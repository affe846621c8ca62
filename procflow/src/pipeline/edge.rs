//! Bounded queues between asynchronous nodes.
//!
//! An [`AsyncEdge`] is a crossbeam channel carrying `(status, payload)`
//! packets from one worker to another. Pushing into a full edge blocks the
//! producer, which is how backpressure travels upstream. Once a failure has
//! been popped and the queue is drained, the edge is exhausted: every later
//! pop returns failure without blocking.
//!
//! Both blocking operations also wait on an [`InterruptToken`] so a stopping
//! pipeline can wake threads parked on an edge.

use crate::cancellation::InterruptToken;
use crate::core::{Payload, StepStatus};
use crate::errors::{Interrupted, LifecycleError};
use crossbeam_channel::{select, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Default queue capacity of an edge.
pub const DEFAULT_EDGE_CAPACITY: usize = 10;

/// One item travelling on an edge.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Status of the producer for this cycle.
    pub status: StepStatus,
    /// The value, present only on success.
    pub payload: Option<Payload>,
}

impl Packet {
    /// Creates a packet, dropping the payload unless the status is success.
    #[must_use]
    pub fn new(status: StepStatus, payload: Option<Payload>) -> Self {
        let payload = if status.is_success() { payload } else { None };
        Self { status, payload }
    }

    /// The end-of-stream packet.
    #[must_use]
    pub fn failure() -> Self {
        Self::new(StepStatus::Failure, None)
    }
}

/// A bounded FIFO edge between two asynchronous nodes.
#[derive(Debug)]
pub struct AsyncEdge {
    producer: String,
    consumer: String,
    from_port: Option<String>,
    to_port: Option<String>,
    optional: bool,
    capacity: usize,
    type_name: Option<&'static str>,
    sender: Sender<Packet>,
    receiver: Receiver<Packet>,
    exhausted: AtomicBool,
    stalls: AtomicU64,
    stalled_micros: AtomicU64,
    peak_len: AtomicUsize,
}

impl AsyncEdge {
    /// Creates an edge holding at most `capacity` packets; 0 means unbounded.
    #[must_use]
    pub fn new(producer: impl Into<String>, consumer: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = if capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(capacity)
        };
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
            from_port: None,
            to_port: None,
            optional: false,
            capacity,
            type_name: None,
            sender,
            receiver,
            exhausted: AtomicBool::new(false),
            stalls: AtomicU64::new(0),
            stalled_micros: AtomicU64::new(0),
            peak_len: AtomicUsize::new(0),
        }
    }

    /// Sets the connected ports and the carried type.
    #[must_use]
    pub fn with_ports(
        mut self,
        from_port: impl Into<String>,
        to_port: impl Into<String>,
        type_name: &'static str,
    ) -> Self {
        self.from_port = Some(from_port.into());
        self.to_port = Some(to_port.into());
        self.type_name = Some(type_name);
        self
    }

    /// Marks the edge optional.
    #[must_use]
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Pushes a packet, blocking while the queue is full.
    pub fn push(
        &self,
        status: StepStatus,
        payload: Option<Payload>,
        token: &InterruptToken,
    ) -> Result<(), Interrupted> {
        let packet = Packet::new(status, payload);
        match self.sender.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                self.stalls.fetch_add(1, Ordering::Relaxed);
                trace!(
                    producer = %self.producer,
                    consumer = %self.consumer,
                    queue_len = self.len(),
                    "Edge full, producer blocked"
                );
                let started = Instant::now();
                let sent = select! {
                    send(self.sender, packet) -> res => res.is_ok(),
                    recv(token.signal()) -> _ => false,
                };
                let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
                self.stalled_micros.fetch_add(micros, Ordering::Relaxed);
                if !sent {
                    return Err(Interrupted);
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(Interrupted),
        }
        self.peak_len.fetch_max(self.receiver.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Pops the oldest packet, blocking while the queue is empty.
    ///
    /// Returns a failure packet immediately once the edge is exhausted.
    pub fn pop(&self, token: &InterruptToken) -> Result<Packet, Interrupted> {
        if self.exhausted.load(Ordering::Acquire) {
            return Ok(Packet::failure());
        }
        let packet = match self.receiver.try_recv() {
            Ok(packet) => packet,
            Err(TryRecvError::Empty) => select! {
                recv(self.receiver) -> res => res.map_err(|_| Interrupted)?,
                recv(token.signal()) -> _ => return Err(Interrupted),
            },
            Err(TryRecvError::Disconnected) => return Err(Interrupted),
        };
        if packet.status.is_terminal() && self.receiver.is_empty() {
            self.exhausted.store(true, Ordering::Release);
            trace!(producer = %self.producer, consumer = %self.consumer, "Edge exhausted");
        }
        Ok(packet)
    }

    /// Producer node name.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Consumer node name.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Producer port, `None` for an execution dependency.
    #[must_use]
    pub fn from_port(&self) -> Option<&str> {
        self.from_port.as_deref()
    }

    /// Consumer port, `None` for an execution dependency.
    #[must_use]
    pub fn to_port(&self) -> Option<&str> {
        self.to_port.as_deref()
    }

    /// Readable name of the carried type.
    #[must_use]
    pub fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    /// Whether a non-success on this edge leaves the consumer alone.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Maximum queue length; 0 means unbounded.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Returns true once a drained failure has been observed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Number of pushes that found the queue full.
    #[must_use]
    pub fn stall_count(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Total time producers spent blocked on this edge.
    #[must_use]
    pub fn stalled_time(&self) -> Duration {
        Duration::from_micros(self.stalled_micros.load(Ordering::Relaxed))
    }

    /// Largest queue length seen right after a push.
    #[must_use]
    pub fn peak_len(&self) -> usize {
        self.peak_len.load(Ordering::Relaxed)
    }

    /// Clears the exhausted flag so the edge can carry a new stream.
    ///
    /// Refused while packets are still queued.
    pub fn reset(&self) -> Result<(), LifecycleError> {
        let queued = self.len();
        if queued > 0 {
            return Err(LifecycleError::QueuesNotEmpty {
                node: self.consumer.clone(),
                queued,
            });
        }
        self.exhausted.store(false, Ordering::Release);
        Ok(())
    }

    /// Discards queued packets and clears the exhausted flag.
    pub(crate) fn drain(&self) -> usize {
        let dropped = self.receiver.try_iter().count();
        self.exhausted.store(false, Ordering::Release);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn value(packet: &Packet) -> Option<i32> {
        packet.payload.as_ref().and_then(|p| p.downcast_ref::<i32>().copied())
    }

    #[test]
    fn test_push_pop_in_order() {
        let token = InterruptToken::new();
        let edge = AsyncEdge::new("a", "b", 4);
        for i in 0..3 {
            edge.push(StepStatus::Success, Some(Payload::new(i)), &token).unwrap();
        }
        assert_eq!(edge.len(), 3);
        for i in 0..3 {
            assert_eq!(value(&edge.pop(&token).unwrap()), Some(i));
        }
        assert!(edge.is_empty());
    }

    #[test]
    fn test_payload_dropped_unless_success() {
        let token = InterruptToken::new();
        let edge = AsyncEdge::new("a", "b", 2);
        edge.push(StepStatus::Skip, Some(Payload::new(1)), &token).unwrap();
        let packet = edge.pop(&token).unwrap();
        assert_eq!(packet.status, StepStatus::Skip);
        assert!(packet.payload.is_none());
    }

    #[test]
    fn test_exhausted_after_drained_failure() {
        let token = InterruptToken::new();
        let edge = AsyncEdge::new("a", "b", 2);
        edge.push(StepStatus::Failure, None, &token).unwrap();
        assert_eq!(edge.pop(&token).unwrap().status, StepStatus::Failure);
        assert!(edge.is_exhausted());

        token.cancel("a blocking pop would now be interrupted");
        for _ in 0..3 {
            assert_eq!(edge.pop(&token).unwrap().status, StepStatus::Failure);
        }
    }

    #[test]
    fn test_failure_with_items_behind_is_not_sticky() {
        let token = InterruptToken::new();
        let edge = AsyncEdge::new("a", "b", 4);
        edge.push(StepStatus::Failure, None, &token).unwrap();
        edge.push(StepStatus::Success, Some(Payload::new(9)), &token).unwrap();
        assert_eq!(edge.pop(&token).unwrap().status, StepStatus::Failure);
        assert!(!edge.is_exhausted());
        assert_eq!(value(&edge.pop(&token).unwrap()), Some(9));
    }

    #[test]
    fn test_full_edge_blocks_until_pop() {
        let token = InterruptToken::new();
        let edge = std::sync::Arc::new(AsyncEdge::new("a", "b", 1));
        edge.push(StepStatus::Success, Some(Payload::new(1)), &token).unwrap();

        let producer = {
            let edge = edge.clone();
            let token = token.clone();
            thread::spawn(move || edge.push(StepStatus::Success, Some(Payload::new(2)), &token))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(edge.len(), 1);

        assert_eq!(value(&edge.pop(&token).unwrap()), Some(1));
        producer.join().unwrap().unwrap();
        assert_eq!(value(&edge.pop(&token).unwrap()), Some(2));
        assert_eq!(edge.stall_count(), 1);
        assert!(edge.stalled_time() > Duration::ZERO);
    }

    #[test]
    fn test_interrupt_wakes_blocked_pop() {
        let token = InterruptToken::new();
        let edge = std::sync::Arc::new(AsyncEdge::new("a", "b", 1));
        let consumer = {
            let edge = edge.clone();
            let token = token.clone();
            thread::spawn(move || edge.pop(&token).map(|p| p.status))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel("stop");
        assert_eq!(consumer.join().unwrap(), Err(Interrupted));
    }

    #[test]
    fn test_reset_refused_with_queued_items() {
        let token = InterruptToken::new();
        let edge = AsyncEdge::new("a", "b", 2);
        edge.push(StepStatus::Success, Some(Payload::new(1)), &token).unwrap();
        assert!(matches!(
            edge.reset(),
            Err(LifecycleError::QueuesNotEmpty { queued: 1, .. })
        ));
        assert_eq!(edge.drain(), 1);
        assert!(edge.reset().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let token = InterruptToken::new();
        let edge = AsyncEdge::new("a", "b", 0);
        for i in 0..100 {
            edge.push(StepStatus::Success, Some(Payload::new(i)), &token).unwrap();
        }
        assert_eq!(edge.len(), 100);
        assert_eq!(edge.stall_count(), 0);
    }
}
