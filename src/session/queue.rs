//! Outbound telemetry queue with at-least-once tracking.
//!
//! Messages wait in `pending` until a connection is available, move to
//! `in_flight` once published at QoS 1, and leave on acknowledgement. Unacked
//! messages are republished after a fixed interval, a bounded number of times.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::protocol::encode_properties;
use crate::wire::{QosLevel, WireEngine};

/// Age at which an unacknowledged publish is resent. The comparison is
/// strict: a message exactly this old stays in flight for one more cycle.
pub const RESEND_INTERVAL: Duration = Duration::from_secs(120);
/// Resend attempts before a message is reported failed.
pub const MAX_RESEND_COUNT: u32 = 2;

/// A telemetry message queued by the application.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub properties: BTreeMap<String, String>,
}

/// Terminal outcome reported for a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Acknowledged by the broker.
    Ok,
    /// Gave up after exhausting resends or a terminal connection failure.
    Failed,
    /// Session torn down with the message still queued.
    Destroyed,
}

#[derive(Debug)]
struct InFlight {
    message: OutboundMessage,
    packet_id: u16,
    published_at: Instant,
    resend_count: u32,
}

/// FIFO dispatch queue. Order is preserved from `enqueue` through publish.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    pending: VecDeque<OutboundMessage>,
    in_flight: VecDeque<InFlight>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, message: OutboundMessage) {
        self.pending.push_back(message);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Publishes every pending message in order. Stops at the first publish
    /// failure, leaving that message and its successors pending for the next
    /// cycle.
    pub fn drain_pending<F>(
        &mut self,
        engine: &mut dyn WireEngine,
        now: Instant,
        mut next_packet_id: F,
        topic: &str,
    ) where
        F: FnMut() -> u16,
    {
        while let Some(message) = self.pending.pop_front() {
            let packet_id = next_packet_id();
            let full_topic = encode_properties(topic, &message.properties);
            match engine.publish(packet_id, &full_topic, QosLevel::AtLeastOnce, &message.payload)
            {
                Ok(()) => {
                    debug!(packet_id, "telemetry published");
                    self.in_flight.push_back(InFlight {
                        message,
                        packet_id,
                        published_at: now,
                        resend_count: 0,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "publish deferred");
                    self.pending.push_front(message);
                    return;
                }
            }
        }
    }

    /// Removes and returns the message acknowledged by `packet_id`.
    pub fn acknowledge(&mut self, packet_id: u16) -> Option<OutboundMessage> {
        let index = self
            .in_flight
            .iter()
            .position(|entry| entry.packet_id == packet_id)?;
        self.in_flight.remove(index).map(|entry| entry.message)
    }

    /// Republishes stale in-flight messages and returns those that exhausted
    /// their resend budget. A failed republish leaves the entry untouched for
    /// the next scan.
    pub fn scan_timeouts<F>(
        &mut self,
        engine: &mut dyn WireEngine,
        now: Instant,
        mut next_packet_id: F,
        topic: &str,
    ) -> Vec<OutboundMessage>
    where
        F: FnMut() -> u16,
    {
        let mut exhausted = Vec::new();
        let mut index = 0;
        while index < self.in_flight.len() {
            let age = now.duration_since(self.in_flight[index].published_at);
            if age <= RESEND_INTERVAL {
                index += 1;
                continue;
            }
            if self.in_flight[index].resend_count >= MAX_RESEND_COUNT {
                if let Some(entry) = self.in_flight.remove(index) {
                    warn!(packet_id = entry.packet_id, "message abandoned after resend limit");
                    exhausted.push(entry.message);
                }
                continue;
            }
            let packet_id = next_packet_id();
            let entry = &self.in_flight[index];
            let full_topic = encode_properties(topic, &entry.message.properties);
            match engine.publish(
                packet_id,
                &full_topic,
                QosLevel::AtLeastOnce,
                &entry.message.payload,
            ) {
                Ok(()) => {
                    let entry = &mut self.in_flight[index];
                    debug!(
                        old_packet_id = entry.packet_id,
                        packet_id, resend = entry.resend_count + 1, "telemetry resent"
                    );
                    entry.packet_id = packet_id;
                    entry.published_at = now;
                    entry.resend_count += 1;
                }
                Err(e) => {
                    warn!(error = %e, "resend deferred");
                }
            }
            index += 1;
        }
        exhausted
    }

    /// Empties both queues, in-flight first, preserving publish order within
    /// each. Used when tearing the session down.
    pub fn drain_all(&mut self) -> Vec<OutboundMessage> {
        let mut drained: Vec<OutboundMessage> =
            self.in_flight.drain(..).map(|entry| entry.message).collect();
        drained.extend(self.pending.drain(..));
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockEngine;

    fn message(tag: &str) -> OutboundMessage {
        OutboundMessage {
            payload: tag.as_bytes().to_vec(),
            properties: BTreeMap::new(),
        }
    }

    fn counter() -> impl FnMut() -> u16 {
        let mut next = 0u16;
        move || {
            next += 1;
            next
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(message("a"));
        queue.enqueue(message("b"));
        queue.enqueue(message("c"));

        let mut engine = MockEngine::new();
        queue.drain_pending(&mut engine, Instant::now(), counter(), "devices/d/messages/events/");

        let published = engine.handle().publishes();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].payload, b"a");
        assert_eq!(published[2].payload, b"c");
        assert_eq!(queue.in_flight_len(), 3);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_publish_failure_leaves_message_pending() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(message("a"));
        queue.enqueue(message("b"));

        let mut engine = MockEngine::new();
        engine.handle().fail_publishes(1);
        queue.drain_pending(&mut engine, Instant::now(), counter(), "t/");

        assert_eq!(queue.pending_len(), 2);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[test]
    fn test_acknowledge_removes_matching_entry() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(message("a"));
        let mut engine = MockEngine::new();
        queue.drain_pending(&mut engine, Instant::now(), counter(), "t/");

        assert!(queue.acknowledge(99).is_none());
        let acked = queue.acknowledge(1).expect("ack");
        assert_eq!(acked.payload, b"a");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_resend_only_after_interval_strictly_exceeded() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(message("a"));
        let mut engine = MockEngine::new();
        let t0 = Instant::now();
        let mut ids = counter();
        queue.drain_pending(&mut engine, t0, &mut ids, "t/");

        let failed = queue.scan_timeouts(&mut engine, t0 + RESEND_INTERVAL, &mut ids, "t/");
        assert!(failed.is_empty());
        assert_eq!(engine.handle().publishes().len(), 1);

        let failed = queue.scan_timeouts(
            &mut engine,
            t0 + RESEND_INTERVAL + Duration::from_secs(1),
            &mut ids,
            "t/",
        );
        assert!(failed.is_empty());
        assert_eq!(engine.handle().publishes().len(), 2);
    }

    #[test]
    fn test_message_fails_after_resend_budget() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(message("a"));
        let mut engine = MockEngine::new();
        let t0 = Instant::now();
        let mut ids = counter();
        queue.drain_pending(&mut engine, t0, &mut ids, "t/");

        let step = RESEND_INTERVAL + Duration::from_secs(1);
        assert!(queue.scan_timeouts(&mut engine, t0 + step, &mut ids, "t/").is_empty());
        assert!(queue
            .scan_timeouts(&mut engine, t0 + step * 2, &mut ids, "t/")
            .is_empty());
        let failed = queue.scan_timeouts(&mut engine, t0 + step * 3, &mut ids, "t/");
        assert_eq!(failed.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_all_in_flight_first() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(message("a"));
        let mut engine = MockEngine::new();
        queue.drain_pending(&mut engine, Instant::now(), counter(), "t/");
        queue.enqueue(message("b"));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload, b"a");
        assert_eq!(drained[1].payload, b"b");
    }
}
