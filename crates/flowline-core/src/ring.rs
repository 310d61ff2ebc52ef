//! Fixed-capacity FIFO of in-flight packets, one per edge.
//!
//! The ring is the edge's delay line and its backpressure mechanism: storage
//! is allocated once at compile time and never grows, so a full ring simply
//! refuses new packets and the sender keeps its material for the next tick.

use crate::substance::SubstanceVector;

/// Default number of packets an edge can hold in flight.
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// Material in transit on an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlowPacket {
    pub substance: SubstanceVector,
    /// Seconds until the packet reaches the destination.
    pub remaining: f64,
}

impl FlowPacket {
    pub fn new(substance: SubstanceVector, remaining: f64) -> Self {
        Self {
            substance,
            remaining,
        }
    }
}

/// A fixed-capacity FIFO queue of [`FlowPacket`]s.
///
/// Only the oldest entry is reachable for mutation. Because every packet on an
/// edge is enqueued with the same delay, FIFO order is arrival order.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    /// Preallocated slots. Occupied slots are `head..head+len` modulo capacity.
    slots: Vec<FlowPacket>,
    /// Index of the oldest packet.
    head: usize,
    /// Number of queued packets.
    len: usize,
}

impl RingBuffer {
    /// Create an empty ring. A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![FlowPacket::default(); capacity],
            head: 0,
            len: 0,
        }
    }

    /// Maximum number of packets this ring can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append a packet at the tail. Returns `false` without touching the ring
    /// when it is already full.
    #[must_use = "a rejected packet must stay with the sender"]
    pub fn enqueue(&mut self, packet: FlowPacket) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = packet;
        self.len += 1;
        true
    }

    /// The oldest packet, if any.
    pub fn peek_head(&self) -> Option<&FlowPacket> {
        if self.len == 0 {
            return None;
        }
        Some(&self.slots[self.head])
    }

    /// Mutable access to the oldest packet (used to count down its delay).
    pub fn peek_head_mut(&mut self) -> Option<&mut FlowPacket> {
        if self.len == 0 {
            return None;
        }
        Some(&mut self.slots[self.head])
    }

    /// Remove and return the oldest packet.
    pub fn pop_head(&mut self) -> Option<FlowPacket> {
        if self.len == 0 {
            return None;
        }
        let packet = std::mem::take(&mut self.slots[self.head]);
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        Some(packet)
    }

    /// Aggregate substance of every queued packet. O(len).
    pub fn sum_in_flight(&self) -> SubstanceVector {
        let mut sum = SubstanceVector::ZERO;
        for packet in self.iter() {
            sum += packet.substance;
        }
        sum
    }

    /// Queued packets from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &FlowPacket> + '_ {
        let capacity = self.capacity();
        (0..self.len).map(move |i| &self.slots[(self.head + i) % capacity])
    }

    /// Drop every queued packet.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substance::Component;

    fn packet(amount: f64, remaining: f64) -> FlowPacket {
        FlowPacket::new(SubstanceVector::of(Component::Liquid, amount), remaining)
    }

    #[test]
    fn new_ring_is_empty() {
        let ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 4);
        assert!(ring.peek_head().is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let ring = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 1);
    }

    #[test]
    fn fifo_order_survives_wraparound() {
        let mut ring = RingBuffer::new(3);
        assert!(ring.enqueue(packet(1.0, 0.1)));
        assert!(ring.enqueue(packet(2.0, 0.1)));
        assert_eq!(ring.pop_head().unwrap().substance.total(), 1.0);
        assert!(ring.enqueue(packet(3.0, 0.1)));
        assert!(ring.enqueue(packet(4.0, 0.1)));

        let order: Vec<f64> = ring.iter().map(|p| p.substance.total()).collect();
        assert_eq!(order, vec![2.0, 3.0, 4.0]);

        assert_eq!(ring.pop_head().unwrap().substance.total(), 2.0);
        assert_eq!(ring.pop_head().unwrap().substance.total(), 3.0);
        assert_eq!(ring.pop_head().unwrap().substance.total(), 4.0);
        assert!(ring.pop_head().is_none());
    }

    #[test]
    fn enqueue_on_full_ring_is_rejected_without_mutation() {
        let mut ring = RingBuffer::new(2);
        assert!(ring.enqueue(packet(1.0, 0.5)));
        assert!(ring.enqueue(packet(2.0, 0.5)));
        assert!(ring.is_full());

        assert!(!ring.enqueue(packet(99.0, 0.5)));
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.sum_in_flight().total(), 3.0);
        assert_eq!(ring.peek_head().unwrap().substance.total(), 1.0);
    }

    #[test]
    fn sum_in_flight_aggregates_components() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.enqueue(FlowPacket::new(SubstanceVector::new(1.0, 0.0, 2.0, 0.0), 1.0)));
        assert!(ring.enqueue(FlowPacket::new(SubstanceVector::new(0.0, 3.0, 1.0, 0.5), 1.0)));

        let sum = ring.sum_in_flight();
        assert_eq!(sum, SubstanceVector::new(1.0, 3.0, 3.0, 0.5));
    }

    #[test]
    fn peek_head_mut_only_touches_oldest() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.enqueue(packet(1.0, 0.5)));
        assert!(ring.enqueue(packet(2.0, 0.5)));

        ring.peek_head_mut().unwrap().remaining -= 0.25;

        let remaining: Vec<f64> = ring.iter().map(|p| p.remaining).collect();
        assert_eq!(remaining, vec![0.25, 0.5]);
    }

    #[test]
    fn clear_empties_ring() {
        let mut ring = RingBuffer::new(2);
        assert!(ring.enqueue(packet(1.0, 0.5)));
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.sum_in_flight(), SubstanceVector::ZERO);
    }
}
