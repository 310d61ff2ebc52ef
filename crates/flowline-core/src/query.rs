//! Read-only query API for inspecting simulation state.
//!
//! Views are owned copies: no references into engine storage, so they can be
//! held across ticks, logged, or handed to another thread.

use crate::graph::{NodeState, UNLIMITED};
use crate::id::{EdgeIndex, NodeIndex};
use crate::substance::SubstanceVector;

// ---------------------------------------------------------------------------
// Node view
// ---------------------------------------------------------------------------

/// An aggregated, read-only view of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub index: NodeIndex,
    pub id: String,
    pub is_router: bool,
    pub state: NodeState,
    pub inbound: SubstanceVector,
    pub outbound: SubstanceVector,
    pub in_capacity: f64,
    pub out_capacity: f64,
    /// Router condition; `None` for basic nodes.
    pub condition: Option<bool>,
}

impl NodeView {
    pub fn inbound_total(&self) -> f64 {
        self.inbound.total()
    }

    pub fn outbound_total(&self) -> f64 {
        self.outbound.total()
    }

    /// Inbound fill as a 0..1 fraction. Routers always report 0.
    pub fn inbound_fill(&self) -> f64 {
        if self.in_capacity <= 0.0 || self.in_capacity >= UNLIMITED {
            return 0.0;
        }
        (self.inbound_total() / self.in_capacity).min(1.0)
    }
}

// ---------------------------------------------------------------------------
// Edge view
// ---------------------------------------------------------------------------

/// An aggregated, read-only view of a single edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeView {
    pub index: EdgeIndex,
    pub id: String,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub active: bool,
    /// Packets currently queued on the edge.
    pub packets_in_flight: usize,
    /// Ring capacity of the edge.
    pub packet_capacity: usize,
    /// Sum of every queued packet.
    pub in_flight: SubstanceVector,
}

impl EdgeView {
    pub fn in_flight_total(&self) -> f64 {
        self.in_flight.total()
    }

    /// True when the edge refuses new packets.
    pub fn is_saturated(&self) -> bool {
        self.packets_in_flight >= self.packet_capacity
    }
}
