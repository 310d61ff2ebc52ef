//! The flow engine: owns a compiled graph and advances it by fixed steps.
//!
//! # Five-Phase Pipeline
//!
//! Each [`FlowEngine::step`] runs, in order:
//! 1. **Gating** -- routers activate exactly one of their first two outgoing
//!    edges; every other router edge is inactive, all remaining edges active.
//! 2. **Deliver** -- the head packet of each ring counts down; expired packets
//!    are popped into the destination's inbound bag.
//! 3. **Process** -- nodes move material from inbound to outbound at their
//!    rate, applying their yield matrix.
//! 4. **Send** -- active edges pull from the source outbound bag, limited by
//!    edge capacity and destination space, and enqueue one packet.
//! 5. **Block propagation** -- nodes whose inbound bag is nearly full are
//!    marked Blocked.
//!
//! Then the simulation clock advances by `dt` and the tick counter by one.
//! Processing precedes sending, so material can cross a node in one tick.

use crate::compile::{ConstructionError, compile};
use crate::description::GraphDescription;
use crate::graph::{CompiledGraph, EdgeRecord, NodeKind, NodeRecord, NodeState};
use crate::id::{EdgeIndex, NodeIndex};
use crate::query::{EdgeView, NodeView};
use crate::ring::FlowPacket;
use crate::substance::{EPSILON, SubstanceVector};

/// Tolerance on packet countdowns, absorbing drift from summing many `dt`s.
pub const TIME_EPSILON: f64 = 1e-9;

/// Inbound fill fraction at which a node reports Blocked.
pub const BLOCK_FRACTION: f64 = 0.95;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by direct engine mutations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("no node at index {0:?}")]
    UnknownNode(NodeIndex),

    #[error("feed for node '{0}' must be finite and non-negative")]
    InvalidAmount(String),

    #[error("node '{0}' is not a router")]
    NotARouter(String),
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// One simulation instance. Engines share nothing, so any number can run
/// side by side.
#[derive(Debug, Clone)]
pub struct FlowEngine {
    graph: CompiledGraph,
    sim_time: f64,
    ticks: u64,
}

impl FlowEngine {
    /// Wrap an already compiled graph. The clock starts at zero.
    pub fn new(graph: CompiledGraph) -> Self {
        Self {
            graph,
            sim_time: 0.0,
            ticks: 0,
        }
    }

    /// Compile `desc` with default options and wrap the result.
    pub fn from_description(desc: &GraphDescription) -> Result<Self, ConstructionError> {
        compile(desc).map(Self::new)
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Simulated seconds elapsed since construction.
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    /// Steps run since construction.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.graph.node_index(id)
    }

    pub fn edge_index(&self, id: &str) -> Option<EdgeIndex> {
        self.graph.edge_index(id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.graph.node_ids()
    }

    pub fn edge_ids(&self) -> Vec<String> {
        self.graph.edge_ids()
    }

    pub fn node(&self, node: NodeIndex) -> Option<&NodeRecord> {
        self.graph.node(node)
    }

    pub fn edge(&self, edge: EdgeIndex) -> Option<&EdgeRecord> {
        self.graph.edge(edge)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add `substance` to a node's inbound bag. Deposits are not capacity
    /// checked; overfilling shows up as Blocked on the next tick. A deposit
    /// that would push the bag past `f64` range is rejected.
    pub fn feed(&mut self, node: NodeIndex, substance: SubstanceVector) -> Result<(), FeedError> {
        let record = self
            .graph
            .nodes
            .get_mut(node.index())
            .ok_or(FeedError::UnknownNode(node))?;
        if !substance.is_finite() || !substance.is_non_negative() {
            return Err(FeedError::InvalidAmount(record.id.clone()));
        }
        let mut filled = record.inbound;
        filled += substance;
        if !filled.is_finite() || !filled.total().is_finite() {
            return Err(FeedError::InvalidAmount(record.id.clone()));
        }
        record.inbound = filled;
        Ok(())
    }

    /// Set a router's condition. Takes effect at the next gating phase.
    pub fn set_router_condition(&mut self, node: NodeIndex, value: bool) -> Result<(), FeedError> {
        let record = self
            .graph
            .nodes
            .get_mut(node.index())
            .ok_or(FeedError::UnknownNode(node))?;
        match &mut record.kind {
            NodeKind::Router { condition, .. } => {
                *condition = value;
                Ok(())
            }
            NodeKind::Basic { .. } => Err(FeedError::NotARouter(record.id.clone())),
        }
    }

    // -----------------------------------------------------------------------
    // Step
    // -----------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds.
    ///
    /// A negative or non-finite `dt` is ignored.
    pub fn step(&mut self, dt: f64) {
        if !dt.is_finite() || dt < 0.0 {
            tracing::warn!(dt, "ignoring invalid step duration");
            return;
        }

        // Phase 1: Gating -- choose router branches.
        self.phase_gating();

        // Phase 2: Deliver -- expire head packets into destinations.
        self.phase_deliver(dt);

        // Phase 3: Process -- inbound to outbound at node rate.
        self.phase_process(dt);

        // Phase 4: Send -- outbound into edge rings.
        self.phase_send(dt);

        // Phase 5: Block propagation -- nearly full inbound bags block.
        self.phase_block_propagation();

        self.sim_time += dt;
        self.ticks += 1;
    }

    // -----------------------------------------------------------------------
    // Phase 1: Gating
    // -----------------------------------------------------------------------

    fn phase_gating(&mut self) {
        let graph = &mut self.graph;
        for edge in graph.edges.iter_mut() {
            edge.active = true;
        }
        for node in &graph.nodes {
            let NodeKind::Router {
                condition,
                branches,
            } = &node.kind
            else {
                continue;
            };
            if branches.len() < 2 {
                continue;
            }
            let chosen = if *condition { 0 } else { 1 };
            for (slot, edge) in branches.iter().enumerate() {
                graph.edges[edge.index()].active = slot == chosen;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase 2: Deliver
    // -----------------------------------------------------------------------

    fn phase_deliver(&mut self, dt: f64) {
        let graph = &mut self.graph;
        for edge in graph.edges.iter_mut() {
            // Only the head counts down. A packet starts its countdown once
            // everything queued ahead of it has been delivered.
            let Some(head) = edge.ring.peek_head_mut() else {
                continue;
            };
            head.remaining -= dt;

            let mut delivered = SubstanceVector::ZERO;
            while edge
                .ring
                .peek_head()
                .is_some_and(|p| p.remaining <= TIME_EPSILON)
            {
                if let Some(packet) = edge.ring.pop_head() {
                    delivered += packet.substance;
                }
                if let Some(next) = edge.ring.peek_head_mut() {
                    next.remaining -= dt;
                }
            }
            graph.nodes[edge.to.index()].inbound += delivered;
        }
    }

    // -----------------------------------------------------------------------
    // Phase 3: Process
    // -----------------------------------------------------------------------

    fn phase_process(&mut self, dt: f64) {
        for node in self.graph.nodes.iter_mut() {
            let in_total = node.inbound.total();
            if in_total < node.start_threshold() {
                node.state = NodeState::Idle;
                continue;
            }
            if node.outbound.total() >= node.out_capacity - EPSILON {
                node.state = NodeState::Blocked;
                continue;
            }
            node.state = NodeState::Running;

            let amount = (node.rate() * dt).min(in_total);
            if amount <= EPSILON {
                continue;
            }
            let taken = node.inbound.take(amount);
            let produced = match node.yield_matrix() {
                Some(matrix) => matrix.apply(&taken),
                None => taken,
            };
            node.outbound += produced;
        }
    }

    // -----------------------------------------------------------------------
    // Phase 4: Send
    // -----------------------------------------------------------------------

    fn phase_send(&mut self, dt: f64) {
        let graph = &mut self.graph;
        for edge in graph.edges.iter_mut() {
            if !edge.active || edge.ring.is_full() {
                continue;
            }
            let from = edge.from.index();
            let to = edge.to.index();

            let dest = &graph.nodes[to];
            let dest_space = (dest.in_capacity - dest.inbound.total()).max(0.0);
            let amount = (edge.capacity * dt)
                .min(graph.nodes[from].outbound.total())
                .min(dest_space);
            if amount <= EPSILON {
                continue;
            }

            let taken = graph.nodes[from].outbound.take(amount);
            let accepted = edge.ring.enqueue(FlowPacket::new(taken, edge.delay));
            debug_assert!(accepted, "ring was checked for space");
        }
    }

    // -----------------------------------------------------------------------
    // Phase 5: Block propagation
    // -----------------------------------------------------------------------

    fn phase_block_propagation(&mut self) {
        for node in self.graph.nodes.iter_mut() {
            if node.inbound.total() >= BLOCK_FRACTION * node.in_capacity {
                node.state = NodeState::Blocked;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Owned view of a node.
    pub fn node_view(&self, node: NodeIndex) -> Option<NodeView> {
        let record = self.graph.node(node)?;
        Some(NodeView {
            index: node,
            id: record.id.clone(),
            is_router: record.is_router(),
            state: record.state,
            inbound: record.inbound,
            outbound: record.outbound,
            in_capacity: record.in_capacity,
            out_capacity: record.out_capacity,
            condition: record.condition(),
        })
    }

    /// Owned view of an edge.
    pub fn edge_view(&self, edge: EdgeIndex) -> Option<EdgeView> {
        let record = self.graph.edge(edge)?;
        Some(EdgeView {
            index: edge,
            id: record.id.clone(),
            from: record.from,
            to: record.to,
            active: record.active,
            packets_in_flight: record.ring.len(),
            packet_capacity: record.ring.capacity(),
            in_flight: record.ring.sum_in_flight(),
        })
    }

    /// Views of every node in index order.
    pub fn node_views(&self) -> Vec<NodeView> {
        (0..self.graph.node_count())
            .filter_map(|i| self.node_view(NodeIndex(i as u32)))
            .collect()
    }

    /// Views of every edge in index order.
    pub fn edge_views(&self) -> Vec<EdgeView> {
        (0..self.graph.edge_count())
            .filter_map(|i| self.edge_view(EdgeIndex(i as u32)))
            .collect()
    }

    /// All material in the system: every bag plus everything in flight.
    pub fn total_substance(&self) -> SubstanceVector {
        let mut total = SubstanceVector::ZERO;
        for node in &self.graph.nodes {
            total += node.inbound;
            total += node.outbound;
        }
        for edge in &self.graph.edges {
            total += edge.ring.sum_in_flight();
        }
        total
    }
}

// ===========================================================================
// Tests
// ===========================================================================
