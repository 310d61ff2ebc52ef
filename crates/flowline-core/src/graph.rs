//! Compiled flow graph: dense, index-addressed node and edge tables.
//!
//! A [`CompiledGraph`] is produced in one piece by
//! [`compile`](crate::compile::compile) and never changes shape afterwards.
//! Bags, states, active flags and ring contents are mutated in place by the
//! engine; nodes and edges are never added or removed.

use crate::id::{EdgeIndex, NodeIndex};
use crate::ring::RingBuffer;
use crate::substance::{SubstanceVector, YieldMatrix};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capacity and rate given to routers: large enough to never gate.
pub const UNLIMITED: f64 = 1e9;

// ---------------------------------------------------------------------------
// Node state
// ---------------------------------------------------------------------------

/// Per-tick activity of a node. The discriminant is the wire state code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Idle = 0,
    Running = 1,
    Blocked = 2,
}

impl NodeState {
    /// The 8-bit code published in snapshots.
    pub fn code(self) -> i8 {
        self as i8
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(NodeState::Idle),
            1 => Some(NodeState::Running),
            2 => Some(NodeState::Blocked),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Node records
// ---------------------------------------------------------------------------

/// Kind-specific node data.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A processing node.
    Basic {
        /// Units per second moved from the inbound to the outbound bag.
        rate: f64,
        /// Minimum inbound total before processing starts.
        start_threshold: f64,
        /// Optional conversion applied to processed material.
        yield_matrix: Option<YieldMatrix>,
    },
    /// A binary router. `branches` holds its outgoing edges in declaration
    /// order: branch 0 is taken when `condition` is true, branch 1 otherwise.
    Router {
        condition: bool,
        branches: Vec<EdgeIndex>,
    },
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub kind: NodeKind,
    pub inbound: SubstanceVector,
    pub outbound: SubstanceVector,
    pub in_capacity: f64,
    pub out_capacity: f64,
    pub state: NodeState,
}

impl NodeRecord {
    pub fn is_router(&self) -> bool {
        matches!(self.kind, NodeKind::Router { .. })
    }

    /// Processing rate in units per second. Routers pass everything through.
    pub fn rate(&self) -> f64 {
        match self.kind {
            NodeKind::Basic { rate, .. } => rate,
            NodeKind::Router { .. } => UNLIMITED,
        }
    }

    pub fn start_threshold(&self) -> f64 {
        match self.kind {
            NodeKind::Basic {
                start_threshold, ..
            } => start_threshold,
            NodeKind::Router { .. } => 0.0,
        }
    }

    pub fn yield_matrix(&self) -> Option<&YieldMatrix> {
        match &self.kind {
            NodeKind::Basic { yield_matrix, .. } => yield_matrix.as_ref(),
            NodeKind::Router { .. } => None,
        }
    }

    /// Router condition, or `None` for basic nodes.
    pub fn condition(&self) -> Option<bool> {
        match self.kind {
            NodeKind::Router { condition, .. } => Some(condition),
            NodeKind::Basic { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub id: String,
    pub from: NodeIndex,
    pub to: NodeIndex,
    /// Units per second the edge can accept.
    pub capacity: f64,
    /// Seconds a packet spends at the head of the ring before delivery.
    pub delay: f64,
    pub active: bool,
    pub ring: RingBuffer,
}

// ---------------------------------------------------------------------------
// CompiledGraph
// ---------------------------------------------------------------------------

/// Dense node and edge tables plus the id lookup maps.
#[derive(Debug, Clone, Default)]
pub struct CompiledGraph {
    pub(crate) nodes: Vec<NodeRecord>,
    pub(crate) edges: Vec<EdgeRecord>,
    pub(crate) node_lookup: HashMap<String, NodeIndex>,
    pub(crate) edge_lookup: HashMap<String, EdgeIndex>,
}

impl CompiledGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.node_lookup.get(id).copied()
    }

    pub fn edge_index(&self, id: &str) -> Option<EdgeIndex> {
        self.edge_lookup.get(id).copied()
    }

    pub fn node(&self, node: NodeIndex) -> Option<&NodeRecord> {
        self.nodes.get(node.index())
    }

    pub fn edge(&self, edge: EdgeIndex) -> Option<&EdgeRecord> {
        self.edges.get(edge.index())
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn edges(&self) -> &[EdgeRecord] {
        &self.edges
    }

    /// Node ids in index order.
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Edge ids in index order.
    pub fn edge_ids(&self) -> Vec<String> {
        self.edges.iter().map(|e| e.id.clone()).collect()
    }

    /// Outgoing edges of `node` in declaration order.
    pub fn outgoing(&self, node: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.from == node)
            .map(|(i, _)| EdgeIndex(i as u32))
    }

    /// Incoming edges of `node` in declaration order.
    pub fn incoming(&self, node: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.to == node)
            .map(|(i, _)| EdgeIndex(i as u32))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
