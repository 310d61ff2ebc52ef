//! Snapshot publishing and the binary snapshot codec.
//!
//! A [`SnapshotBinary`] is a set of flat arrays positionally aligned with the
//! node and edge id tables. The publisher allocates fresh arrays on every
//! call and hands them over by value; it keeps nothing, so the receiver owns
//! the snapshot outright.
//!
//! On the wire a snapshot is an 8-byte header (magic, version, both
//! little-endian `u32`) followed by a `bitcode` payload.

use crate::engine::FlowEngine;
use crate::graph::{NodeRecord, NodeState};
use crate::substance::Component;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a flowline snapshot frame.
pub const SNAPSHOT_MAGIC: u32 = 0xF10E_5A01;

/// Current wire format version. Increment when breaking the payload layout.
pub const FORMAT_VERSION: u32 = 1;

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DeserializeError {
    #[error("data too short for snapshot header")]
    TooShort,
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("array '{field}' has {got} entries, expected {expected}")]
    Misaligned {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
}

impl SnapshotHeader {
    pub fn current() -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DeserializeError> {
        let (Some(magic), Some(version)) = (data.get(0..4), data.get(4..8)) else {
            return Err(DeserializeError::TooShort);
        };
        let word = |bytes: &[u8]| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(bytes);
            u32::from_le_bytes(buf)
        };
        Ok(Self {
            magic: word(magic),
            version: word(version),
        })
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SnapshotBinary
// ---------------------------------------------------------------------------

/// One published snapshot. Per-node arrays are indexed by node index and
/// per-edge arrays by edge index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBinary {
    /// State codes: 0 Idle, 1 Running, 2 Blocked.
    pub node_states: Vec<i8>,
    pub node_inbound_total: Vec<f32>,
    pub node_outbound_total: Vec<f32>,
    pub node_tracked_a: Vec<f32>,
    pub node_tracked_b: Vec<f32>,
    /// 1 when the edge is active, 0 otherwise.
    pub edge_active: Vec<i8>,
    pub edge_in_flight_total: Vec<f32>,
    pub sim_time: f64,
    /// Present only on the first publish after ids were requested.
    pub node_ids: Option<Vec<String>>,
    pub edge_ids: Option<Vec<String>>,
}

impl SnapshotBinary {
    pub fn node_count(&self) -> usize {
        self.node_states.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_active.len()
    }

    pub fn node_state(&self, index: usize) -> Option<NodeState> {
        self.node_states
            .get(index)
            .and_then(|&code| NodeState::from_code(code))
    }

    pub fn has_ids(&self) -> bool {
        self.node_ids.is_some() && self.edge_ids.is_some()
    }

    /// Check that every array has the length its table implies.
    pub fn check_alignment(&self) -> Result<(), DeserializeError> {
        let nodes = self.node_count();
        let edges = self.edge_count();
        let check = |field: &'static str, expected: usize, got: usize| {
            if expected == got {
                Ok(())
            } else {
                Err(DeserializeError::Misaligned {
                    field,
                    expected,
                    got,
                })
            }
        };
        check("node_inbound_total", nodes, self.node_inbound_total.len())?;
        check("node_outbound_total", nodes, self.node_outbound_total.len())?;
        check("node_tracked_a", nodes, self.node_tracked_a.len())?;
        check("node_tracked_b", nodes, self.node_tracked_b.len())?;
        check("edge_in_flight_total", edges, self.edge_in_flight_total.len())?;
        if let Some(ids) = &self.node_ids {
            check("node_ids", nodes, ids.len())?;
        }
        if let Some(ids) = &self.edge_ids {
            check("edge_ids", edges, ids.len())?;
        }
        Ok(())
    }

    /// Encode as a header-prefixed bitcode frame.
    pub fn encode(&self) -> Result<Vec<u8>, SerializeError> {
        let payload =
            bitcode::serialize(self).map_err(|e| SerializeError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&SnapshotHeader::current().to_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a frame produced by [`encode`](Self::encode). The header is
    /// validated before the payload is touched.
    pub fn decode(data: &[u8]) -> Result<Self, DeserializeError> {
        SnapshotHeader::from_bytes(data)?.validate()?;
        let snapshot: SnapshotBinary = bitcode::deserialize(&data[HEADER_LEN..])
            .map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.check_alignment()?;
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tracked components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BagSide {
    Inbound,
    Outbound,
}

/// One component of one bag, published per node as a tracked column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedComponent {
    pub bag: BagSide,
    pub component: Component,
}

impl TrackedComponent {
    pub fn new(bag: BagSide, component: Component) -> Self {
        Self { bag, component }
    }

    fn read(&self, node: &NodeRecord) -> f64 {
        match self.bag {
            BagSide::Inbound => node.inbound.get(self.component),
            BagSide::Outbound => node.outbound.get(self.component),
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Builds snapshots from an engine.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    tracked_a: TrackedComponent,
    tracked_b: TrackedComponent,
    ids_requested: bool,
}

impl SnapshotPublisher {
    /// Track inbound liquid (A) and outbound gas (B).
    pub fn new() -> Self {
        Self::with_tracked(
            TrackedComponent::new(BagSide::Inbound, Component::Liquid),
            TrackedComponent::new(BagSide::Outbound, Component::Gas),
        )
    }

    pub fn with_tracked(tracked_a: TrackedComponent, tracked_b: TrackedComponent) -> Self {
        Self {
            tracked_a,
            tracked_b,
            ids_requested: false,
        }
    }

    pub fn tracked(&self) -> (TrackedComponent, TrackedComponent) {
        (self.tracked_a, self.tracked_b)
    }

    /// Include the id tables in the next snapshot only.
    pub fn request_ids(&mut self) {
        self.ids_requested = true;
    }

    pub fn ids_pending(&self) -> bool {
        self.ids_requested
    }

    /// Scan the engine into a new snapshot.
    pub fn publish(&mut self, engine: &FlowEngine) -> SnapshotBinary {
        let graph = engine.graph();
        let nodes = graph.nodes();
        let edges = graph.edges();

        let mut snapshot = SnapshotBinary {
            node_states: Vec::with_capacity(nodes.len()),
            node_inbound_total: Vec::with_capacity(nodes.len()),
            node_outbound_total: Vec::with_capacity(nodes.len()),
            node_tracked_a: Vec::with_capacity(nodes.len()),
            node_tracked_b: Vec::with_capacity(nodes.len()),
            edge_active: Vec::with_capacity(edges.len()),
            edge_in_flight_total: Vec::with_capacity(edges.len()),
            sim_time: engine.sim_time(),
            node_ids: None,
            edge_ids: None,
        };

        for node in nodes {
            snapshot.node_states.push(node.state.code());
            snapshot.node_inbound_total.push(node.inbound.total() as f32);
            snapshot.node_outbound_total.push(node.outbound.total() as f32);
            snapshot.node_tracked_a.push(self.tracked_a.read(node) as f32);
            snapshot.node_tracked_b.push(self.tracked_b.read(node) as f32);
        }
        for edge in edges {
            snapshot.edge_active.push(i8::from(edge.active));
            snapshot
                .edge_in_flight_total
                .push(edge.ring.sum_in_flight().total() as f32);
        }

        if std::mem::take(&mut self.ids_requested) {
            snapshot.node_ids = Some(graph.node_ids());
            snapshot.edge_ids = Some(graph.edge_ids());
        }

        tracing::trace!(
            nodes = nodes.len(),
            edges = edges.len(),
            sim_time = snapshot.sim_time,
            with_ids = snapshot.has_ids(),
            "published snapshot"
        );
        snapshot
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
