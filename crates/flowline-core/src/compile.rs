//! Graph compiler: turns a [`GraphDescription`] into a [`CompiledGraph`].
//!
//! Compilation validates referential integrity and numeric parameters up
//! front and fails on the first problem. Nothing is half-built: the caller
//! either gets a complete set of tables or a [`ConstructionError`].

use crate::description::{DESCRIPTION_VERSION, GraphDescription, NodeType};
use crate::graph::{CompiledGraph, EdgeRecord, NodeKind, NodeRecord, NodeState, UNLIMITED};
use crate::id::{EdgeIndex, NodeIndex};
use crate::ring::{DEFAULT_RING_CAPACITY, RingBuffer};
use crate::substance::{Component, SubstanceVector, YieldMatrix};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a description is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstructionError {
    #[error("unsupported description version {0} (expected {DESCRIPTION_VERSION})")]
    UnsupportedVersion(u32),

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("duplicate edge id '{0}'")]
    DuplicateEdge(String),

    #[error("edge '{edge}' references unknown node '{node}'")]
    UnknownEdgeEndpoint { edge: String, node: String },

    #[error("router entry references unknown node '{0}'")]
    UnknownRouter(String),

    #[error("router entry references '{0}', which is not a router node")]
    NotARouter(String),

    #[error("basic node '{0}' has no runtime parameters")]
    MissingRuntime(String),

    #[error("node '{node}' yield map uses unknown component '{component}'")]
    UnknownComponent { node: String, component: String },

    #[error("{owner} '{id}': {field} must be finite and non-negative, got {value}")]
    InvalidParameter {
        owner: &'static str,
        id: String,
        field: &'static str,
        value: f64,
    },

    #[error("ring capacity must be at least 1")]
    ZeroRingCapacity,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs that shape the compiled tables without being part of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Packets each edge can hold in flight.
    pub ring_capacity: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile with default options.
pub fn compile(desc: &GraphDescription) -> Result<CompiledGraph, ConstructionError> {
    compile_with(desc, &CompileOptions::default())
}

/// Compile `desc` into dense tables.
pub fn compile_with(
    desc: &GraphDescription,
    options: &CompileOptions,
) -> Result<CompiledGraph, ConstructionError> {
    if desc.version != DESCRIPTION_VERSION {
        return Err(ConstructionError::UnsupportedVersion(desc.version));
    }
    if options.ring_capacity == 0 {
        return Err(ConstructionError::ZeroRingCapacity);
    }

    // 1. Nodes: assign indices in declaration order.
    let mut node_lookup: HashMap<String, NodeIndex> = HashMap::with_capacity(desc.nodes.len());
    let mut nodes = Vec::with_capacity(desc.nodes.len());

    for (i, node) in desc.nodes.iter().enumerate() {
        match node_lookup.entry(node.id.clone()) {
            Entry::Occupied(_) => return Err(ConstructionError::DuplicateNode(node.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(NodeIndex(i as u32));
            }
        }

        let record = match node.node_type {
            NodeType::Router => NodeRecord {
                id: node.id.clone(),
                kind: NodeKind::Router {
                    condition: false,
                    branches: Vec::new(),
                },
                inbound: SubstanceVector::ZERO,
                outbound: SubstanceVector::ZERO,
                in_capacity: UNLIMITED,
                out_capacity: UNLIMITED,
                state: NodeState::Idle,
            },
            NodeType::Basic => {
                let rt = node
                    .runtime
                    .as_ref()
                    .ok_or_else(|| ConstructionError::MissingRuntime(node.id.clone()))?;
                check("node", &node.id, "inCapacity", rt.in_capacity)?;
                check("node", &node.id, "outCapacity", rt.out_capacity)?;
                check("node", &node.id, "processRatePerSec", rt.process_rate_per_sec)?;
                check("node", &node.id, "startThreshold", rt.start_threshold)?;

                let yield_matrix = match &rt.process {
                    Some(process) => Some(build_yield_matrix(&node.id, &process.yields)?),
                    None => None,
                };

                NodeRecord {
                    id: node.id.clone(),
                    kind: NodeKind::Basic {
                        rate: rt.process_rate_per_sec,
                        start_threshold: rt.start_threshold,
                        yield_matrix,
                    },
                    inbound: SubstanceVector::ZERO,
                    outbound: SubstanceVector::ZERO,
                    in_capacity: rt.in_capacity,
                    out_capacity: rt.out_capacity,
                    state: NodeState::Idle,
                }
            }
        };
        nodes.push(record);
    }

    // 2. Edges: resolve endpoints, group router branches in declaration order.
    let mut edge_lookup: HashMap<String, EdgeIndex> = HashMap::with_capacity(desc.edges.len());
    let mut edges = Vec::with_capacity(desc.edges.len());

    for (i, edge) in desc.edges.iter().enumerate() {
        let index = EdgeIndex(i as u32);
        match edge_lookup.entry(edge.id.clone()) {
            Entry::Occupied(_) => return Err(ConstructionError::DuplicateEdge(edge.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
        }

        let resolve = |id: &str| {
            node_lookup
                .get(id)
                .copied()
                .ok_or_else(|| ConstructionError::UnknownEdgeEndpoint {
                    edge: edge.id.clone(),
                    node: id.to_string(),
                })
        };
        let from = resolve(&edge.from)?;
        let to = resolve(&edge.to)?;
        check("edge", &edge.id, "capacityPerSec", edge.capacity_per_sec)?;
        check("edge", &edge.id, "delaySec", edge.delay_sec)?;

        if let NodeKind::Router { branches, .. } = &mut nodes[from.index()].kind {
            branches.push(index);
        }

        edges.push(EdgeRecord {
            id: edge.id.clone(),
            from,
            to,
            capacity: edge.capacity_per_sec,
            delay: edge.delay_sec,
            active: true,
            ring: RingBuffer::new(options.ring_capacity),
        });
    }

    // 3. Router initial conditions.
    for router in &desc.routers {
        let index = node_lookup
            .get(&router.id)
            .copied()
            .ok_or_else(|| ConstructionError::UnknownRouter(router.id.clone()))?;
        match &mut nodes[index.index()].kind {
            NodeKind::Router { condition, .. } => *condition = router.condition,
            NodeKind::Basic { .. } => {
                return Err(ConstructionError::NotARouter(router.id.clone()));
            }
        }
    }

    tracing::debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        ring_capacity = options.ring_capacity,
        "compiled flow graph"
    );

    Ok(CompiledGraph {
        nodes,
        edges,
        node_lookup,
        edge_lookup,
    })
}

fn check(
    owner: &'static str,
    id: &str,
    field: &'static str,
    value: f64,
) -> Result<(), ConstructionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConstructionError::InvalidParameter {
            owner,
            id: id.to_string(),
            field,
            value,
        })
    }
}

fn build_yield_matrix(
    node: &str,
    yields: &std::collections::BTreeMap<String, std::collections::BTreeMap<String, f64>>,
) -> Result<YieldMatrix, ConstructionError> {
    let component = |name: &str| {
        Component::from_name(name).ok_or_else(|| ConstructionError::UnknownComponent {
            node: node.to_string(),
            component: name.to_string(),
        })
    };

    let mut matrix = YieldMatrix::default();
    for (input, row) in yields {
        let input = component(input)?;
        for (output, &fraction) in row {
            let output = component(output)?;
            check("node", node, "yield fraction", fraction)?;
            matrix.set(input, output, fraction);
        }
    }
    Ok(matrix)
}

// ===========================================================================
// Tests
// ===========================================================================
