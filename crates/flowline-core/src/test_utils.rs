//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::description::*;
use crate::engine::FlowEngine;
use crate::substance::{Component, SubstanceVector};
use std::collections::BTreeMap;

// ===========================================================================
// Substance helpers
// ===========================================================================

pub fn liquid(amount: f64) -> SubstanceVector {
    SubstanceVector::of(Component::Liquid, amount)
}

pub fn gas(amount: f64) -> SubstanceVector {
    SubstanceVector::of(Component::Gas, amount)
}

pub fn solid(amount: f64) -> SubstanceVector {
    SubstanceVector::of(Component::Solid, amount)
}

/// Assert two floats agree to within 1e-6.
#[track_caller]
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-6,
        "expected {expected}, got {actual}"
    );
}

// ===========================================================================
// Description builders
// ===========================================================================

pub fn basic_node(
    id: &str,
    in_capacity: f64,
    out_capacity: f64,
    rate: f64,
    start_threshold: f64,
) -> NodeDescription {
    NodeDescription {
        id: id.to_string(),
        node_type: NodeType::Basic,
        runtime: Some(NodeRuntime {
            in_capacity,
            out_capacity,
            process_rate_per_sec: rate,
            start_threshold,
            process: None,
        }),
    }
}

/// A basic node with a yield map given as `(input, output, fraction)` rows.
pub fn reactor_node(
    id: &str,
    in_capacity: f64,
    out_capacity: f64,
    rate: f64,
    start_threshold: f64,
    yields: &[(&str, &str, f64)],
) -> NodeDescription {
    let mut map: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for &(input, output, fraction) in yields {
        map.entry(input.to_string())
            .or_default()
            .insert(output.to_string(), fraction);
    }
    let mut node = basic_node(id, in_capacity, out_capacity, rate, start_threshold);
    if let Some(runtime) = node.runtime.as_mut() {
        runtime.process = Some(ProcessDescription { yields: map });
    }
    node
}

/// A node that accepts plenty and never processes (threshold out of reach).
pub fn sink_node(id: &str) -> NodeDescription {
    basic_node(id, 1000.0, 1000.0, 0.0, 1e6)
}

pub fn router_node(id: &str) -> NodeDescription {
    NodeDescription {
        id: id.to_string(),
        node_type: NodeType::Router,
        runtime: None,
    }
}

pub fn edge(id: &str, from: &str, to: &str, capacity: f64, delay: f64) -> EdgeDescription {
    EdgeDescription {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        capacity_per_sec: capacity,
        delay_sec: delay,
    }
}

pub fn router_condition(id: &str, condition: bool) -> RouterDescription {
    RouterDescription {
        id: id.to_string(),
        condition,
    }
}

pub fn graph(
    nodes: Vec<NodeDescription>,
    edges: Vec<EdgeDescription>,
    routers: Vec<RouterDescription>,
) -> GraphDescription {
    GraphDescription {
        version: DESCRIPTION_VERSION,
        nodes,
        edges,
        routers,
    }
}

// ===========================================================================
// Fixture graphs
// ===========================================================================

/// `src -> dst` over edge `e`. `src` processes everything immediately, `dst`
/// is a sink.
pub fn pipeline(edge_capacity: f64, delay: f64) -> GraphDescription {
    graph(
        vec![basic_node("src", 1000.0, 1000.0, 1000.0, 0.0), sink_node("dst")],
        vec![edge("e", "src", "dst", edge_capacity, delay)],
        vec![],
    )
}

/// Router `r` with branch `r_t` (to `t`) and branch `r_f` (to `f`), both
/// 10/s with a 0.5 s delay.
pub fn router_fork(condition: bool) -> GraphDescription {
    graph(
        vec![router_node("r"), sink_node("t"), sink_node("f")],
        vec![edge("r_t", "r", "t", 10.0, 0.5), edge("r_f", "r", "f", 10.0, 0.5)],
        vec![router_condition("r", condition)],
    )
}

/// A chain of `len` basic nodes `n0 -> n1 -> ...` with moderate rates.
pub fn chain(len: usize) -> GraphDescription {
    let nodes = (0..len)
        .map(|i| basic_node(&format!("n{i}"), 100.0, 50.0, 20.0, 0.5))
        .collect();
    let edges = (1..len)
        .map(|i| edge(&format!("e{i}"), &format!("n{}", i - 1), &format!("n{i}"), 15.0, 0.1))
        .collect();
    graph(nodes, edges, vec![])
}

// ===========================================================================
// Engine helpers
// ===========================================================================

/// Compile `desc` with default options, panicking on construction errors.
pub fn engine_for(desc: &GraphDescription) -> FlowEngine {
    match FlowEngine::from_description(desc) {
        Ok(engine) => engine,
        Err(err) => panic!("fixture graph failed to compile: {err}"),
    }
}

/// Run `ticks` fixed steps of `dt`.
pub fn run_ticks(engine: &mut FlowEngine, dt: f64, ticks: usize) {
    for _ in 0..ticks {
        engine.step(dt);
    }
}
