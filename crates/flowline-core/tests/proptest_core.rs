//! Property-based tests for the flow engine.
//!
//! Uses proptest to generate random graphs and feed/tick/toggle sequences,
//! then verify the structural invariants hold after every step.

use flowline_core::description::GraphDescription;
use flowline_core::engine::FlowEngine;
use flowline_core::graph::{NodeKind, NodeState};
use flowline_core::id::NodeIndex;
use flowline_core::ring::{FlowPacket, RingBuffer};
use flowline_core::substance::{EPSILON, SubstanceVector};
use flowline_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

/// A random chain with a router in the middle forking into two sinks.
fn arb_network() -> impl Strategy<Value = GraphDescription> {
    (
        1.0..50.0f64,
        1.0..50.0f64,
        0.0..5.0f64,
        0.5..20.0f64,
        0.0..0.5f64,
        any::<bool>(),
    )
        .prop_map(|(cap, rate, threshold, edge_cap, delay, condition)| {
            graph(
                vec![
                    basic_node("in", cap * 2.0, cap, rate, threshold),
                    router_node("r"),
                    basic_node("left", cap, cap, rate, threshold),
                    basic_node("right", cap, cap, rate, 0.0),
                    sink_node("drain"),
                ],
                vec![
                    edge("in_r", "in", "r", edge_cap, delay),
                    edge("r_left", "r", "left", edge_cap, delay),
                    edge("r_right", "r", "right", edge_cap, delay),
                    edge("left_drain", "left", "drain", edge_cap, delay),
                    edge("right_drain", "right", "drain", edge_cap, delay),
                ],
                vec![router_condition("r", condition)],
            )
        })
}

#[derive(Debug, Clone)]
enum Op {
    Feed(u32, [f64; 4]),
    Toggle(bool),
    Step(f64),
}

fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        ((0u32..5), proptest::array::uniform4(0.0..20.0f64)).prop_map(|(n, v)| Op::Feed(n, v)),
        any::<bool>().prop_map(Op::Toggle),
        (0.001..0.1f64).prop_map(Op::Step),
    ];
    proptest::collection::vec(op, 1..max_ops)
}

fn apply(engine: &mut FlowEngine, op: &Op, fed: &mut f64) {
    match op {
        Op::Feed(node, v) => {
            let amount = SubstanceVector(*v);
            engine.feed(NodeIndex(*node), amount).unwrap();
            *fed += amount.total();
        }
        Op::Toggle(condition) => {
            let r = engine.node_index("r").unwrap();
            engine.set_router_condition(r, *condition).unwrap();
        }
        Op::Step(dt) => engine.step(*dt),
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bags_never_go_negative(desc in arb_network(), ops in arb_ops(200)) {
        let mut engine = engine_for(&desc);
        let mut fed = 0.0;
        for op in &ops {
            apply(&mut engine, op, &mut fed);
            for node in engine.graph().nodes() {
                prop_assert!(node.inbound.is_non_negative());
                prop_assert!(node.outbound.is_non_negative());
            }
            for edge in engine.graph().edges() {
                prop_assert!(edge.ring.sum_in_flight().is_non_negative());
            }
        }
    }

    #[test]
    fn material_is_conserved_without_yield(desc in arb_network(), ops in arb_ops(200)) {
        let mut engine = engine_for(&desc);
        let mut fed = 0.0;
        for op in &ops {
            apply(&mut engine, op, &mut fed);
            let total = engine.total_substance().total();
            prop_assert!((total - fed).abs() <= EPSILON * fed.max(1.0), "total {} fed {}", total, fed);
        }
    }

    #[test]
    fn router_gating_is_strict(desc in arb_network(), ops in arb_ops(100)) {
        let mut engine = engine_for(&desc);
        let mut fed = 0.0;
        for op in &ops {
            apply(&mut engine, op, &mut fed);
            if !matches!(op, Op::Step(_)) || engine.ticks() == 0 {
                continue;
            }
            for node in engine.graph().nodes() {
                if let NodeKind::Router { branches, .. } = &node.kind {
                    let active = branches
                        .iter()
                        .take(2)
                        .filter(|e| engine.edge(**e).unwrap().active)
                        .count();
                    prop_assert_eq!(active, 1);
                }
            }
        }
    }

    #[test]
    fn below_threshold_is_never_depleted(amount in 0.0..4.9f64, steps in 1usize..200) {
        let desc = graph(
            vec![basic_node("a", 100.0, 100.0, 50.0, 5.0), sink_node("b")],
            vec![edge("ab", "a", "b", 100.0, 0.0)],
            vec![],
        );
        let mut engine = engine_for(&desc);
        engine.feed(NodeIndex(0), liquid(amount)).unwrap();
        run_ticks(&mut engine, 1.0 / 120.0, steps);
        let node = engine.node(NodeIndex(0)).unwrap();
        prop_assert_eq!(node.inbound.total(), amount);
        prop_assert_ne!(node.state, NodeState::Running);
    }

    #[test]
    fn ring_preserves_fifo_order(amounts in proptest::collection::vec(0.1..10.0f64, 1..200), cap in 1usize..32) {
        let mut ring = RingBuffer::new(cap);
        let mut expected = std::collections::VecDeque::new();
        for a in amounts {
            let packet = FlowPacket::new(liquid(a), 0.0);
            if ring.enqueue(packet) {
                expected.push_back(a);
            } else {
                prop_assert!(ring.is_full());
                let popped = ring.pop_head().unwrap();
                prop_assert_eq!(popped.substance.total(), expected.pop_front().unwrap());
            }
            prop_assert_eq!(ring.len(), expected.len());
        }
        while let Some(p) = ring.pop_head() {
            prop_assert_eq!(p.substance.total(), expected.pop_front().unwrap());
        }
        prop_assert!(expected.is_empty());
    }
}
