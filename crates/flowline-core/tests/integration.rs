//! End-to-end scenarios exercising the full tick pipeline.

use flowline_core::compile::{CompileOptions, compile_with};
use flowline_core::control::{ControlChannel, ControlMessage, OutputMessage};
use flowline_core::description::GraphDescription;
use flowline_core::engine::FlowEngine;
use flowline_core::graph::NodeState;
use flowline_core::id::EdgeIndex;
use flowline_core::ring::DEFAULT_RING_CAPACITY;
use flowline_core::substance::Component;
use flowline_core::test_utils::*;

const DT_120: f64 = 1.0 / 120.0;

// ===========================================================================
// Scenario A: single node accumulates, then drains at its rate
// ===========================================================================

#[test]
fn single_node_drains_bounded_by_rate() {
    let desc = graph(vec![basic_node("A", 100.0, 1000.0, 20.0, 1.0)], vec![], vec![]);
    let mut engine = engine_for(&desc);
    let a = engine.node_index("A").unwrap();

    for tick in 0..120 {
        if tick % 30 == 0 {
            engine.feed(a, liquid(8.0)).unwrap();
        }
        let before = engine.node(a).unwrap().inbound.total();
        let out_before = engine.node(a).unwrap().outbound.total();
        engine.step(DT_120);

        let node = engine.node(a).unwrap();
        let drained = before - node.inbound.total();
        assert!(drained <= 20.0 * DT_120 + 1e-9, "tick {tick} drained {drained}");
        assert_close(node.outbound.total() - out_before, drained);
        assert_eq!(node.state, NodeState::Running);
    }

    let node = engine.node(a).unwrap();
    assert_close(node.inbound.total(), 12.0);
    assert_close(node.outbound.total(), 20.0);
}

// ===========================================================================
// Scenario B: one packet, delivered after exactly its delay
// ===========================================================================

#[test]
fn packet_arrives_after_its_delay() {
    let mut engine = engine_for(&pipeline(10.0, 0.5));
    let src = engine.node_index("src").unwrap();
    let dst = engine.node_index("dst").unwrap();
    engine.feed(src, liquid(5.0)).unwrap();

    engine.step(0.5);
    let ring = &engine.edge(EdgeIndex(0)).unwrap().ring;
    assert_eq!(ring.len(), 1);
    let packet = ring.peek_head().unwrap();
    assert_close(packet.substance.total(), 5.0);
    assert_close(packet.remaining, 0.5);
    assert_close(engine.node(src).unwrap().outbound.total(), 0.0);

    run_ticks(&mut engine, DT_120, 59);
    assert_eq!(engine.node(dst).unwrap().inbound.total(), 0.0);

    engine.step(DT_120);
    assert_close(engine.node(dst).unwrap().inbound.total(), 5.0);
    assert!(engine.edge(EdgeIndex(0)).unwrap().ring.is_empty());
}

// ===========================================================================
// Scenario C: toggling a router does not reroute packets already in flight
// ===========================================================================

#[test]
fn router_toggle_leaves_in_flight_packets_alone() {
    let mut engine = engine_for(&router_fork(true));
    let r = engine.node_index("r").unwrap();
    let t = engine.node_index("t").unwrap();
    let f = engine.node_index("f").unwrap();
    let r_t = engine.edge_index("r_t").unwrap();

    engine.feed(r, liquid(3.0)).unwrap();
    engine.step(0.1);
    let in_flight = engine.edge_view(r_t).unwrap();
    assert_eq!(in_flight.packets_in_flight, 1);
    assert_close(in_flight.in_flight_total(), 1.0);

    engine.set_router_condition(r, false).unwrap();
    run_ticks(&mut engine, 0.1, 20);

    assert_close(engine.node(t).unwrap().inbound.total(), 1.0);
    assert_close(engine.node(f).unwrap().inbound.total(), 2.0);
    assert!(!engine.edge(r_t).unwrap().active);
}

// ===========================================================================
// Scenario D: a full ring holds the source back without losing material
// ===========================================================================

#[test]
fn full_ring_backpressures_source() {
    let mut engine = engine_for(&pipeline(1000.0, 2.0));
    let src = engine.node_index("src").unwrap();
    let dst = engine.node_index("dst").unwrap();
    engine.feed(src, liquid(1000.0)).unwrap();

    run_ticks(&mut engine, 0.01, DEFAULT_RING_CAPACITY);
    let view = engine.edge_view(EdgeIndex(0)).unwrap();
    assert!(view.is_saturated());
    let ceiling = view.in_flight_total();
    assert_close(ceiling, 640.0);

    let mut waited = 0;
    let mut last_outbound = engine.node(src).unwrap().outbound.total();
    while engine.node(dst).unwrap().inbound.total() == 0.0 {
        engine.step(0.01);
        waited += 1;
        assert!(waited < 400, "head packet never delivered");

        assert_close(engine.total_substance().total(), 1000.0);
        if engine.node(dst).unwrap().inbound.total() == 0.0 {
            let view = engine.edge_view(EdgeIndex(0)).unwrap();
            assert_eq!(view.packets_in_flight, DEFAULT_RING_CAPACITY);
            assert_close(view.in_flight_total(), ceiling);
            let outbound = engine.node(src).unwrap().outbound.total();
            assert!(outbound >= last_outbound - 1e-9);
            last_outbound = outbound;
        }
    }
    assert!(waited > 100);

    // Space opened: the source refilled the ring in the same tick.
    assert_close(engine.node(dst).unwrap().inbound.total(), 10.0);
    assert_eq!(
        engine.edge(EdgeIndex(0)).unwrap().ring.len(),
        DEFAULT_RING_CAPACITY
    );
}

// ===========================================================================
// Conservation and ordering
// ===========================================================================

#[test]
fn chain_conserves_material() {
    let mut engine = engine_for(&chain(6));
    let head = engine.node_index("n0").unwrap();
    let mut fed = 0.0;
    for tick in 0..600 {
        if tick % 20 == 0 {
            engine.feed(head, liquid(5.0)).unwrap();
            fed += 5.0;
        }
        engine.step(DT_120);
        assert_close(engine.total_substance().total(), fed);
    }
    let tail = engine.node_view(engine.node_index("n5").unwrap()).unwrap();
    assert!(tail.inbound_total() + tail.outbound_total() > 0.0);
}

#[test]
fn packets_arrive_in_send_order() {
    let mut engine = engine_for(&pipeline(1000.0, 0.05));
    let src = engine.node_index("src").unwrap();
    let dst = engine.node_index("dst").unwrap();

    engine.feed(src, solid(1.0)).unwrap();
    engine.step(0.01);
    engine.feed(src, gas(1.0)).unwrap();
    engine.step(0.01);

    let mut first_arrival = None;
    for _ in 0..50 {
        engine.step(0.01);
        let inbound = engine.node(dst).unwrap().inbound;
        if inbound.total() > 0.0 && first_arrival.is_none() {
            first_arrival = Some(inbound);
        }
    }
    let first = first_arrival.unwrap();
    assert_close(first.get(Component::Solid), 1.0);
    assert_eq!(first.get(Component::Gas), 0.0);

    let end = engine.node(dst).unwrap().inbound;
    assert_close(end.get(Component::Gas), 1.0);
}

#[test]
fn yield_conversion_flows_downstream() {
    let desc = graph(
        vec![
            reactor_node("reactor", 100.0, 100.0, 50.0, 0.0, &[("liquid", "gas", 0.8)]),
            sink_node("vent"),
        ],
        vec![edge("out", "reactor", "vent", 100.0, 0.1)],
        vec![],
    );
    let mut engine = engine_for(&desc);
    engine
        .feed(engine.node_index("reactor").unwrap(), liquid(10.0))
        .unwrap();
    run_ticks(&mut engine, 0.05, 40);

    let vent = engine.node(engine.node_index("vent").unwrap()).unwrap();
    assert_close(vent.inbound.get(Component::Gas), 8.0);
    assert_eq!(vent.inbound.get(Component::Liquid), 0.0);
}

#[test]
fn smaller_ring_capacity_caps_in_flight_packets() {
    let options = CompileOptions { ring_capacity: 4 };
    let mut engine = FlowEngine::new(compile_with(&pipeline(1000.0, 10.0), &options).unwrap());
    engine
        .feed(engine.node_index("src").unwrap(), liquid(100.0))
        .unwrap();
    run_ticks(&mut engine, 0.01, 50);
    assert_eq!(engine.edge_view(EdgeIndex(0)).unwrap().packets_in_flight, 4);
    assert_close(engine.total_substance().total(), 100.0);
}

#[test]
fn independent_engines_do_not_interact() {
    let mut a = engine_for(&pipeline(10.0, 0.1));
    let b = engine_for(&pipeline(10.0, 0.1));
    a.feed(a.node_index("src").unwrap(), liquid(5.0)).unwrap();
    run_ticks(&mut a, 0.1, 10);
    assert_eq!(b.total_substance().total(), 0.0);
    assert_eq!(b.ticks(), 0);
}

// ===========================================================================
// Controller driven end to end
// ===========================================================================

const PLANT_JSON: &str = r#"{
    "version": 1,
    "nodes": [
        { "id": "feed", "type": "basic",
          "runtime": { "inCapacity": 100, "outCapacity": 50, "processRatePerSec": 20, "startThreshold": 1 } },
        { "id": "split", "type": "router" },
        { "id": "reactor", "type": "basic",
          "runtime": { "inCapacity": 80, "outCapacity": 40, "processRatePerSec": 10, "startThreshold": 0,
                       "process": { "yield": { "liquid": { "gas": 0.8 } } } } },
        { "id": "bypass", "type": "basic",
          "runtime": { "inCapacity": 60, "outCapacity": 30, "processRatePerSec": 15, "startThreshold": 1 } }
    ],
    "edges": [
        { "id": "feed_split", "from": "feed", "to": "split", "capacityPerSec": 18, "delaySec": 0.35 },
        { "id": "split_reactor", "from": "split", "to": "reactor", "capacityPerSec": 12, "delaySec": 0.25 },
        { "id": "split_bypass", "from": "split", "to": "bypass", "capacityPerSec": 12, "delaySec": 0.25 }
    ],
    "routers": [{ "id": "split", "condition": true }]
}"#;

#[test]
fn controller_runs_plant_from_json() {
    let desc = GraphDescription::from_json_str(PLANT_JSON).unwrap();
    let mut channel = ControlChannel::default();

    let Some(OutputMessage::Ready { node_ids, edge_ids }) =
        channel.handle(ControlMessage::Init { graph: desc })
    else {
        panic!("init failed");
    };
    assert_eq!(node_ids, vec!["feed", "split", "reactor", "bypass"]);
    assert_eq!(edge_ids.len(), 3);

    assert!(
        channel
            .handle(ControlMessage::Feed {
                node_id: "feed".into(),
                substance: liquid(30.0),
            })
            .is_none()
    );

    let outputs = channel.pump(2.0);
    assert_eq!(outputs.len(), 40);

    let snapshots: Vec<_> = outputs
        .into_iter()
        .map(|m| match m {
            OutputMessage::Snapshot(s) => s,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(snapshots[0].node_ids.as_deref(), Some(&node_ids[..]));
    assert!(snapshots[1..].iter().all(|s| !s.has_ids()));
    for pair in snapshots.windows(2) {
        assert!(pair[1].sim_time > pair[0].sim_time);
    }

    let last = snapshots.last().unwrap();
    assert_eq!(last.node_count(), 4);
    let split_bypass = 2;
    assert_eq!(last.edge_active[split_bypass], 0);
    // Reactor converted some liquid to gas (tracked column B).
    assert!(last.node_tracked_b[2] > 0.0);

    let engine = channel.engine().unwrap();
    assert_close(engine.sim_time(), 2.0);
    assert_eq!(engine.ticks(), 240);
}
