//! Flowline Core -- a fixed-step simulation engine for industrial flow
//! networks.
//!
//! Material (a four-component [`substance::SubstanceVector`]) moves between
//! processing nodes over directed edges with bounded throughput and transit
//! delay. Routers send everything down exactly one of two branches.
//! Backpressure comes from bounded inbound/outbound bags and fixed-size
//! per-edge packet rings; material is never dropped.
//!
//! # Five-Phase Tick Pipeline
//!
//! Each call to [`engine::FlowEngine::step`] runs:
//!
//! 1. **Gating** -- Recompute which router branches are active.
//! 2. **Deliver** -- Count down head packets and deliver expired ones.
//! 3. **Process** -- Move inbound material to outbound at each node's rate,
//!    applying its yield matrix.
//! 4. **Send** -- Push outbound material onto active edges as packets.
//! 5. **Block propagation** -- Mark nodes with nearly full inbound bags.
//!
//! # Key Types
//!
//! - [`description::GraphDescription`] -- Serde form of a graph, loadable
//!   from JSON, RON or TOML.
//! - [`compile::compile`] -- Validates a description into a
//!   [`graph::CompiledGraph`] of dense node and edge tables.
//! - [`engine::FlowEngine`] -- Owns the compiled graph and runs the pipeline.
//! - [`sim::TickScheduler`] / [`sim::Cadence`] -- Fixed-step timing.
//! - [`snapshot::SnapshotPublisher`] -- Flat per-tick state arrays plus a
//!   versioned binary codec.
//! - [`control::ControlChannel`] -- Message-driven controller a host embeds.

pub mod compile;
pub mod control;
pub mod description;
pub mod engine;
pub mod graph;
pub mod id;
pub mod query;
pub mod ring;
pub mod sim;
pub mod snapshot;
pub mod substance;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
