//! Host-agnostic controller: message handling plus the tick and publish
//! hooks a host calls.
//!
//! [`ControlChannel`] owns the engine (once initialized), the scheduler, the
//! publisher and two cadences. It is meant to be driven from one thread:
//! whatever host runs it calls [`handle`](ControlChannel::handle) for each
//! incoming message and [`on_tick`](ControlChannel::on_tick) /
//! [`on_publish`](ControlChannel::on_publish) from its timers, or
//! [`pump`](ControlChannel::pump) to advance both deterministically.
//!
//! Rejected messages never change state. They come back as
//! [`OutputMessage::Error`].

use crate::compile::{CompileOptions, ConstructionError, compile_with};
use crate::description::GraphDescription;
use crate::engine::{FeedError, FlowEngine};
use crate::sim::{Cadence, RateConfig, RateError, TickScheduler, validate_hz};
use crate::snapshot::{SnapshotBinary, SnapshotPublisher};
use crate::substance::SubstanceVector;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Requests a host forwards to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Replace the running graph.
    Init { graph: GraphDescription },
    /// Deposit material into a node's inbound bag.
    #[serde(rename_all = "camelCase")]
    Feed {
        node_id: String,
        substance: SubstanceVector,
    },
    #[serde(rename_all = "camelCase")]
    SetRouter { node_id: String, condition: bool },
    /// Change loop rates. Omitted fields keep their current value.
    #[serde(rename_all = "camelCase")]
    SetRate {
        #[serde(default)]
        tick_hz: Option<f64>,
        #[serde(default)]
        publish_hz: Option<f64>,
        #[serde(default)]
        include_ids: Option<bool>,
    },
    SetRunning { running: bool },
}

/// Everything the controller sends back.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMessage {
    Ready {
        node_ids: Vec<String>,
        edge_ids: Vec<String>,
    },
    Error {
        message: String,
    },
    Snapshot(SnapshotBinary),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("simulation is not initialized")]
    NotInitialized,

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    InvalidRate(#[from] RateError),

    #[error("graph rejected: {0}")]
    Construction(#[from] ConstructionError),
}

// ---------------------------------------------------------------------------
// ControlChannel
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ControlChannel {
    engine: Option<FlowEngine>,
    scheduler: TickScheduler,
    publisher: SnapshotPublisher,
    rates: RateConfig,
    compile_options: CompileOptions,
    tick_cadence: Cadence,
    publish_cadence: Cadence,
}

impl ControlChannel {
    pub fn new(rates: RateConfig) -> Result<Self, ControlError> {
        rates.validate()?;
        Ok(Self {
            engine: None,
            scheduler: TickScheduler::new(rates.tick_hz)?,
            publisher: SnapshotPublisher::new(),
            rates,
            compile_options: CompileOptions::default(),
            tick_cadence: Cadence::new(rates.tick_hz),
            publish_cadence: Cadence::new(rates.publish_hz),
        })
    }

    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.compile_options = options;
        self
    }

    pub fn with_publisher(mut self, publisher: SnapshotPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn engine(&self) -> Option<&FlowEngine> {
        self.engine.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn rates(&self) -> RateConfig {
        self.rates
    }

    /// Changes whenever hosts must rebuild their tick and publish timers.
    pub fn loop_generation(&self) -> u64 {
        self.scheduler.generation()
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Apply one message. Failures are logged and turned into
    /// [`OutputMessage::Error`].
    pub fn handle(&mut self, msg: ControlMessage) -> Option<OutputMessage> {
        match self.apply(msg) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "control message rejected");
                Some(OutputMessage::Error {
                    message: err.to_string(),
                })
            }
        }
    }

    /// Apply one message, returning the error instead of converting it.
    pub fn apply(&mut self, msg: ControlMessage) -> Result<Option<OutputMessage>, ControlError> {
        match msg {
            ControlMessage::Init { graph } => self.init(&graph).map(Some),
            ControlMessage::Feed { node_id, substance } => {
                let engine = self.engine.as_mut().ok_or(ControlError::NotInitialized)?;
                let node = engine
                    .node_index(&node_id)
                    .ok_or(ControlError::UnknownNode(node_id))?;
                engine.feed(node, substance)?;
                Ok(None)
            }
            ControlMessage::SetRouter { node_id, condition } => {
                let engine = self.engine.as_mut().ok_or(ControlError::NotInitialized)?;
                let node = engine
                    .node_index(&node_id)
                    .ok_or(ControlError::UnknownNode(node_id))?;
                engine.set_router_condition(node, condition)?;
                Ok(None)
            }
            ControlMessage::SetRate {
                tick_hz,
                publish_hz,
                include_ids,
            } => {
                self.set_rate(tick_hz, publish_hz)?;
                if include_ids == Some(true) {
                    self.publisher.request_ids();
                }
                Ok(None)
            }
            ControlMessage::SetRunning { running } => {
                self.scheduler.set_running(running);
                tracing::debug!(running, "tick loop running flag changed");
                Ok(None)
            }
        }
    }

    fn init(&mut self, desc: &GraphDescription) -> Result<OutputMessage, ControlError> {
        let graph = compile_with(desc, &self.compile_options)?;
        let engine = FlowEngine::new(graph);
        let node_ids = engine.node_ids();
        let edge_ids = engine.edge_ids();
        tracing::info!(
            nodes = node_ids.len(),
            edges = edge_ids.len(),
            "simulation initialized"
        );

        self.engine = Some(engine);
        self.publisher.request_ids();
        self.restart_loops();
        Ok(OutputMessage::Ready { node_ids, edge_ids })
    }

    fn set_rate(&mut self, tick_hz: Option<f64>, publish_hz: Option<f64>) -> Result<(), ControlError> {
        // Validate both before applying either.
        let tick_hz = validate_hz("tick_hz", tick_hz.unwrap_or(self.rates.tick_hz))?;
        let publish_hz = validate_hz("publish_hz", publish_hz.unwrap_or(self.rates.publish_hz))?;

        self.rates = RateConfig {
            tick_hz,
            publish_hz,
        };
        self.scheduler.reconfigure(tick_hz)?;
        self.reset_cadences();
        tracing::info!(tick_hz, publish_hz, "loop rates changed");
        Ok(())
    }

    fn restart_loops(&mut self) {
        self.scheduler.restart();
        self.reset_cadences();
    }

    fn reset_cadences(&mut self) {
        self.tick_cadence = Cadence::new(self.rates.tick_hz);
        self.publish_cadence = Cadence::new(self.rates.publish_hz);
    }

    // -----------------------------------------------------------------------
    // Host hooks
    // -----------------------------------------------------------------------

    /// Run one scheduler tick. Returns whether the engine stepped.
    pub fn on_tick(&mut self) -> bool {
        match self.engine.as_mut() {
            Some(engine) => self.scheduler.tick(engine),
            None => false,
        }
    }

    /// Publish a snapshot of the current state. Publishing continues while
    /// ticking is paused.
    pub fn on_publish(&mut self) -> Option<OutputMessage> {
        let engine = self.engine.as_ref()?;
        Some(OutputMessage::Snapshot(self.publisher.publish(engine)))
    }

    /// Advance both loops by `elapsed` seconds of host time, running every
    /// tick and publish that falls due. Publishes are spread evenly between
    /// the ticks. Does nothing before init.
    pub fn pump(&mut self, elapsed: f64) -> Vec<OutputMessage> {
        if self.engine.is_none() {
            return Vec::new();
        }
        let ticks = self.tick_cadence.due(elapsed);
        let publishes = self.publish_cadence.due(elapsed);

        let mut outputs = Vec::with_capacity(publishes as usize);
        let mut ticked = 0;
        for j in 1..=publishes {
            let target = ticks * j / publishes;
            while ticked < target {
                self.on_tick();
                ticked += 1;
            }
            outputs.extend(self.on_publish());
        }
        for _ in ticked..ticks {
            self.on_tick();
        }
        outputs
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        let rates = RateConfig::default();
        Self {
            engine: None,
            scheduler: TickScheduler::default(),
            publisher: SnapshotPublisher::new(),
            rates,
            compile_options: CompileOptions::default(),
            tick_cadence: Cadence::new(rates.tick_hz),
            publish_cadence: Cadence::new(rates.publish_hz),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
