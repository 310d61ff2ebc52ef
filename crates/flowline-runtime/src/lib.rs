//! Flowline Runtime -- runs a [`ControlChannel`] on its own thread.
//!
//! The worker thread owns the controller outright. It waits on three sources
//! at once: the control message channel, a tick timer and a publish timer.
//! Because all three are served from the same thread, engine tables are only
//! ever touched by one thread and need no locking.
//!
//! Timers stay disarmed until the first successful `Init`. Whenever the
//! controller's loop generation changes (init, rate change) both timers are
//! replaced; the old receivers are dropped, so nothing scheduled under the
//! previous configuration fires.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, never, select, tick, unbounded};
use flowline_core::compile::CompileOptions;
use flowline_core::control::{ControlChannel, ControlError, ControlMessage, OutputMessage};
use flowline_core::sim::{RateConfig, RateError};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub rates: RateConfig,
    pub compile: CompileOptions,
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rates: RateConfig::default(),
            compile: CompileOptions::default(),
            thread_name: "flowline-sim".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to spawn simulation thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("simulation thread has stopped")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// SimWorker
// ---------------------------------------------------------------------------

/// Handle to a running simulation thread. Dropping it stops and joins the
/// thread.
#[derive(Debug)]
pub struct SimWorker {
    control_tx: Option<Sender<ControlMessage>>,
    output_rx: Receiver<OutputMessage>,
    handle: Option<JoinHandle<()>>,
}

impl SimWorker {
    pub fn spawn(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let channel = ControlChannel::new(config.rates)?.with_compile_options(config.compile);
        let (control_tx, control_rx) = unbounded();
        let (output_tx, output_rx) = unbounded();

        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_worker(channel, control_rx, output_tx))?;
        tracing::debug!(thread = %config.thread_name, "simulation thread started");

        Ok(Self {
            control_tx: Some(control_tx),
            output_rx,
            handle: Some(handle),
        })
    }

    /// Queue a control message. Never blocks.
    pub fn send(&self, msg: ControlMessage) -> Result<(), RuntimeError> {
        let tx = self.control_tx.as_ref().ok_or(RuntimeError::Disconnected)?;
        tx.send(msg).map_err(|_| RuntimeError::Disconnected)
    }

    /// Replies and snapshots, in the order the worker produced them.
    pub fn outputs(&self) -> &Receiver<OutputMessage> {
        &self.output_rx
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<OutputMessage, RecvTimeoutError> {
        self.output_rx.recv_timeout(timeout)
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the control channel is the stop signal.
        self.control_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("simulation thread exited with a panic");
            }
        }
    }
}

impl Drop for SimWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

struct Timers {
    tick: Receiver<Instant>,
    publish: Receiver<Instant>,
}

impl Timers {
    fn disarmed() -> Self {
        Self {
            tick: never(),
            publish: never(),
        }
    }

    fn for_rates(rates: RateConfig) -> Result<Self, RateError> {
        Ok(Self {
            tick: tick(rates.tick_interval()?),
            publish: tick(rates.publish_interval()?),
        })
    }

    /// Timers matching the controller's current state: disarmed until a
    /// graph is loaded.
    fn for_channel(channel: &ControlChannel) -> Result<Self, RateError> {
        if channel.is_initialized() {
            Self::for_rates(channel.rates())
        } else {
            Ok(Self::disarmed())
        }
    }
}

fn run_worker(
    mut channel: ControlChannel,
    control_rx: Receiver<ControlMessage>,
    output_tx: Sender<OutputMessage>,
) {
    let mut generation = channel.loop_generation();
    let mut timers = Timers::disarmed();

    loop {
        let output = select! {
            recv(control_rx) -> msg => match msg {
                Ok(msg) => guarded(&mut channel, "control message", |c| c.handle(msg)),
                Err(_) => break,
            },
            recv(timers.tick) -> _ => guarded(&mut channel, "tick", |c| {
                c.on_tick();
                None
            }),
            recv(timers.publish) -> _ => guarded(&mut channel, "publish", |c| c.on_publish()),
        };

        if let Some(output) = output {
            if output_tx.send(output).is_err() {
                break;
            }
        }

        if channel.loop_generation() != generation {
            generation = channel.loop_generation();
            let mut rebuilt = None;
            let failure = guarded(&mut channel, "timer rebuild", |c| {
                match Timers::for_channel(c) {
                    Ok(t) => {
                        rebuilt = Some(t);
                        None
                    }
                    Err(err) => Some(OutputMessage::Error {
                        message: format!("cannot schedule loops: {err}"),
                    }),
                }
            });
            // Both loops stay stopped until the next successful rebuild.
            timers = rebuilt.unwrap_or_else(Timers::disarmed);
            tracing::debug!(generation, armed = failure.is_none(), "rebuilt tick and publish timers");
            if let Some(output) = failure {
                if output_tx.send(output).is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("simulation thread stopping");
}

/// Run `f`, turning a panic into an error reply so the thread survives.
fn guarded<F>(channel: &mut ControlChannel, what: &str, f: F) -> Option<OutputMessage>
where
    F: FnOnce(&mut ControlChannel) -> Option<OutputMessage>,
{
    match catch_unwind(AssertUnwindSafe(|| f(channel))) {
        Ok(output) => output,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(%detail, "panic while handling {what}");
            Some(OutputMessage::Error {
                message: format!("internal error during {what}: {detail}"),
            })
        }
    }
}
