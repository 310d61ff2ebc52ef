use clap::{Parser, Subcommand};
use flowline_core::compile::{ConstructionError, compile};
use flowline_core::control::{ControlChannel, ControlError, ControlMessage, OutputMessage};
use flowline_core::description::{GraphDescription, LoadError, load_description};
use flowline_core::graph::NodeState;
use flowline_core::sim::{DEFAULT_PUBLISH_HZ, DEFAULT_TICK_HZ, RateConfig, RateError};
use flowline_core::snapshot::SnapshotBinary;
use flowline_core::substance::{Component, SubstanceVector};
use flowline_runtime::{RuntimeConfig, RuntimeError, SimWorker};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowline")]
#[command(about = "Flowline - flow network simulation runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and compile a graph description
    Validate {
        /// Path to the description (.json, .ron or .toml)
        graph: PathBuf,
    },
    /// Run a deterministic headless simulation
    Run {
        /// Path to the description (.json, .ron or .toml)
        graph: PathBuf,
        #[command(flatten)]
        opts: RunArgs,
    },
    /// Run in real time on the worker thread and print each snapshot
    Watch {
        /// Path to the description (.json, .ron or .toml)
        graph: PathBuf,
        #[command(flatten)]
        opts: RunArgs,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Simulated seconds to run
    #[arg(long, default_value_t = 1.0)]
    seconds: f64,
    /// Tick rate in Hz
    #[arg(long, default_value_t = DEFAULT_TICK_HZ)]
    tick_hz: f64,
    /// Publish rate in Hz
    #[arg(long, default_value_t = DEFAULT_PUBLISH_HZ)]
    publish_hz: f64,
    /// Material to feed, as NODE:COMPONENT=AMOUNT (repeatable)
    #[arg(long = "feed", value_parser = parse_feed)]
    feeds: Vec<FeedArg>,
    /// Repeat the feeds every SECS seconds instead of once at the start
    #[arg(long)]
    feed_every: Option<f64>,
    /// Router condition, as NODE=true|false (repeatable)
    #[arg(long = "router", value_parser = parse_router)]
    routers: Vec<RouterArg>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("graph rejected: {0}")]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Rate(#[from] RateError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("simulation reported: {0}")]
    Reported(String),

    #[error("invalid argument: {0}")]
    Argument(String),
}

// ---------------------------------------------------------------------------
// Flag parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct FeedArg {
    node_id: String,
    substance: SubstanceVector,
}

#[derive(Debug, Clone, PartialEq)]
struct RouterArg {
    node_id: String,
    condition: bool,
}

/// `NODE:COMPONENT=AMOUNT`, e.g. `intake:liquid=8`.
fn parse_feed(s: &str) -> Result<FeedArg, String> {
    let (node, rest) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NODE:COMPONENT=AMOUNT, got '{s}'"))?;
    let (component, amount) = rest
        .split_once('=')
        .ok_or_else(|| format!("expected COMPONENT=AMOUNT after ':', got '{rest}'"))?;
    if node.is_empty() {
        return Err(format!("missing node id in '{s}'"));
    }
    let component =
        Component::from_name(component).ok_or_else(|| format!("unknown component '{component}'"))?;
    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("invalid amount '{amount}'"))?;
    Ok(FeedArg {
        node_id: node.to_string(),
        substance: SubstanceVector::of(component, amount),
    })
}

/// `NODE=BOOL`, e.g. `splitter=false`.
fn parse_router(s: &str) -> Result<RouterArg, String> {
    let (node, condition) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NODE=true|false, got '{s}'"))?;
    if node.is_empty() {
        return Err(format!("missing node id in '{s}'"));
    }
    let condition = condition
        .parse()
        .map_err(|_| format!("expected true or false, got '{condition}'"))?;
    Ok(RouterArg {
        node_id: node.to_string(),
        condition,
    })
}

impl RunArgs {
    fn rates(&self) -> Result<RateConfig, CliError> {
        Ok(RateConfig::new(self.tick_hz, self.publish_hz)?)
    }

    fn check(&self) -> Result<(), CliError> {
        self.run_for()?;
        self.feed_period()?;
        Ok(())
    }

    /// `--seconds` as a wall-clock span.
    fn run_for(&self) -> Result<Duration, CliError> {
        Duration::try_from_secs_f64(self.seconds)
            .map_err(|_| CliError::Argument(format!("--seconds {}", self.seconds)))
    }

    fn feed_period(&self) -> Result<Option<Duration>, CliError> {
        let Some(every) = self.feed_every else {
            return Ok(None);
        };
        match Duration::try_from_secs_f64(every) {
            Ok(period) if !period.is_zero() => Ok(Some(period)),
            _ => Err(CliError::Argument(format!("--feed-every {every}"))),
        }
    }

    fn feed_messages(&self) -> impl Iterator<Item = ControlMessage> + '_ {
        self.feeds.iter().map(|f| ControlMessage::Feed {
            node_id: f.node_id.clone(),
            substance: f.substance,
        })
    }

    fn router_messages(&self) -> impl Iterator<Item = ControlMessage> + '_ {
        self.routers.iter().map(|r| ControlMessage::SetRouter {
            node_id: r.node_id.clone(),
            condition: r.condition,
        })
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { graph } => cmd_validate(&graph),
        Commands::Run { graph, opts } => cmd_run(&graph, &opts),
        Commands::Watch { graph, opts } => cmd_watch(&graph, &opts),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(path: &Path) -> Result<(), CliError> {
    println!("Validating graph: {}", path.display());
    let desc = load_description(path)?;
    let graph = compile(&desc)?;
    let routers = graph.nodes().iter().filter(|n| n.is_router()).count();
    println!(
        "✓ Graph is valid: {} nodes ({} routers), {} edges",
        graph.node_count(),
        routers,
        graph.edge_count()
    );
    Ok(())
}

fn cmd_run(path: &Path, opts: &RunArgs) -> Result<(), CliError> {
    opts.check()?;
    let desc = load_description(path)?;
    let mut channel = ControlChannel::new(opts.rates()?)?;
    init_channel(&mut channel, desc)?;
    for msg in opts.router_messages() {
        channel.apply(msg)?;
    }

    println!(
        "Running {} for {:.3} s at {} Hz (publish {} Hz)",
        path.display(),
        opts.seconds,
        opts.tick_hz,
        opts.publish_hz
    );

    let started = Instant::now();
    let mut snapshots = 0usize;
    let mut remaining = opts.seconds;
    let mut first = true;
    while first || remaining > 0.0 {
        if first || opts.feed_every.is_some() {
            for msg in opts.feed_messages() {
                channel.apply(msg)?;
            }
        }
        first = false;

        let chunk = opts.feed_every.map_or(remaining, |every| every.min(remaining));
        snapshots += channel
            .pump(chunk)
            .iter()
            .filter(|m| matches!(m, OutputMessage::Snapshot(_)))
            .count();
        remaining -= chunk;
    }

    let engine = channel.engine().ok_or(ControlError::NotInitialized)?;
    println!(
        "✓ Simulated {:.3} s in {} ticks ({} snapshots, {:.1} ms wall)",
        engine.sim_time(),
        engine.ticks(),
        snapshots,
        started.elapsed().as_secs_f64() * 1000.0
    );
    println!(
        "  {:<20} {:<8} {:>12} {:>12}",
        "node", "state", "inbound", "outbound"
    );
    for view in engine.node_views() {
        println!(
            "  {:<20} {:<8} {:>12.4} {:>12.4}",
            view.id,
            state_label(view.state),
            view.inbound_total(),
            view.outbound_total()
        );
    }
    let in_flight: f64 = engine.edge_views().iter().map(|e| e.in_flight_total()).sum();
    println!("  in flight on edges: {in_flight:.4}");
    println!("  total material:     {:.4}", engine.total_substance().total());
    Ok(())
}

fn cmd_watch(path: &Path, opts: &RunArgs) -> Result<(), CliError> {
    opts.check()?;
    let desc = load_description(path)?;
    let worker = SimWorker::spawn(RuntimeConfig {
        rates: opts.rates()?,
        ..RuntimeConfig::default()
    })?;

    worker.send(ControlMessage::Init { graph: desc })?;
    for msg in opts.router_messages().chain(opts.feed_messages()) {
        worker.send(msg)?;
    }

    let started = Instant::now();
    let run_for = opts.run_for()?;
    let deadline = started
        .checked_add(run_for)
        .ok_or_else(|| CliError::Argument(format!("--seconds {}", opts.seconds)))?;
    let feed_period = opts.feed_period()?;
    let mut next_feed = feed_period.and_then(|every| started.checked_add(every));
    let mut node_ids: Vec<String> = Vec::new();

    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        if let (Some(at), Some(every)) = (next_feed, feed_period) {
            if Instant::now() >= at {
                for msg in opts.feed_messages() {
                    worker.send(msg)?;
                }
                next_feed = at.checked_add(every);
            }
        }

        let wait = next_feed.map_or(left, |at| {
            left.min(at.saturating_duration_since(Instant::now()))
        });
        match worker.recv_timeout(wait) {
            Ok(OutputMessage::Ready { node_ids: ids, edge_ids }) => {
                println!("ready: {} nodes, {} edges", ids.len(), edge_ids.len());
                node_ids = ids;
            }
            Ok(OutputMessage::Error { message }) => {
                if node_ids.is_empty() {
                    return Err(CliError::Reported(message));
                }
                eprintln!("warning: {message}");
            }
            Ok(OutputMessage::Snapshot(snapshot)) => {
                if let Some(ids) = &snapshot.node_ids {
                    node_ids = ids.clone();
                }
                println!("{}", snapshot_line(&snapshot, &node_ids));
            }
            Err(e) if e.is_disconnected() => return Err(RuntimeError::Disconnected.into()),
            Err(_) => continue,
        }
    }

    worker.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_channel(channel: &mut ControlChannel, graph: GraphDescription) -> Result<(), CliError> {
    match channel.apply(ControlMessage::Init { graph })? {
        Some(OutputMessage::Ready { node_ids, edge_ids }) => {
            tracing::debug!(nodes = node_ids.len(), edges = edge_ids.len(), "graph ready");
            Ok(())
        }
        Some(OutputMessage::Error { message }) => Err(CliError::Reported(message)),
        _ => Err(CliError::Reported("init produced no ready reply".into())),
    }
}

fn state_label(state: NodeState) -> &'static str {
    match state {
        NodeState::Idle => "idle",
        NodeState::Running => "running",
        NodeState::Blocked => "blocked",
    }
}

/// One line per snapshot: time, state counts, and the busiest node.
fn snapshot_line(snapshot: &SnapshotBinary, node_ids: &[String]) -> String {
    let mut running = 0;
    let mut blocked = 0;
    for i in 0..snapshot.node_count() {
        match snapshot.node_state(i) {
            Some(NodeState::Running) => running += 1,
            Some(NodeState::Blocked) => blocked += 1,
            _ => {}
        }
    }
    let inbound: f32 = snapshot.node_inbound_total.iter().sum();
    let in_flight: f32 = snapshot.edge_in_flight_total.iter().sum();
    let busiest = snapshot
        .node_inbound_total
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .filter(|(_, v)| **v > 0.0)
        .and_then(|(i, _)| node_ids.get(i))
        .map_or("-", String::as_str);
    format!(
        "t={:>8.3}  running={running:<4} blocked={blocked:<4} inbound={inbound:>10.3} in_flight={in_flight:>10.3} busiest={busiest}",
        snapshot.sim_time
    )
}
