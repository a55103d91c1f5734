use std::error::Error;
use std::time::Duration;

use batmesh::metrics::Metrics;
use batmesh::node_id::NodeId;
use batmesh::{Config, Node, DEFAULT_UDP_PORT};
use clap::Parser;
use log::{info, LevelFilter};
#[cfg(target_family = "unix")]
use tokio::signal::{self, unix::SignalKind};

/// The default interval between own OGM advertisements, in seconds.
const DEFAULT_OGM_INTERVAL_SECS: u64 = 1;
/// The default maximum additive advertisement jitter, in milliseconds.
const DEFAULT_OGM_JITTER_MS: u64 = 100;
/// The default threshold for pruning silent links and routes, in seconds.
const DEFAULT_STALE_THRESHOLD_SECS: u64 = 120;

/// Metrics sink discarding every measurement. The daemon does not expose
/// telemetry; embedders of the library can plug in their own collector.
#[derive(Clone)]
struct NoMetrics;
impl Metrics for NoMetrics {}

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Identity to participate in the mesh under, at most 4 bytes.
    #[arg(short = 'i', long = "id")]
    id: NodeId,

    /// UDP port to listen and broadcast OGM bundles on.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_UDP_PORT)]
    port: u16,

    /// Seconds between advertisements of the own OGM.
    #[arg(long = "ogm-interval", default_value_t = DEFAULT_OGM_INTERVAL_SECS)]
    ogm_interval: u64,

    /// Maximum additive jitter on the advertisement interval, in
    /// milliseconds.
    #[arg(long = "ogm-jitter", default_value_t = DEFAULT_OGM_JITTER_MS)]
    ogm_jitter: u64,

    /// Seconds a link or route may stay silent before it is pruned.
    #[arg(long = "stale-threshold", default_value_t = DEFAULT_STALE_THRESHOLD_SECS)]
    stale_threshold: u64,

    /// Enable debug logging. Does nothing if `--silent` is set.
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Disable all logs except error logs.
    #[arg(long = "silent", default_value_t = false)]
    silent: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.silent {
        LevelFilter::Error
    } else if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    pretty_env_logger::formatted_timed_builder()
        .filter_module("batmesh", level)
        .filter_module("batmeshd", level)
        .init();

    let config = Config {
        node_id: cli.id,
        udp_port: cli.port,
        ogm_interval: Duration::from_secs(cli.ogm_interval),
        ogm_jitter: Duration::from_millis(cli.ogm_jitter),
        stale_threshold: Duration::from_secs(cli.stale_threshold),
        metrics: NoMetrics,
    };

    let node = Node::new(config).await?;
    info!("Mesh node {} running", node.node_id());

    #[cfg(target_family = "unix")]
    {
        let mut sigint =
            signal::unix::signal(SignalKind::interrupt()).expect("Can install SIGINT handler");
        let mut sigterm =
            signal::unix::signal(SignalKind::terminate()).expect("Can install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => { }
            _ = sigterm.recv() => { }
        }
    }
    #[cfg(not(target_family = "unix"))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to wait for SIGINT: {e}");
        }
    }

    info!("Shutting down");
    node.stop();

    Ok(())
}
