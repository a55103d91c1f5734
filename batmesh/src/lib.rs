use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use core::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::Metrics;
use crate::node_id::NodeId;
use crate::router::Router;

pub mod link_addr;
pub mod link_metric;
pub mod metrics;
pub mod node_id;
pub mod ogm;
pub mod route_tracker;
pub mod routing_table;
pub mod sequence_number;
pub mod window_ring;

mod bundler;
mod iface;
mod router;

/// The default UDP port OGM bundles are broadcast on.
pub const DEFAULT_UDP_PORT: u16 = 30703;

/// Capacity of the OGM channels connecting the network loops, the
/// classifier and the bundler.
const OGM_CHANNEL_CAPACITY: usize = 64;
/// Capacity of the bundle channels connecting the bundler, the fanout and
/// the per-interface transmitters.
const BUNDLE_CHANNEL_CAPACITY: usize = 8;

/// Config for a batmesh [`Node`].
pub struct Config<M> {
    /// The identity this node participates in the mesh under.
    pub node_id: NodeId,
    /// The UDP port to listen and broadcast on.
    pub udp_port: u16,
    /// Interval between advertisements of the own OGM.
    pub ogm_interval: Duration,
    /// Maximum additive jitter applied to each advertisement interval.
    pub ogm_jitter: Duration,
    /// How long links and routes may stay silent before they are pruned.
    pub stale_threshold: Duration,
    /// Implementation of the [`Metrics`] trait, used to expose information
    /// about the system internals.
    pub metrics: M,
}

/// A running mesh node: the classifier task owning all routing state, a
/// bundler coalescing outbound OGMs, and one receive / transmit task pair
/// per selected network interface, connected by channels. Dropping or
/// [`stopping`](Node::stop) the node cancels all of them.
pub struct Node {
    node_id: NodeId,
    cancel: CancellationToken,
}

impl Node {
    /// Set up a new `Node` with the provided [`Config`] and start its
    /// network and routing tasks.
    pub async fn new<M>(config: Config<M>) -> Result<Self, NodeSetupError>
    where
        M: Metrics + Clone + Send + Sync + 'static,
    {
        let ifaces = iface::qualifying_interfaces();
        if ifaces.is_empty() {
            return Err(NodeSetupError::NoInterfaces);
        }

        let cancel = CancellationToken::new();
        let own_addrs: Arc<HashSet<_>> = Arc::new(ifaces.iter().map(|iface| iface.addr).collect());

        let (inbound_tx, inbound_rx) = mpsc::channel(OGM_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OGM_CHANNEL_CAPACITY);
        let (bundle_tx, bundle_rx) = mpsc::channel(BUNDLE_CHANNEL_CAPACITY);

        let mut sinks = Vec::with_capacity(ifaces.len());
        for iface in ifaces {
            let sock = match iface::bind_socket(&iface, config.udp_port).await {
                Ok(sock) => Arc::new(sock),
                Err(err) => {
                    // Unwind the tasks spawned for earlier interfaces.
                    cancel.cancel();
                    return Err(NodeSetupError::Bind {
                        iface: iface.name,
                        err,
                    });
                }
            };
            info!(
                iface = %iface.name,
                addr=%iface.addr,
                broadcast=%iface.broadcast,
                "Carrying OGM traffic on interface"
            );

            let (sink_tx, sink_rx) = mpsc::channel(BUNDLE_CHANNEL_CAPACITY);
            sinks.push(sink_tx);

            tokio::spawn(iface::run_receiver(
                sock.clone(),
                iface.addr,
                own_addrs.clone(),
                inbound_tx.clone(),
                cancel.clone(),
                config.metrics.clone(),
            ));
            tokio::spawn(iface::run_transmitter(
                sock,
                iface,
                config.udp_port,
                sink_rx,
                config.metrics.clone(),
            ));
        }
        // The router observes a closed inbound channel once every receiver
        // has stopped.
        drop(inbound_tx);

        tokio::spawn(bundler::run_bundler(
            outbound_rx,
            bundle_tx,
            cancel.clone(),
            config.metrics.clone(),
        ));
        tokio::spawn(bundler::run_fanout(bundle_rx, sinks, cancel.clone()));

        let router = Router::new(
            config.node_id,
            config.ogm_interval,
            config.ogm_jitter,
            config.stale_threshold,
            config.metrics,
        );
        tokio::spawn(router.run(inbound_rx, outbound_tx, cancel.clone()));

        info!(node_id=%config.node_id, port = config.udp_port, "Node started");
        Ok(Node {
            node_id: config.node_id,
            cancel,
        })
    }

    /// The identity this node participates in the mesh under.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Stop the node. Every task is unblocked and exits; in flight bundles
    /// may be lost.
    pub fn stop(&self) {
        debug!(node_id=%self.node_id, "Stopping node");
        self.cancel.cancel();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Fatal error raised while setting up a [`Node`].
#[derive(Debug)]
pub enum NodeSetupError {
    /// No up, broadcast capable interface with an IPv4 address was found.
    NoInterfaces,
    /// A socket could not be bound on a selected interface.
    Bind { iface: String, err: io::Error },
}

impl fmt::Display for NodeSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoInterfaces => f.write_str("no broadcast capable IPv4 interface found"),
            Self::Bind { iface, err } => f.write_fmt(format_args!(
                "failed to bind UDP socket on interface {iface}: {err}"
            )),
        }
    }
}

impl std::error::Error for NodeSetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { err, .. } => Some(err),
            _ => None,
        }
    }
}
