//! The protocol brain: a single task owning all routing state.
//!
//! Every mutation of neighbor, route tracker and routing table state happens
//! on this task, which drains the inbound OGM channel serially. Other tasks
//! communicate with it over channels only, so no locking is needed.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::link_addr::LinkAddr;
use crate::link_metric::{NodeLinks, TQ_MAX_VALUE};
use crate::metrics::Metrics;
use crate::node_id::NodeId;
use crate::ogm::Ogm;
use crate::route_tracker::RouteTracker;
use crate::routing_table::RoutingTable;
use crate::sequence_number::SeqNum;

/// Initial time-to-live of an advertised OGM, bounding the number of
/// forwarding hops.
pub const OGM_TTL: u8 = 16;
/// Quality reduction applied per forwarding hop, on the TQ scale.
pub const TQ_HOP_PENALTY: u8 = 10;
/// Factor a rebroadcast OGM's quality is scaled by, out of
/// [`TQ_MAX_VALUE`].
const REBROADCAST_LOSS_FACTOR: u8 = TQ_MAX_VALUE - TQ_HOP_PENALTY;
/// The interval between checks for stale link and route state.
const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// A node's entire routing state, together with the classification and
/// forwarding logic which drives it.
pub(crate) struct Router<M> {
    node_id: NodeId,
    sqn: SeqNum,
    neighbors: HashMap<NodeId, NodeLinks>,
    trackers: HashMap<NodeId, RouteTracker>,
    routing_table: RoutingTable,
    advert_interval: Duration,
    advert_jitter: Duration,
    stale_after: Duration,
    metrics: M,
}

impl<M> Router<M>
where
    M: Metrics,
{
    pub(crate) fn new(
        node_id: NodeId,
        advert_interval: Duration,
        advert_jitter: Duration,
        stale_after: Duration,
        metrics: M,
    ) -> Self {
        Router {
            node_id,
            sqn: SeqNum::with_defaults(0),
            neighbors: HashMap::new(),
            trackers: HashMap::new(),
            routing_table: RoutingTable::new(),
            advert_interval,
            advert_jitter,
            stale_after,
            metrics,
        }
    }

    /// Drive the router until cancellation: classify inbound OGMs,
    /// periodically advertise an own OGM and prune stale state.
    pub(crate) async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Ogm>,
        outbound: mpsc::Sender<Ogm>,
        cancel: CancellationToken,
    ) {
        let advert = sleep(self.jittered_interval());
        tokio::pin!(advert);

        let mut prune_timer = tokio::time::interval(STALE_CHECK_INTERVAL);
        prune_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = cancel.cancelled() => {
                    debug!("Router shutting down");
                    return;
                }
                () = advert.as_mut() => {
                    let ogm = self.advertise(Instant::now());
                    trace!(ogm=%ogm, "Advertising own OGM");
                    if outbound.send(ogm).await.is_err() {
                        warn!("Outbound OGM channel closed, stopping router");
                        return;
                    }
                    advert.as_mut().reset(Instant::now() + self.jittered_interval());
                }
                _ = prune_timer.tick() => {
                    self.prune_stale(Instant::now());
                }
                ogm = inbound.recv() => {
                    let Some(ogm) = ogm else {
                        debug!("Inbound OGM channel closed, stopping router");
                        return;
                    };
                    self.metrics.router_ogm_received();
                    if let Some(forward) = self.process_ogm(ogm, Instant::now()) {
                        if outbound.send(forward).await.is_err() {
                            warn!("Outbound OGM channel closed, stopping router");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// The advertisement interval with fresh additive jitter.
    fn jittered_interval(&self) -> Duration {
        let jitter_ms = self.advert_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.advert_interval;
        }
        self.advert_interval + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    /// Advance the own sequence number and construct the OGM announcing it.
    /// The transmit address stays unspecified until an interface puts the
    /// OGM on the wire.
    fn advertise(&mut self, now: Instant) -> Ogm {
        self.sqn.increment();

        let ogm = Ogm {
            origin: self.node_id,
            sender: self.node_id,
            tx_addr: LinkAddr::UNSPECIFIED,
            prev_sender: NodeId::EMPTY,
            prev_addr: LinkAddr::UNSPECIFIED,
            sqn: self.sqn,
            ttl: OGM_TTL,
            quality: TQ_MAX_VALUE,
            rx_addr: LinkAddr::UNSPECIFIED,
        };

        // Slide every neighbor's echo window to the new sequence number, so
        // an advertisement that never returns registers as a miss.
        for links in self.neighbors.values_mut() {
            links.mark_echo(None, self.sqn, now);
        }

        self.metrics.router_advert_sent();
        self.rebuild_routes(now);
        ogm
    }

    /// Classify one inbound OGM, update the affected metrics and state, and
    /// return the transformed OGM if it is to be rebroadcast.
    fn process_ogm(&mut self, ogm: Ogm, now: Instant) -> Option<Ogm> {
        // The OGM was sent by a known neighbor, over a link of that neighbor
        // we have seen before.
        let neighbor = self.neighbors.contains_key(&ogm.sender);
        let via_known_link = self
            .neighbors
            .get(&ogm.sender)
            .map_or(false, |links| links.contains(&ogm.tx_addr));

        if ogm.ttl == 0 {
            trace!(ogm=%ogm, "Dropping OGM with expired TTL");
            self.metrics.router_ogm_dropped();
            return None;
        }

        if ogm.origin == self.node_id
            && ogm.prev_sender == self.node_id
            && neighbor
            && via_known_link
        {
            // One of our own OGMs, echoed back by a known neighbor via a
            // known link. It scores that link's echo quality and is never
            // rebroadcast. EQ and RQ are only compatible for estimating TQ
            // when the echo went out and came back on the same link.
            let direct_link = ogm.rx_addr == ogm.prev_addr;
            let links = self
                .neighbors
                .get_mut(&ogm.sender)
                .expect("sender was just found in the neighbor map; qed");
            links.mark_echo(direct_link.then_some(ogm.tx_addr), ogm.sqn, now);

            trace!(sender=%ogm.sender, direct_link, "Processed echo of own OGM");
            self.metrics.router_own_echo_processed();
            return None;
        }

        if ogm.sender == ogm.origin && ogm.origin != self.node_id {
            // A neighbor announcing itself over a 1 hop link. It informs us
            // of the node's existence and updates our receive quality for
            // the link. Always rebroadcast.
            self.neighbors
                .entry(ogm.origin)
                .or_default()
                .mark_receive(ogm.tx_addr, ogm.sqn, now);
            self.trackers
                .entry(ogm.origin)
                .or_default()
                .update(ogm.tx_addr, ogm.sqn, ogm.quality, now);

            trace!(origin=%ogm.origin, link=%ogm.tx_addr, "Processed neighbor OGM");
            self.metrics.router_neighbor_ogm_processed();
            self.rebuild_routes(now);
            return self.rebroadcast(ogm);
        }

        if ogm.sender != ogm.origin
            && ogm.origin != self.node_id
            && ogm.sender != self.node_id
            && neighbor
            && via_known_link
        {
            // Forwarded to us via one or more intermediate nodes: the sender
            // is a candidate next hop towards the origin. Note the origin
            // itself may also be a direct neighbor reached over a different,
            // multi-hop path. Only rebroadcast when the OGM arrived via our
            // current best route back to the origin, and we were not the one
            // who forwarded it two hops ago.
            let via_best_route = self
                .routing_table
                .get(&ogm.origin)
                .map_or(false, |best| best.link() == ogm.tx_addr);
            let broadcast_loop = ogm.prev_sender == self.node_id;

            self.trackers
                .entry(ogm.origin)
                .or_default()
                .update(ogm.tx_addr, ogm.sqn, ogm.quality, now);

            trace!(origin=%ogm.origin, sender=%ogm.sender, via_best_route, "Processed distant OGM");
            self.metrics.router_distant_ogm_processed();
            self.rebuild_routes(now);
            if via_best_route && !broadcast_loop {
                return self.rebroadcast(ogm);
            }
            return None;
        }

        trace!(ogm=%ogm, "Ignoring unclassifiable OGM");
        self.metrics.router_ogm_dropped();
        None
    }

    /// Transform an OGM for re-emission: step the hop history, decrement the
    /// TTL and apply the hop penalty to the carried quality.
    fn rebroadcast(&mut self, mut ogm: Ogm) -> Option<Ogm> {
        if ogm.ttl < 2 {
            trace!(ogm=%ogm, "Not rebroadcasting OGM at the end of its TTL");
            return None;
        }

        ogm.prev_sender = ogm.sender;
        ogm.prev_addr = ogm.tx_addr;
        ogm.sender = self.node_id;
        ogm.ttl -= 1;
        ogm.quality =
            (ogm.quality as u32 * REBROADCAST_LOSS_FACTOR as u32 / TQ_MAX_VALUE as u32) as u8;
        // The transmit address is assigned per outgoing interface just
        // before serialization.
        ogm.tx_addr = LinkAddr::UNSPECIFIED;

        self.metrics.router_ogm_rebroadcast();
        Some(ogm)
    }

    fn rebuild_routes(&mut self, now: Instant) {
        self.routing_table
            .rebuild(&self.trackers, now, self.stale_after);
        self.metrics
            .router_route_selection_ran(self.routing_table.len());
    }

    /// Drop links and next hops which have been silent past the stale
    /// threshold, then empty neighbors and trackers.
    fn prune_stale(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.stale_after) else {
            return;
        };

        let mut links = 0;
        for node_links in self.neighbors.values_mut() {
            links += node_links.prune_stale(cutoff);
        }
        self.neighbors.retain(|_, node_links| !node_links.is_empty());

        let mut hops = 0;
        for tracker in self.trackers.values_mut() {
            hops += tracker.prune_stale(cutoff);
        }
        self.trackers.retain(|_, tracker| !tracker.is_empty());

        if links > 0 || hops > 0 {
            debug!(links, hops, "Pruned stale link and route state");
            self.metrics.router_state_pruned(links, hops);
            self.rebuild_routes(now);
        }
    }
}
