//! Best next hop selection.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::link_addr::LinkAddr;
use crate::node_id::NodeId;
use crate::route_tracker::{Hop, RouteTracker};

/// The chosen route towards a destination: the link to hand packets to and
/// the quality and freshness it advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestNextHop {
    link: LinkAddr,
    quality: u8,
    age: Duration,
}

impl BestNextHop {
    /// The link address packets for the destination should be forwarded to.
    pub fn link(&self) -> LinkAddr {
        self.link
    }

    /// The advertised path quality of the chosen hop.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// How long ago the chosen hop last advertised the destination.
    pub fn age(&self) -> Duration {
        self.age
    }
}

/// The best next hop for each reachable destination, rebuilt from the route
/// trackers whenever they change.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<NodeId, BestNextHop>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current best next hop towards `node`, if one is known.
    pub fn get(&self, node: &NodeId) -> Option<&BestNextHop> {
        self.routes.get(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &BestNextHop)> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Recompute the table from the given route trackers.
    ///
    /// For each destination the link with the highest advertised quality
    /// wins; ties break towards the most recently seen hop, then towards the
    /// lowest link address so selection is deterministic. Destinations whose
    /// best hop has not been seen within `stale_after` are omitted.
    pub fn rebuild(
        &mut self,
        trackers: &HashMap<NodeId, RouteTracker>,
        now: Instant,
        stale_after: Duration,
    ) {
        self.routes.clear();
        for (node, tracker) in trackers {
            let mut best: Option<(&LinkAddr, &Hop)> = None;
            for (link, hop) in tracker.next_hops() {
                let better = match best {
                    None => true,
                    Some((best_link, best_hop)) => {
                        hop.quality() > best_hop.quality()
                            || (hop.quality() == best_hop.quality()
                                && hop.last_seen() > best_hop.last_seen())
                            || (hop.quality() == best_hop.quality()
                                && hop.last_seen() == best_hop.last_seen()
                                && link < best_link)
                    }
                };
                if better {
                    best = Some((link, hop));
                }
            }

            let Some((link, hop)) = best else { continue };
            let age = now.duration_since(hop.last_seen());
            if age > stale_after {
                continue;
            }
            self.routes.insert(
                *node,
                BestNextHop {
                    link: *link,
                    quality: hop.quality(),
                    age,
                },
            );
        }
    }
}
