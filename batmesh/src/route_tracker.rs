//! Tracking of all candidate next hops towards a destination.

use std::collections::HashMap;

use core::fmt;

use tokio::time::Instant;

use crate::link_addr::LinkAddr;
use crate::sequence_number::SeqNum;

/// A candidate next hop towards a destination: the path quality it last
/// advertised and the freshness of that advertisement.
#[derive(Debug, Clone)]
pub struct Hop {
    // The hop's advertised path quality, not including local link cost.
    quality: u8,
    sqn: SeqNum,
    last_seen: Instant,
}

impl Hop {
    /// The advertised path quality of this hop.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// The sequence number the quality was advertised with.
    pub fn sqn(&self) -> SeqNum {
        self.sqn
    }

    /// When this hop last advertised the destination.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

/// Tracks *all* candidate routes (next hops) and their advertised qualities
/// for a single destination node.
///
/// Next hops are indexed by link address: a node may own several addresses,
/// some reachable in one hop and others not, and they are scored separately.
#[derive(Debug, Clone)]
pub struct RouteTracker {
    next_hops: HashMap<LinkAddr, Hop>,
    latest_sqn: SeqNum,
}

impl RouteTracker {
    pub fn new() -> Self {
        RouteTracker {
            next_hops: HashMap::new(),
            latest_sqn: SeqNum::zero(),
        }
    }

    /// The freshest sequence number observed from the destination, across
    /// all next hops.
    pub fn latest_sqn(&self) -> SeqNum {
        self.latest_sqn
    }

    /// Record an advertisement of the destination via the next hop `link`.
    ///
    /// A hop is created on first sight. The tracker's latest sequence number
    /// advances monotonically under the windowed ordering, and the hop's
    /// quality is overwritten when the advertisement is at least as fresh as
    /// what the hop previously reported.
    pub fn update(&mut self, link: LinkAddr, sqn: SeqNum, quality: u8, when: Instant) {
        let hop = self.next_hops.entry(link).or_insert(Hop {
            quality,
            sqn,
            last_seen: when,
        });
        if sqn.greater_than(&self.latest_sqn) {
            self.latest_sqn = sqn;
        }
        if sqn.greater_than(&hop.sqn) || sqn.equal(&hop.sqn) {
            hop.quality = quality;
            hop.sqn = sqn;
            hop.last_seen = when;
        }
    }

    /// The tracked state of the next hop `link`, if any.
    pub fn get(&self, link: &LinkAddr) -> Option<&Hop> {
        self.next_hops.get(link)
    }

    pub fn next_hops(&self) -> impl Iterator<Item = (&LinkAddr, &Hop)> {
        self.next_hops.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }

    /// Drop next hops which have not advertised since `cutoff`. Returns the
    /// number of hops removed.
    pub fn prune_stale(&mut self, cutoff: Instant) -> usize {
        let before = self.next_hops.len();
        self.next_hops.retain(|_, hop| hop.last_seen >= cutoff);
        before - self.next_hops.len()
    }
}

impl Default for RouteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RouteTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{{routeTracker: SQN={}, ", self.latest_sqn))?;
        for (link, hop) in &self.next_hops {
            f.write_fmt(format_args!(
                "{}: Quality={}, SQN={}, Age={:?}, ",
                link,
                hop.quality,
                hop.sqn,
                hop.last_seen.elapsed()
            ))?;
        }
        f.write_str("}")
    }
}
