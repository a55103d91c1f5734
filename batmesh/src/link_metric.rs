//! Bidirectional link quality tracking.
//!
//! Link quality is tracked in terms of two measured quantities:
//!
//! - Receive Quality (RQ): the fraction of a neighbor's recent sequence
//!   numbers observed on this link.
//! - Echo Quality (EQ): the fraction of our own recent sequence numbers
//!   echoed back to us by this neighbor on this link.
//!
//! From these a Transmission Quality (TQ) value is computed, with an
//! asymmetric adjustment that nonlinearly penalizes poor RQ.

use std::collections::HashMap;

use core::fmt;

use tokio::time::Instant;

use crate::link_addr::LinkAddr;
use crate::sequence_number::{SeqNum, LOCAL_WINDOW_SIZE, SQN_ADDR_SIZE};
use crate::window_ring::WindowRing;

/// Upper bound of the TQ scale. Also the value written into a window slot to
/// record a hit.
pub const TQ_MAX_VALUE: u8 = 255;
/// Minimum number of RQ samples required before a TQ is computed.
pub const CUTOFF_RQ_SAMPLES: usize = 10;
/// Minimum number of EQ samples required before a TQ is computed.
pub const CUTOFF_EQ_SAMPLES: usize = 10;
/// TQ values below this are clamped to zero.
pub const CUTOFF_TQ: u32 = 10;

/// Quality measurements for a single link (one address) of a neighbor.
#[derive(Debug, Clone)]
pub struct LinkData {
    tq: u8,
    rq_window: WindowRing,
    eq_window: WindowRing,
    last_seen: Option<Instant>,
}

impl LinkData {
    fn new() -> Self {
        LinkData {
            tq: 0,
            rq_window: WindowRing::new(SQN_ADDR_SIZE, LOCAL_WINDOW_SIZE, 0),
            eq_window: WindowRing::new(SQN_ADDR_SIZE, LOCAL_WINDOW_SIZE, 0),
            last_seen: None,
        }
    }

    /// The most recently computed TQ value for this link.
    pub fn tq(&self) -> u8 {
        self.tq
    }

    /// When traffic was last observed on this link, if ever.
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// The window of receive observations, indexed by the neighbor's
    /// sequence numbers.
    pub fn rq_window(&self) -> &WindowRing {
        &self.rq_window
    }

    /// The window of echo observations, indexed by our own sequence numbers.
    pub fn eq_window(&self) -> &WindowRing {
        &self.eq_window
    }

    /// Record a receive observation at `seq`. Writing 0 slides the window
    /// without scoring a hit.
    fn record_receive(&mut self, seq: SeqNum, value: u8) {
        self.rq_window.write(seq.num(), value);
        self.update_tq();
    }

    /// Record an echo observation at `seq`. Writing 0 slides the window
    /// without scoring a hit.
    fn record_echo(&mut self, seq: SeqNum, value: u8) {
        self.eq_window.write(seq.num(), value);
        self.update_tq();
    }

    fn touch(&mut self, when: Instant) {
        if self.last_seen.map_or(true, |seen| when > seen) {
            self.last_seen = Some(when);
        }
    }

    /// Recompute the TQ value from the current EQ and RQ windows.
    ///
    /// Window slots holding [`TQ_MAX_VALUE`] are counted as successful
    /// samples. A raw TQ probability `EQ / RQ` is scaled to the TQ range and
    /// an asymmetric penalty is applied; the integer penalty calculation is
    /// equivalent to
    /// `255 * (1 - (1 - RQ)^3) == 255 - (255 * (window - rq_count)^3) / window^3`.
    fn update_tq(&mut self) {
        let rq_count = self.rq_window.count_hits(TQ_MAX_VALUE);
        let eq_count = self.eq_window.count_hits(TQ_MAX_VALUE);

        self.tq = if rq_count < CUTOFF_RQ_SAMPLES || eq_count < CUTOFF_EQ_SAMPLES {
            0
        } else if rq_count < eq_count {
            // Prevent a TQ above the scale maximum.
            TQ_MAX_VALUE
        } else {
            let max = TQ_MAX_VALUE as u32;
            let window = self.rq_window.window_size();
            let raw_tq = eq_count as u32 * max / rq_count as u32;
            let missed = window - rq_count as u32;
            let asym_penalty = max - max * missed * missed * missed / (window * window * window);
            let tq = raw_tq * asym_penalty / max;
            if tq < CUTOFF_TQ {
                0
            } else {
                tq as u8
            }
        };
    }
}

impl fmt::Display for LinkData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "<linkData: TQ={}, RQ={:.1}%, EQ={:.1}%, Age={:?}>",
            self.tq,
            self.rq_window.count_hits(TQ_MAX_VALUE) as f64 * 100.0
                / self.rq_window.window_size() as f64,
            self.eq_window.count_hits(TQ_MAX_VALUE) as f64 * 100.0
                / self.eq_window.window_size() as f64,
            self.last_seen.map(|seen| seen.elapsed()),
        ))
    }
}

/// The per-link quality measurements of a single neighbor, keyed by the
/// neighbor's link addresses.
///
/// All windows of a neighbor slide together: marking an observation on one
/// link slides the sibling links' windows to the same sequence number
/// without scoring, so sample counts stay comparable across links.
#[derive(Debug, Clone, Default)]
pub struct NodeLinks {
    links: HashMap<LinkAddr, LinkData>,
}

impl NodeLinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record reception of a neighbor's OGM with sequence number `seq` on
    /// the link `addr`, creating the link on first sight.
    pub fn mark_receive(&mut self, addr: LinkAddr, seq: SeqNum, when: Instant) {
        self.links.entry(addr).or_insert_with(LinkData::new);
        for (link_addr, link) in self.links.iter_mut() {
            if *link_addr == addr {
                link.record_receive(seq, TQ_MAX_VALUE);
                link.touch(when);
            } else {
                link.record_receive(seq, 0);
            }
        }
    }

    /// Record an echo of our own OGM with sequence number `seq`. When `addr`
    /// is `None` (echo not attributable to a single link, or a window
    /// refresh on advertising) every window slides without scoring.
    pub fn mark_echo(&mut self, addr: Option<LinkAddr>, seq: SeqNum, when: Instant) {
        for (link_addr, link) in self.links.iter_mut() {
            if Some(*link_addr) == addr {
                link.record_echo(seq, TQ_MAX_VALUE);
                link.touch(when);
            } else {
                link.record_echo(seq, 0);
            }
        }
    }

    /// Whether `addr` is a known link of this neighbor.
    pub fn contains(&self, addr: &LinkAddr) -> bool {
        self.links.contains_key(addr)
    }

    /// The measurements for the link `addr`, if known.
    pub fn get(&self, addr: &LinkAddr) -> Option<&LinkData> {
        self.links.get(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkAddr, &LinkData)> {
        self.links.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Drop links which have not been seen since `cutoff`. Returns the
    /// number of links removed.
    pub fn prune_stale(&mut self, cutoff: Instant) -> usize {
        let before = self.links.len();
        self.links
            .retain(|_, link| link.last_seen.map_or(false, |seen| seen >= cutoff));
        before - self.links.len()
    }
}
