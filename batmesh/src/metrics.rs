//! Collection of runtime metrics of a `batmesh` node. The main item of
//! interest is the [`Metrics`] trait. Users can provide their own
//! implementation, or use the default method bodies to disable gathering
//! metrics.

/// The collection of all metrics exported by a [`batmesh node`](crate::Node).
/// It is up to the user to provide an implementation for the metrics they
/// are interested in. All methods have a default no-op implementation, so a
/// NOOP handler can be implemented as follows:
///
/// ```rust
/// use batmesh::metrics::Metrics;
///
/// #[derive(Clone)]
/// struct NoMetrics;
/// impl Metrics for NoMetrics {}
/// ```
pub trait Metrics {
    /// The router received an OGM from the network for classification.
    #[inline]
    fn router_ogm_received(&self) {}

    /// The router dropped an OGM without processing it: expired TTL, or no
    /// classification rule matched.
    #[inline]
    fn router_ogm_dropped(&self) {}

    /// The router processed an echo of one of its own OGMs, updating an
    /// echo quality window.
    #[inline]
    fn router_own_echo_processed(&self) {}

    /// The router processed an OGM originated by a direct neighbor.
    #[inline]
    fn router_neighbor_ogm_processed(&self) {}

    /// The router processed an OGM forwarded on behalf of a distant
    /// originator.
    #[inline]
    fn router_distant_ogm_processed(&self) {}

    /// The router queued an OGM for rebroadcast.
    #[inline]
    fn router_ogm_rebroadcast(&self) {}

    /// The router advertised an own OGM.
    #[inline]
    fn router_advert_sent(&self) {}

    /// The router rebuilt the routing table, with the resulting number of
    /// routable destinations.
    #[inline]
    fn router_route_selection_ran(&self, _routes: usize) {}

    /// The router pruned stale state: the number of links and next hops
    /// removed.
    #[inline]
    fn router_state_pruned(&self, _links: usize, _hops: usize) {}

    /// The bundler flushed a bundle of the given number of OGMs to the
    /// interfaces.
    #[inline]
    fn bundler_bundle_flushed(&self, _ogms: usize) {}

    /// An interface broadcast a bundle.
    #[inline]
    fn iface_bundle_sent(&self) {}

    /// An interface failed to broadcast a bundle.
    #[inline]
    fn iface_send_failed(&self) {}

    /// An interface received a datagram which did not parse as an OGM
    /// bundle.
    #[inline]
    fn iface_malformed_bundle(&self) {}

    /// An interface discarded a datagram because it originated from one of
    /// our own link addresses.
    #[inline]
    fn iface_own_traffic_ignored(&self) {}
}
