//! Network interface discovery and the per-interface UDP loops.
//!
//! Each selected interface gets its own socket, owned by exactly one
//! receive / transmit task pair. The receive loop feeds parsed OGMs to the
//! classifier; the transmit loop stamps outbound bundles with the
//! interface's own link address and broadcasts them.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use ipnet::Ipv4Net;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::link_addr::LinkAddr;
use crate::metrics::Metrics;
use crate::ogm::{pack_bundle, parse_bundle, Ogm, SAFE_PACKET_SIZE};

/// How long a blocking receive waits before it is retried. Elapsing is
/// normal; it only exists so the loop periodically reaches its cancellation
/// check even on a silent network.
const READ_DEADLINE: Duration = Duration::from_secs(30);
/// Size of the datagram receive buffer.
const RECV_BUFFER_SIZE: usize = 4096;

/// A broadcast capable IPv4 interface selected to carry OGM traffic.
#[derive(Debug, Clone)]
pub(crate) struct Iface {
    pub(crate) name: String,
    pub(crate) addr: LinkAddr,
    pub(crate) broadcast: Ipv4Addr,
}

/// Enumerate the local interfaces qualifying for OGM traffic: up, not
/// loopback, broadcast capable and holding an IPv4 address. An interface
/// contributes one entry per IPv4 address it holds.
pub(crate) fn qualifying_interfaces() -> Vec<Iface> {
    let mut ifaces = Vec::new();
    for nic in netdev::get_interfaces()
        .into_iter()
        .filter(|nic| nic.is_up() && !nic.is_loopback() && nic.is_broadcast())
    {
        for net in &nic.ipv4 {
            let broadcast = match broadcast_address(net.addr(), net.netmask()) {
                Ok(broadcast) => broadcast,
                Err(e) => {
                    warn!(
                        iface = %nic.name,
                        addr = %net.addr(),
                        err = %e,
                        "Skipping interface address with invalid netmask"
                    );
                    continue;
                }
            };
            ifaces.push(Iface {
                name: nic.name.clone(),
                addr: LinkAddr::from(net.addr()),
                broadcast,
            });
        }
    }
    ifaces
}

/// The broadcast address (`ip | !netmask`) of the subnet an interface
/// address lives in.
fn broadcast_address(ip: Ipv4Addr, netmask: Ipv4Addr) -> Result<Ipv4Addr, ipnet::PrefixLenError> {
    Ok(Ipv4Net::with_netmask(ip, netmask)?.broadcast())
}

/// Bind the broadcast enabled UDP socket for an interface.
pub(crate) async fn bind_socket(iface: &Iface, port: u16) -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind(SocketAddr::from((Ipv4Addr::from(iface.addr), port))).await?;
    sock.set_broadcast(true)?;
    Ok(sock)
}

/// Receive datagrams on one interface, parse them as OGM bundles and feed
/// the OGMs to the classifier, in arrival order.
///
/// Malformed datagrams and transient receive errors are logged and skipped;
/// they never bring the loop down. Datagrams sourced from one of our own
/// link addresses are our own broadcasts looping back and are discarded.
pub(crate) async fn run_receiver<M>(
    sock: Arc<UdpSocket>,
    local: LinkAddr,
    own_addrs: Arc<HashSet<LinkAddr>>,
    inbound: mpsc::Sender<Ogm>,
    cancel: CancellationToken,
    metrics: M,
) where
    M: Metrics,
{
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!(iface=%local, "Receiver shutting down");
                return;
            }
            deadline = timeout(READ_DEADLINE, sock.recv_from(&mut buf)) => {
                let (len, remote) = match deadline {
                    Err(_elapsed) => {
                        trace!(iface=%local, "Read deadline elapsed without a datagram");
                        continue;
                    }
                    Ok(Err(e)) => {
                        warn!(iface=%local, err=%e, "Failed to receive datagram");
                        continue;
                    }
                    Ok(Ok(received)) => received,
                };
                let SocketAddr::V4(remote) = remote else {
                    trace!(iface=%local, %remote, "Ignoring non IPv4 datagram");
                    continue;
                };
                if own_addrs.contains(&LinkAddr::from(*remote.ip())) {
                    trace!(iface=%local, "Ignoring own transmission");
                    metrics.iface_own_traffic_ignored();
                    continue;
                }
                match parse_bundle(&buf[..len], local) {
                    Err(e) => {
                        warn!(iface=%local, %remote, err=%e, "Dropping malformed bundle");
                        metrics.iface_malformed_bundle();
                    }
                    Ok(ogms) => {
                        trace!(iface=%local, %remote, ogms = ogms.len(), "Received bundle");
                        for ogm in ogms {
                            if inbound.send(ogm).await.is_err() {
                                debug!(iface=%local, "Classifier input closed, stopping receiver");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Broadcast each bundle on one interface, after stamping every OGM with
/// the interface's own link address. Write errors are logged and the loop
/// continues; the task stops when the bundle channel closes.
pub(crate) async fn run_transmitter<M>(
    sock: Arc<UdpSocket>,
    iface: Iface,
    port: u16,
    mut bundles: mpsc::Receiver<Vec<Ogm>>,
    metrics: M,
) where
    M: Metrics,
{
    let destination = SocketAddrV4::new(iface.broadcast, port);
    let mut buf = BytesMut::with_capacity(SAFE_PACKET_SIZE);

    while let Some(mut bundle) = bundles.recv().await {
        localize_bundle(&mut bundle, iface.addr);
        buf.clear();
        if let Err(e) = pack_bundle(&mut buf, &bundle) {
            warn!(iface=%iface.addr, err=%e, "Could not encode bundle");
            continue;
        }
        match sock.send_to(&buf, destination).await {
            Err(e) => {
                warn!(iface=%iface.addr, %destination, err=%e, "Failed to broadcast bundle");
                metrics.iface_send_failed();
            }
            Ok(sent) if sent != buf.len() => {
                warn!(iface=%iface.addr, sent, expected = buf.len(), "Short datagram write");
                metrics.iface_send_failed();
            }
            Ok(_) => {
                trace!(iface=%iface.addr, %destination, ogms = bundle.len(), "Broadcast bundle");
                metrics.iface_bundle_sent();
            }
        }
    }
    debug!(iface=%iface.addr, "Bundle channel closed, stopping transmitter");
}

/// Stamp every OGM in a bundle with the link address it is about to be
/// transmitted from.
fn localize_bundle(bundle: &mut [Ogm], addr: LinkAddr) {
    for ogm in bundle {
        ogm.tx_addr = addr;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::link_addr::LinkAddr;
    use crate::metrics::Metrics;
    use crate::node_id::NodeId;
    use crate::ogm::{pack_bundle, parse_bundle, Ogm};
    use crate::sequence_number::SeqNum;

    use super::{broadcast_address, localize_bundle, run_receiver, run_transmitter, Iface};

    #[derive(Clone)]
    struct NoMetrics;
    impl Metrics for NoMetrics {}

    fn ogm(sqn: u32) -> Ogm {
        Ogm {
            origin: "N1".parse().expect("valid node id"),
            sender: "N1".parse().expect("valid node id"),
            tx_addr: LinkAddr::UNSPECIFIED,
            prev_sender: NodeId::EMPTY,
            prev_addr: LinkAddr::UNSPECIFIED,
            sqn: SeqNum::with_defaults(sqn),
            ttl: 16,
            quality: 255,
            rx_addr: LinkAddr::UNSPECIFIED,
        }
    }

    #[test]
    fn broadcast_address_fills_the_host_part() {
        assert_eq!(
            broadcast_address(
                Ipv4Addr::new(192, 168, 1, 5),
                Ipv4Addr::new(255, 255, 255, 0)
            ),
            Ok(Ipv4Addr::new(192, 168, 1, 255))
        );
        assert_eq!(
            broadcast_address(Ipv4Addr::new(10, 3, 2, 1), Ipv4Addr::new(255, 0, 0, 0)),
            Ok(Ipv4Addr::new(10, 255, 255, 255))
        );
    }

    #[test]
    fn broadcast_address_rejects_non_contiguous_netmask() {
        assert!(
            broadcast_address(Ipv4Addr::new(10, 3, 2, 1), Ipv4Addr::new(255, 0, 255, 0)).is_err()
        );
    }

    #[test]
    fn localize_rewrites_every_transmit_address() {
        let addr: LinkAddr = "192.168.1.5".parse().expect("valid link address");
        let mut bundle = vec![ogm(1), ogm(2), ogm(3)];
        localize_bundle(&mut bundle, addr);
        assert!(bundle.iter().all(|ogm| ogm.tx_addr == addr));
    }

    #[tokio::test]
    async fn transmitter_stamps_and_sends_bundles() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback");
        let port = receiver.local_addr().expect("bound socket has an address").port();

        let sender = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback"));
        let iface = Iface {
            name: "lo-test".to_string(),
            addr: "127.0.0.1".parse().expect("valid link address"),
            // Loopback stands in for the subnet broadcast address in tests.
            broadcast: Ipv4Addr::LOCALHOST,
        };

        let (bundle_tx, bundle_rx) = mpsc::channel(4);
        tokio::spawn(run_transmitter(sender, iface, port, bundle_rx, NoMetrics));

        bundle_tx
            .send(vec![ogm(5)])
            .await
            .expect("transmitter is running");

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .expect("transmitter broadcasts within the timeout")
            .expect("datagram is received");

        let ogms =
            parse_bundle(&buf[..len], LinkAddr::UNSPECIFIED).expect("transmitted bundle is valid");
        assert_eq!(ogms.len(), 1);
        assert_eq!(ogms[0].tx_addr, "127.0.0.1".parse().expect("valid link address"));
        assert!(ogms[0].sqn.equal(&SeqNum::with_defaults(5)));
    }

    #[tokio::test]
    async fn receiver_parses_and_tags_inbound_bundles() {
        let sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback"));
        let target = sock.local_addr().expect("bound socket has an address");
        let local: LinkAddr = "192.168.7.1".parse().expect("valid link address");

        let (inbound_tx, mut inbound_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_receiver(
            sock,
            local,
            Arc::new(HashSet::new()),
            inbound_tx,
            cancel.clone(),
            NoMetrics,
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback");
        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[ogm(9)]).expect("a single OGM fits any bundle");
        sender.send_to(&buf, target).await.expect("datagram is sent");

        let received = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .expect("receiver forwards the OGM within the timeout")
            .expect("receiver is still running");
        assert!(received.sqn.equal(&SeqNum::with_defaults(9)));
        assert_eq!(received.rx_addr, local);
        cancel.cancel();
    }

    #[tokio::test]
    async fn receiver_ignores_own_transmissions() {
        let sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback"));
        let target = sock.local_addr().expect("bound socket has an address");
        let local: LinkAddr = "192.168.7.1".parse().expect("valid link address");

        // Loopback is registered as one of our own link addresses.
        let own_addrs = Arc::new(HashSet::from([
            "127.0.0.1".parse::<LinkAddr>().expect("valid link address")
        ]));
        let (inbound_tx, mut inbound_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_receiver(
            sock,
            local,
            own_addrs,
            inbound_tx,
            cancel.clone(),
            NoMetrics,
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback");
        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[ogm(9)]).expect("a single OGM fits any bundle");
        sender.send_to(&buf, target).await.expect("datagram is sent");

        assert!(
            tokio::time::timeout(Duration::from_millis(200), inbound_rx.recv())
                .await
                .is_err(),
            "own transmissions must not reach the classifier"
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn receiver_survives_malformed_datagrams() {
        let sock = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback"));
        let target = sock.local_addr().expect("bound socket has an address");
        let local: LinkAddr = "192.168.7.1".parse().expect("valid link address");

        let (inbound_tx, mut inbound_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_receiver(
            sock,
            local,
            Arc::new(HashSet::new()),
            inbound_tx,
            cancel.clone(),
            NoMetrics,
        ));

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("can bind to loopback");
        sender
            .send_to(&[1, 2, 3], target)
            .await
            .expect("datagram is sent");

        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[ogm(4)]).expect("a single OGM fits any bundle");
        sender.send_to(&buf, target).await.expect("datagram is sent");

        // The garbage datagram is skipped, the valid one still arrives.
        let received = tokio::time::timeout(Duration::from_secs(1), inbound_rx.recv())
            .await
            .expect("receiver forwards the OGM within the timeout")
            .expect("receiver is still running");
        assert!(received.sqn.equal(&SeqNum::with_defaults(4)));
        cancel.cancel();
    }
}
