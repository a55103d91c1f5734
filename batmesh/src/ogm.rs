//! The Originator Message (OGM) and its wire codec.
//!
//! OGMs are the protocol's only packet type. They travel bundled: a single
//! UDP datagram carries a one byte OGM count followed by that many packed
//! OGMs.

use core::fmt;

use bytes::{Buf, BufMut};

use crate::link_addr::LinkAddr;
use crate::node_id::NodeId;
use crate::sequence_number::SeqNum;

/// Size in bytes of a single OGM on the wire.
pub const OGM_WIRE_SIZE: usize = 26;
/// Maximum UDP payload size a bundle may occupy.
pub const SAFE_PACKET_SIZE: usize = 512;
/// Maximum number of OGMs in one bundle. One more would no longer fit a safe
/// packet (26 * 19 + 1 = 495).
pub const MAX_BUNDLE_OGMS: usize = 19;

/// An Originator Message, the heartbeat packet nodes flood to announce their
/// existence and measure link quality along the way.
///
/// Wire layout, little-endian, 26 bytes:
///
/// ```text
/// [origin:4][sender:4][tx_addr:4][prev_sender:4][prev_addr:4][sqn:u32][ttl:u8][quality:u8]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ogm {
    /// Node which created this OGM.
    pub origin: NodeId,
    /// Node which transmitted this copy, i.e. the previous hop.
    pub sender: NodeId,
    /// Link address the sender transmitted from.
    pub tx_addr: LinkAddr,
    /// Sender two hops back, the empty id if there is none.
    pub prev_sender: NodeId,
    /// Link address two hops back, unspecified if there is none.
    pub prev_addr: LinkAddr,
    /// The originator's sequence number.
    pub sqn: SeqNum,
    /// Remaining forwarding hops.
    pub ttl: u8,
    /// Cumulative transmission quality along the path so far.
    pub quality: u8,
    /// Local link address this OGM was received on. Receive side metadata,
    /// never serialized.
    pub rx_addr: LinkAddr,
}

impl Ogm {
    /// Construct an `Ogm` from wire bytes, tagging it with the local link
    /// address it arrived on.
    ///
    /// # Panics
    ///
    /// Panics if fewer than [`OGM_WIRE_SIZE`] bytes are present in the
    /// provided buffer. Callers validate bundle framing first.
    pub fn from_bytes(src: &mut impl Buf, rx_addr: LinkAddr) -> Self {
        let mut id = [0; NodeId::BYTE_SIZE];
        let mut addr = [0; LinkAddr::BYTE_SIZE];

        src.copy_to_slice(&mut id);
        let origin = NodeId::from(id);
        src.copy_to_slice(&mut id);
        let sender = NodeId::from(id);
        src.copy_to_slice(&mut addr);
        let tx_addr = LinkAddr::from(addr);
        src.copy_to_slice(&mut id);
        let prev_sender = NodeId::from(id);
        src.copy_to_slice(&mut addr);
        let prev_addr = LinkAddr::from(addr);
        let sqn = SeqNum::from_wire(src.get_u32_le());
        let ttl = src.get_u8();
        let quality = src.get_u8();

        Ogm {
            origin,
            sender,
            tx_addr,
            prev_sender,
            prev_addr,
            sqn,
            ttl,
            quality,
            rx_addr,
        }
    }

    /// Encode this `Ogm` into its wire form. The receive side `rx_addr` is
    /// not serialized.
    pub fn write_bytes(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.origin.as_bytes());
        dst.put_slice(&self.sender.as_bytes());
        dst.put_slice(&self.tx_addr.octets());
        dst.put_slice(&self.prev_sender.as_bytes());
        dst.put_slice(&self.prev_addr.octets());
        dst.put_u32_le(self.sqn.to_wire());
        dst.put_u8(self.ttl);
        dst.put_u8(self.quality);
    }
}

impl fmt::Display for Ogm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{{Origin:{}, Sender:{}, TxAddr:{}, PrevSender:{}, PrevAddr:{}, SQN:{}, TTL:{}, TQ:{}}}",
            self.origin,
            self.sender,
            self.tx_addr,
            self.prev_sender,
            self.prev_addr,
            self.sqn.to_wire(),
            self.ttl,
            self.quality
        ))
    }
}

/// Encode a bundle of OGMs, prefixed with the one byte OGM count, into
/// `dst`.
pub fn pack_bundle(dst: &mut impl BufMut, ogms: &[Ogm]) -> Result<(), PackBundleError> {
    if ogms.len() > u8::MAX as usize {
        return Err(PackBundleError::CountOverflow { count: ogms.len() });
    }
    let wire_size = 1 + ogms.len() * OGM_WIRE_SIZE;
    if wire_size > SAFE_PACKET_SIZE {
        return Err(PackBundleError::BundleTooLarge {
            count: ogms.len(),
            wire_size,
        });
    }

    dst.put_u8(ogms.len() as u8);
    for ogm in ogms {
        ogm.write_bytes(dst);
    }

    Ok(())
}

/// Decode a bundle received on the link `rx_addr` into its OGMs, in wire
/// order.
pub fn parse_bundle(bytes: &[u8], rx_addr: LinkAddr) -> Result<Vec<Ogm>, ParseBundleError> {
    if bytes.len() < 1 + OGM_WIRE_SIZE || (bytes.len() - 1) % OGM_WIRE_SIZE != 0 {
        return Err(ParseBundleError::InvalidLength { len: bytes.len() });
    }
    let count = bytes[0] as usize;
    if count * OGM_WIRE_SIZE != bytes.len() - 1 {
        return Err(ParseBundleError::CountMismatch {
            count: bytes[0],
            len: bytes.len(),
        });
    }

    let mut src = &bytes[1..];
    let mut ogms = Vec::with_capacity(count);
    for _ in 0..count {
        ogms.push(Ogm::from_bytes(&mut src, rx_addr));
    }
    Ok(ogms)
}

/// Error generated while encoding an OGM bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackBundleError {
    /// More OGMs were passed than the count byte can express.
    CountOverflow { count: usize },
    /// The encoded bundle would exceed the safe packet size.
    BundleTooLarge { count: usize, wire_size: usize },
}

impl fmt::Display for PackBundleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountOverflow { count } => f.write_fmt(format_args!(
                "{count} OGMs overflow the one byte bundle count"
            )),
            Self::BundleTooLarge { count, wire_size } => f.write_fmt(format_args!(
                "bundle of {count} OGMs needs {wire_size} bytes, exceeding the safe packet size of {SAFE_PACKET_SIZE}"
            )),
        }
    }
}

impl std::error::Error for PackBundleError {}

/// Error generated while decoding an OGM bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseBundleError {
    /// The datagram is shorter than one OGM or not a whole number of OGMs.
    InvalidLength { len: usize },
    /// The leading count byte disagrees with the datagram length.
    CountMismatch { count: u8, len: usize },
}

impl fmt::Display for ParseBundleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { len } => {
                f.write_fmt(format_args!("malformed bundle of {len} bytes"))
            }
            Self::CountMismatch { count, len } => f.write_fmt(format_args!(
                "bundle count byte {count} does not match {len} byte datagram"
            )),
        }
    }
}

impl std::error::Error for ParseBundleError {}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::link_addr::LinkAddr;
    use crate::node_id::NodeId;
    use crate::sequence_number::SeqNum;

    use super::{pack_bundle, parse_bundle, Ogm, ParseBundleError, OGM_WIRE_SIZE};

    fn sample_ogm() -> Ogm {
        Ogm {
            origin: NodeId::from([0, 0, 0, 1]),
            sender: NodeId::from([0, 0, 0, 2]),
            tx_addr: LinkAddr::from([0, 0, 0, 3]),
            prev_sender: NodeId::from([0, 0, 0, 4]),
            prev_addr: LinkAddr::from([0, 0, 0, 5]),
            sqn: SeqNum::with_defaults(42),
            ttl: 2,
            quality: 128,
            rx_addr: LinkAddr::UNSPECIFIED,
        }
    }

    #[test]
    fn encoding() {
        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[sample_ogm()]).expect("a single OGM fits any bundle");

        assert_eq!(buf.len(), 1 + OGM_WIRE_SIZE);
        assert_eq!(
            &buf[..],
            [
                1, // count
                0, 0, 0, 1, // origin
                0, 0, 0, 2, // sender
                0, 0, 0, 3, // tx_addr
                0, 0, 0, 4, // prev_sender
                0, 0, 0, 5, // prev_addr
                42, 0, 0, 0, // sqn, little-endian
                2,   // ttl
                128, // quality
            ]
        );
    }

    #[test]
    fn roundtrip_single() {
        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[sample_ogm()]).expect("a single OGM fits any bundle");
        let ogms = parse_bundle(&buf, LinkAddr::UNSPECIFIED).expect("decodes what we encoded");
        assert_eq!(ogms, [sample_ogm()]);
    }

    #[test]
    fn roundtrip_bundle_preserves_order() {
        let first = sample_ogm();
        let second = Ogm {
            sqn: SeqNum::with_defaults(43),
            quality: 77,
            ..sample_ogm()
        };

        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[first.clone(), second.clone()]).expect("two OGMs fit a bundle");
        let ogms = parse_bundle(&buf, LinkAddr::UNSPECIFIED).expect("decodes what we encoded");
        assert_eq!(ogms, [first, second]);
    }

    #[test]
    fn roundtrip_named_fields() {
        let ogm = Ogm {
            origin: "5".parse().expect("valid node id"),
            sender: "7".parse().expect("valid node id"),
            tx_addr: "10.4.6.2".parse().expect("valid link address"),
            prev_sender: "2".parse().expect("valid node id"),
            prev_addr: "192.168.10.10".parse().expect("valid link address"),
            sqn: SeqNum::with_defaults(102),
            ttl: 200,
            quality: 250,
            rx_addr: LinkAddr::UNSPECIFIED,
        };

        let mut buf = BytesMut::new();
        ogm.write_bytes(&mut buf);
        assert_eq!(buf.len(), OGM_WIRE_SIZE);
        let decoded = Ogm::from_bytes(&mut buf, LinkAddr::UNSPECIFIED);
        assert_eq!(decoded, ogm);
    }

    #[test]
    fn rx_addr_is_transport_metadata() {
        let rx: LinkAddr = "172.16.3.9".parse().expect("valid link address");
        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[sample_ogm()]).expect("a single OGM fits any bundle");
        let ogms = parse_bundle(&buf, rx).expect("decodes what we encoded");
        assert_eq!(ogms[0].rx_addr, rx);
    }

    #[test]
    fn parse_rejects_short_datagram() {
        assert_eq!(
            parse_bundle(&[1, 2, 3], LinkAddr::UNSPECIFIED),
            Err(ParseBundleError::InvalidLength { len: 3 })
        );
    }

    #[test]
    fn parse_rejects_partial_ogm() {
        let bytes = vec![1; 1 + OGM_WIRE_SIZE + 5];
        assert_eq!(
            parse_bundle(&bytes, LinkAddr::UNSPECIFIED),
            Err(ParseBundleError::InvalidLength { len: bytes.len() })
        );
    }

    #[test]
    fn parse_rejects_count_mismatch() {
        let mut buf = BytesMut::new();
        pack_bundle(&mut buf, &[sample_ogm(), sample_ogm()]).expect("two OGMs fit a bundle");
        buf[0] = 1;
        assert_eq!(
            parse_bundle(&buf, LinkAddr::UNSPECIFIED),
            Err(ParseBundleError::CountMismatch {
                count: 1,
                len: 1 + 2 * OGM_WIRE_SIZE
            })
        );
    }

    #[test]
    fn pack_rejects_oversized_bundle() {
        let ogms = vec![sample_ogm(); 20];
        let mut buf = BytesMut::new();
        assert!(pack_bundle(&mut buf, &ogms).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(
            sample_ogm().to_string(),
            "{Origin:\u{1}, Sender:\u{2}, TxAddr:0.0.0.3, PrevSender:\u{4}, PrevAddr:0.0.0.5, SQN:42, TTL:2, TQ:128}"
        );
    }
}
