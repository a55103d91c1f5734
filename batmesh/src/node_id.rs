use core::fmt;
use std::str::FromStr;

/// A `NodeId` uniquely identifies a node in the network.
///
/// On the wire a node id occupies a fixed 4 byte field; shorter identifiers
/// are padded with leading zero bytes. The padded form is canonical, so two
/// ids compare equal exactly when their wire forms do. The all-zero id is
/// reserved as the "no node" marker used by OGM predecessor fields.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; NodeId::BYTE_SIZE]);

impl NodeId {
    /// Size in bytes of a `NodeId` on the wire.
    pub const BYTE_SIZE: usize = 4;

    /// The all-zero `NodeId`, carried by OGM fields which have no predecessor
    /// to report.
    pub const EMPTY: Self = NodeId([0; Self::BYTE_SIZE]);

    /// Returns whether this is the empty marker id.
    pub fn is_empty(&self) -> bool {
        self.0 == [0; Self::BYTE_SIZE]
    }

    /// View this `NodeId` as its zero padded wire bytes.
    pub fn as_bytes(&self) -> [u8; Self::BYTE_SIZE] {
        self.0
    }
}

impl From<[u8; NodeId::BYTE_SIZE]> for NodeId {
    fn from(bytes: [u8; NodeId::BYTE_SIZE]) -> Self {
        NodeId(bytes)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdTooLong;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.as_bytes();
        if raw.len() > Self::BYTE_SIZE {
            return Err(NodeIdTooLong {
                id: s.to_string(),
                len: raw.len(),
            });
        }
        let mut bytes = [0; Self::BYTE_SIZE];
        bytes[Self::BYTE_SIZE - raw.len()..].copy_from_slice(raw);
        Ok(NodeId(bytes))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self
            .0
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(Self::BYTE_SIZE);
        f.write_fmt(format_args!(
            "{}",
            String::from_utf8_lossy(&self.0[start..])
        ))
    }
}

/// Error generated when constructing a [`NodeId`] from an identifier which
/// does not fit the wire field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdTooLong {
    id: String,
    len: usize,
}

impl fmt::Display for NodeIdTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "node id \"{}\" is {} bytes, at most {} allowed",
            self.id,
            self.len,
            NodeId::BYTE_SIZE
        ))
    }
}

impl std::error::Error for NodeIdTooLong {}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::NodeId;

    #[test]
    fn short_id_is_zero_padded() {
        let id = NodeId::from_str("L1").expect("2 bytes fit in a node id");
        assert_eq!(id.as_bytes(), [0, 0, b'L', b'1']);
    }

    #[test]
    fn full_width_id() {
        let id = NodeId::from_str("node").expect("4 bytes fit in a node id");
        assert_eq!(id.as_bytes(), [b'n', b'o', b'd', b'e']);
    }

    #[test]
    fn oversized_id_is_rejected() {
        assert!(NodeId::from_str("node5").is_err());
    }

    #[test]
    fn wire_roundtrip() {
        let id = NodeId::from_str("N1").expect("valid id");
        assert_eq!(NodeId::from(id.as_bytes()), id);
    }

    #[test]
    fn empty_marker() {
        assert!(NodeId::EMPTY.is_empty());
        assert!(NodeId::from_str("").expect("empty id parses").is_empty());
        assert!(!NodeId::from_str("a").expect("valid id").is_empty());
    }

    #[test]
    fn display_strips_padding() {
        let id = NodeId::from_str("L1").expect("valid id");
        assert_eq!(id.to_string(), "L1");
        assert_eq!(NodeId::EMPTY.to_string(), "");
    }
}
