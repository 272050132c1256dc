use crate::chord::{RING_BITS, RING_SIZE};
use crate::error::ChordError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// NodeId represents a position in the Chord ring, shared by nodes and keys.
/// Always lies in `[0, RING_SIZE)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct NodeId(u64);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NodeId {
    pub fn new(value: u64) -> Result<Self, ChordError> {
        if value < RING_SIZE {
            Ok(NodeId(value))
        } else {
            Err(ChordError::InvalidNodeId(format!(
                "{} is outside the ring [0, {})",
                value, RING_SIZE
            )))
        }
    }

    /// Reduces any integer into the ring.
    pub fn wrapping(value: u64) -> Self {
        NodeId(value % RING_SIZE)
    }

    /// Hashes arbitrary key bytes into the same space as nodes.
    pub fn from_key(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        NodeId::wrapping(u64::from_be_bytes(prefix))
    }

    /// Position derived from a node's network address.
    pub fn from_endpoint(ip: IpAddr, port: u16) -> Self {
        NodeId::from_key(format!("{}:{}", ip, port).as_bytes())
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Start of the i-th finger interval: `self + 2^i mod 2^m`.
    pub fn finger_start(&self, index: usize) -> NodeId {
        debug_assert!(index < RING_BITS as usize);
        NodeId::wrapping(self.0 + (1u64 << index))
    }

    /// Membership in `(lower, upper]`, wraparound aware.
    /// `(a, a]` covers the whole ring.
    pub fn in_half_open(&self, lower: NodeId, upper: NodeId) -> bool {
        if lower < upper {
            *self > lower && *self <= upper
        } else {
            *self > lower || *self <= upper
        }
    }

    /// Membership in `(lower, upper)`, wraparound aware.
    /// `(a, a)` covers the whole ring except `a`.
    pub fn in_open(&self, lower: NodeId, upper: NodeId) -> bool {
        if lower < upper {
            *self > lower && *self < upper
        } else if lower > upper {
            *self > lower || *self < upper
        } else {
            *self != lower
        }
    }
}

impl TryFrom<u64> for NodeId {
    type Error = ChordError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl FromStr for NodeId {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .parse::<u64>()
            .map_err(|_| ChordError::InvalidNodeId(s.to_string()))?;
        NodeId::new(value)
    }
}

/// Which of a node's listeners a message is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Control,
    Backup,
    Restore,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePorts {
    pub control: u16,
    pub backup: u16,
    pub restore: u16,
    pub delete: u16,
}

impl NodePorts {
    /// Four consecutive ports starting at `base`.
    pub fn consecutive(base: u16) -> Self {
        NodePorts {
            control: base,
            backup: base.wrapping_add(1),
            restore: base.wrapping_add(2),
            delete: base.wrapping_add(3),
        }
    }

    pub fn get(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Control => self.control,
            Channel::Backup => self.backup,
            Channel::Restore => self.restore,
            Channel::Delete => self.delete,
        }
    }

    pub fn to_array(&self) -> [u16; 4] {
        [self.control, self.backup, self.restore, self.delete]
    }

    pub fn from_array(ports: [u16; 4]) -> Self {
        NodePorts {
            control: ports[0],
            backup: ports[1],
            restore: ports[2],
            delete: ports[3],
        }
    }
}

/// Network address a message is sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Endpoint { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s.parse()?;
        Ok(Endpoint::new(addr.ip(), addr.port()))
    }
}

/// Identity and addresses of a ring member. Equality and hashing use the ring id only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChordNode {
    pub id: NodeId,
    pub ip: IpAddr,
    pub ports: NodePorts,
}

impl ChordNode {
    pub fn new(id: NodeId, ip: IpAddr, ports: NodePorts) -> Self {
        Self { id, ip, ports }
    }

    pub fn endpoint(&self, channel: Channel) -> Endpoint {
        Endpoint::new(self.ip, self.ports.get(channel))
    }
}

impl PartialEq for ChordNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ChordNode {}

impl Hash for ChordNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ChordNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.ip, self.ports.control)
    }
}
