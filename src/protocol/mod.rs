//! Core overlay types for TuneMesh
//!
//! This module defines the identifier space and contact types shared by the
//! routing table, the lookup machinery, and the wire protocol:
//! - 160-bit node identifiers with the XOR distance metric
//! - Contacts pairing a node identifier with its published endpoint URI
//! - The overlay-wide replication and parallelism parameters

pub mod message;

pub use message::{Message, MessageKind};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Width of the identifier space in bits
pub const ID_BITS: usize = 160;

/// Width of the identifier space in bytes
pub const ID_BYTES: usize = 20;

/// Replication parameter: bucket capacity and lookup result size
pub const K: usize = 20;

/// Parallelism of iterative lookups
pub const ALPHA: usize = 3;

/// 160-bit node identifier
///
/// Identifiers name overlay nodes, stored resources (via the track content
/// hash), and conversations. Distance between identifiers is the XOR of
/// their bits interpreted as an unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; ID_BYTES]);

impl NodeId {
    /// Wrap raw identifier bytes
    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        NodeId(bytes)
    }

    /// Generate a uniformly random identifier
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// Derive an identifier from arbitrary bytes
    ///
    /// SHA-256 truncated to 160 bits. The same input always maps to the
    /// same identifier, which is all the overlay requires of the digest.
    pub fn for_content(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&digest[..ID_BYTES]);
        NodeId(bytes)
    }

    /// Derive an identifier from a string
    pub fn for_text(text: &str) -> Self {
        Self::for_content(text.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// XOR distance to another identifier
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut bytes = [0u8; ID_BYTES];
        for i in 0..ID_BYTES {
            bytes[i] = self.0[i] ^ other.0[i];
        }
        Distance(bytes)
    }

    /// Number of leading bits shared with another identifier (0..=160)
    pub fn common_prefix_len(&self, other: &NodeId) -> usize {
        self.distance(other).leading_zeros()
    }

    /// Bit at `index`, most significant first
    fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Random identifier sharing exactly `shared_bits` leading bits with `anchor`
    ///
    /// Used for bucket refresh: the result always lands in the bucket at
    /// index `shared_bits` of a routing table anchored at `anchor`.
    /// `shared_bits` must be below [`ID_BITS`].
    pub fn random_in_bucket(anchor: &NodeId, shared_bits: usize) -> Self {
        debug_assert!(shared_bits < ID_BITS);
        let mut id = NodeId::random();
        for bit in 0..shared_bits {
            id.set_bit(bit, anchor.bit(bit));
        }
        id.set_bit(shared_bits, !anchor.bit(shared_bits));
        id
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        let mask = 0x80 >> (index % 8);
        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..4]))
    }
}

/// XOR distance between two identifiers
///
/// Ordered as a 160-bit unsigned integer, so sorting contacts by distance
/// to a target yields the Kademlia proximity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_BYTES]);

impl Distance {
    /// Count of leading zero bits (160 when the identifiers are equal)
    pub fn leading_zeros(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_BITS
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// A peer as known locally: node identifier plus published endpoint URI
///
/// Equality and hashing go by identifier only; the endpoint of a given node
/// may change when the peer re-binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: NodeId,
    pub endpoint: Url,
}

impl Contact {
    pub fn new(id: NodeId, endpoint: Url) -> Self {
        Contact { id, endpoint }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl std::hash::Hash for Contact {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
