//! Kademlia overlay
//!
//! The routing table, the request/response correlation caches, and the
//! node that ties them to the track repository and the transport.

pub mod caches;
pub mod node;
pub mod routing;

pub use caches::{AcceptedStores, ResponseCache, SentStores, MAX_CACHE_TIME};
pub use node::{
    KademliaNode, NodeStats, ValueLookup, MAINTENANCE_INTERVAL, MAX_CLOCK_SKEW, MAX_SYNC_WAIT,
    REFRESH_TIME, REPLICATE_TIME,
};
pub use routing::BucketList;
