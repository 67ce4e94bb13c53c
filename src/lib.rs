//! TuneMesh - peer-to-peer audio track sharing over a keyword-indexed DHT
//!
//! A TuneMesh peer publishes the metadata of the tracks it serves into a
//! Kademlia overlay and answers keyword searches from other peers. The
//! overlay stores resource records: track metadata plus the endpoints
//! serving the track, inverted into a keyword index on every node that
//! holds them. Searches match query tokens as substrings of normalized
//! keywords, so partial words find their tracks at the cost of occasional
//! extra matches.

pub mod config;
pub mod dht;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use error::{Error, Result};
