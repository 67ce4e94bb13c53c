//! Message transport for the overlay
//!
//! The overlay consumes a minimal contract: an unreliable unicast message
//! channel addressed by endpoint URI, with a published local endpoint.
//! Inbound messages are handed to the node through an mpsc channel; loss
//! and reordering are tolerated by the lookup timeouts upstream.
//!
//! Two bindings are provided: UDP datagrams with bincode framing for real
//! deployments, and an in-process loopback network for tests.

pub mod memory;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

use crate::error::Result;
use crate::protocol::Message;
use async_trait::async_trait;
use url::Url;

/// Capacity of the inbound message channel of a transport
pub const INBOUND_QUEUE_LEN: usize = 256;

/// A unicast message channel addressed by endpoint URI
#[async_trait]
pub trait Transport: Send + Sync {
    /// The endpoint other peers can reach this transport at
    fn local_endpoint(&self) -> &Url;

    /// Send one message towards `to`, best effort
    async fn send(&self, to: &Url, message: &Message) -> Result<()>;
}
