//! In-process loopback network
//!
//! Routes messages between endpoints registered on a shared network
//! object, with no sockets involved. Detaching an endpoint makes it
//! unreachable, which is how tests simulate a dead peer.

use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::transport::{Transport, INBOUND_QUEUE_LEN};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Registry of attached endpoints
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<DashMap<Url, mpsc::Sender<Message>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork::default()
    }

    /// Attach an endpoint and return its transport and inbound channel
    pub fn attach(&self, endpoint: Url) -> (Arc<MemoryTransport>, mpsc::Receiver<Message>) {
        let (inbound, receiver) = mpsc::channel(INBOUND_QUEUE_LEN);
        self.peers.insert(endpoint.clone(), inbound);
        let transport = Arc::new(MemoryTransport {
            network: self.clone(),
            endpoint,
        });
        (transport, receiver)
    }

    /// Remove an endpoint; subsequent sends to it fail
    pub fn detach(&self, endpoint: &Url) {
        self.peers.remove(endpoint);
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: Url,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, to: &Url, message: &Message) -> Result<()> {
        let inbound = self
            .network
            .peers
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::PeerUnreachable(to.to_string()))?;
        inbound
            .send(message.clone())
            .await
            .map_err(|_| Error::PeerUnreachable(to.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Contact, MessageKind, NodeId};

    fn endpoint(port: u16) -> Url {
        format!("udp://localhost:{}/kademlia", port).parse().unwrap()
    }

    #[tokio::test]
    async fn test_routes_between_attached_endpoints() {
        let network = MemoryNetwork::new();
        let (a, _inbound_a) = network.attach(endpoint(1));
        let (_b, mut inbound_b) = network.attach(endpoint(2));

        let sender = Contact::new(NodeId::random(), endpoint(1));
        let message = Message::request(&sender, MessageKind::Ping);
        a.send(&endpoint(2), &message).await.unwrap();

        let delivered = inbound_b.recv().await.unwrap();
        assert_eq!(delivered.conversation, message.conversation);
    }

    #[tokio::test]
    async fn test_detached_endpoint_is_unreachable() {
        let network = MemoryNetwork::new();
        let (a, _inbound_a) = network.attach(endpoint(1));
        network.attach(endpoint(2));
        network.detach(&endpoint(2));

        let sender = Contact::new(NodeId::random(), endpoint(1));
        let message = Message::request(&sender, MessageKind::Ping);
        let err = a.send(&endpoint(2), &message).await.unwrap_err();
        assert!(matches!(err, Error::PeerUnreachable(_)));
    }
}
