//! Two-phase store protocol scenarios
//!
//! Drives a node's STORE handlers directly over the loopback transport:
//! offer, acceptance, data delivery, and the clock-skew and unsolicited-
//! data rejections.

use chrono::{Duration as TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tunemesh::dht::KademliaNode;
use tunemesh::protocol::{Contact, Message, MessageKind, NodeId};
use tunemesh::store::{TrackStore, TrackTag};
use tunemesh::transport::{MemoryNetwork, MemoryTransport, Transport};
use url::Url;

fn endpoint(port: u16) -> Url {
    format!("udp://localhost:{}/kademlia", port).parse().unwrap()
}

fn track(title: &str, artist: &str, album: &str) -> TrackTag {
    TrackTag::new(
        title,
        artist,
        album,
        NodeId::for_text(&format!("{}/{}/{}", title, artist, album)),
    )
}

struct Harness {
    node: Arc<KademliaNode>,
    store: Arc<TrackStore>,
    publisher: Contact,
    transport: Arc<MemoryTransport>,
    inbound: mpsc::Receiver<Message>,
}

/// One node under test plus a scripted publisher endpoint
fn harness() -> Harness {
    let network = MemoryNetwork::new();
    let node_endpoint = endpoint(1);
    let (node_transport, node_inbound) = network.attach(node_endpoint.clone());
    let store = Arc::new(TrackStore::in_memory());
    let node = KademliaNode::new(
        Contact::new(NodeId::random(), node_endpoint),
        store.clone(),
        node_transport,
    );
    node.clone().start(node_inbound);

    let (transport, inbound) = network.attach(endpoint(2));
    let publisher = Contact::new(NodeId::random(), endpoint(2));
    Harness {
        node,
        store,
        publisher,
        transport,
        inbound,
    }
}

async fn expect_reply(inbound: &mut mpsc::Receiver<Message>) -> Message {
    timeout(Duration::from_secs(1), inbound.recv())
        .await
        .expect("no reply within a second")
        .expect("inbound channel closed")
}

#[tokio::test]
async fn test_store_offer_accept_data_round_trip() {
    let mut h = harness();
    let tag = track("Imagine", "John Lennon", "Imagine");
    let published = Utc::now();

    let offer = Message::request(
        &h.publisher,
        MessageKind::StoreQuery {
            resource: tag.resource_id(),
            published,
            origin: h.publisher.endpoint.clone(),
        },
    );
    h.transport.send(h.node.endpoint(), &offer).await.unwrap();

    let reply = expect_reply(&mut h.inbound).await;
    assert_eq!(reply.conversation, offer.conversation);
    match reply.kind {
        MessageKind::StoreResponse { send_data } => assert!(send_data),
        other => panic!("expected STORE_RESPONSE, got {:?}", other),
    }

    let data = Message::new(
        &h.publisher,
        offer.conversation,
        MessageKind::StoreData {
            tag: tag.clone(),
            published,
        },
    );
    h.transport.send(h.node.endpoint(), &data).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let record = h.store.resource(&tag.resource_id()).await.expect("stored");
    assert_eq!(record.tag, tag);
    assert!(record.contains_source(&h.publisher.endpoint));
    assert_eq!(
        h.store
            .publication_time(&tag.resource_id(), &h.publisher.endpoint)
            .await,
        Some(published)
    );
}

#[tokio::test]
async fn test_future_publication_is_rejected() {
    let mut h = harness();
    let tag = track("Imagine", "John Lennon", "Imagine");
    let future = Utc::now() + TimeDelta::hours(2);

    let offer = Message::request(
        &h.publisher,
        MessageKind::StoreQuery {
            resource: tag.resource_id(),
            published: future,
            origin: h.publisher.endpoint.clone(),
        },
    );
    h.transport.send(h.node.endpoint(), &offer).await.unwrap();
    let reply = expect_reply(&mut h.inbound).await;
    assert!(matches!(
        reply.kind,
        MessageKind::StoreResponse { send_data: true }
    ));

    let data = Message::new(
        &h.publisher,
        offer.conversation,
        MessageKind::StoreData {
            tag: tag.clone(),
            published: future,
        },
    );
    h.transport.send(h.node.endpoint(), &data).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert!(h.store.resource(&tag.resource_id()).await.is_none());
}

#[tokio::test]
async fn test_unsolicited_store_data_is_dropped() {
    let h = harness();
    let tag = track("Imagine", "John Lennon", "Imagine");

    // No preceding offer: the conversation id is unknown to the node
    let data = Message::request(
        &h.publisher,
        MessageKind::StoreData {
            tag: tag.clone(),
            published: Utc::now(),
        },
    );
    h.transport.send(h.node.endpoint(), &data).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert!(h.store.resource(&tag.resource_id()).await.is_none());
}

#[tokio::test]
async fn test_known_offer_refreshes_silently() {
    let mut h = harness();
    let tag = track("Imagine", "John Lennon", "Imagine");
    let first = Utc::now() - TimeDelta::minutes(10);
    h.store
        .store_resource(&tag, &h.publisher.endpoint, first)
        .await
        .unwrap();

    // Newer publication for a known (resource, endpoint) pair: the record
    // is refreshed and no response comes back
    let newer = Utc::now();
    let offer = Message::request(
        &h.publisher,
        MessageKind::StoreQuery {
            resource: tag.resource_id(),
            published: newer,
            origin: h.publisher.endpoint.clone(),
        },
    );
    h.transport.send(h.node.endpoint(), &offer).await.unwrap();

    let reply = timeout(Duration::from_millis(300), h.inbound.recv()).await;
    assert!(reply.is_err(), "refresh branch must stay silent");
    assert_eq!(
        h.store
            .publication_time(&tag.resource_id(), &h.publisher.endpoint)
            .await,
        Some(newer)
    );

    // A stale re-offer changes nothing and is equally silent
    let stale = Message::request(
        &h.publisher,
        MessageKind::StoreQuery {
            resource: tag.resource_id(),
            published: first,
            origin: h.publisher.endpoint.clone(),
        },
    );
    h.transport.send(h.node.endpoint(), &stale).await.unwrap();
    let reply = timeout(Duration::from_millis(300), h.inbound.recv()).await;
    assert!(reply.is_err());
    assert_eq!(
        h.store
            .publication_time(&tag.resource_id(), &h.publisher.endpoint)
            .await,
        Some(newer)
    );
}
