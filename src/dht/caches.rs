//! Response correlation and pending-store tables
//!
//! Inbound responses are matched to waiting callers by conversation id.
//! A caller registers a single-shot waiter before sending its request; a
//! response arriving while the waiter is live resolves it directly, and a
//! response arriving late is parked until the periodic sweep discards it.
//! The two pending-store tables track the in-flight halves of the
//! two-phase store protocol and age out on the same sweep.

use crate::protocol::{Message, NodeId};
use crate::store::TrackTag;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use url::Url;

/// Entries older than this are discarded by the sweep
pub const MAX_CACHE_TIME: Duration = Duration::from_secs(30);

enum Slot {
    Waiting(oneshot::Sender<Message>),
    Parked { message: Message, arrived: Instant },
}

/// Correlates inbound responses with waiting callers
#[derive(Default)]
pub struct ResponseCache {
    slots: DashMap<NodeId, Slot>,
}

impl ResponseCache {
    pub fn new() -> Self {
        ResponseCache::default()
    }

    /// Register the single waiter for a conversation
    ///
    /// A second registration for the same conversation replaces the first;
    /// the displaced waiter resolves as closed.
    pub fn register(&self, conversation: NodeId) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(conversation, Slot::Waiting(tx));
        rx
    }

    /// Drop the waiter for a conversation after a timeout
    pub fn abandon(&self, conversation: &NodeId) {
        self.slots
            .remove_if(conversation, |_, slot| matches!(slot, Slot::Waiting(_)));
    }

    /// Deliver a response to its waiter, or park it for a late caller
    pub fn accept(&self, message: Message) {
        let conversation = message.conversation;
        let undelivered = match self.slots.remove(&conversation) {
            Some((_, Slot::Waiting(tx))) => tx.send(message).err(),
            Some((_, Slot::Parked { .. })) | None => Some(message),
        };
        if let Some(message) = undelivered {
            self.slots.insert(
                conversation,
                Slot::Parked {
                    message,
                    arrived: Instant::now(),
                },
            );
        }
    }

    /// Atomically remove and return a parked response matching `accepts`
    pub fn take_if<F>(&self, conversation: &NodeId, accepts: F) -> Option<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let removed = self.slots.remove_if(conversation, |_, slot| {
            matches!(slot, Slot::Parked { message, .. } if accepts(message))
        });
        match removed {
            Some((_, Slot::Parked { message, .. })) => Some(message),
            _ => None,
        }
    }

    /// Drop parked entries older than `max_age` and orphaned waiters
    pub fn sweep(&self, max_age: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Parked { arrived, .. } => arrived.elapsed() <= max_age,
            Slot::Waiting(tx) => !tx.is_closed(),
        });
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// An accepted incoming store offer, waiting for its data message
pub struct AcceptedStore {
    pub origin: Url,
    accepted: Instant,
}

/// Incoming STORE offers this node has agreed to receive
#[derive(Default)]
pub struct AcceptedStores {
    entries: DashMap<NodeId, AcceptedStore>,
}

impl AcceptedStores {
    pub fn new() -> Self {
        AcceptedStores::default()
    }

    pub fn insert(&self, conversation: NodeId, origin: Url) {
        self.entries.insert(
            conversation,
            AcceptedStore {
                origin,
                accepted: Instant::now(),
            },
        );
    }

    pub fn take(&self, conversation: &NodeId) -> Option<AcceptedStore> {
        self.entries.remove(conversation).map(|(_, entry)| entry)
    }

    pub fn sweep(&self, max_age: Duration) {
        self.entries
            .retain(|_, entry| entry.accepted.elapsed() <= max_age);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// An outbound store offer, waiting for the recipient's acceptance
pub struct SentStore {
    pub tag: TrackTag,
    pub published: DateTime<Utc>,
    sent: Instant,
}

/// Outbound STORE offers awaiting a STORE_RESPONSE
#[derive(Default)]
pub struct SentStores {
    entries: DashMap<NodeId, SentStore>,
}

impl SentStores {
    pub fn new() -> Self {
        SentStores::default()
    }

    pub fn insert(&self, conversation: NodeId, tag: TrackTag, published: DateTime<Utc>) {
        self.entries.insert(
            conversation,
            SentStore {
                tag,
                published,
                sent: Instant::now(),
            },
        );
    }

    pub fn take(&self, conversation: &NodeId) -> Option<SentStore> {
        self.entries.remove(conversation).map(|(_, entry)| entry)
    }

    pub fn remove(&self, conversation: &NodeId) {
        self.entries.remove(conversation);
    }

    pub fn sweep(&self, max_age: Duration) {
        self.entries
            .retain(|_, entry| entry.sent.elapsed() <= max_age);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Contact, MessageKind};

    fn contact() -> Contact {
        Contact::new(
            NodeId::random(),
            "udp://localhost:9000/kademlia".parse().unwrap(),
        )
    }

    fn response(conversation: NodeId, kind: MessageKind) -> Message {
        Message::new(&contact(), conversation, kind)
    }

    #[tokio::test]
    async fn test_waiter_receives_response() {
        let cache = ResponseCache::new();
        let conversation = NodeId::random();
        let rx = cache.register(conversation);

        cache.accept(response(conversation, MessageKind::Pong));

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.conversation, conversation);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_late_response_is_parked_then_typed_out() {
        let cache = ResponseCache::new();
        let conversation = NodeId::random();

        cache.accept(response(conversation, MessageKind::Pong));
        assert_eq!(cache.len(), 1);

        // Wrong kind leaves the entry in place
        let miss = cache.take_if(&conversation, |m| {
            matches!(m.kind, MessageKind::StoreResponse { .. })
        });
        assert!(miss.is_none());
        assert_eq!(cache.len(), 1);

        // Matching kind removes it atomically
        let hit = cache.take_if(&conversation, |m| matches!(m.kind, MessageKind::Pong));
        assert!(hit.is_some());
        assert!(cache.is_empty());
        let again = cache.take_if(&conversation, |m| matches!(m.kind, MessageKind::Pong));
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_conversation_parks_response() {
        let cache = ResponseCache::new();
        let conversation = NodeId::random();

        let rx = cache.register(conversation);
        cache.abandon(&conversation);
        drop(rx);

        cache.accept(response(conversation, MessageKind::Pong));
        let parked = cache.take_if(&conversation, |_| true);
        assert!(parked.is_some());
    }

    #[tokio::test]
    async fn test_sweep_drops_orphaned_waiters() {
        let cache = ResponseCache::new();
        let conversation = NodeId::random();

        let rx = cache.register(conversation);
        drop(rx);
        assert_eq!(cache.len(), 1);

        let swept = cache.sweep(MAX_CACHE_TIME);
        assert_eq!(swept, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_pending_store_tables_take_once() {
        let accepted = AcceptedStores::new();
        let conversation = NodeId::random();
        let origin: Url = "udp://localhost:9000/kademlia".parse().unwrap();

        accepted.insert(conversation, origin.clone());
        let entry = accepted.take(&conversation).unwrap();
        assert_eq!(entry.origin, origin);
        assert!(accepted.take(&conversation).is_none());
    }
}
