//! Kademlia overlay node
//!
//! Orchestrates the routing table, the correlation caches and the track
//! repository behind the two public operations, publish and search, and
//! the inbound RPC handlers. Three background workers run alongside:
//! - contact admission, draining the bounded queue fed by every inbound
//!   message and applying the bucket admission rules
//! - the cache sweep, aging out correlation and pending-store entries
//! - periodic maintenance: repository expiry, hourly re-advertisement of
//!   every stored resource, and refresh lookups for idle buckets

use crate::dht::caches::{AcceptedStores, ResponseCache, SentStores, MAX_CACHE_TIME};
use crate::dht::routing::BucketList;
use crate::protocol::{Contact, Message, MessageKind, NodeId, ALPHA, K};
use crate::store::{ResourceRecord, TrackStore, TrackTag};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::{interval, timeout};
use url::Url;

/// How long a caller waits for the response to a request
pub const MAX_SYNC_WAIT: Duration = Duration::from_millis(500);

/// Capacity of the contact admission queue; overflow is dropped
pub const CONTACT_QUEUE_LEN: usize = 10;

/// Tick of the cache-expiry sweep
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Tick of the maintenance loop
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Stored resources are re-advertised at this period
pub const REPLICATE_TIME: Duration = Duration::from_secs(60 * 60);

/// Buckets idle for longer than this get a refresh lookup
pub const REFRESH_TIME: Duration = Duration::from_secs(60 * 60);

/// Accepted future offset of incoming publication times
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

/// Whether a claimed publication time is acceptable
///
/// Only future times are bounded; stale publications are left to the
/// repository expiry sweep.
fn within_clock_skew(published: DateTime<Utc>) -> bool {
    published <= Utc::now() + chrono::Duration::seconds(MAX_CLOCK_SKEW.as_secs() as i64)
}

/// Outcome of an iterative value lookup
pub enum ValueLookup {
    /// Some peer answered with matching resource records
    Resources(Vec<ResourceRecord>),
    /// Nobody had a match; the closest contacts seen instead
    Contacts(Vec<Contact>),
}

/// Snapshot of overlay and repository occupancy
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub endpoint: Url,
    pub contacts: usize,
    pub active_buckets: usize,
    pub stored_resources: usize,
    pub keyword_entries: usize,
    pub lookups_started: u64,
    pub messages_handled: u64,
}

/// A peer in the overlay
pub struct KademliaNode {
    contact: Contact,
    buckets: RwLock<BucketList>,
    store: Arc<TrackStore>,
    transport: Arc<dyn Transport>,
    responses: ResponseCache,
    accepted_stores: AcceptedStores,
    sent_stores: SentStores,
    admissions: mpsc::Sender<Contact>,
    admission_queue: Mutex<Option<mpsc::Receiver<Contact>>>,
    last_replication: Mutex<Instant>,
    stop: watch::Sender<bool>,
    lookups_started: AtomicU64,
    messages_handled: AtomicU64,
}

impl KademliaNode {
    pub fn new(
        contact: Contact,
        store: Arc<TrackStore>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let (admissions, admission_queue) = mpsc::channel(CONTACT_QUEUE_LEN);
        let (stop, _) = watch::channel(false);
        Arc::new(KademliaNode {
            buckets: RwLock::new(BucketList::new(contact.id)),
            contact,
            store,
            transport,
            responses: ResponseCache::new(),
            accepted_stores: AcceptedStores::new(),
            sent_stores: SentStores::new(),
            admissions,
            admission_queue: Mutex::new(Some(admission_queue)),
            last_replication: Mutex::new(Instant::now()),
            stop,
            lookups_started: AtomicU64::new(0),
            messages_handled: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.contact.id
    }

    pub fn endpoint(&self) -> &Url {
        &self.contact.endpoint
    }

    pub fn store(&self) -> &Arc<TrackStore> {
        &self.store
    }

    /// Whether the routing table currently holds `id`
    pub async fn knows(&self, id: &NodeId) -> bool {
        self.buckets.read().await.contains(id)
    }

    /// Start the inbound dispatcher and the background workers
    pub fn start(self: Arc<Self>, mut inbound: mpsc::Receiver<Message>) {
        let node = Arc::clone(&self);
        tokio::spawn(async move {
            let mut stop = node.stop.subscribe();
            loop {
                tokio::select! {
                    message = inbound.recv() => match message {
                        Some(message) => {
                            let node = Arc::clone(&node);
                            tokio::spawn(async move { node.handle_message(message).await });
                        }
                        None => break,
                    },
                    _ = stop.changed() => break,
                }
            }
        });

        Arc::clone(&self).spawn_admission_worker();
        Arc::clone(&self).spawn_cache_sweeper();
        self.spawn_maintenance();
    }

    /// Signal every background worker to stop
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    /// Publish a track: record it locally, then advertise to the overlay
    ///
    /// Best effort: peers that refuse or time out are simply skipped.
    pub async fn put(&self, tag: TrackTag) {
        let published = Utc::now();
        if let Err(e) = self
            .store
            .store_resource(&tag, &self.contact.endpoint, published)
            .await
        {
            warn!("failed to record local track {}: {}", tag.resource_id(), e);
        }
        self.iterative_store(&tag, published, self.contact.endpoint.clone())
            .await;
    }

    /// Keyword search: local index first, then the overlay
    ///
    /// Returns an empty list when nothing matches anywhere.
    pub async fn get(&self, query: &str) -> Vec<ResourceRecord> {
        let local = self.store.search(query).await;
        if !local.is_empty() {
            return local;
        }
        match self.iterative_find_value(query).await {
            ValueLookup::Resources(resources) => resources,
            ValueLookup::Contacts(_) => Vec::new(),
        }
    }

    /// Join the overlay through a known peer
    ///
    /// Pings the peer to learn its identifier, admits it, then populates
    /// the routing table with a lookup for the local identifier.
    pub async fn bootstrap(&self, endpoint: &Url) -> bool {
        match self.ping(endpoint).await {
            Some(peer) => {
                debug!("bootstrap peer {} answered from {}", peer.id, peer.endpoint);
                self.admit_contact(peer).await;
                let local = self.contact.id;
                self.iterative_find_node(&local).await;
                true
            }
            None => {
                warn!("bootstrap peer {} unreachable", endpoint);
                false
            }
        }
    }

    pub async fn stats(&self) -> NodeStats {
        let buckets = self.buckets.read().await;
        NodeStats {
            node_id: self.contact.id,
            endpoint: self.contact.endpoint.clone(),
            contacts: buckets.len(),
            active_buckets: buckets.non_empty_buckets(),
            stored_resources: self.store.resource_count().await,
            keyword_entries: self.store.keyword_count().await,
            lookups_started: self.lookups_started.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
        }
    }

    // ---- iterative operations ----

    /// Locate up to K live contacts closest to `target`
    pub async fn iterative_find_node(&self, target: &NodeId) -> Vec<Contact> {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
        let mut shortlist = {
            let mut buckets = self.buckets.write().await;
            buckets.touch(target);
            buckets.close_contacts(target, Some(target), ALPHA)
        };
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut responded = 0usize;

        while responded < K {
            let wave: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if wave.is_empty() {
                break;
            }
            queried.extend(wave.iter().map(|c| c.id));

            let replies = join_all(wave.iter().map(|peer| self.find_node_rpc(peer, target))).await;
            for (peer, reply) in wave.iter().zip(replies) {
                match reply {
                    Some(found) => {
                        responded += 1;
                        self.merge_into_shortlist(&mut shortlist, found);
                    }
                    None => {
                        debug!("peer {} unreachable during lookup", peer.id);
                        shortlist.retain(|c| c.id != peer.id);
                    }
                }
            }
            shortlist.sort_by_key(|c| c.id.distance(target));
        }

        shortlist.truncate(K);
        shortlist
    }

    /// Keyword lookup across the overlay
    ///
    /// Ends as soon as any peer answers with matching resources; otherwise
    /// runs like a node lookup and yields the closest contacts seen.
    pub async fn iterative_find_value(&self, query: &str) -> ValueLookup {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
        let target = NodeId::for_text(query);
        let mut shortlist = {
            let mut buckets = self.buckets.write().await;
            buckets.touch(&target);
            buckets.close_contacts(&target, Some(&target), ALPHA)
        };
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut responded = 0usize;

        while responded < K {
            let wave: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if wave.is_empty() {
                break;
            }
            queried.extend(wave.iter().map(|c| c.id));

            let replies = join_all(wave.iter().map(|peer| self.find_value_rpc(peer, query))).await;
            for (peer, reply) in wave.iter().zip(replies) {
                match reply {
                    Some(ValueLookup::Resources(resources)) if !resources.is_empty() => {
                        return ValueLookup::Resources(resources);
                    }
                    Some(ValueLookup::Resources(_)) => responded += 1,
                    Some(ValueLookup::Contacts(found)) => {
                        responded += 1;
                        self.merge_into_shortlist(&mut shortlist, found);
                    }
                    None => {
                        debug!("peer {} unreachable during value lookup", peer.id);
                        shortlist.retain(|c| c.id != peer.id);
                    }
                }
            }
            shortlist.sort_by_key(|c| c.id.distance(&target));
        }

        shortlist.truncate(K);
        ValueLookup::Contacts(shortlist)
    }

    /// Offer a resource to the K contacts closest to its identifier
    ///
    /// `origin` is the endpoint that serves the track: the local endpoint
    /// when publishing a local track, the original holder's endpoint when
    /// re-advertising a foreign one.
    pub async fn iterative_store(&self, tag: &TrackTag, published: DateTime<Utc>, origin: Url) {
        let resource = tag.resource_id();
        let targets = self.iterative_find_node(&resource).await;
        debug!("offering {} to {} peers", resource, targets.len());

        for peer in targets {
            let conversation = NodeId::random();
            self.sent_stores.insert(conversation, tag.clone(), published);
            let offer = Message::new(
                &self.contact,
                conversation,
                MessageKind::StoreQuery {
                    resource,
                    published,
                    origin: origin.clone(),
                },
            );
            if let Err(e) = self.transport.send(&peer.endpoint, &offer).await {
                debug!("store offer to {} failed: {}", peer.endpoint, e);
                self.sent_stores.remove(&conversation);
            }
        }
    }

    fn merge_into_shortlist(&self, shortlist: &mut Vec<Contact>, found: Vec<Contact>) {
        for contact in found {
            if contact.id == self.contact.id {
                continue;
            }
            if shortlist.iter().any(|c| c.id == contact.id) {
                continue;
            }
            shortlist.push(contact);
        }
    }

    // ---- outbound requests ----

    /// Send a request and wait for its response
    ///
    /// `None` means the peer is down for this lookup: the send failed or
    /// nothing came back within [`MAX_SYNC_WAIT`].
    async fn request(&self, to: &Url, kind: MessageKind) -> Option<Message> {
        let message = Message::request(&self.contact, kind);
        let conversation = message.conversation;
        let receiver = self.responses.register(conversation);

        if let Err(e) = self.transport.send(to, &message).await {
            debug!("send {} to {} failed: {}", message.kind_name(), to, e);
            self.responses.abandon(&conversation);
            return None;
        }

        match timeout(MAX_SYNC_WAIT, receiver).await {
            Ok(Ok(response)) => Some(response),
            _ => {
                self.responses.abandon(&conversation);
                None
            }
        }
    }

    /// Ping an endpoint, returning the responder's contact
    pub async fn ping(&self, endpoint: &Url) -> Option<Contact> {
        let response = self.request(endpoint, MessageKind::Ping).await?;
        match response.kind {
            MessageKind::Pong => Some(response.contact()),
            _ => None,
        }
    }

    async fn find_node_rpc(&self, peer: &Contact, target: &NodeId) -> Option<Vec<Contact>> {
        let response = self
            .request(&peer.endpoint, MessageKind::FindNode { target: *target })
            .await?;
        match response.kind {
            MessageKind::FindNodeResponse { contacts } => Some(contacts),
            _ => None,
        }
    }

    async fn find_value_rpc(&self, peer: &Contact, query: &str) -> Option<ValueLookup> {
        let response = self
            .request(
                &peer.endpoint,
                MessageKind::FindValue {
                    query: query.to_string(),
                },
            )
            .await?;
        match response.kind {
            MessageKind::FindValueContacts { contacts } => Some(ValueLookup::Contacts(contacts)),
            MessageKind::FindValueData { resources } => Some(ValueLookup::Resources(resources)),
            _ => None,
        }
    }

    // ---- inbound dispatch ----

    async fn handle_message(self: Arc<Self>, message: Message) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
        trace!("{} from {}", message.kind_name(), message.sender);
        self.saw_contact(message.contact());

        if message.is_response() {
            match &message.kind {
                MessageKind::StoreResponse { send_data } => {
                    let send_data = *send_data;
                    self.on_store_response(message, send_data).await;
                }
                _ => self.responses.accept(message),
            }
            return;
        }

        match &message.kind {
            MessageKind::Ping => self.send_reply(&message, MessageKind::Pong).await,
            MessageKind::FindNode { target } => {
                let target = *target;
                self.on_find_node(&message, target).await;
            }
            MessageKind::FindValue { query } => {
                let query = query.clone();
                self.on_find_value(&message, &query).await;
            }
            MessageKind::StoreQuery {
                resource,
                published,
                origin,
            } => {
                let (resource, published, origin) = (*resource, *published, origin.clone());
                self.on_store_query(&message, resource, published, origin).await;
            }
            MessageKind::StoreData { tag, published } => {
                let (tag, published) = (tag.clone(), *published);
                self.on_store_data(&message, tag, published).await;
            }
            _ => {}
        }
    }

    async fn send_reply(&self, request: &Message, kind: MessageKind) {
        let reply = request.reply(&self.contact, kind);
        if let Err(e) = self.transport.send(&request.sender_endpoint, &reply).await {
            debug!(
                "{} to {} failed: {}",
                reply.kind_name(),
                request.sender_endpoint,
                e
            );
        }
    }

    async fn on_find_node(&self, message: &Message, target: NodeId) {
        let contacts = {
            let mut buckets = self.buckets.write().await;
            buckets.touch(&target);
            buckets.close_contacts(&target, Some(&message.sender), K)
        };
        self.send_reply(message, MessageKind::FindNodeResponse { contacts })
            .await;
    }

    async fn on_find_value(&self, message: &Message, query: &str) {
        let resources = self.store.search(query).await;
        if !resources.is_empty() {
            self.send_reply(message, MessageKind::FindValueData { resources })
                .await;
            return;
        }

        let target = NodeId::for_text(query);
        let contacts = {
            let mut buckets = self.buckets.write().await;
            buckets.touch(&target);
            buckets.close_contacts(&target, Some(&message.sender), K)
        };
        self.send_reply(message, MessageKind::FindValueContacts { contacts })
            .await;
    }

    async fn on_store_query(
        &self,
        message: &Message,
        resource: NodeId,
        published: DateTime<Utc>,
        origin: Url,
    ) {
        if !self.store.contains_source(&resource, &origin).await {
            self.accepted_stores.insert(message.conversation, origin);
            self.send_reply(message, MessageKind::StoreResponse { send_data: true })
                .await;
            return;
        }

        let current = self.store.publication_time(&resource, &origin).await;
        let newer = current.map_or(false, |current| published > current);
        if newer && within_clock_skew(published) {
            // known resource re-advertised: refresh quietly, no response
            if let Err(e) = self.store.refresh_resource(&resource, &origin, published).await {
                warn!("failed to refresh {} from {}: {}", resource, origin, e);
            }
        }
    }

    async fn on_store_response(&self, message: Message, send_data: bool) {
        let conversation = message.conversation;
        let recipient = message.sender_endpoint.clone();
        self.responses.accept(message);

        if !send_data {
            return;
        }
        if let Some(pending) = self.sent_stores.take(&conversation) {
            let data = Message::new(
                &self.contact,
                conversation,
                MessageKind::StoreData {
                    tag: pending.tag,
                    published: pending.published,
                },
            );
            if let Err(e) = self.transport.send(&recipient, &data).await {
                debug!("store data to {} failed: {}", recipient, e);
            }
        }
    }

    async fn on_store_data(&self, message: &Message, tag: TrackTag, published: DateTime<Utc>) {
        let Some(accepted) = self.accepted_stores.take(&message.conversation) else {
            trace!("unsolicited STORE_DATA from {}", message.sender);
            return;
        };
        if !within_clock_skew(published) {
            debug!(
                "rejecting {}: publication {} too far in the future",
                tag.resource_id(),
                published
            );
            return;
        }
        if let Err(e) = self.store.store_resource(&tag, &accepted.origin, published).await {
            warn!("failed to store {}: {}", tag.resource_id(), e);
        }
    }

    // ---- contact admission ----

    /// Queue a freshly seen contact for admission
    ///
    /// The queue is bounded; under load, excess sightings are dropped and
    /// the contact gets another chance on its next message.
    fn saw_contact(&self, contact: Contact) {
        if contact.id == self.contact.id {
            return;
        }
        if self.admissions.try_send(contact).is_err() {
            trace!("contact queue full, dropping sighting");
        }
    }

    async fn admit_contact(&self, contact: Contact) {
        if contact.id == self.contact.id {
            return;
        }

        let blocker = {
            let mut buckets = self.buckets.write().await;
            let known_endpoint = buckets.get(&contact.id).map(|c| c.endpoint.clone());
            if let Some(endpoint) = known_endpoint {
                if endpoint == contact.endpoint {
                    buckets.promote(&contact.id);
                } else {
                    // the node re-bound to a new endpoint
                    buckets.remove(&contact.id);
                    buckets.put(contact);
                }
                return;
            }
            if buckets.put(contact.clone()) {
                return;
            }
            buckets.blocker(&contact.id)
        };

        let Some(blocker) = blocker else { return };
        if self.ping(&blocker.endpoint).await.is_some() {
            self.buckets.write().await.promote(&blocker.id);
            debug!(
                "admission: {} still live, dropping applicant {}",
                blocker.id, contact.id
            );
        } else {
            let mut buckets = self.buckets.write().await;
            buckets.remove(&blocker.id);
            if buckets.put(contact.clone()) {
                debug!("admission: evicted {} for {}", blocker.id, contact.id);
            }
        }
    }

    // ---- background workers ----

    fn spawn_admission_worker(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut stop = self.stop.subscribe();
            let Some(mut queue) = self.admission_queue.lock().await.take() else {
                return;
            };
            loop {
                tokio::select! {
                    contact = queue.recv() => match contact {
                        Some(contact) => self.admit_contact(contact).await,
                        None => break,
                    },
                    _ = stop.changed() => break,
                }
            }
        });
    }

    fn spawn_cache_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut stop = self.stop.subscribe();
            let mut ticker = interval(CACHE_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.responses.sweep(MAX_CACHE_TIME);
                        self.accepted_stores.sweep(MAX_CACHE_TIME);
                        self.sent_stores.sweep(MAX_CACHE_TIME);
                    }
                    _ = stop.changed() => break,
                }
            }
        });
    }

    fn spawn_maintenance(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut stop = self.stop.subscribe();
            let mut ticker = interval(MAINTENANCE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_maintenance().await,
                    _ = stop.changed() => break,
                }
            }
        });
    }

    async fn run_maintenance(&self) {
        if let Err(e) = self.store.expire().await {
            warn!("expiry sweep failed: {}", e);
        }

        let replication_due = {
            let mut last = self.last_replication.lock().await;
            if last.elapsed() >= REPLICATE_TIME {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if replication_due {
            self.replicate_all().await;
        }

        self.refresh_buckets().await;
    }

    async fn replicate_all(&self) {
        let resources = self.store.all_resources().await;
        debug!("re-advertising {} resources", resources.len());
        for record in resources {
            for source in &record.sources {
                self.iterative_store(&record.tag, source.published, source.endpoint.clone())
                    .await;
            }
        }
    }

    async fn refresh_buckets(&self) {
        let targets = self.buckets.read().await.ids_for_refresh(REFRESH_TIME);
        for target in targets {
            self.iterative_find_node(&target).await;
        }
    }
}
