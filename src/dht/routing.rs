//! K-bucket routing table
//!
//! Contacts are spread over 160 buckets indexed by the length of the common
//! bit prefix between the local identifier and the contact's. Each bucket
//! keeps at most K contacts ordered by last contact, most recently seen at
//! the back, and remembers when a lookup last passed through it so stale
//! regions of the identifier space can be refreshed.

use crate::protocol::{Contact, NodeId, ID_BITS, K};
use std::time::{Duration, Instant};

/// One bucket of contacts at a fixed prefix length
struct KBucket {
    /// Most recently seen contact at the back
    contacts: Vec<Contact>,
    last_lookup: Instant,
}

impl KBucket {
    fn new() -> Self {
        KBucket {
            contacts: Vec::new(),
            last_lookup: Instant::now(),
        }
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.contacts.iter().position(|c| c.id == *id)
    }

    fn is_full(&self) -> bool {
        self.contacts.len() >= K
    }
}

/// Routing table keyed on the local node's identifier
pub struct BucketList {
    local: NodeId,
    buckets: Vec<KBucket>,
}

impl BucketList {
    pub fn new(local: NodeId) -> Self {
        BucketList {
            local,
            buckets: (0..ID_BITS).map(|_| KBucket::new()).collect(),
        }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Bucket index for an identifier; `None` for the local id itself
    fn bucket_index(&self, id: &NodeId) -> Option<usize> {
        let prefix = self.local.common_prefix_len(id);
        (prefix < ID_BITS).then_some(prefix)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Contact> {
        let index = self.bucket_index(id)?;
        let position = self.buckets[index].position(id)?;
        Some(&self.buckets[index].contacts[position])
    }

    /// Insert a contact at the most-recent position of its bucket
    ///
    /// Returns false when the contact is the local node, already present,
    /// or its bucket is full.
    pub fn put(&mut self, contact: Contact) -> bool {
        let Some(index) = self.bucket_index(&contact.id) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        if bucket.is_full() || bucket.position(&contact.id).is_some() {
            return false;
        }
        bucket.contacts.push(contact);
        true
    }

    /// Move a contact to the most-recent position of its bucket
    pub fn promote(&mut self, id: &NodeId) -> bool {
        let Some(index) = self.bucket_index(id) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        match bucket.position(id) {
            Some(position) => {
                let contact = bucket.contacts.remove(position);
                bucket.contacts.push(contact);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Contact> {
        let index = self.bucket_index(id)?;
        let bucket = &mut self.buckets[index];
        let position = bucket.position(id)?;
        Some(bucket.contacts.remove(position))
    }

    /// If the bucket for `id` is full, the contact that would be evicted
    ///
    /// The candidate is the bucket's stalest member, the one least recently
    /// seen.
    pub fn blocker(&self, id: &NodeId) -> Option<Contact> {
        let index = self.bucket_index(id)?;
        let bucket = &self.buckets[index];
        if bucket.is_full() {
            bucket.contacts.first().cloned()
        } else {
            None
        }
    }

    /// Record that a lookup passed through the bucket containing `id`
    pub fn touch(&mut self, id: &NodeId) {
        if let Some(index) = self.bucket_index(id) {
            self.buckets[index].last_lookup = Instant::now();
        }
    }

    /// The `n` contacts closest to `target` across all buckets
    pub fn close_contacts(
        &self,
        target: &NodeId,
        exclude: Option<&NodeId>,
        n: usize,
    ) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts.iter())
            .filter(|c| exclude.map_or(true, |id| c.id != *id))
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.id.distance(target));
        contacts.truncate(n);
        contacts
    }

    /// One refresh target per bucket that no lookup has touched recently
    ///
    /// Each returned identifier is uniformly random within its bucket's
    /// slice of the identifier space.
    pub fn ids_for_refresh(&self, threshold: Duration) -> Vec<NodeId> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.last_lookup.elapsed() > threshold)
            .map(|(index, _)| NodeId::random_in_bucket(&self.local, index))
            .collect()
    }

    /// Total number of stored contacts
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn non_empty_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| !b.contacts.is_empty()).count()
    }
}
