//! Keyword-indexed track repository
//!
//! The repository holds two document collections: resource records keyed by
//! content hash, and keyword entries mapping normalized keywords to the
//! resources whose metadata produced them. A fan-out index from resource to
//! keywords keeps deletion and expiry cheap, and keyword entries with no
//! remaining resources are garbage collected.
//!
//! Both collections persist as JSON documents when the store is opened on
//! disk; an in-memory mode backs unit tests and short-lived peers.

pub mod keywords;
pub mod resource;

pub use keywords::{generate_keywords, query_tokens, KEYWORD_PREFIX, MAX_KEYWORD_LEN};
pub use resource::{KeywordEntry, ResourceRecord, SourceUrl, TrackTag};

use crate::error::{Error, Result};
use crate::protocol::NodeId;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// Endpoints not re-advertised within this window are dropped
pub const EXPIRE_TIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct StoreState {
    resources: HashMap<NodeId, ResourceRecord>,
    keywords: HashMap<String, KeywordEntry>,
    /// Fan-out from resource id to the keyword entries referencing it
    keys_by_tag: HashMap<NodeId, HashSet<String>>,
}

struct StorePaths {
    resources: PathBuf,
    keywords: PathBuf,
}

/// Thread-safe keyword-indexed resource store
pub struct TrackStore {
    state: RwLock<StoreState>,
    paths: Option<StorePaths>,
}

impl TrackStore {
    /// Create a store with no backing files
    pub fn in_memory() -> Self {
        TrackStore {
            state: RwLock::new(StoreState::default()),
            paths: None,
        }
    }

    /// Open a store backed by the two repository document files
    ///
    /// Missing files are treated as empty collections; parent directories
    /// are created as needed.
    pub async fn open(track_repository: &Path, keyword_repository: &Path) -> Result<Self> {
        for path in [track_repository, keyword_repository] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::RepositoryConnection(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let resources: Vec<ResourceRecord> = load_collection(track_repository).await?;
        let entries: Vec<KeywordEntry> = load_collection(keyword_repository).await?;

        let mut state = StoreState::default();
        for record in resources {
            state.resources.insert(record.id, record);
        }
        for entry in entries {
            for tag in &entry.tags {
                state
                    .keys_by_tag
                    .entry(*tag)
                    .or_default()
                    .insert(entry.id.clone());
            }
            state.keywords.insert(entry.id.clone(), entry);
        }

        Ok(TrackStore {
            state: RwLock::new(state),
            paths: Some(StorePaths {
                resources: track_repository.to_path_buf(),
                keywords: keyword_repository.to_path_buf(),
            }),
        })
    }

    /// Record that `endpoint` serves the track described by `tag`
    ///
    /// Creates the resource record and its keyword entries on first sight;
    /// otherwise merges the endpoint into the existing record, moving its
    /// publication time forward if `published` is newer.
    pub async fn store_resource(
        &self,
        tag: &TrackTag,
        endpoint: &Url,
        published: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let id = tag.resource_id();

        match state.resources.get_mut(&id) {
            Some(record) => record.record_source(endpoint, published),
            None => {
                let record = ResourceRecord::new(tag.clone(), endpoint.clone(), published);
                state.resources.insert(id, record);
                for keyword in generate_keywords(tag) {
                    state
                        .keywords
                        .entry(keyword.clone())
                        .or_insert_with(|| KeywordEntry::new(keyword.clone()))
                        .tags
                        .insert(id);
                    state.keys_by_tag.entry(id).or_default().insert(keyword);
                }
            }
        }

        self.persist(state).await
    }

    /// Resources whose keywords contain any query token as a substring
    ///
    /// Matching is substring containment on the normalized keyword (so
    /// "lenn" finds tracks indexed under "lennon"), which favors recall
    /// over precision for partial queries.
    pub async fn search(&self, query: &str) -> Vec<ResourceRecord> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Vec::new();
        }

        let state = self.state.read().await;
        let mut matched: HashSet<NodeId> = HashSet::new();
        for entry in state.keywords.values() {
            let keyword = keywords::strip_prefix(&entry.id);
            if tokens.iter().any(|token| keyword.contains(token.as_str())) {
                matched.extend(entry.tags.iter().copied());
            }
        }

        matched
            .into_iter()
            .filter_map(|id| state.resources.get(&id).cloned())
            .collect()
    }

    pub async fn resource(&self, id: &NodeId) -> Option<ResourceRecord> {
        self.state.read().await.resources.get(id).cloned()
    }

    pub async fn contains_source(&self, id: &NodeId, endpoint: &Url) -> bool {
        self.state
            .read()
            .await
            .resources
            .get(id)
            .map(|r| r.contains_source(endpoint))
            .unwrap_or(false)
    }

    pub async fn publication_time(&self, id: &NodeId, endpoint: &Url) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .await
            .resources
            .get(id)
            .and_then(|r| r.publication_time(endpoint))
    }

    /// Move the publication time of `(id, endpoint)` forward to `published`
    pub async fn refresh_resource(
        &self,
        id: &NodeId,
        endpoint: &Url,
        published: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let record = state
            .resources
            .get_mut(id)
            .ok_or_else(|| Error::MissingKey(id.to_string()))?;
        if !record.contains_source(endpoint) {
            return Err(Error::MissingKey(format!("{} @ {}", id, endpoint)));
        }
        record.record_source(endpoint, published);
        self.persist(state).await
    }

    /// Remove a resource and every keyword entry referencing it
    pub async fn delete_resource(&self, id: &NodeId) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if remove_resource(state, id).is_none() {
            return Err(Error::MissingKey(id.to_string()));
        }
        self.persist(state).await
    }

    /// Drop endpoints not re-advertised within [`EXPIRE_TIME`]
    ///
    /// Resources left with no endpoints are removed outright, cascading
    /// into the keyword index. Returns the number of removed resources.
    pub async fn expire(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(EXPIRE_TIME.as_secs() as i64);
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut stale_endpoints = 0;
        let mut empty: Vec<NodeId> = Vec::new();
        for record in state.resources.values_mut() {
            stale_endpoints += record.prune_sources_before(cutoff);
            if record.sources.is_empty() {
                empty.push(record.id);
            }
        }
        for id in &empty {
            remove_resource(state, id);
        }

        if stale_endpoints == 0 && empty.is_empty() {
            return Ok(0);
        }
        debug!(
            "expiry removed {} endpoints and {} resources",
            stale_endpoints,
            empty.len()
        );
        self.persist(state).await?;
        Ok(empty.len())
    }

    /// Every stored resource record, for the replication loop
    pub async fn all_resources(&self) -> Vec<ResourceRecord> {
        self.state.read().await.resources.values().cloned().collect()
    }

    pub async fn resource_count(&self) -> usize {
        self.state.read().await.resources.len()
    }

    pub async fn keyword_count(&self) -> usize {
        self.state.read().await.keywords.len()
    }

    /// Rewrite the backing documents from the current state
    pub async fn flush(&self) -> Result<()> {
        let guard = self.state.read().await;
        self.persist(&guard).await
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };

        let resources: Vec<&ResourceRecord> = state.resources.values().collect();
        let entries: Vec<&KeywordEntry> = state.keywords.values().collect();
        write_collection(&paths.resources, &resources).await?;
        write_collection(&paths.keywords, &entries).await
    }
}

fn remove_resource(state: &mut StoreState, id: &NodeId) -> Option<ResourceRecord> {
    let record = state.resources.remove(id)?;
    if let Some(keys) = state.keys_by_tag.remove(id) {
        for key in keys {
            let now_empty = match state.keywords.get_mut(&key) {
                Some(entry) => {
                    entry.tags.remove(id);
                    entry.tags.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.keywords.remove(&key);
            }
        }
    }
    Some(record)
}

async fn load_collection<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| Error::Repository(format!("corrupt document {}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::RepositoryConnection(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn write_collection<T: serde::Serialize>(path: &Path, collection: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(collection)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| Error::Repository(format!("failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(title: &str, artist: &str, album: &str) -> TrackTag {
        TrackTag::new(
            title,
            artist,
            album,
            NodeId::for_text(&format!("{}/{}/{}", title, artist, album)),
        )
    }

    fn endpoint(port: u16) -> Url {
        format!("udp://localhost:{}/kademlia", port).parse().unwrap()
    }

    #[tokio::test]
    async fn test_store_and_search() {
        let store = TrackStore::in_memory();
        let t = tag("Imagine", "John Lennon", "Imagine");
        store
            .store_resource(&t, &endpoint(1), Utc::now())
            .await
            .unwrap();

        let found = store.search("imagine").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag.title, "Imagine");
        assert!(found[0].contains_source(&endpoint(1)));
    }

    #[tokio::test]
    async fn test_search_matches_substrings() {
        let store = TrackStore::in_memory();
        store
            .store_resource(&tag("Imagine", "John Lennon", "Imagine"), &endpoint(1), Utc::now())
            .await
            .unwrap();

        assert_eq!(store.search("lenn").await.len(), 1);
        assert_eq!(store.search("LENNON imagine").await.len(), 1);
        assert!(store.search("floyd").await.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_index_consistency() {
        let store = TrackStore::in_memory();
        let t = tag("The Wall", "Pink Floyd", "The Wall");
        store
            .store_resource(&t, &endpoint(1), Utc::now())
            .await
            .unwrap();

        let state = store.state.read().await;
        let id = t.resource_id();
        for keyword in generate_keywords(&t) {
            let entry = state.keywords.get(&keyword).expect("keyword entry exists");
            assert!(entry.tags.contains(&id));
        }
        for key in state.keys_by_tag.get(&id).unwrap() {
            assert!(generate_keywords(&t).contains(key));
        }
    }

    #[tokio::test]
    async fn test_delete_cleans_keyword_index() {
        let store = TrackStore::in_memory();
        let t = tag("The Wall", "Pink Floyd", "The Wall");
        store
            .store_resource(&t, &endpoint(1), Utc::now())
            .await
            .unwrap();

        store.delete_resource(&t.resource_id()).await.unwrap();

        let state = store.state.read().await;
        assert!(state.resources.is_empty());
        assert!(state.keywords.is_empty());
        assert!(state.keys_by_tag.is_empty());
    }

    #[tokio::test]
    async fn test_shared_keyword_survives_partial_delete() {
        let store = TrackStore::in_memory();
        let a = tag("Wish You Were Here", "Pink Floyd", "Wish You Were Here");
        let b = tag("The Wall", "Pink Floyd", "The Wall");
        store.store_resource(&a, &endpoint(1), Utc::now()).await.unwrap();
        store.store_resource(&b, &endpoint(1), Utc::now()).await.unwrap();

        store.delete_resource(&a.resource_id()).await.unwrap();

        let found = store.search("floyd").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag.title, "The Wall");
    }

    #[tokio::test]
    async fn test_expire_prunes_endpoints_and_records() {
        let store = TrackStore::in_memory();
        let stale = tag("Old", "Forgotten", "Archive");
        let fresh = tag("New", "Current", "Live");
        let old_time = Utc::now() - chrono::Duration::hours(30);

        store.store_resource(&stale, &endpoint(1), old_time).await.unwrap();
        store.store_resource(&fresh, &endpoint(1), old_time).await.unwrap();
        store
            .store_resource(&fresh, &endpoint(2), Utc::now())
            .await
            .unwrap();

        let removed = store.expire().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.resource(&stale.resource_id()).await.is_none());

        let survivor = store.resource(&fresh.resource_id()).await.unwrap();
        assert_eq!(survivor.sources.len(), 1);
        assert!(survivor.contains_source(&endpoint(2)));
    }

    #[tokio::test]
    async fn test_refresh_missing_endpoint_is_an_error() {
        let store = TrackStore::in_memory();
        let t = tag("Imagine", "John Lennon", "Imagine");
        store.store_resource(&t, &endpoint(1), Utc::now()).await.unwrap();

        let err = store
            .refresh_resource(&t.resource_id(), &endpoint(9), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingKey(_)));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tracks = dir.path().join("tracks.json");
        let keys = dir.path().join("keywords.json");
        let t = tag("Imagine", "John Lennon", "Imagine");

        {
            let store = TrackStore::open(&tracks, &keys).await.unwrap();
            store.store_resource(&t, &endpoint(1), Utc::now()).await.unwrap();
        }

        let reopened = TrackStore::open(&tracks, &keys).await.unwrap();
        assert_eq!(reopened.resource_count().await, 1);
        let found = reopened.search("lennon").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, t.resource_id());
    }
}
