//! Resource records and track metadata
//!
//! A resource record is the value the overlay stores and serves: the track
//! metadata plus the set of peer endpoints that claim to serve the track,
//! each with the time it last advertised itself.

use crate::protocol::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// Track metadata with its content hash
///
/// The content hash doubles as the resource's primary key in the overlay's
/// identifier namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTag {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub content_hash: NodeId,
}

impl TrackTag {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        content_hash: NodeId,
    ) -> Self {
        TrackTag {
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            content_hash,
        }
    }

    /// Identifier under which the resource is stored and looked up
    pub fn resource_id(&self) -> NodeId {
        self.content_hash
    }
}

/// One endpoint serving a resource, with its last advertisement time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUrl {
    pub endpoint: Url,
    pub published: DateTime<Utc>,
}

/// Stored value: track metadata plus the endpoints serving it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: NodeId,
    pub tag: TrackTag,
    pub sources: Vec<SourceUrl>,
}

impl ResourceRecord {
    pub fn new(tag: TrackTag, endpoint: Url, published: DateTime<Utc>) -> Self {
        ResourceRecord {
            id: tag.resource_id(),
            tag,
            sources: vec![SourceUrl { endpoint, published }],
        }
    }

    pub fn contains_source(&self, endpoint: &Url) -> bool {
        self.sources.iter().any(|s| s.endpoint == *endpoint)
    }

    pub fn publication_time(&self, endpoint: &Url) -> Option<DateTime<Utc>> {
        self.sources
            .iter()
            .find(|s| s.endpoint == *endpoint)
            .map(|s| s.published)
    }

    /// Add an endpoint, or move an existing one's publication time forward
    ///
    /// Publication times never move backwards; re-advertisement with a
    /// stale time leaves the record unchanged.
    pub fn record_source(&mut self, endpoint: &Url, published: DateTime<Utc>) {
        match self.sources.iter_mut().find(|s| s.endpoint == *endpoint) {
            Some(source) => {
                if published > source.published {
                    source.published = published;
                }
            }
            None => self.sources.push(SourceUrl {
                endpoint: endpoint.clone(),
                published,
            }),
        }
    }

    /// Drop endpoints whose last advertisement is before `cutoff`
    pub fn prune_sources_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sources.len();
        self.sources.retain(|s| s.published >= cutoff);
        before - self.sources.len()
    }
}

/// Inverted-index row: one normalized keyword and the resources it names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub id: String,
    pub tags: HashSet<NodeId>,
}

impl KeywordEntry {
    pub fn new(id: impl Into<String>) -> Self {
        KeywordEntry {
            id: id.into(),
            tags: HashSet::new(),
        }
    }
}
