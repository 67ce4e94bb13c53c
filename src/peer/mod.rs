//! Peer facade
//!
//! Wires the repository, the UDP transport and the overlay node together
//! behind the surface the front-end consumes: publish a track file, search
//! by keywords, join the overlay, shut down cleanly. Audio metadata
//! extraction stays behind the [`TagReader`] seam.

use crate::config::Config;
use crate::dht::{KademliaNode, NodeStats};
use crate::error::{Error, Result};
use crate::protocol::{Contact, NodeId};
use crate::store::{ResourceRecord, TrackStore, TrackTag};
use crate::transport::UdpTransport;
use log::info;
use std::path::Path;
use std::sync::Arc;

/// Extracts track metadata from a file
pub trait TagReader: Send + Sync {
    fn read_tag(&self, path: &Path, contents: &[u8]) -> Result<TrackTag>;
}

/// Metadata from file names of the form `Artist - Title.ext`
///
/// The album is taken from the containing directory and the content hash
/// from the file bytes. Stands in wherever no real tag extractor is wired
/// up.
pub struct FileNameTagReader;

impl TagReader for FileNameTagReader {
    fn read_tag(&self, path: &Path, contents: &[u8]) -> Result<TrackTag> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::InvalidData(format!("unreadable file name: {}", path.display())))?;
        let (artist, title) = match stem.split_once(" - ") {
            Some((artist, title)) => (artist.trim(), title.trim()),
            None => ("", stem.trim()),
        };
        let album = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or("");
        Ok(TrackTag::new(
            title,
            artist,
            album,
            NodeId::for_content(contents),
        ))
    }
}

/// A running TuneMesh peer
pub struct Peer {
    node: Arc<KademliaNode>,
    store: Arc<TrackStore>,
    tag_reader: Box<dyn TagReader>,
    config: Config,
}

impl Peer {
    /// Build and start a peer from configuration
    pub async fn start(config: Config) -> Result<Peer> {
        config.validate()?;

        let store = Arc::new(
            TrackStore::open(
                &config.storage.track_repository,
                &config.storage.keyword_repository,
            )
            .await?,
        );
        let (transport, inbound) = UdpTransport::bind(config.network.endpoint.clone()).await?;
        let contact = Contact::new(NodeId::random(), config.network.endpoint.clone());
        info!("peer {} listening on {}", contact.id, contact.endpoint);

        let node = KademliaNode::new(contact, store.clone(), transport);
        node.clone().start(inbound);

        Ok(Peer {
            node,
            store,
            tag_reader: Box::new(FileNameTagReader),
            config,
        })
    }

    /// Replace the metadata extractor
    pub fn with_tag_reader(mut self, tag_reader: Box<dyn TagReader>) -> Self {
        self.tag_reader = tag_reader;
        self
    }

    /// Join the overlay through the configured bootstrap peer
    ///
    /// False when no bootstrap peer is configured or it did not answer.
    pub async fn bootstrap(&self) -> bool {
        match &self.config.network.bootstrap {
            Some(endpoint) => self.node.bootstrap(endpoint).await,
            None => false,
        }
    }

    /// Publish a track file to the overlay
    pub async fn store_file(&self, path: &Path) -> Result<TrackTag> {
        let contents = tokio::fs::read(path).await?;
        let tag = self.tag_reader.read_tag(path, &contents)?;
        info!(
            "publishing \"{}\" by \"{}\" as {}",
            tag.title,
            tag.artist,
            tag.resource_id()
        );
        self.node.put(tag.clone()).await;
        Ok(tag)
    }

    /// Keyword search, local index first, then the overlay
    pub async fn search(&self, query: &str) -> Vec<ResourceRecord> {
        self.node.get(query).await
    }

    pub async fn stats(&self) -> NodeStats {
        self.node.stats().await
    }

    pub fn node(&self) -> &Arc<KademliaNode> {
        &self.node
    }

    /// Stop background work and flush the repository
    pub async fn shutdown(&self) -> Result<()> {
        self.node.shutdown();
        self.store.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_name_tag_reader() {
        let path = PathBuf::from("library/Imagine/John Lennon - Imagine.mp3");
        let tag = FileNameTagReader.read_tag(&path, b"fake audio bytes").unwrap();
        assert_eq!(tag.title, "Imagine");
        assert_eq!(tag.artist, "John Lennon");
        assert_eq!(tag.album, "Imagine");
        assert_eq!(tag.content_hash, NodeId::for_content(b"fake audio bytes"));
    }

    #[test]
    fn test_file_name_without_artist() {
        let path = PathBuf::from("track.mp3");
        let tag = FileNameTagReader.read_tag(&path, b"bytes").unwrap();
        assert_eq!(tag.title, "track");
        assert!(tag.artist.is_empty());
    }
}
