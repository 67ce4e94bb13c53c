//! Configuration for a TuneMesh peer
//!
//! Defaults are usable out of the box; a TOML file can override any
//! section, and `validate` catches the mistakes that would otherwise
//! surface as confusing runtime failures.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
}

/// Overlay and transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Endpoint URI this peer publishes to the overlay
    pub endpoint: Url,
    /// Port of the separate track-transfer transport
    pub udp_port: u16,
    /// Peer to join the overlay through, if any
    pub bootstrap: Option<Url>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            endpoint: "udp://localhost:8001/kademlia"
                .parse()
                .expect("default endpoint is valid"),
            udp_port: 9997,
            bootstrap: None,
        }
    }
}

/// Repository document locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub track_repository: PathBuf,
    pub keyword_repository: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            track_repository: PathBuf::from("data/tracks.json"),
            keyword_repository: PathBuf::from("data/keywords.json"),
        }
    }
}

/// Process-level tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    /// Size of one track chunk served to downloaders
    pub chunk_length: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: 4,
            chunk_length: 64 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.network.endpoint.port().is_none() {
            return Err(Error::Config(format!(
                "overlay endpoint {} has no port",
                self.network.endpoint
            )));
        }
        if self.network.udp_port == 0 {
            return Err(Error::Config("udp_port must be non-zero".into()));
        }
        if self.runtime.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be non-zero".into()));
        }
        if self.runtime.chunk_length == 0 {
            return Err(Error::Config("chunk_length must be non-zero".into()));
        }
        if let Some(bootstrap) = &self.network.bootstrap {
            if bootstrap == &self.network.endpoint {
                return Err(Error::Config(
                    "bootstrap peer must differ from the local endpoint".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.udp_port, 9997);
        assert_eq!(
            config.network.endpoint.as_str(),
            "udp://localhost:8001/kademlia"
        );
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            [network]
            endpoint = "udp://tracker.example:8101/kademlia"

            [runtime]
            worker_threads = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.network.endpoint.port(), Some(8101));
        assert_eq!(config.runtime.worker_threads, 8);
        // untouched sections keep their defaults
        assert_eq!(config.network.udp_port, 9997);
        assert_eq!(config.storage.track_repository, PathBuf::from("data/tracks.json"));
    }

    #[test]
    fn test_validation_rejects_self_bootstrap() {
        let mut config = Config::default();
        config.network.bootstrap = Some(config.network.endpoint.clone());
        assert!(config.validate().is_err());
    }
}
