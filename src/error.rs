//! Error types and handling for TuneMesh

use thiserror::Error;

/// Result type alias for TuneMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// TuneMesh error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Missing key: {0}")]
    MissingKey(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Repository connection error: {0}")]
    RepositoryConnection(String),

    #[error("Publication time too far in the future: {0}")]
    ClockSkew(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
