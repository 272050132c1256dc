use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Chord protocol error: {0}")]
    Chord(#[from] ChordError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Backup protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Timed out talking to {0}")]
    Timeout(String),

    #[error("Failed to bind {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ChordError {
    #[error("Invalid node ID: {0}")]
    InvalidNodeId(String),

    #[error("Failed to join ring: {0}")]
    JoinFailed(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Chunk already stored: {0}")]
    AlreadyStored(String),

    #[error("Capacity exceeded: {needed} bytes needed, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize store state: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MessageError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Unknown message type: {0}")]
    UnknownKind(String),

    #[error("{kind} expects {expected} header fields, got {actual}")]
    FieldCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("{0} does not carry a body")]
    UnexpectedBody(&'static str),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("File was never backed up from this peer: {0}")]
    UnknownFile(String),

    #[error("No known storer for chunk {0}")]
    NoKnownStorers(String),

    #[error("Replication degree must be at least 1")]
    InvalidReplication,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Restore of {0} was superseded or abandoned")]
    RestoreAborted(String),
}
