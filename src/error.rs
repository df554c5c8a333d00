//! Error types for the TimeStore engine.

use thiserror::Error;

/// Errors returned by metadata store operations.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A metadata file already exists for this node.
    #[error("metadata already exists for node {0:016X}")]
    AlreadyExists(u64),

    /// No metadata file exists for this node.
    #[error("metadata not found for node {0:016X}")]
    NotFound(u64),

    /// The metadata file failed validation (magic, version, node id, or size).
    #[error("corrupt metadata for node {0:016X}: {1}")]
    Corrupt(u64, &'static str),

    /// A `create` argument violated a stated invariant.
    #[error("invalid metadata configuration: {0}")]
    Invalid(&'static str),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by layer file operations.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A row index was computed outside the representable range for the file.
    #[error("row index out of bounds: {0}")]
    OutOfBounds(u64),
}

/// Errors surfaced by the public engine API.
///
/// Mirrors the abstract error kinds an adapter (HTTP front end, CLI, etc.)
/// needs to map onto its own status codes.
#[derive(Debug, Error)]
pub enum TimeStoreError {
    /// `create` was called for a node that already exists.
    #[error("node {0:016X} already exists")]
    AlreadyExists(u64),

    /// Requested node, metric, or key slot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A timestamp fell outside the range the node can accept (e.g. before
    /// its fixed `start_time`, or past the covered range on read).
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A caller-supplied argument was invalid independent of node state.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// The on-disk metadata failed validation.
    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation of a scratch or mapped buffer failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MetadataError> for TimeStoreError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::AlreadyExists(id) => TimeStoreError::AlreadyExists(id),
            MetadataError::NotFound(id) => {
                TimeStoreError::NotFound(format!("node {id:016X}"))
            }
            MetadataError::Corrupt(id, reason) => {
                TimeStoreError::Corrupt(format!("node {id:016X}: {reason}"))
            }
            MetadataError::Invalid(reason) => TimeStoreError::Invalid(reason.to_string()),
            MetadataError::Io(e) => TimeStoreError::Io(e),
        }
    }
}

impl From<LayerError> for TimeStoreError {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::Io(e) => TimeStoreError::Io(e),
            LayerError::OutOfBounds(idx) => {
                TimeStoreError::Internal(format!("row index {idx} out of bounds"))
            }
        }
    }
}
