//! Error types for the storage subsystem.

use thiserror::Error;

use crate::chunk::ChunkId;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors raised by a content source or backend.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The requested chunk does not exist in the store.
    #[error("Chunk not found: {id}")]
    ChunkNotFound {
        /// The chunk ID that was not found.
        id: ChunkId,
    },

    /// A chunk was released more times than it was retained.
    #[error("Chunk {id} released with no outstanding references")]
    RefcountUnderflow {
        /// The chunk ID whose refcount would go negative.
        id: ChunkId,
    },

    /// The requested chunk size is not usable.
    #[error("Invalid chunk size: {requested} bytes")]
    InvalidChunkSize {
        /// The requested chunk size in bytes.
        requested: usize,
    },

    /// Backend-specific failure.
    #[error("Backend error: {reason}")]
    BackendError {
        /// Description of the failure.
        reason: String,
    },
}
