#![warn(missing_docs)]

//! SNFS storage subsystem: content-addressed chunk store, streaming content readers/writers

pub mod blob;
pub mod cancel;
pub mod chunk;
pub mod content;
pub mod error;

pub use blob::{BlobStore, MemoryBlobStore};
pub use cancel::{new_cancel_pair, CancelHandle, CancelReason, CancelToken};
pub use chunk::{ChunkId, ChunkRef, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use content::{ContentManifest, ContentReader, ContentWriter};
pub use error::{StorageError, StorageResult};
