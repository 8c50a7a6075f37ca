//! Content store for file data.
//!
//! Chunks are keyed by their BLAKE3 hash and reference counted: every
//! `put` or `retain` adds one reference, every `release` drops one, and a
//! chunk is reclaimed when its last reference goes away. Identical content
//! written by different files (or by a copy of the same file) is stored once.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chunk::ChunkId;
use crate::error::{StorageError, StorageResult};

/// Byte-addressable chunk store backing file content.
///
/// Implementations must be safe to share across threads; the namespace
/// engine streams into the store without holding any namespace lock.
pub trait BlobStore: Send + Sync {
    /// Stores `data` (or adds a reference to an identical chunk) and returns its id.
    fn put(&self, data: Bytes) -> StorageResult<ChunkId>;

    /// Fetches the content of a chunk.
    fn get(&self, id: &ChunkId) -> StorageResult<Bytes>;

    /// Adds one reference to an existing chunk.
    fn retain(&self, id: &ChunkId) -> StorageResult<()>;

    /// Drops one reference. Returns true if the chunk was reclaimed.
    fn release(&self, id: &ChunkId) -> StorageResult<bool>;

    /// Number of distinct chunks currently stored.
    fn chunk_count(&self) -> usize;

    /// Total bytes held by distinct stored chunks.
    fn stored_bytes(&self) -> u64;
}

struct StoredChunk {
    data: Bytes,
    refs: u64,
}

/// In-memory chunk store. Does not persist across restarts.
pub struct MemoryBlobStore {
    chunks: DashMap<ChunkId, StoredChunk>,
    stored_bytes: AtomicU64,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            chunks: DashMap::new(),
            stored_bytes: AtomicU64::new(0),
        }
    }

    /// Returns the reference count of a chunk, or 0 if it is not stored.
    pub fn refcount(&self, id: &ChunkId) -> u64 {
        self.chunks.get(id).map(|c| c.refs).unwrap_or(0)
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, data: Bytes) -> StorageResult<ChunkId> {
        let id = ChunkId::of(&data);
        match self.chunks.entry(id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().refs += 1;
            }
            Entry::Vacant(vacant) => {
                self.stored_bytes
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                vacant.insert(StoredChunk { data, refs: 1 });
            }
        }
        Ok(id)
    }

    fn get(&self, id: &ChunkId) -> StorageResult<Bytes> {
        self.chunks
            .get(id)
            .map(|c| c.data.clone())
            .ok_or(StorageError::ChunkNotFound { id: *id })
    }

    fn retain(&self, id: &ChunkId) -> StorageResult<()> {
        match self.chunks.get_mut(id) {
            Some(mut chunk) => {
                chunk.refs += 1;
                Ok(())
            }
            None => Err(StorageError::ChunkNotFound { id: *id }),
        }
    }

    fn release(&self, id: &ChunkId) -> StorageResult<bool> {
        match self.chunks.entry(*id) {
            Entry::Occupied(mut occupied) => {
                let chunk = occupied.get_mut();
                if chunk.refs == 0 {
                    return Err(StorageError::RefcountUnderflow { id: *id });
                }
                chunk.refs -= 1;
                if chunk.refs == 0 {
                    let removed = occupied.remove();
                    self.stored_bytes
                        .fetch_sub(removed.data.len() as u64, Ordering::Relaxed);
                    tracing::trace!(chunk = %id, "reclaimed chunk");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(_) => Err(StorageError::ChunkNotFound { id: *id }),
        }
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn stored_bytes(&self) -> u64 {
        self.stored_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let store = MemoryBlobStore::new();
        let id = store.put(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(store.get(&id).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.stored_bytes(), 5);
    }

    #[test]
    fn test_duplicate_put_shares_storage() {
        let store = MemoryBlobStore::new();
        let a = store.put(Bytes::from_static(b"same")).unwrap();
        let b = store.put(Bytes::from_static(b"same")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.stored_bytes(), 4);
        assert_eq!(store.refcount(&a), 2);
    }

    #[test]
    fn test_release_reclaims_on_last_reference() {
        let store = MemoryBlobStore::new();
        let id = store.put(Bytes::from_static(b"data")).unwrap();
        store.retain(&id).unwrap();
        assert!(!store.release(&id).unwrap());
        assert!(store.release(&id).unwrap());
        assert_eq!(store.chunk_count(), 0);
        assert_eq!(store.stored_bytes(), 0);
        assert!(matches!(
            store.get(&id),
            Err(StorageError::ChunkNotFound { .. })
        ));
    }

    #[test]
    fn test_release_unknown_chunk() {
        let store = MemoryBlobStore::new();
        let id = ChunkId::of(b"never stored");
        assert!(matches!(
            store.release(&id),
            Err(StorageError::ChunkNotFound { .. })
        ));
        assert!(matches!(
            store.retain(&id),
            Err(StorageError::ChunkNotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_puts() {
        use std::sync::Arc;
        let store = Arc::new(MemoryBlobStore::new());
        let mut threads = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            threads.push(std::thread::spawn(move || {
                for i in 0..50u32 {
                    store.put(Bytes::from(i.to_le_bytes().to_vec())).unwrap();
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.chunk_count(), 50);
        let id = ChunkId::of(&7u32.to_le_bytes());
        assert_eq!(store.refcount(&id), 8);
    }
}
