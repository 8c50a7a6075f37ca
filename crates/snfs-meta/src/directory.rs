//! Directory entries for the namespace engine.
//!
//! Directory entries are stored in the KV store with key format
//! `dirent/{parent_inode_be}/{entry_name}`. This allows efficient prefix
//! scans for readdir() operations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::kvstore::{BatchOp, KvStore};
use crate::types::{InodeId, MetaError, NodeKind};

/// Key prefix for directory entries in the KV store.
const DIRENT_PREFIX: &[u8] = b"dirent/";

/// Builds the KV store key prefix for all entries in a directory.
fn dirent_prefix(parent: InodeId) -> Vec<u8> {
    let mut key = DIRENT_PREFIX.to_vec();
    key.extend_from_slice(&parent.as_u64().to_be_bytes());
    key.push(b'/');
    key
}

/// Builds the KV store key for a specific directory entry.
fn dirent_key(parent: InodeId, name: &str) -> Vec<u8> {
    let mut key = dirent_prefix(parent);
    key.extend_from_slice(name.as_bytes());
    key
}

/// A directory entry linking a name to a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// Target node
    pub id: InodeId,
    /// Kind of the target node
    pub kind: NodeKind,
}

/// Reads directory entries and builds batch operations that change them.
pub struct DirectoryStore {
    kv: Arc<dyn KvStore>,
}

impl DirectoryStore {
    /// Creates a new DirectoryStore.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Looks up a directory entry by name.
    pub fn lookup(&self, parent: InodeId, name: &str) -> Result<Option<DirEntry>, MetaError> {
        match self.kv.get(&dirent_key(parent, name))? {
            Some(value) => bincode::deserialize(&value)
                .map(Some)
                .map_err(|e| MetaError::KvError(e.to_string())),
            None => Ok(None),
        }
    }

    /// Lists all entries in a directory, sorted by name.
    pub fn list_entries(&self, parent: InodeId) -> Result<Vec<DirEntry>, MetaError> {
        self.kv
            .scan_prefix(&dirent_prefix(parent))?
            .into_iter()
            .map(|(_key, value)| {
                bincode::deserialize(&value).map_err(|e| MetaError::KvError(e.to_string()))
            })
            .collect()
    }

    /// Returns true if the directory has no entries.
    pub fn is_empty(&self, parent: InodeId) -> Result<bool, MetaError> {
        Ok(self.kv.scan_prefix(&dirent_prefix(parent))?.is_empty())
    }

    /// Batch operation linking `entry` under `parent`.
    pub fn put_op(&self, parent: InodeId, entry: &DirEntry) -> Result<BatchOp, MetaError> {
        let value = bincode::serialize(entry).map_err(|e| MetaError::KvError(e.to_string()))?;
        Ok(BatchOp::Put {
            key: dirent_key(parent, &entry.name),
            value,
        })
    }

    /// Batch operation unlinking `name` from `parent`.
    pub fn delete_op(&self, parent: InodeId, name: &str) -> BatchOp {
        BatchOp::Delete {
            key: dirent_key(parent, name),
        }
    }
}
