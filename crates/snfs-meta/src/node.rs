//! Node records for the namespace engine.
//!
//! Nodes are stored in the KV store with key format `node/{inode_id_be}`.
//! Serialization uses bincode for compact binary encoding.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use snfs_storage::ContentManifest;

use crate::kvstore::{BatchOp, KvStore};
use crate::types::{FileMeta, Ino, InodeId, MetaError, NodeKind, NodeStat, Timestamp};

/// Key prefix for node records in the KV store.
const NODE_PREFIX: &[u8] = b"node/";

/// Builds the KV store key for a node.
fn node_key(id: InodeId) -> Vec<u8> {
    let mut key = NODE_PREFIX.to_vec();
    key.extend_from_slice(&id.as_u64().to_be_bytes());
    key
}

/// Persistent state of one file or directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Internal id (tree linkage).
    pub id: InodeId,
    /// File or directory.
    pub kind: NodeKind,
    /// Stable identity; `None` for directories.
    pub ino: Option<Ino>,
    /// Creation time of the current identity.
    pub ctime: Timestamp,
    /// Last content change.
    pub mtime: Timestamp,
    /// File content; empty for directories.
    pub content: ContentManifest,
}

impl NodeRecord {
    /// A new, empty directory.
    pub fn new_directory(id: InodeId, now: Timestamp) -> Self {
        Self {
            id,
            kind: NodeKind::Directory,
            ino: None,
            ctime: now,
            mtime: now,
            content: ContentManifest::empty(),
        }
    }

    /// A new file with a fresh identity.
    pub fn new_file(id: InodeId, content: ContentManifest, now: Timestamp) -> Self {
        Self {
            id,
            kind: NodeKind::File,
            ino: Some(Ino::generate()),
            ctime: now,
            mtime: now,
            content,
        }
    }

    /// Content size in bytes (0 for directories).
    pub fn size(&self) -> u64 {
        self.content.size
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Caller-facing view of this node under `name`.
    pub fn to_stat(&self, name: &str, writeable: bool) -> NodeStat {
        let file = match (self.kind, &self.ino) {
            (NodeKind::File, Some(ino)) => Some(FileMeta {
                ino: ino.clone(),
                ctime: self.ctime,
                mtime: self.mtime,
                size: self.content.size,
            }),
            _ => None,
        };
        NodeStat {
            name: name.to_string(),
            kind: self.kind,
            file,
            writeable,
        }
    }
}

/// Manages node id allocation and node records on top of the KV store.
pub struct NodeStore {
    kv: Arc<dyn KvStore>,
    next_id: AtomicU64,
}

impl NodeStore {
    /// Opens the node store. Id allocation resumes after the highest id
    /// already present; 1 is reserved for the root.
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self, MetaError> {
        let highest = kv
            .scan_prefix(NODE_PREFIX)?
            .last()
            .and_then(|(key, _)| key.get(NODE_PREFIX.len()..))
            .and_then(|raw| <[u8; 8]>::try_from(raw).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(InodeId::ROOT_INODE.as_u64());
        Ok(Self {
            kv,
            next_id: AtomicU64::new(highest.max(InodeId::ROOT_INODE.as_u64()) + 1),
        })
    }

    /// Allocates a new unique node id.
    pub fn allocate_id(&self) -> InodeId {
        InodeId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Retrieves a node record.
    pub fn get(&self, id: InodeId) -> Result<NodeRecord, MetaError> {
        match self.kv.get(&node_key(id))? {
            Some(value) => {
                bincode::deserialize(&value).map_err(|e| MetaError::KvError(e.to_string()))
            }
            None => Err(MetaError::InodeNotFound(id)),
        }
    }

    /// Checks if a node exists.
    pub fn exists(&self, id: InodeId) -> Result<bool, MetaError> {
        self.kv.contains_key(&node_key(id))
    }

    /// Batch operation storing `record`.
    pub fn put_op(&self, record: &NodeRecord) -> Result<BatchOp, MetaError> {
        let value = bincode::serialize(record).map_err(|e| MetaError::KvError(e.to_string()))?;
        Ok(BatchOp::Put {
            key: node_key(record.id),
            value,
        })
    }

    /// Batch operation removing a node record.
    pub fn delete_op(&self, id: InodeId) -> BatchOp {
        BatchOp::Delete { key: node_key(id) }
    }
}
