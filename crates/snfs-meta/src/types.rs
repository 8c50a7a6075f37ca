use serde::{Deserialize, Serialize};
use std::fmt;

use snfs_storage::{CancelReason, StorageError};

/// Internal identifier of a node inside one filesystem's tree.
///
/// Never exposed to callers; the stable external identity of a file is its [`Ino`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(u64);

impl InodeId {
    /// The root directory node (always 1)
    pub const ROOT_INODE: InodeId = InodeId(1);

    /// Creates a new InodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        InodeId(id)
    }

    /// Returns the raw u64 value of this inode ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable file identity, independent of path (UUID v4 string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ino(String);

impl Ino {
    /// Allocates a fresh, never reused identity.
    pub fn generate() -> Self {
        Ino(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque filesystem identifier (UUID v4 string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsNo(String);

impl FsNo {
    /// Allocates a fresh filesystem number.
    pub fn generate() -> Self {
        FsNo(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FsNo {
    fn from(s: &str) -> Self {
        FsNo(s.to_string())
    }
}

impl From<String> for FsNo {
    fn from(s: String) -> Self {
        FsNo(s)
    }
}

impl fmt::Display for FsNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current wall-clock time. A clock set before the epoch reads as the epoch.
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Kind of a namespace node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Regular file with content.
    #[serde(rename = "file")]
    File,
    /// Directory; structural only.
    #[serde(rename = "dir")]
    Directory,
}

impl NodeKind {
    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

/// Per-filesystem limits. A value of 0 means the dimension is unbounded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    /// Maximum number of files.
    pub max_files: u64,
    /// Maximum total bytes of file content.
    pub max_storage: u64,
    /// Maximum number of path segments.
    pub max_depth: u64,
    /// Maximum byte length of a normalized path.
    pub max_path: u64,
}

impl FsLimits {
    /// Limits with every dimension unbounded.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Returns the limit for a dimension, `None` when unbounded.
    pub fn limit(&self, dimension: QuotaDimension) -> Option<u64> {
        let value = match dimension {
            QuotaDimension::Files => self.max_files,
            QuotaDimension::Storage => self.max_storage,
            QuotaDimension::Depth => self.max_depth,
            QuotaDimension::PathLength => self.max_path,
        };
        (value != 0).then_some(value)
    }
}

/// Current consumption of a filesystem.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsUsage {
    /// Number of file nodes.
    pub no_files: u64,
    /// Sum of file sizes in bytes.
    pub bytes_used: u64,
}

/// The quota dimension that rejected an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaDimension {
    /// `max_files`
    Files,
    /// `max_storage`
    Storage,
    /// `max_depth`
    Depth,
    /// `max_path`
    PathLength,
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaDimension::Files => write!(f, "max_files"),
            QuotaDimension::Storage => write!(f, "max_storage"),
            QuotaDimension::Depth => write!(f, "max_depth"),
            QuotaDimension::PathLength => write!(f, "max_path"),
        }
    }
}

/// File-only metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Stable identity.
    pub ino: Ino,
    /// Creation time of this identity.
    pub ctime: Timestamp,
    /// Last content change.
    pub mtime: Timestamp,
    /// Content size in bytes.
    pub size: u64,
}

/// Result of `stat` and one entry of `readdir`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStat {
    /// Last path segment (empty for the root).
    pub name: String,
    /// File or directory.
    pub kind: NodeKind,
    /// Present for files only.
    #[serde(flatten)]
    pub file: Option<FileMeta>,
    /// Whether the layer that served this node accepts writes.
    pub writeable: bool,
}

impl NodeStat {
    /// Returns the file's ino, if this is a file.
    pub fn ino(&self) -> Option<&Ino> {
        self.file.as_ref().map(|f| &f.ino)
    }

    /// Returns the file's size, if this is a file.
    pub fn size(&self) -> Option<u64> {
        self.file.as_ref().map(|f| f.size)
    }
}

/// Options for `writefile`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Preserve the existing file's ino instead of allocating a new one.
    pub truncate: bool,
}

/// Result type alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Error types for namespace and quota operations
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// No node at the given path.
    #[error("no such file or directory: {path}")]
    NotFound {
        /// Path that failed to resolve
        path: String,
    },

    /// The destination path is already occupied.
    #[error("already exists: {path}")]
    AlreadyExists {
        /// Occupied path
        path: String,
    },

    /// A directory was required but a file was found.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// Offending path
        path: String,
    },

    /// A file was required but a directory was found.
    #[error("is a directory: {path}")]
    IsADirectory {
        /// Offending path
        path: String,
    },

    /// Attempted to remove a directory that still has entries.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// Offending path
        path: String,
    },

    /// The path is malformed or names an impossible target.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// A filesystem limit would be exceeded.
    #[error("quota exceeded on {dimension}: limit {limit}, requested {requested}")]
    QuotaExceeded {
        /// Which limit
        dimension: QuotaDimension,
        /// Configured limit
        limit: u64,
        /// Value the operation would have reached
        requested: u64,
    },

    /// The node is served by a read-only layer.
    #[error("read-only: {path}")]
    ReadOnly {
        /// Offending path
        path: String,
    },

    /// A streamed operation was cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(CancelReason),

    /// A directory entry points at a node record that does not exist.
    #[error("inode {0} not found")]
    InodeNotFound(InodeId),

    /// An error occurred in the KV store layer.
    #[error("kv store error: {0}")]
    KvError(String),

    /// An error occurred in the content store.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The content source failed.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
