//! Error types for the SNFS service surface

use serde::{Deserialize, Serialize};
use thiserror::Error;

use snfs_meta::{FsNo, MetaError, QuotaDimension};
use snfs_storage::{CancelReason, StorageError};

/// Result alias for service operations.
pub type SnfsResult<T> = Result<T, SnfsError>;

/// Caller-facing error kinds, stable across transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown path, user or filesystem.
    NotFound,
    /// Destination already occupied.
    AlreadyExists,
    /// A directory was required.
    NotADirectory,
    /// A file was required.
    IsADirectory,
    /// Directory still has entries.
    DirectoryNotEmpty,
    /// Malformed path.
    InvalidPath,
    /// A filesystem limit would be exceeded.
    QuotaExceeded,
    /// Write through a read-only layer.
    ReadOnly,
    /// Streamed write cancelled.
    Cancelled,
    /// Login rejected.
    InvalidCredentials,
    /// Unknown or expired session token.
    InvalidSession,
    /// Unknown filesystem token.
    InvalidHandle,
    /// Caller lacks the privilege or grant.
    AccessDenied,
    /// Name collision.
    DuplicateName,
    /// Reference to a filesystem that does not exist.
    InvalidReference,
    /// Filesystem still referenced.
    InUse,
    /// Content source failure.
    Io,
    /// Backend failure.
    Internal,
}

/// Errors returned by [`crate::Snfs`], [`crate::Session`] and [`crate::FileSystem`].
#[derive(Error, Debug)]
pub enum SnfsError {
    /// Unknown path, user or filesystem
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },
    /// Destination already occupied
    #[error("already exists: {path}")]
    AlreadyExists {
        /// Occupied path
        path: String,
    },
    /// A directory was required
    #[error("not a directory: {path}")]
    NotADirectory {
        /// Offending path
        path: String,
    },
    /// A file was required
    #[error("is a directory: {path}")]
    IsADirectory {
        /// Offending path
        path: String,
    },
    /// Directory still has entries
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// Offending path
        path: String,
    },
    /// Malformed path
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// What is wrong with it
        reason: String,
    },
    /// A filesystem limit would be exceeded
    #[error("quota exceeded on {dimension}: limit {limit}, requested {requested}")]
    QuotaExceeded {
        /// Which limit
        dimension: QuotaDimension,
        /// Configured limit
        limit: u64,
        /// Value the operation would have reached
        requested: u64,
    },
    /// Write through a read-only layer
    #[error("read-only: {path}")]
    ReadOnly {
        /// Offending path
        path: String,
    },
    /// Streamed write cancelled
    #[error("cancelled: {0}")]
    Cancelled(CancelReason),
    /// Login rejected
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Unknown or expired session token
    #[error("invalid session")]
    InvalidSession,
    /// Unknown filesystem token
    #[error("invalid filesystem handle")]
    InvalidHandle,
    /// Caller lacks the privilege or grant
    #[error("access denied")]
    AccessDenied,
    /// Name collision
    #[error("duplicate name: {name}")]
    DuplicateName {
        /// Colliding name
        name: String,
    },
    /// Reference to a filesystem that does not exist
    #[error("invalid filesystem reference: {fsno}")]
    InvalidReference {
        /// Missing filesystem
        fsno: FsNo,
    },
    /// Filesystem still referenced by a handle or grant
    #[error("filesystem in use: {fsno}")]
    InUse {
        /// Referenced filesystem
        fsno: FsNo,
    },
    /// Content source failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Backend failure
    #[error("internal error: {reason}")]
    Internal {
        /// Backend error details
        reason: String,
    },
}

impl SnfsError {
    /// The caller-facing kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnfsError::NotFound { .. } => ErrorKind::NotFound,
            SnfsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            SnfsError::NotADirectory { .. } => ErrorKind::NotADirectory,
            SnfsError::IsADirectory { .. } => ErrorKind::IsADirectory,
            SnfsError::DirectoryNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            SnfsError::InvalidPath { .. } => ErrorKind::InvalidPath,
            SnfsError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            SnfsError::ReadOnly { .. } => ErrorKind::ReadOnly,
            SnfsError::Cancelled(_) => ErrorKind::Cancelled,
            SnfsError::InvalidCredentials => ErrorKind::InvalidCredentials,
            SnfsError::InvalidSession => ErrorKind::InvalidSession,
            SnfsError::InvalidHandle => ErrorKind::InvalidHandle,
            SnfsError::AccessDenied => ErrorKind::AccessDenied,
            SnfsError::DuplicateName { .. } => ErrorKind::DuplicateName,
            SnfsError::InvalidReference { .. } => ErrorKind::InvalidReference,
            SnfsError::InUse { .. } => ErrorKind::InUse,
            SnfsError::Io(_) => ErrorKind::Io,
            SnfsError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        SnfsError::NotFound { what: what.into() }
    }
}

impl From<MetaError> for SnfsError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::NotFound { path } => SnfsError::NotFound { what: path },
            MetaError::AlreadyExists { path } => SnfsError::AlreadyExists { path },
            MetaError::NotADirectory { path } => SnfsError::NotADirectory { path },
            MetaError::IsADirectory { path } => SnfsError::IsADirectory { path },
            MetaError::DirectoryNotEmpty { path } => SnfsError::DirectoryNotEmpty { path },
            MetaError::InvalidPath { path, reason } => SnfsError::InvalidPath { path, reason },
            MetaError::QuotaExceeded {
                dimension,
                limit,
                requested,
            } => SnfsError::QuotaExceeded {
                dimension,
                limit,
                requested,
            },
            MetaError::ReadOnly { path } => SnfsError::ReadOnly { path },
            MetaError::Cancelled(reason) => SnfsError::Cancelled(reason),
            MetaError::IoError(e) => SnfsError::Io(e),
            MetaError::Storage(e) => e.into(),
            other @ (MetaError::InodeNotFound(_) | MetaError::KvError(_)) => {
                tracing::error!(error = %other, "metadata backend failure");
                SnfsError::Internal {
                    reason: other.to_string(),
                }
            }
        }
    }
}

impl From<StorageError> for SnfsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::IoError(e) => SnfsError::Io(e),
            other => {
                tracing::error!(error = %other, "content store failure");
                SnfsError::Internal {
                    reason: other.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_errors_keep_their_kind() {
        let cases = vec![
            (
                MetaError::NotFound {
                    path: "/a".to_string(),
                },
                ErrorKind::NotFound,
            ),
            (
                MetaError::ReadOnly {
                    path: "/a".to_string(),
                },
                ErrorKind::ReadOnly,
            ),
            (
                MetaError::QuotaExceeded {
                    dimension: QuotaDimension::Files,
                    limit: 1,
                    requested: 2,
                },
                ErrorKind::QuotaExceeded,
            ),
            (
                MetaError::Cancelled(CancelReason::ServerShutdown),
                ErrorKind::Cancelled,
            ),
            (MetaError::KvError("boom".to_string()), ErrorKind::Internal),
        ];
        for (meta, kind) in cases {
            assert_eq!(SnfsError::from(meta).kind(), kind);
        }
    }

    #[test]
    fn test_storage_error_is_internal() {
        let err: SnfsError = StorageError::BackendError {
            reason: "disk gone".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_quota_dimension_in_message() {
        let err: SnfsError = MetaError::QuotaExceeded {
            dimension: QuotaDimension::Depth,
            limit: 4,
            requested: 5,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "quota exceeded on max_depth: limit 4, requested 5"
        );
    }

    #[test]
    fn test_error_kind_serializes_by_name() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::AccessDenied).unwrap(),
            "\"AccessDenied\""
        );
    }
}
