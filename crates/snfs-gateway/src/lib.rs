#![warn(missing_docs)]

//! SNFS gateway subsystem: sessions, user administration, filesystem catalog

pub mod catalog;
pub mod config;
pub mod credential;
pub mod error;
pub mod handle;
pub mod identity;
pub mod service;
pub mod session;
pub mod token;

pub use catalog::{FsCatalog, FsDetail, FsInfo, FsaddOptions, FsmodOptions};
pub use config::{BootstrapAdmin, SnfsConfig};
pub use credential::{Credential, CredentialHasher, Sha256Hasher};
pub use error::{ErrorKind, SnfsError, SnfsResult};
pub use handle::{FileSystem, FileSystemDetail, FileSystemInfo};
pub use identity::{FsAccess, IdentityStore, UserInfo, UserNo, UseraddOptions, UsermodOptions};
pub use service::{FsgetOptions, Session, SessionDetail, SessionInfo, Snfs};
pub use session::SessionManager;
pub use snfs_meta::{FsLimits, FsNo, FsUsage, Ino, NodeKind, NodeStat, WriteOptions};
