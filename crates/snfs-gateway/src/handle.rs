//! Filesystem handles: namespace operations bound to a session.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;

use snfs_meta::{FsNo, Ino, NodeStat, UnionView, WriteOptions};
use snfs_storage::{CancelToken, ContentReader};

use crate::catalog::FsDetail;
use crate::error::SnfsResult;
use crate::service::Shared;
use crate::session::{current_time_secs, HandleRecord};

/// Returned by [`FileSystem::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemInfo {
    /// Bearer token
    pub fs_token: String,
    /// Base filesystem
    pub fsno: FsNo,
    /// Overlays, highest priority first
    pub union: Vec<FsNo>,
}

/// Returned by [`FileSystem::detail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemDetail {
    /// Bearer token
    pub fs_token: String,
    /// Base filesystem with usage
    pub fs: FsDetail,
    /// Overlays with usage
    pub union: Vec<FsDetail>,
}

/// An open handle. Every call re-validates the owning session, so a handle
/// stops working as soon as its session ends.
#[derive(Clone)]
pub struct FileSystem {
    shared: Arc<Shared>,
    record: HandleRecord,
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl FileSystem {
    pub(crate) fn new(shared: Arc<Shared>, record: HandleRecord) -> Self {
        Self { shared, record }
    }

    fn view(&self) -> SnfsResult<UnionView> {
        let sessions = &self.shared.sessions;
        sessions.touch(&self.record.session_token, current_time_secs())?;
        let record = sessions.handle(&self.record.fs_token, &self.record.session_token)?;
        Ok(record.view)
    }

    /// Token, base and overlays of this handle.
    pub fn info(&self) -> FileSystemInfo {
        FileSystemInfo {
            fs_token: self.record.fs_token.clone(),
            fsno: self.record.base.clone(),
            union: self.record.union.clone(),
        }
    }

    /// Whether the base filesystem accepts writes through this handle.
    pub fn is_writeable(&self) -> bool {
        self.record.writeable
    }

    /// Limits and usage of every layer.
    pub fn detail(&self) -> SnfsResult<FileSystemDetail> {
        self.view()?;
        let catalog = &self.shared.catalog;
        Ok(FileSystemDetail {
            fs_token: self.record.fs_token.clone(),
            fs: catalog.detail(&self.record.base)?,
            union: self
                .record
                .union
                .iter()
                .map(|f| catalog.detail(f))
                .collect::<SnfsResult<Vec<_>>>()?,
        })
    }

    /// Merged directory listing.
    pub fn readdir(&self, path: &str) -> SnfsResult<Vec<NodeStat>> {
        Ok(self.view()?.readdir(path)?)
    }

    /// Node metadata.
    pub fn stat(&self, path: &str) -> SnfsResult<NodeStat> {
        Ok(self.view()?.stat(path)?)
    }

    /// Writes a whole file and returns its ino.
    pub fn writefile(&self, path: &str, data: &[u8], opts: WriteOptions) -> SnfsResult<Ino> {
        Ok(self.view()?.writefile(path, data, opts)?)
    }

    /// Streams a file from `source` in bounded memory.
    pub fn writefile_stream<R: Read + ?Sized>(
        &self,
        path: &str,
        source: &mut R,
        opts: WriteOptions,
        cancel: &CancelToken,
    ) -> SnfsResult<Ino> {
        Ok(self.view()?.writefile_stream(path, source, opts, cancel)?)
    }

    /// Reads a whole file.
    pub fn readfile(&self, path: &str) -> SnfsResult<Vec<u8>> {
        Ok(self.view()?.readfile(path)?)
    }

    /// Opens a streaming reader; it stays valid if the file is later replaced.
    pub fn open_read(&self, path: &str) -> SnfsResult<ContentReader> {
        Ok(self.view()?.open_read(path)?)
    }

    /// Removes a file.
    pub fn unlink(&self, path: &str) -> SnfsResult<()> {
        Ok(self.view()?.unlink(path)?)
    }

    /// Creates a directory. The parent must exist.
    pub fn mkdir(&self, path: &str) -> SnfsResult<()> {
        Ok(self.view()?.mkdir(path)?)
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, path: &str) -> SnfsResult<()> {
        Ok(self.view()?.rmdir(path)?)
    }

    /// Moves a file or directory within this filesystem. This is the `move`
    /// operation; `move` is reserved in Rust.
    pub fn rename(&self, src: &str, dst: &str) -> SnfsResult<()> {
        Ok(self.view()?.rename(src, dst)?)
    }
}
