//! Namespace engine: the directory tree of one filesystem.
//!
//! NamespaceEngine combines the node store, directory store, quota tracker
//! and content store into a path-based API. Mutations are serialized by a
//! per-filesystem writer lock and applied as one KV batch each; reads share
//! the lock. Streamed writes store their content outside the lock and only
//! take it to commit.

use parking_lot::{Mutex, RwLock};
use std::io::{ErrorKind, Read};
use std::sync::Arc;

use snfs_storage::{
    BlobStore, CancelToken, ContentManifest, ContentReader, ContentWriter, StorageError,
};

use crate::directory::{DirEntry, DirectoryStore};
use crate::kvstore::{KvStore, MemoryKvStore};
use crate::node::{NodeRecord, NodeStore};
use crate::pathres::NsPath;
use crate::quota::{QuotaTracker, Reservation};
use crate::types::*;

#[derive(Clone, Copy, Debug)]
struct Located {
    id: InodeId,
    kind: NodeKind,
}

/// Outcome of walking a path from the root.
enum Walk {
    Found(Located),
    Missing,
    /// A non-final segment names a file.
    BlockedByFile,
}

/// The namespace of one filesystem.
pub struct NamespaceEngine {
    kv: Arc<dyn KvStore>,
    nodes: NodeStore,
    dirs: DirectoryStore,
    blobs: Arc<dyn BlobStore>,
    quota: QuotaTracker,
    chunk_size: usize,
    tree: RwLock<()>,
    clock: Mutex<Timestamp>,
}

impl NamespaceEngine {
    /// Creates an empty filesystem backed by an in-memory KV store.
    pub fn new(blobs: Arc<dyn BlobStore>, limits: FsLimits, chunk_size: usize) -> MetaResult<Self> {
        Self::open(Arc::new(MemoryKvStore::new()), blobs, limits, chunk_size)
    }

    /// Opens the filesystem stored in `kv`, creating the root if needed.
    /// Usage is recomputed from the tree.
    pub fn open(
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
        limits: FsLimits,
        chunk_size: usize,
    ) -> MetaResult<Self> {
        if chunk_size == 0 || chunk_size > u32::MAX as usize {
            return Err(StorageError::InvalidChunkSize {
                requested: chunk_size,
            }
            .into());
        }
        let nodes = NodeStore::open(kv.clone())?;
        let dirs = DirectoryStore::new(kv.clone());
        if !nodes.exists(InodeId::ROOT_INODE)? {
            let root = NodeRecord::new_directory(InodeId::ROOT_INODE, Timestamp::now());
            kv.write_batch(vec![nodes.put_op(&root)?])?;
        }

        let mut engine = Self {
            kv,
            nodes,
            dirs,
            blobs,
            quota: QuotaTracker::new(limits),
            chunk_size,
            tree: RwLock::new(()),
            clock: Mutex::new(Timestamp::default()),
        };
        let (usage, latest) = engine.scan_tree()?;
        engine.quota = QuotaTracker::with_usage(limits, usage);
        engine.clock = Mutex::new(latest);
        tracing::debug!(
            files = usage.no_files,
            bytes = usage.bytes_used,
            "opened namespace"
        );
        Ok(engine)
    }

    /// Current limits.
    pub fn limits(&self) -> FsLimits {
        self.quota.limits()
    }

    /// Replaces the limits. Existing content above a lowered limit is kept.
    pub fn set_limits(&self, limits: FsLimits) {
        let _tree = self.tree.write();
        self.quota.set_limits(limits);
    }

    /// Committed usage.
    pub fn usage(&self) -> FsUsage {
        self.quota.usage()
    }

    /// Recomputes usage by walking the tree.
    pub fn audit_usage(&self) -> MetaResult<FsUsage> {
        let _tree = self.tree.read();
        Ok(self.scan_tree()?.0)
    }

    /// Metadata of the node at `path`.
    pub fn stat(&self, path: &str) -> MetaResult<NodeStat> {
        self.stat_at(&NsPath::parse(path)?)
    }

    /// Children of the directory at `path`, sorted by name.
    pub fn readdir(&self, path: &str) -> MetaResult<Vec<NodeStat>> {
        self.readdir_at(&NsPath::parse(path)?)
    }

    /// Whole content of the file at `path`.
    pub fn readfile(&self, path: &str) -> MetaResult<Vec<u8>> {
        self.readfile_at(&NsPath::parse(path)?)
    }

    /// Streaming reader over the file at `path`.
    pub fn open_read(&self, path: &str) -> MetaResult<ContentReader> {
        self.open_read_at(&NsPath::parse(path)?)
    }

    /// Writes `data` to the file at `path`. Returns the file's ino.
    pub fn writefile(&self, path: &str, data: &[u8], opts: WriteOptions) -> MetaResult<Ino> {
        self.writefile_at(&NsPath::parse(path)?, data, opts)
    }

    /// Writes the content of `source` to the file at `path`, one chunk at a time.
    pub fn writefile_stream<R: Read + ?Sized>(
        &self,
        path: &str,
        source: &mut R,
        opts: WriteOptions,
        cancel: &CancelToken,
    ) -> MetaResult<Ino> {
        self.writefile_stream_at(&NsPath::parse(path)?, source, opts, cancel)
    }

    /// Removes the file at `path`.
    pub fn unlink(&self, path: &str) -> MetaResult<()> {
        self.unlink_at(&NsPath::parse(path)?)
    }

    /// Creates an empty directory at `path`.
    pub fn mkdir(&self, path: &str) -> MetaResult<()> {
        self.mkdir_at(&NsPath::parse(path)?)
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir(&self, path: &str) -> MetaResult<()> {
        self.rmdir_at(&NsPath::parse(path)?)
    }

    /// Moves a file or directory from `src` to `dst`.
    pub fn rename(&self, src: &str, dst: &str) -> MetaResult<()> {
        self.rename_at(&NsPath::parse(src)?, &NsPath::parse(dst)?)
    }

    /// Checks `path` against the depth and path-length limits.
    pub(crate) fn admit_path(&self, path: &NsPath) -> MetaResult<()> {
        self.quota.admit_path(path)
    }

    /// Metadata of the node at `path`, or `None` if nothing is there
    /// (including when an ancestor is a file).
    pub fn lookup(&self, path: &NsPath) -> MetaResult<Option<NodeStat>> {
        let _tree = self.tree.read();
        match self.walk(path)? {
            Walk::Found(located) => Ok(Some(self.stat_of(path, located)?)),
            Walk::Missing | Walk::BlockedByFile => Ok(None),
        }
    }

    pub(crate) fn stat_at(&self, path: &NsPath) -> MetaResult<NodeStat> {
        let _tree = self.tree.read();
        let located = self.resolve(path)?;
        self.stat_of(path, located)
    }

    pub(crate) fn readdir_at(&self, path: &NsPath) -> MetaResult<Vec<NodeStat>> {
        let _tree = self.tree.read();
        let dir = self.resolve_dir(path)?;
        self.dirs
            .list_entries(dir)?
            .into_iter()
            .map(|entry| Ok(self.nodes.get(entry.id)?.to_stat(&entry.name, true)))
            .collect()
    }

    pub(crate) fn readfile_at(&self, path: &NsPath) -> MetaResult<Vec<u8>> {
        let _tree = self.tree.read();
        let record = self.file_record(path)?;
        Ok(record.content.read_all(self.blobs.as_ref())?)
    }

    pub(crate) fn open_read_at(&self, path: &NsPath) -> MetaResult<ContentReader> {
        let _tree = self.tree.read();
        let record = self.file_record(path)?;
        Ok(ContentReader::open(self.blobs.clone(), record.content)?)
    }

    pub(crate) fn writefile_at(
        &self,
        path: &NsPath,
        data: &[u8],
        opts: WriteOptions,
    ) -> MetaResult<Ino> {
        let mut source = data;
        self.write_content(
            path,
            &mut source,
            data.len() as u64,
            opts,
            &CancelToken::never(),
        )
    }

    pub(crate) fn writefile_stream_at<R: Read + ?Sized>(
        &self,
        path: &NsPath,
        source: &mut R,
        opts: WriteOptions,
        cancel: &CancelToken,
    ) -> MetaResult<Ino> {
        self.write_content(path, source, 0, opts, cancel)
    }

    /// Streams `source` into the store, then commits it at `path`.
    /// `expected_len` is reserved up front when the size is known.
    fn write_content<R: Read + ?Sized>(
        &self,
        path: &NsPath,
        source: &mut R,
        expected_len: u64,
        opts: WriteOptions,
        cancel: &CancelToken,
    ) -> MetaResult<Ino> {
        let Some(name) = path.file_name() else {
            return Err(MetaError::IsADirectory {
                path: path.to_string(),
            });
        };
        self.quota.admit_path(path)?;

        // The snapshot only sizes the reservation; commit re-reads the target.
        let existing = {
            let _tree = self.tree.read();
            let (parent, _) = self.resolve_parent(path)?;
            self.existing_file(parent, name, path)?
        };
        let (files, credit) = match &existing {
            Some(record) => (0, record.size()),
            None => (1, 0),
        };
        let mut reservation = self.quota.reserve(files, 0)?;
        reservation.grow_bytes_to(expected_len.saturating_sub(credit))?;

        let mut writer = ContentWriter::new(self.blobs.clone(), self.chunk_size)?;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            check_cancel(cancel)?;
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            reservation.grow_bytes_to((writer.len() + n as u64).saturating_sub(credit))?;
            writer.write(&buf[..n])?;
        }
        check_cancel(cancel)?;
        let manifest = writer.finish()?;

        match self.commit_write(path, name, &manifest, opts, reservation) {
            Ok(ino) => Ok(ino),
            Err(e) => {
                self.release_content(&manifest);
                Err(e)
            }
        }
    }

    fn commit_write(
        &self,
        path: &NsPath,
        name: &str,
        manifest: &ContentManifest,
        opts: WriteOptions,
        reservation: Reservation<'_>,
    ) -> MetaResult<Ino> {
        let _tree = self.tree.write();
        let (parent, _) = self.resolve_parent(path)?;
        let old = self.existing_file(parent, name, path)?;
        let now = self.stamp();

        let mut ops = Vec::with_capacity(3);
        let record = match &old {
            Some(old) if opts.truncate => NodeRecord {
                mtime: now,
                content: manifest.clone(),
                ..old.clone()
            },
            Some(old) => {
                ops.push(self.nodes.delete_op(old.id));
                NodeRecord::new_file(self.nodes.allocate_id(), manifest.clone(), now)
            }
            None => NodeRecord::new_file(self.nodes.allocate_id(), manifest.clone(), now),
        };
        let ino = record
            .ino
            .clone()
            .ok_or_else(|| MetaError::KvError(format!("file node {} has no ino", record.id)))?;
        ops.push(self.nodes.put_op(&record)?);
        ops.push(self.dirs.put_op(
            parent,
            &DirEntry {
                name: name.to_string(),
                id: record.id,
                kind: NodeKind::File,
            },
        )?);

        let files_delta = if old.is_some() { 0 } else { 1 };
        let bytes_delta = manifest.size as i64 - old.as_ref().map_or(0, |r| r.size() as i64);
        reservation.commit_with(files_delta, bytes_delta, || self.kv.write_batch(ops))?;

        if let Some(old) = &old {
            self.release_content(&old.content);
        }
        tracing::debug!(%path, %ino, size = manifest.size, truncate = opts.truncate, "wrote file");
        Ok(ino)
    }

    pub(crate) fn unlink_at(&self, path: &NsPath) -> MetaResult<()> {
        if path.is_root() {
            return Err(MetaError::IsADirectory {
                path: path.to_string(),
            });
        }
        let _tree = self.tree.write();
        let record = self.file_record(path)?;
        let (parent, name) = self.resolve_parent(path)?;
        let ops = vec![self.dirs.delete_op(parent, name), self.nodes.delete_op(record.id)];
        self.quota
            .apply_with(-1, -(record.size() as i64), || self.kv.write_batch(ops))?;
        self.release_content(&record.content);
        tracing::debug!(%path, size = record.size(), "unlinked file");
        Ok(())
    }

    pub(crate) fn mkdir_at(&self, path: &NsPath) -> MetaResult<()> {
        if self.create_dir(path, false)? {
            tracing::debug!(%path, "created directory");
        }
        Ok(())
    }

    /// Creates the directory at `path` unless one is already there.
    /// Returns whether the directory was created.
    pub(crate) fn ensure_dir_at(&self, path: &NsPath) -> MetaResult<bool> {
        let created = self.create_dir(path, true)?;
        if created {
            tracing::debug!(%path, "copied up directory");
        }
        Ok(created)
    }

    /// Returns whether a directory was created.
    fn create_dir(&self, path: &NsPath, exist_ok: bool) -> MetaResult<bool> {
        let Some(name) = path.file_name() else {
            return if exist_ok {
                Ok(false)
            } else {
                Err(MetaError::AlreadyExists {
                    path: path.to_string(),
                })
            };
        };
        self.quota.admit_path(path)?;
        let _tree = self.tree.write();
        let (parent, _) = self.resolve_parent(path)?;
        match self.dirs.lookup(parent, name)? {
            Some(entry) if exist_ok && entry.kind.is_dir() => return Ok(false),
            Some(_) if exist_ok => {
                return Err(MetaError::NotADirectory {
                    path: path.to_string(),
                })
            }
            Some(_) => {
                return Err(MetaError::AlreadyExists {
                    path: path.to_string(),
                })
            }
            None => {}
        }
        let record = NodeRecord::new_directory(self.nodes.allocate_id(), self.stamp());
        let entry = DirEntry {
            name: name.to_string(),
            id: record.id,
            kind: NodeKind::Directory,
        };
        self.kv
            .write_batch(vec![self.nodes.put_op(&record)?, self.dirs.put_op(parent, &entry)?])?;
        Ok(true)
    }

    pub(crate) fn rmdir_at(&self, path: &NsPath) -> MetaResult<()> {
        if path.is_root() {
            return Err(MetaError::InvalidPath {
                path: path.to_string(),
                reason: "cannot remove the root directory".to_string(),
            });
        }
        let _tree = self.tree.write();
        let dir = self.resolve_dir(path)?;
        if !self.dirs.is_empty(dir)? {
            return Err(MetaError::DirectoryNotEmpty {
                path: path.to_string(),
            });
        }
        let (parent, name) = self.resolve_parent(path)?;
        self.kv
            .write_batch(vec![self.dirs.delete_op(parent, name), self.nodes.delete_op(dir)])?;
        tracing::debug!(%path, "removed directory");
        Ok(())
    }

    pub(crate) fn rename_at(&self, src: &NsPath, dst: &NsPath) -> MetaResult<()> {
        if src.is_root() {
            return Err(MetaError::InvalidPath {
                path: src.to_string(),
                reason: "cannot move the root directory".to_string(),
            });
        }
        let _tree = self.tree.write();
        let located = self.resolve(src)?;
        if src == dst {
            return Ok(());
        }
        if dst.starts_with(src) {
            return Err(MetaError::InvalidPath {
                path: dst.to_string(),
                reason: format!("cannot move {} beneath itself", src),
            });
        }
        let Some(dst_name) = dst.file_name() else {
            return Err(MetaError::AlreadyExists {
                path: dst.to_string(),
            });
        };
        let (dst_parent, _) = self.resolve_parent(dst)?;
        if self.dirs.lookup(dst_parent, dst_name)?.is_some() {
            return Err(MetaError::AlreadyExists {
                path: dst.to_string(),
            });
        }

        let (extra_depth, extra_bytes) = if located.kind.is_dir() {
            self.subtree_extent(located.id)?
        } else {
            (0, 0)
        };
        self.quota
            .admit_extent(dst.depth() + extra_depth, dst.byte_len() + extra_bytes)?;

        let (src_parent, src_name) = self.resolve_parent(src)?;
        let entry = DirEntry {
            name: dst_name.to_string(),
            id: located.id,
            kind: located.kind,
        };
        self.kv.write_batch(vec![
            self.dirs.delete_op(src_parent, src_name),
            self.dirs.put_op(dst_parent, &entry)?,
        ])?;
        tracing::debug!(%src, %dst, "moved");
        Ok(())
    }

    fn walk(&self, path: &NsPath) -> MetaResult<Walk> {
        let mut current = Located {
            id: InodeId::ROOT_INODE,
            kind: NodeKind::Directory,
        };
        for segment in path.segments() {
            if !current.kind.is_dir() {
                return Ok(Walk::BlockedByFile);
            }
            match self.dirs.lookup(current.id, segment)? {
                Some(entry) => {
                    current = Located {
                        id: entry.id,
                        kind: entry.kind,
                    }
                }
                None => return Ok(Walk::Missing),
            }
        }
        Ok(Walk::Found(current))
    }

    fn resolve(&self, path: &NsPath) -> MetaResult<Located> {
        match self.walk(path)? {
            Walk::Found(located) => Ok(located),
            Walk::Missing => Err(MetaError::NotFound {
                path: path.to_string(),
            }),
            Walk::BlockedByFile => Err(MetaError::NotADirectory {
                path: path.to_string(),
            }),
        }
    }

    fn resolve_dir(&self, path: &NsPath) -> MetaResult<InodeId> {
        let located = self.resolve(path)?;
        if !located.kind.is_dir() {
            return Err(MetaError::NotADirectory {
                path: path.to_string(),
            });
        }
        Ok(located.id)
    }

    /// Parent directory and final segment of a non-root path.
    fn resolve_parent<'p>(&self, path: &'p NsPath) -> MetaResult<(InodeId, &'p str)> {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(MetaError::InvalidPath {
                path: path.to_string(),
                reason: "the root has no parent".to_string(),
            });
        };
        Ok((self.resolve_dir(&parent)?, name))
    }

    fn file_record(&self, path: &NsPath) -> MetaResult<NodeRecord> {
        let located = self.resolve(path)?;
        if located.kind.is_dir() {
            return Err(MetaError::IsADirectory {
                path: path.to_string(),
            });
        }
        self.nodes.get(located.id)
    }

    fn existing_file(
        &self,
        parent: InodeId,
        name: &str,
        path: &NsPath,
    ) -> MetaResult<Option<NodeRecord>> {
        match self.dirs.lookup(parent, name)? {
            None => Ok(None),
            Some(entry) if entry.kind.is_dir() => Err(MetaError::IsADirectory {
                path: path.to_string(),
            }),
            Some(entry) => Ok(Some(self.nodes.get(entry.id)?)),
        }
    }

    fn stat_of(&self, path: &NsPath, located: Located) -> MetaResult<NodeStat> {
        Ok(self
            .nodes
            .get(located.id)?
            .to_stat(path.file_name().unwrap_or(""), true))
    }

    /// Deepest relative depth and longest relative path below a directory.
    fn subtree_extent(&self, dir: InodeId) -> MetaResult<(u64, u64)> {
        let mut deepest = 0;
        let mut longest = 0;
        let mut stack = vec![(dir, 0u64, 0u64)];
        while let Some((id, depth, len)) = stack.pop() {
            for entry in self.dirs.list_entries(id)? {
                let depth = depth + 1;
                let len = len + entry.name.len() as u64 + 1;
                deepest = deepest.max(depth);
                longest = longest.max(len);
                if entry.kind.is_dir() {
                    stack.push((entry.id, depth, len));
                }
            }
        }
        Ok((deepest, longest))
    }

    /// Usage and latest mtime of everything reachable from the root.
    fn scan_tree(&self) -> MetaResult<(FsUsage, Timestamp)> {
        let mut usage = FsUsage::default();
        let mut latest = Timestamp::default();
        let mut stack = vec![InodeId::ROOT_INODE];
        while let Some(id) = stack.pop() {
            let record = self.nodes.get(id)?;
            latest = latest.max(record.mtime);
            if record.is_dir() {
                stack.extend(self.dirs.list_entries(id)?.into_iter().map(|e| e.id));
            } else {
                usage.no_files += 1;
                usage.bytes_used += record.size();
            }
        }
        Ok((usage, latest))
    }

    /// Wall-clock time, strictly later than every previously issued stamp.
    fn stamp(&self) -> Timestamp {
        let mut last = self.clock.lock();
        let now = Timestamp::now();
        let next = if now > *last {
            now
        } else if last.nanos < 999_999_999 {
            Timestamp {
                secs: last.secs,
                nanos: last.nanos + 1,
            }
        } else {
            Timestamp {
                secs: last.secs + 1,
                nanos: 0,
            }
        };
        *last = next;
        next
    }

    fn release_content(&self, content: &ContentManifest) {
        if let Err(e) = content.release_all(self.blobs.as_ref()) {
            tracing::warn!(error = %e, "failed to release file content");
        }
    }
}

fn check_cancel(cancel: &CancelToken) -> MetaResult<()> {
    match cancel.cancelled_reason() {
        Some(reason) => Err(MetaError::Cancelled(reason)),
        None => Ok(()),
    }
}
