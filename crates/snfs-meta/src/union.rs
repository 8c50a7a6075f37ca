//! Union view: one base filesystem layered over read-only overlays.
//!
//! Lookups go base first, then overlays in order; the first layer holding a
//! path serves it. Directory listings merge every layer where the path is a
//! directory, first layer winning per name. Writes only ever touch the base
//! layer. Directories that exist only in an overlay are copied up into the
//! base on demand; files never are.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use snfs_storage::{CancelToken, ContentReader};

use crate::namespace::NamespaceEngine;
use crate::pathres::NsPath;
use crate::types::*;

/// Base layer plus ordered read-only overlays.
#[derive(Clone)]
pub struct UnionView {
    base: Arc<NamespaceEngine>,
    writeable: bool,
    overlays: Vec<Arc<NamespaceEngine>>,
}

/// The layer that serves a path.
struct Served {
    layer: usize,
    stat: NodeStat,
}

enum Resolution {
    Served(Served),
    Missing,
    /// An ancestor resolves to a file.
    Blocked,
}

impl UnionView {
    /// Composes `base` (writable or not) with `overlays`, highest priority first.
    pub fn new(
        base: Arc<NamespaceEngine>,
        writeable: bool,
        overlays: Vec<Arc<NamespaceEngine>>,
    ) -> Self {
        Self {
            base,
            writeable,
            overlays,
        }
    }

    /// Whether writes to the base layer are allowed.
    pub fn is_writeable(&self) -> bool {
        self.writeable
    }

    /// The base layer.
    pub fn base(&self) -> &Arc<NamespaceEngine> {
        &self.base
    }

    /// The overlay layers in priority order.
    pub fn overlays(&self) -> &[Arc<NamespaceEngine>] {
        &self.overlays
    }

    fn layers(&self) -> impl Iterator<Item = (usize, &NamespaceEngine, bool)> + '_ {
        std::iter::once((0, self.base.as_ref(), self.writeable)).chain(
            self.overlays
                .iter()
                .enumerate()
                .map(|(i, layer)| (i + 1, layer.as_ref(), false)),
        )
    }

    fn layer(&self, index: usize) -> &NamespaceEngine {
        match index {
            0 => self.base.as_ref(),
            i => self.overlays[i - 1].as_ref(),
        }
    }

    fn first_layer(&self, path: &NsPath) -> MetaResult<Option<Served>> {
        for (layer, engine, writeable) in self.layers() {
            if let Some(mut stat) = engine.lookup(path)? {
                stat.writeable = writeable;
                return Ok(Some(Served { layer, stat }));
            }
        }
        Ok(None)
    }

    /// Resolves `path` one segment at a time through the merged view, so a
    /// file in a higher layer hides directories of the same name below it.
    fn resolve(&self, path: &NsPath) -> MetaResult<Resolution> {
        for ancestor in path.ancestors() {
            match self.first_layer(&ancestor)? {
                None => return Ok(Resolution::Missing),
                Some(served) if !served.stat.kind.is_dir() => return Ok(Resolution::Blocked),
                Some(_) => {}
            }
        }
        Ok(match self.first_layer(path)? {
            Some(served) => Resolution::Served(served),
            None => Resolution::Missing,
        })
    }

    fn serve(&self, path: &NsPath) -> MetaResult<Option<Served>> {
        match self.resolve(path)? {
            Resolution::Served(served) => Ok(Some(served)),
            Resolution::Missing | Resolution::Blocked => Ok(None),
        }
    }

    fn serve_existing(&self, path: &NsPath) -> MetaResult<Served> {
        match self.resolve(path)? {
            Resolution::Served(served) => Ok(served),
            Resolution::Missing => Err(MetaError::NotFound {
                path: path.to_string(),
            }),
            Resolution::Blocked => Err(MetaError::NotADirectory {
                path: path.to_string(),
            }),
        }
    }

    fn require_writeable(&self, path: &NsPath) -> MetaResult<()> {
        if !self.writeable {
            return Err(MetaError::ReadOnly {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Makes every ancestor of `path` a directory in the base layer,
    /// copying up directories that only exist in an overlay. Returns the
    /// directories it created, shallowest first.
    fn prepare_parent(&self, path: &NsPath) -> MetaResult<Vec<NsPath>> {
        // Ancestors are shallower and shorter, so they pass whenever `path` does.
        self.base.admit_path(path)?;
        let mut copied = Vec::new();
        for ancestor in path.ancestors() {
            if let Err(e) = self.copy_up(&ancestor, &mut copied) {
                self.undo_copy_up(copied);
                return Err(e);
            }
        }
        Ok(copied)
    }

    fn copy_up(&self, ancestor: &NsPath, copied: &mut Vec<NsPath>) -> MetaResult<()> {
        let served = self.serve_existing(ancestor)?;
        if !served.stat.kind.is_dir() {
            return Err(MetaError::NotADirectory {
                path: ancestor.to_string(),
            });
        }
        if served.layer != 0 && self.base.ensure_dir_at(ancestor)? {
            copied.push(ancestor.clone());
        }
        Ok(())
    }

    /// Removes directories copied up for an operation that failed, deepest first.
    fn undo_copy_up(&self, copied: Vec<NsPath>) {
        for dir in copied.into_iter().rev() {
            if let Err(e) = self.base.rmdir_at(&dir) {
                tracing::warn!(path = %dir, error = %e, "failed to undo directory copy-up");
            }
        }
    }

    /// Runs `op` against the base layer once the parent of `path` exists there.
    fn with_parent<T>(
        &self,
        path: &NsPath,
        op: impl FnOnce() -> MetaResult<T>,
    ) -> MetaResult<T> {
        let copied = self.prepare_parent(path)?;
        op().map_err(|e| {
            self.undo_copy_up(copied);
            e
        })
    }

    /// Metadata from the first layer holding `path`.
    pub fn stat(&self, path: &str) -> MetaResult<NodeStat> {
        Ok(self.serve_existing(&NsPath::parse(path)?)?.stat)
    }

    /// Merged listing of the directory at `path`.
    pub fn readdir(&self, path: &str) -> MetaResult<Vec<NodeStat>> {
        let path = NsPath::parse(path)?;
        let first = self.serve_existing(&path)?;
        if !first.stat.kind.is_dir() {
            return Err(MetaError::NotADirectory {
                path: path.to_string(),
            });
        }

        let mut merged: BTreeMap<String, NodeStat> = BTreeMap::new();
        for (layer, engine, writeable) in self.layers().skip(first.layer) {
            let entries = match engine.readdir_at(&path) {
                Ok(entries) => entries,
                Err(e) if layer == first.layer => return Err(e),
                Err(MetaError::NotFound { .. }) | Err(MetaError::NotADirectory { .. }) => {
                    continue
                }
                Err(e) => return Err(e),
            };
            for mut entry in entries {
                entry.writeable = writeable;
                merged.entry(entry.name.clone()).or_insert(entry);
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Content of the file at `path` from the first layer holding it.
    pub fn readfile(&self, path: &str) -> MetaResult<Vec<u8>> {
        let path = NsPath::parse(path)?;
        let served = self.serve_file(&path)?;
        self.layer(served.layer).readfile_at(&path)
    }

    /// Streaming reader over the file at `path`.
    pub fn open_read(&self, path: &str) -> MetaResult<ContentReader> {
        let path = NsPath::parse(path)?;
        let served = self.serve_file(&path)?;
        self.layer(served.layer).open_read_at(&path)
    }

    fn serve_file(&self, path: &NsPath) -> MetaResult<Served> {
        let served = self.serve_existing(path)?;
        if served.stat.kind.is_dir() {
            return Err(MetaError::IsADirectory {
                path: path.to_string(),
            });
        }
        Ok(served)
    }

    /// Writes `data` to `path` in the base layer.
    pub fn writefile(&self, path: &str, data: &[u8], opts: WriteOptions) -> MetaResult<Ino> {
        let path = NsPath::parse(path)?;
        self.prepare_write(&path)?;
        self.with_parent(&path, || self.base.writefile_at(&path, data, opts))
    }

    /// Streams `source` into `path` in the base layer.
    pub fn writefile_stream<R: Read + ?Sized>(
        &self,
        path: &str,
        source: &mut R,
        opts: WriteOptions,
        cancel: &CancelToken,
    ) -> MetaResult<Ino> {
        let path = NsPath::parse(path)?;
        self.prepare_write(&path)?;
        self.with_parent(&path, || {
            self.base.writefile_stream_at(&path, source, opts, cancel)
        })
    }

    fn prepare_write(&self, path: &NsPath) -> MetaResult<()> {
        self.require_writeable(path)?;
        if let Some(served) = self.serve(path)? {
            if served.stat.kind.is_dir() {
                return Err(MetaError::IsADirectory {
                    path: path.to_string(),
                });
            }
        }
        if path.is_root() {
            return Err(MetaError::IsADirectory {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Removes a base-layer file.
    pub fn unlink(&self, path: &str) -> MetaResult<()> {
        let path = NsPath::parse(path)?;
        self.require_writeable(&path)?;
        let served = self.serve_existing(&path)?;
        if served.stat.kind.is_dir() {
            return Err(MetaError::IsADirectory {
                path: path.to_string(),
            });
        }
        if served.layer != 0 {
            return Err(MetaError::ReadOnly {
                path: path.to_string(),
            });
        }
        self.base.unlink_at(&path)
    }

    /// Creates a directory in the base layer.
    pub fn mkdir(&self, path: &str) -> MetaResult<()> {
        let path = NsPath::parse(path)?;
        self.require_writeable(&path)?;
        if path.is_root() || self.serve(&path)?.is_some() {
            return Err(MetaError::AlreadyExists {
                path: path.to_string(),
            });
        }
        self.with_parent(&path, || self.base.mkdir_at(&path))
    }

    /// Removes a base-layer directory that is empty in the merged view.
    pub fn rmdir(&self, path: &str) -> MetaResult<()> {
        let parsed = NsPath::parse(path)?;
        self.require_writeable(&parsed)?;
        if parsed.is_root() {
            return self.base.rmdir_at(&parsed);
        }
        let served = self.serve_existing(&parsed)?;
        if !served.stat.kind.is_dir() {
            return Err(MetaError::NotADirectory {
                path: parsed.to_string(),
            });
        }
        if served.layer != 0 {
            return Err(MetaError::ReadOnly {
                path: parsed.to_string(),
            });
        }
        if !self.readdir(path)?.is_empty() {
            return Err(MetaError::DirectoryNotEmpty {
                path: parsed.to_string(),
            });
        }
        self.base.rmdir_at(&parsed)
    }

    /// Moves a base-layer node. The destination must be free in every layer.
    pub fn rename(&self, src: &str, dst: &str) -> MetaResult<()> {
        let src = NsPath::parse(src)?;
        let dst = NsPath::parse(dst)?;
        self.require_writeable(&src)?;
        if src.is_root() {
            return self.base.rename_at(&src, &dst);
        }
        let served = self.serve_existing(&src)?;
        if served.layer != 0 {
            return Err(MetaError::ReadOnly {
                path: src.to_string(),
            });
        }
        if src == dst {
            return Ok(());
        }
        if dst.starts_with(&src) {
            return Err(MetaError::InvalidPath {
                path: dst.to_string(),
                reason: format!("cannot move {} beneath itself", src),
            });
        }
        if dst.is_root() || self.serve(&dst)?.is_some() {
            return Err(MetaError::AlreadyExists {
                path: dst.to_string(),
            });
        }
        self.with_parent(&dst, || self.base.rename_at(&src, &dst))
    }
}
