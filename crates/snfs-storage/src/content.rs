//! Streaming file content on top of a [`BlobStore`].
//!
//! A file's content is a [`ContentManifest`]: the ordered chunk list plus
//! the total size. The manifest owns one store reference per chunk entry.
//! [`ContentWriter`] buffers at most one chunk at a time and
//! [`ContentReader`] fetches one chunk at a time, so arbitrarily large
//! files never have to be resident.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;

use crate::blob::BlobStore;
use crate::chunk::{ChunkRef, MAX_CHUNK_SIZE};
use crate::error::{StorageError, StorageResult};

/// Ordered chunk list describing one file's content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    /// Chunks in file order.
    pub chunks: Vec<ChunkRef>,
    /// Total content size in bytes.
    pub size: u64,
}

impl ContentManifest {
    /// A manifest for empty content.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds one reference for every chunk entry. On failure the references
    /// taken so far are dropped again.
    pub fn retain_all(&self, store: &dyn BlobStore) -> StorageResult<()> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if let Err(e) = store.retain(&chunk.id) {
                for taken in &self.chunks[..i] {
                    if let Err(e) = store.release(&taken.id) {
                        tracing::warn!(
                            chunk = %taken.id,
                            error = %e,
                            "failed to roll back chunk reference"
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drops one reference for every chunk entry. Every entry is released
    /// even if an earlier one fails; the first error is returned.
    pub fn release_all(&self, store: &dyn BlobStore) -> StorageResult<()> {
        let mut first_err = None;
        for chunk in &self.chunks {
            if let Err(e) = store.release(&chunk.id) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reads the whole content into memory.
    pub fn read_all(&self, store: &dyn BlobStore) -> StorageResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(&store.get(&chunk.id)?);
        }
        Ok(out)
    }
}

/// Chunks a byte stream into the store.
///
/// Dropping an unfinished writer releases every chunk it stored, so an
/// aborted or failed transfer leaves nothing behind.
pub struct ContentWriter {
    store: Arc<dyn BlobStore>,
    chunk_size: usize,
    buf: BytesMut,
    chunks: Vec<ChunkRef>,
    len: u64,
    finished: bool,
}

impl ContentWriter {
    /// Creates a writer that cuts chunks of `chunk_size` bytes.
    pub fn new(store: Arc<dyn BlobStore>, chunk_size: usize) -> StorageResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(StorageError::InvalidChunkSize {
                requested: chunk_size,
            });
        }
        Ok(Self {
            store,
            chunk_size,
            buf: BytesMut::with_capacity(chunk_size),
            chunks: Vec::new(),
            len: 0,
            finished: false,
        })
    }

    /// Appends data, storing every chunk that fills up.
    pub fn write(&mut self, mut data: &[u8]) -> StorageResult<()> {
        while !data.is_empty() {
            let take = (self.chunk_size - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            self.len += take as u64;
            if self.buf.len() == self.chunk_size {
                self.flush_chunk()?;
            }
        }
        Ok(())
    }

    /// Bytes accepted so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores the trailing partial chunk and hands over the manifest, which
    /// now owns the chunk references.
    pub fn finish(mut self) -> StorageResult<ContentManifest> {
        if !self.buf.is_empty() {
            self.flush_chunk()?;
        }
        self.finished = true;
        Ok(ContentManifest {
            chunks: std::mem::take(&mut self.chunks),
            size: self.len,
        })
    }

    fn flush_chunk(&mut self) -> StorageResult<()> {
        let data = self.buf.split().freeze();
        let len = data.len() as u32;
        let id = self.store.put(data)?;
        self.chunks.push(ChunkRef { id, len });
        Ok(())
    }
}

impl Drop for ContentWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for chunk in &self.chunks {
            if let Err(e) = self.store.release(&chunk.id) {
                tracing::warn!(chunk = %chunk.id, error = %e, "failed to release aborted chunk");
            }
        }
    }
}

/// Streams a manifest's content one chunk at a time.
///
/// The reader takes its own reference on every chunk when opened, so the
/// content stays readable even if the file is overwritten or unlinked
/// while the read is in flight.
pub struct ContentReader {
    store: Arc<dyn BlobStore>,
    manifest: ContentManifest,
    next_chunk: usize,
    current: Bytes,
}

impl ContentReader {
    /// Opens a reader over `manifest`.
    pub fn open(store: Arc<dyn BlobStore>, manifest: ContentManifest) -> StorageResult<Self> {
        manifest.retain_all(store.as_ref())?;
        Ok(Self {
            store,
            manifest,
            next_chunk: 0,
            current: Bytes::new(),
        })
    }

    /// Total size of the content being read.
    pub fn size(&self) -> u64 {
        self.manifest.size
    }
}

impl Read for ContentReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.current.is_empty() {
            let Some(chunk) = self.manifest.chunks.get(self.next_chunk) else {
                return Ok(0);
            };
            self.current = self
                .store
                .get(&chunk.id)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            self.next_chunk += 1;
        }
        let n = out.len().min(self.current.len());
        out[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

impl Drop for ContentReader {
    fn drop(&mut self) {
        if let Err(e) = self.manifest.release_all(self.store.as_ref()) {
            tracing::warn!(error = %e, "failed to release reader chunk references");
        }
    }
}
