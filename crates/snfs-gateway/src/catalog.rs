//! Filesystem catalog: every filesystem the service hosts, by fsno.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use snfs_meta::{FsLimits, FsNo, FsUsage, NamespaceEngine};
use snfs_storage::BlobStore;

use crate::error::{SnfsError, SnfsResult};

/// Options for creating a filesystem. Absent limits are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsaddOptions {
    /// Unique name
    pub name: String,
    /// Initial limits
    #[serde(flatten)]
    pub limits: FsLimits,
}

/// Partial update of a filesystem; only supplied fields change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsmodOptions {
    /// New name
    pub name: Option<String>,
    /// New `max_files`
    pub max_files: Option<u64>,
    /// New `max_storage`
    pub max_storage: Option<u64>,
    /// New `max_depth`
    pub max_depth: Option<u64>,
    /// New `max_path`
    pub max_path: Option<u64>,
}

impl FsmodOptions {
    fn apply_to(&self, limits: FsLimits) -> FsLimits {
        FsLimits {
            max_files: self.max_files.unwrap_or(limits.max_files),
            max_storage: self.max_storage.unwrap_or(limits.max_storage),
            max_depth: self.max_depth.unwrap_or(limits.max_depth),
            max_path: self.max_path.unwrap_or(limits.max_path),
        }
    }
}

/// Public description of a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsInfo {
    /// Name
    pub name: String,
    /// Identifier
    pub fsno: FsNo,
    /// Limits
    pub limits: FsLimits,
}

/// [`FsInfo`] plus current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsDetail {
    /// Name
    pub name: String,
    /// Identifier
    pub fsno: FsNo,
    /// Limits
    pub limits: FsLimits,
    /// Usage
    pub usage: FsUsage,
}

struct FsEntry {
    name: String,
    engine: Arc<NamespaceEngine>,
}

impl FsEntry {
    fn info(&self, fsno: &FsNo) -> FsInfo {
        FsInfo {
            name: self.name.clone(),
            fsno: fsno.clone(),
            limits: self.engine.limits(),
        }
    }
}

/// Registry of hosted filesystems. All of them share one content store.
pub struct FsCatalog {
    filesystems: DashMap<FsNo, FsEntry>,
    /// Serializes add/modify/remove so name checks and updates are atomic.
    admin: Mutex<()>,
    blobs: Arc<dyn BlobStore>,
    chunk_size: usize,
}

impl FsCatalog {
    /// Creates an empty catalog.
    pub fn new(blobs: Arc<dyn BlobStore>, chunk_size: usize) -> Self {
        Self {
            filesystems: DashMap::new(),
            admin: Mutex::new(()),
            blobs,
            chunk_size,
        }
    }

    fn name_taken(&self, name: &str, except: Option<&FsNo>) -> bool {
        self.filesystems
            .iter()
            .any(|e| e.value().name == name && Some(e.key()) != except)
    }

    /// Creates a filesystem with zero usage.
    pub fn add(&self, opts: FsaddOptions) -> SnfsResult<FsInfo> {
        let _admin = self.admin.lock();
        if self.name_taken(&opts.name, None) {
            return Err(SnfsError::DuplicateName { name: opts.name });
        }
        let engine = NamespaceEngine::new(self.blobs.clone(), opts.limits, self.chunk_size)?;
        let fsno = FsNo::generate();
        let entry = FsEntry {
            name: opts.name,
            engine: Arc::new(engine),
        };
        let info = entry.info(&fsno);
        self.filesystems.insert(fsno.clone(), entry);
        tracing::info!(%fsno, name = %info.name, "filesystem created");
        Ok(info)
    }

    /// Renames a filesystem and/or changes its limits.
    pub fn modify(&self, fsno: &FsNo, opts: &FsmodOptions) -> SnfsResult<FsInfo> {
        let _admin = self.admin.lock();
        if let Some(name) = &opts.name {
            if self.name_taken(name, Some(fsno)) {
                return Err(SnfsError::DuplicateName { name: name.clone() });
            }
        }
        let mut entry = self
            .filesystems
            .get_mut(fsno)
            .ok_or_else(|| SnfsError::not_found(format!("filesystem {}", fsno)))?;
        if let Some(name) = &opts.name {
            entry.name = name.clone();
        }
        let limits = opts.apply_to(entry.engine.limits());
        entry.engine.set_limits(limits);
        tracing::info!(%fsno, name = %entry.name, ?limits, "filesystem modified");
        Ok(entry.info(fsno))
    }

    /// Removes a filesystem. Reference checks are the caller's job.
    pub fn remove(&self, fsno: &FsNo) -> SnfsResult<()> {
        let _admin = self.admin.lock();
        let (_, entry) = self
            .filesystems
            .remove(fsno)
            .ok_or_else(|| SnfsError::not_found(format!("filesystem {}", fsno)))?;
        tracing::info!(%fsno, name = %entry.name, "filesystem deleted");
        Ok(())
    }

    /// True if `fsno` is hosted here.
    pub fn contains(&self, fsno: &FsNo) -> bool {
        self.filesystems.contains_key(fsno)
    }

    /// The namespace engine of `fsno`.
    pub fn engine(&self, fsno: &FsNo) -> SnfsResult<Arc<NamespaceEngine>> {
        self.filesystems
            .get(fsno)
            .map(|e| e.engine.clone())
            .ok_or_else(|| SnfsError::not_found(format!("filesystem {}", fsno)))
    }

    /// Name of `fsno`, if hosted.
    pub fn name_of(&self, fsno: &FsNo) -> Option<String> {
        self.filesystems.get(fsno).map(|e| e.name.clone())
    }

    /// Name, fsno and limits.
    pub fn info(&self, fsno: &FsNo) -> SnfsResult<FsInfo> {
        self.filesystems
            .get(fsno)
            .map(|e| e.info(fsno))
            .ok_or_else(|| SnfsError::not_found(format!("filesystem {}", fsno)))
    }

    /// Info plus usage.
    pub fn detail(&self, fsno: &FsNo) -> SnfsResult<FsDetail> {
        let entry = self
            .filesystems
            .get(fsno)
            .ok_or_else(|| SnfsError::not_found(format!("filesystem {}", fsno)))?;
        Ok(FsDetail {
            name: entry.name.clone(),
            fsno: fsno.clone(),
            limits: entry.engine.limits(),
            usage: entry.engine.usage(),
        })
    }

    /// Every filesystem, sorted by name.
    pub fn list(&self) -> Vec<FsInfo> {
        let mut all: Vec<FsInfo> = self
            .filesystems
            .iter()
            .map(|e| e.value().info(e.key()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use snfs_meta::WriteOptions;
    use snfs_storage::MemoryBlobStore;

    fn catalog() -> FsCatalog {
        FsCatalog::new(Arc::new(MemoryBlobStore::new()), 1024)
    }

    fn add(catalog: &FsCatalog, name: &str) -> FsInfo {
        catalog
            .add(FsaddOptions {
                name: name.to_string(),
                ..FsaddOptions::default()
            })
            .unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let c = catalog();
        let info = add(&c, "home");
        assert!(c.contains(&info.fsno));
        assert_eq!(c.info(&info.fsno).unwrap(), info);
        assert_eq!(info.limits, FsLimits::unbounded());
        assert_eq!(c.detail(&info.fsno).unwrap().usage, FsUsage::default());
    }

    #[test]
    fn test_duplicate_name_case_sensitive() {
        let c = catalog();
        add(&c, "home");
        let err = c
            .add(FsaddOptions {
                name: "home".to_string(),
                ..FsaddOptions::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);
        add(&c, "Home");
        assert_eq!(c.list().len(), 2);
    }

    #[test]
    fn test_modify_partial() {
        let c = catalog();
        let info = c
            .add(FsaddOptions {
                name: "data".to_string(),
                limits: FsLimits {
                    max_files: 10,
                    max_storage: 100,
                    ..FsLimits::unbounded()
                },
            })
            .unwrap();
        let updated = c
            .modify(
                &info.fsno,
                &FsmodOptions {
                    max_storage: Some(50),
                    ..FsmodOptions::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "data");
        assert_eq!(updated.limits.max_files, 10);
        assert_eq!(updated.limits.max_storage, 50);
        assert_eq!(c.engine(&info.fsno).unwrap().limits().max_storage, 50);
    }

    #[test]
    fn test_modify_rename_collision() {
        let c = catalog();
        let a = add(&c, "a");
        add(&c, "b");
        let rename = |name: &str| FsmodOptions {
            name: Some(name.to_string()),
            ..FsmodOptions::default()
        };
        assert_eq!(
            c.modify(&a.fsno, &rename("b")).unwrap_err().kind(),
            ErrorKind::DuplicateName
        );
        // Renaming to its own name is fine.
        assert!(c.modify(&a.fsno, &rename("a")).is_ok());
        assert_eq!(c.modify(&a.fsno, &rename("c")).unwrap().name, "c");
        assert_eq!(c.name_of(&a.fsno).as_deref(), Some("c"));
    }

    #[test]
    fn test_unknown_fsno() {
        let c = catalog();
        let missing = FsNo::from("missing");
        assert_eq!(c.remove(&missing).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            c.modify(&missing, &FsmodOptions::default())
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert!(c.engine(&missing).is_err());
    }

    #[test]
    fn test_remove() {
        let c = catalog();
        let info = add(&c, "tmp");
        c.remove(&info.fsno).unwrap();
        assert!(!c.contains(&info.fsno));
        assert!(c.list().is_empty());
    }

    #[test]
    fn test_list_sorted_by_name() {
        let c = catalog();
        for name in ["zeta", "alpha", "mid"] {
            add(&c, name);
        }
        let names: Vec<String> = c.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_detail_reflects_usage() {
        let c = catalog();
        let info = add(&c, "u");
        c.engine(&info.fsno)
            .unwrap()
            .writefile("/f", b"12345", WriteOptions::default())
            .unwrap();
        let detail = c.detail(&info.fsno).unwrap();
        assert_eq!(detail.usage.no_files, 1);
        assert_eq!(detail.usage.bytes_used, 5);
    }

    #[test]
    fn test_fsadd_options_absent_limits_unbounded() {
        let opts: FsaddOptions = serde_json::from_str(r#"{"name": "x", "max_files": 3}"#).unwrap();
        assert_eq!(opts.limits.max_files, 3);
        assert_eq!(opts.limits.max_storage, 0);
    }
}
