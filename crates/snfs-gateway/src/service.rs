//! Service entry point and per-session operations.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use snfs_meta::{FsNo, UnionView};
use snfs_storage::{BlobStore, MemoryBlobStore};

use crate::catalog::{FsCatalog, FsInfo, FsaddOptions, FsmodOptions};
use crate::config::SnfsConfig;
use crate::credential::Sha256Hasher;
use crate::error::{SnfsError, SnfsResult};
use crate::handle::FileSystem;
use crate::identity::{
    IdentityStore, UserInfo, UserNo, UserRecord, UseraddOptions, UsermodOptions,
};
use crate::session::{current_time_secs, SessionManager};

/// State shared by every session and handle of one service instance.
pub(crate) struct Shared {
    pub(crate) config: SnfsConfig,
    pub(crate) catalog: FsCatalog,
    pub(crate) identity: IdentityStore,
    pub(crate) sessions: SessionManager,
    /// Held by admin mutations and handle creation, so reference checks in
    /// `fsdel` cannot race a new grant or handle.
    registry: Mutex<()>,
}

/// A running SNFS instance.
#[derive(Clone)]
pub struct Snfs {
    shared: Arc<Shared>,
}

/// Returned by [`Session::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Bearer token
    pub session_token: String,
    /// Owning user
    pub userno: UserNo,
}

/// Returned by [`Session::detail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetail {
    /// Bearer token
    pub session_token: String,
    /// Owning user
    pub user: UserInfo,
}

/// Options for [`Session::fsget`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsgetOptions {
    /// Request write access to the base filesystem.
    pub writeable: bool,
    /// Read-only overlays, highest priority first.
    pub union: Vec<FsNo>,
}

impl std::fmt::Debug for Snfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snfs")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Snfs {
    /// Starts an instance with an in-memory content store.
    pub fn new(config: SnfsConfig) -> SnfsResult<Self> {
        Self::with_blob_store(config, Arc::new(MemoryBlobStore::new()))
    }

    /// Starts an instance over `blobs`, shared by every filesystem.
    pub fn with_blob_store(config: SnfsConfig, blobs: Arc<dyn BlobStore>) -> SnfsResult<Self> {
        config.validate().map_err(|e| SnfsError::Internal {
            reason: e.to_string(),
        })?;
        let shared = Shared {
            catalog: FsCatalog::new(blobs, config.chunk_size),
            identity: IdentityStore::new(Arc::new(Sha256Hasher::new(config.hash_iterations))),
            sessions: SessionManager::new(config.session_idle_timeout_secs),
            registry: Mutex::new(()),
            config,
        };

        if let Some(admin) = &shared.config.bootstrap_admin {
            if shared.identity.is_empty() {
                shared.identity.add(
                    UseraddOptions {
                        name: admin.name.clone(),
                        password: admin.password.clone(),
                        admin: true,
                        ..UseraddOptions::default()
                    },
                    &shared.catalog,
                )?;
                tracing::info!(name = %admin.name, "bootstrap admin created");
            }
        }

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// The configuration this instance runs with.
    pub fn config(&self) -> &SnfsConfig {
        &self.shared.config
    }

    /// Authenticates and opens a session.
    pub fn login(&self, name: &str, password: &str) -> SnfsResult<Session> {
        let user = match self.shared.identity.authenticate(name, password) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(name, "login rejected");
                return Err(e);
            }
        };
        let record = self
            .shared
            .sessions
            .create(user.userno.clone(), current_time_secs());
        tracing::info!(userno = %user.userno, name = %user.name, "session opened");
        Ok(Session {
            shared: self.shared.clone(),
            token: record.token,
            userno: user.userno,
        })
    }

    /// Re-attaches to a live session.
    pub fn resume(&self, session_token: &str) -> SnfsResult<Session> {
        let record = self
            .shared
            .sessions
            .touch(session_token, current_time_secs())?;
        Ok(Session {
            shared: self.shared.clone(),
            token: record.token,
            userno: record.userno,
        })
    }

    /// Drops sessions idle past the configured timeout.
    pub fn reap_idle_sessions(&self) -> usize {
        self.shared.sessions.reap_idle(current_time_secs())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.session_count()
    }
}

/// An authenticated session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    token: String,
    userno: UserNo,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("userno", &self.userno)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Validates the session and returns its user.
    fn user(&self) -> SnfsResult<UserRecord> {
        let record = self
            .shared
            .sessions
            .touch(&self.token, current_time_secs())?;
        self.shared
            .identity
            .get(&record.userno)
            .map_err(|_| SnfsError::InvalidSession)
    }

    fn require_admin(&self) -> SnfsResult<UserRecord> {
        let user = self.user()?;
        if !user.admin {
            tracing::warn!(userno = %user.userno, "admin operation denied");
            return Err(SnfsError::AccessDenied);
        }
        Ok(user)
    }

    /// Token and user of this session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_token: self.token.clone(),
            userno: self.userno.clone(),
        }
    }

    /// Token plus the user's current account view.
    pub fn detail(&self) -> SnfsResult<SessionDetail> {
        let user = self.user()?;
        Ok(SessionDetail {
            session_token: self.token.clone(),
            user: user.info(&self.shared.catalog),
        })
    }

    /// Ends the session and all of its handles.
    pub fn logout(&self) -> SnfsResult<()> {
        self.shared
            .sessions
            .touch(&self.token, current_time_secs())?;
        self.shared.sessions.remove(&self.token);
        tracing::info!(userno = %self.userno, "session closed");
        Ok(())
    }

    /// Creates a user. Admin only.
    pub fn useradd(&self, opts: UseraddOptions) -> SnfsResult<UserInfo> {
        self.require_admin()?;
        let _registry = self.shared.registry.lock();
        let record = self.shared.identity.add(opts, &self.shared.catalog)?;
        Ok(record.info(&self.shared.catalog))
    }

    /// Partially updates a user. Admin only.
    pub fn usermod(&self, userno: &UserNo, opts: UsermodOptions) -> SnfsResult<UserInfo> {
        self.require_admin()?;
        let _registry = self.shared.registry.lock();
        let record = self
            .shared
            .identity
            .modify(userno, opts, &self.shared.catalog)?;
        Ok(record.info(&self.shared.catalog))
    }

    /// Deletes a user and revokes its sessions. Admin only.
    pub fn userdel(&self, userno: &UserNo) -> SnfsResult<()> {
        self.require_admin()?;
        let _registry = self.shared.registry.lock();
        self.shared.identity.remove(userno)?;
        let revoked = self.shared.sessions.revoke_user(userno);
        tracing::info!(%userno, revoked, "user sessions revoked");
        Ok(())
    }

    /// Every user. Admin only.
    pub fn userlist(&self) -> SnfsResult<Vec<UserInfo>> {
        self.require_admin()?;
        Ok(self
            .shared
            .identity
            .list()
            .iter()
            .map(|u| u.info(&self.shared.catalog))
            .collect())
    }

    /// Writable handle on the caller's primary filesystem, with its union
    /// grants as overlays.
    pub fn fs(&self) -> SnfsResult<FileSystem> {
        let user = self.user()?;
        let base = user
            .fs
            .clone()
            .ok_or_else(|| SnfsError::not_found(format!("primary filesystem of {}", user.name)))?;
        let _registry = self.shared.registry.lock();
        self.open_handle(base, true, user.union)
    }

    /// Handle on `fsno` with the requested overlays.
    ///
    /// Non-admins need a grant on every fsno involved, and the primary grant
    /// for write access. Access is decided before existence.
    pub fn fsget(&self, fsno: &FsNo, opts: FsgetOptions) -> SnfsResult<FileSystem> {
        let user = self.user()?;
        if !user.admin {
            match user.grant(fsno) {
                Some(primary) if primary || !opts.writeable => {}
                _ => {
                    tracing::warn!(userno = %user.userno, %fsno, "fsget denied");
                    return Err(SnfsError::AccessDenied);
                }
            }
            let granted = self
                .shared
                .identity
                .grants_of(&user.userno)
                .map_err(|_| SnfsError::InvalidSession)?;
            if let Some(denied) = opts.union.iter().find(|f| !granted.contains(f)) {
                tracing::warn!(userno = %user.userno, fsno = %denied, "fsget overlay denied");
                return Err(SnfsError::AccessDenied);
            }
        }

        let mut union: Vec<FsNo> = Vec::with_capacity(opts.union.len());
        for overlay in opts.union {
            if &overlay != fsno && !union.contains(&overlay) {
                union.push(overlay);
            }
        }
        let _registry = self.shared.registry.lock();
        self.open_handle(fsno.clone(), opts.writeable, union)
    }

    /// Caller must hold the registry lock.
    fn open_handle(&self, base: FsNo, writeable: bool, union: Vec<FsNo>) -> SnfsResult<FileSystem> {
        let catalog = &self.shared.catalog;
        let overlays = union
            .iter()
            .map(|f| catalog.engine(f))
            .collect::<SnfsResult<Vec<_>>>()?;
        let view = UnionView::new(catalog.engine(&base)?, writeable, overlays);
        let record = self
            .shared
            .sessions
            .add_handle(&self.token, base, writeable, union, view)?;
        tracing::debug!(fsno = %record.base, writeable, overlays = record.union.len(), "handle opened");
        Ok(FileSystem::new(self.shared.clone(), record))
    }

    /// Re-attaches to a handle this session opened earlier.
    pub fn fsresume(&self, fs_token: &str) -> SnfsResult<FileSystem> {
        self.user()?;
        let record = self.shared.sessions.handle(fs_token, &self.token)?;
        Ok(FileSystem::new(self.shared.clone(), record))
    }

    /// Creates a filesystem. Admin only.
    pub fn fsadd(&self, opts: FsaddOptions) -> SnfsResult<FsInfo> {
        self.require_admin()?;
        let _registry = self.shared.registry.lock();
        self.shared.catalog.add(opts)
    }

    /// Renames a filesystem or changes its limits. Admin only.
    pub fn fsmod(&self, fsno: &FsNo, opts: FsmodOptions) -> SnfsResult<FsInfo> {
        self.require_admin()?;
        let _registry = self.shared.registry.lock();
        self.shared.catalog.modify(fsno, &opts)
    }

    /// Deletes a filesystem nobody references. Admin only.
    pub fn fsdel(&self, fsno: &FsNo) -> SnfsResult<()> {
        self.require_admin()?;
        let _registry = self.shared.registry.lock();
        if !self.shared.catalog.contains(fsno) {
            return Err(SnfsError::not_found(format!("filesystem {}", fsno)));
        }
        // Handles of expired sessions no longer count as references.
        self.shared.sessions.reap_idle(current_time_secs());
        if self.shared.identity.references(fsno) || self.shared.sessions.references(fsno) {
            tracing::warn!(%fsno, "fsdel refused: filesystem in use");
            return Err(SnfsError::InUse {
                fsno: fsno.clone(),
            });
        }
        self.shared.catalog.remove(fsno)
    }

    /// Every filesystem. Admin only.
    pub fn fslist(&self) -> SnfsResult<Vec<FsInfo>> {
        self.require_admin()?;
        Ok(self.shared.catalog.list())
    }
}
