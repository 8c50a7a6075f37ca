//! Session and filesystem-handle registries

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use snfs_meta::{FsNo, UnionView};

use crate::error::{SnfsError, SnfsResult};
use crate::identity::UserNo;
use crate::token::generate_token;

/// Seconds since the Unix epoch.
pub(crate) fn current_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A logged-in session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Bearer token
    pub token: String,
    /// Owning user
    pub userno: UserNo,
    /// Login time
    pub created_at: u64,
    /// Last use
    pub last_active: u64,
}

impl SessionRecord {
    fn new(userno: UserNo, now: u64) -> Self {
        Self {
            token: generate_token(),
            userno,
            created_at: now,
            last_active: now,
        }
    }

    /// True if unused for longer than `timeout_secs`. A zero timeout never expires.
    pub fn is_idle(&self, now: u64, timeout_secs: u64) -> bool {
        timeout_secs > 0 && now.saturating_sub(self.last_active) > timeout_secs
    }
}

/// An open filesystem handle. The overlay list is fixed at creation.
#[derive(Clone)]
pub struct HandleRecord {
    /// Bearer token
    pub fs_token: String,
    /// Session that opened it
    pub session_token: String,
    /// Base filesystem
    pub base: FsNo,
    /// Whether the base accepts writes
    pub writeable: bool,
    /// Read-only overlays, highest priority first
    pub union: Vec<FsNo>,
    /// Resolver over the layers above
    pub view: UnionView,
}

impl std::fmt::Debug for HandleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRecord")
            .field("base", &self.base)
            .field("writeable", &self.writeable)
            .field("union", &self.union)
            .finish_non_exhaustive()
    }
}

/// Tracks live sessions and the handles they own.
pub struct SessionManager {
    sessions: DashMap<String, SessionRecord>,
    handles: DashMap<String, HandleRecord>,
    idle_timeout_secs: u64,
}

impl SessionManager {
    /// Creates an empty manager. `idle_timeout_secs == 0` disables expiry.
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            handles: DashMap::new(),
            idle_timeout_secs,
        }
    }

    /// Opens a session for `userno`.
    pub fn create(&self, userno: UserNo, now: u64) -> SessionRecord {
        let record = SessionRecord::new(userno, now);
        self.sessions.insert(record.token.clone(), record.clone());
        record
    }

    /// Validates a session and records activity. Idle sessions are dropped.
    pub fn touch(&self, token: &str, now: u64) -> SnfsResult<SessionRecord> {
        {
            let mut session = self
                .sessions
                .get_mut(token)
                .ok_or(SnfsError::InvalidSession)?;
            if !session.is_idle(now, self.idle_timeout_secs) {
                session.last_active = now;
                return Ok(session.clone());
            }
        }
        tracing::info!("session expired on use");
        self.remove(token);
        Err(SnfsError::InvalidSession)
    }

    /// Looks up a session without touching it.
    pub fn get(&self, token: &str) -> Option<SessionRecord> {
        self.sessions.get(token).map(|s| s.value().clone())
    }

    /// Ends a session and every handle it opened.
    pub fn remove(&self, token: &str) -> bool {
        let existed = self.sessions.remove(token).is_some();
        self.handles.retain(|_, h| h.session_token != token);
        existed
    }

    /// Ends every session of `userno`. Returns how many were ended.
    pub fn revoke_user(&self, userno: &UserNo) -> usize {
        let tokens: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| &s.value().userno == userno)
            .map(|s| s.key().clone())
            .collect();
        tokens.iter().filter(|t| self.remove(t)).count()
    }

    /// Registers a handle owned by `session_token`.
    pub fn add_handle(
        &self,
        session_token: &str,
        base: FsNo,
        writeable: bool,
        union: Vec<FsNo>,
        view: UnionView,
    ) -> SnfsResult<HandleRecord> {
        // The session entry stays borrowed until the handle is in, so a
        // concurrent logout either precedes us or sweeps the new handle.
        let _session = self
            .sessions
            .get(session_token)
            .ok_or(SnfsError::InvalidSession)?;
        let record = HandleRecord {
            fs_token: generate_token(),
            session_token: session_token.to_string(),
            base,
            writeable,
            union,
            view,
        };
        self.handles.insert(record.fs_token.clone(), record.clone());
        Ok(record)
    }

    /// The handle `fs_token`, provided it belongs to `session_token`.
    pub fn handle(&self, fs_token: &str, session_token: &str) -> SnfsResult<HandleRecord> {
        self.handles
            .get(fs_token)
            .filter(|h| h.session_token == session_token)
            .map(|h| h.value().clone())
            .ok_or(SnfsError::InvalidHandle)
    }

    /// True if any open handle uses `fsno` as base or overlay.
    pub fn references(&self, fsno: &FsNo) -> bool {
        self.handles
            .iter()
            .any(|h| &h.base == fsno || h.union.contains(fsno))
    }

    /// Drops every idle session. Returns how many were dropped.
    pub fn reap_idle(&self, now: u64) -> usize {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.value().is_idle(now, self.idle_timeout_secs))
            .map(|s| s.key().clone())
            .collect();
        let reaped = idle.iter().filter(|t| self.remove(t)).count();
        if reaped > 0 {
            tracing::info!(reaped, "idle sessions reaped");
        }
        reaped
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of open handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}
