//! Cooperative cancellation for streamed transfers.
//!
//! A `CancelHandle` is held by whoever may abort the transfer (a transport
//! collaborator noticing a disconnect, a shutdown path); the paired
//! `CancelToken` is polled by the engine between chunks.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Reasons for cancelling a streamed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelReason {
    /// The caller went away.
    ClientDisconnected,
    /// The operation outlived its deadline.
    DeadlineExceeded,
    /// The service is shutting down.
    ServerShutdown,
    /// Explicit caller request.
    #[default]
    UserRequested,
}

impl CancelReason {
    fn to_u8(self) -> u8 {
        match self {
            CancelReason::ClientDisconnected => 1,
            CancelReason::DeadlineExceeded => 2,
            CancelReason::ServerShutdown => 3,
            CancelReason::UserRequested => 4,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(CancelReason::ClientDisconnected),
            2 => Some(CancelReason::DeadlineExceeded),
            3 => Some(CancelReason::ServerShutdown),
            4 => Some(CancelReason::UserRequested),
            _ => None,
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::ClientDisconnected => write!(f, "ClientDisconnected"),
            CancelReason::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            CancelReason::ServerShutdown => write!(f, "ServerShutdown"),
            CancelReason::UserRequested => write!(f, "UserRequested"),
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    reason: AtomicU8,
}

/// A cloneable token polled by long-running operations.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::default()
    }

    /// Check if this token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Get the cancellation reason if cancelled.
    pub fn cancelled_reason(&self) -> Option<CancelReason> {
        if !self.is_cancelled() {
            return None;
        }
        CancelReason::from_u8(self.state.reason.load(Ordering::SeqCst))
    }
}

/// The handle that triggers cancellation.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Trigger cancellation. The first reason recorded wins.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.state.reason.compare_exchange(
            0,
            reason.to_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// Create a new cancellation token/handle pair.
pub fn new_cancel_pair() -> (CancelToken, CancelHandle) {
    let state = Arc::new(CancelState::default());
    (
        CancelToken {
            state: state.clone(),
        },
        CancelHandle { state },
    )
}
