//! Per-filesystem quota tracking and admission control.
//!
//! Usage only changes when a namespace mutation commits. In-flight writes
//! hold a [`Reservation`] that counts against the limits while the content
//! is streamed, so concurrent writers cannot jointly overshoot a limit, and
//! an abandoned reservation (error, cancellation, panic) rolls back on drop.

use parking_lot::Mutex;

use crate::pathres::NsPath;
use crate::types::{FsLimits, FsUsage, MetaError, MetaResult, QuotaDimension};

#[derive(Debug, Default)]
struct QuotaState {
    limits: FsLimits,
    usage: FsUsage,
    pending_files: u64,
    pending_bytes: u64,
}

impl QuotaState {
    fn check(&self, dimension: QuotaDimension, current: u64, delta: u64) -> MetaResult<()> {
        let Some(limit) = self.limits.limit(dimension) else {
            return Ok(());
        };
        let requested = current.saturating_add(delta);
        if requested > limit {
            tracing::warn!(%dimension, limit, requested, "quota exceeded");
            return Err(MetaError::QuotaExceeded {
                dimension,
                limit,
                requested,
            });
        }
        Ok(())
    }

    fn check_growth(&self, files: u64, bytes: u64) -> MetaResult<()> {
        if files > 0 {
            self.check(
                QuotaDimension::Files,
                self.usage.no_files + self.pending_files,
                files,
            )?;
        }
        if bytes > 0 {
            self.check(
                QuotaDimension::Storage,
                self.usage.bytes_used + self.pending_bytes,
                bytes,
            )?;
        }
        Ok(())
    }
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        let d = delta.unsigned_abs();
        debug_assert!(value >= d, "usage counter underflow: {} - {}", value, d);
        value.saturating_sub(d)
    }
}

/// Limits, committed usage and pending reservations of one filesystem.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    /// Creates a tracker with zero usage.
    pub fn new(limits: FsLimits) -> Self {
        Self::with_usage(limits, FsUsage::default())
    }

    /// Creates a tracker starting from already-known usage.
    pub fn with_usage(limits: FsLimits, usage: FsUsage) -> Self {
        Self {
            state: Mutex::new(QuotaState {
                limits,
                usage,
                ..QuotaState::default()
            }),
        }
    }

    /// Current limits.
    pub fn limits(&self) -> FsLimits {
        self.state.lock().limits
    }

    /// Replaces the limits. Usage above a lowered limit is kept; further
    /// growth in that dimension is rejected.
    pub fn set_limits(&self, limits: FsLimits) {
        self.state.lock().limits = limits;
        tracing::debug!(?limits, "updated limits");
    }

    /// Committed usage.
    pub fn usage(&self) -> FsUsage {
        self.state.lock().usage
    }

    /// Outstanding reservations as (files, bytes).
    pub fn pending(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.pending_files, state.pending_bytes)
    }

    /// Checks depth and path length of `path`, in that order. Both limits are inclusive.
    pub fn admit_path(&self, path: &NsPath) -> MetaResult<()> {
        self.admit_extent(path.depth(), path.byte_len())
    }

    /// Checks a raw depth / path length pair.
    pub fn admit_extent(&self, depth: u64, byte_len: u64) -> MetaResult<()> {
        let state = self.state.lock();
        state.check(QuotaDimension::Depth, depth, 0)?;
        state.check(QuotaDimension::PathLength, byte_len, 0)
    }

    /// Reserves room for `files` new files and `bytes` new bytes.
    pub fn reserve(&self, files: u64, bytes: u64) -> MetaResult<Reservation<'_>> {
        let mut state = self.state.lock();
        state.check_growth(files, bytes)?;
        state.pending_files += files;
        state.pending_bytes += bytes;
        Ok(Reservation {
            tracker: self,
            files,
            bytes,
            settled: false,
        })
    }

    /// Runs `apply` and charges the given deltas if it succeeds, without a
    /// prior reservation. Used for removals.
    pub fn apply_with<T>(
        &self,
        files_delta: i64,
        bytes_delta: i64,
        apply: impl FnOnce() -> MetaResult<T>,
    ) -> MetaResult<T> {
        self.reserve(0, 0)?.commit_with(files_delta, bytes_delta, apply)
    }
}

/// A provisional charge against a [`QuotaTracker`].
///
/// Dropping an unsettled reservation rolls it back.
#[derive(Debug)]
pub struct Reservation<'a> {
    tracker: &'a QuotaTracker,
    files: u64,
    bytes: u64,
    settled: bool,
}

impl<'a> Reservation<'a> {
    /// Bytes currently reserved.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Extends the byte reservation to `bytes` in total. Never shrinks.
    pub fn grow_bytes_to(&mut self, bytes: u64) -> MetaResult<()> {
        if bytes <= self.bytes {
            return Ok(());
        }
        let delta = bytes - self.bytes;
        let mut state = self.tracker.state.lock();
        state.check_growth(0, delta)?;
        state.pending_bytes += delta;
        self.bytes = bytes;
        Ok(())
    }

    /// Settles the reservation against the final usage deltas.
    ///
    /// The reservation is dropped from the pending totals, the final deltas
    /// are checked against committed usage plus everyone else's pending
    /// reservations, and `apply` (the namespace mutation) runs while the
    /// tracker is locked. Usage changes only if `apply` succeeds.
    pub fn commit_with<T>(
        mut self,
        files_delta: i64,
        bytes_delta: i64,
        apply: impl FnOnce() -> MetaResult<T>,
    ) -> MetaResult<T> {
        let mut state = self.tracker.state.lock();
        state.pending_files -= self.files;
        state.pending_bytes -= self.bytes;
        self.settled = true;

        state.check_growth(files_delta.max(0) as u64, bytes_delta.max(0) as u64)?;
        let out = apply()?;
        state.usage.no_files = apply_delta(state.usage.no_files, files_delta);
        state.usage.bytes_used = apply_delta(state.usage.bytes_used, bytes_delta);
        Ok(out)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.tracker.state.lock();
        state.pending_files -= self.files;
        state.pending_bytes -= self.bytes;
    }
}
