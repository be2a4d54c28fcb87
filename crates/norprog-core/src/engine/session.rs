//! Observable session state
//!
//! The engine is the only writer; any number of threads may read. Numeric
//! fields are single atomics so a reader never blocks the worker. The last
//! error message is written once per failed operation, before the `Error`
//! status is published, so a reader that sees `Error` also sees the message.
//!
//! Status shares one atomic word with an operation sequence number. A cancel
//! request records the sequence it saw, so it only ever applies to the
//! operation that was running when it was made.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::error::Error;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// No operation has run yet, or the session was reset
    Idle = 0,
    /// Reading a region
    Reading = 1,
    /// Programming pages
    Writing = 2,
    /// Erasing sectors or the whole chip
    Erasing = 3,
    /// Reading back written data
    Verifying = 4,
    /// Last operation succeeded
    Completed = 5,
    /// Last operation failed, see `last_error`
    Error = 6,
    /// Last operation stopped at a unit boundary on request
    Cancelled = 7,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Reading,
            2 => Self::Writing,
            3 => Self::Erasing,
            4 => Self::Verifying,
            5 => Self::Completed,
            6 => Self::Error,
            7 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    /// Returns true while an operation is running
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Reading | Self::Writing | Self::Erasing | Self::Verifying
        )
    }

    /// Returns true for the per-operation end states
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Writing => "writing",
            Self::Erasing => "erasing",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current status
    pub status: Status,
    /// Progress of the current operation, 0-100
    pub progress: u8,
    /// Average throughput of the current operation
    pub throughput_bytes_per_sec: u64,
    /// Message of the last failure, if the last operation failed
    pub last_error: Option<String>,
}

/// Session state shared between the engine and its observers
#[derive(Debug)]
pub struct SessionState {
    /// Operation sequence in the upper bits, `Status` in the low byte
    operation: AtomicU64,
    progress: AtomicU8,
    throughput: AtomicU64,
    last_error: Mutex<Option<String>>,
    /// Sequence of the operation a cancel was requested for, 0 for none
    cancel_for: AtomicU64,
    /// Set by `prepare`, consumed by the engine's `begin`
    prepared: AtomicBool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Create an idle session
    pub fn new() -> Self {
        Self {
            operation: AtomicU64::new(Status::Idle as u64),
            progress: AtomicU8::new(0),
            throughput: AtomicU64::new(0),
            last_error: Mutex::new(None),
            cancel_for: AtomicU64::new(0),
            prepared: AtomicBool::new(false),
        }
    }

    fn load(&self) -> (u64, Status) {
        let word = self.operation.load(Ordering::Acquire);
        (word >> 8, Status::from_u8(word as u8))
    }

    fn store(&self, sequence: u64, status: Status) {
        self.operation
            .store((sequence << 8) | status as u64, Ordering::Release);
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.load().1
    }

    /// Sequence number of the current (or last) operation
    pub fn sequence(&self) -> u64 {
        self.load().0
    }

    /// Progress of the current operation, 0-100
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    /// Average throughput of the current operation in bytes per second
    pub fn throughput_bytes_per_sec(&self) -> u64 {
        self.throughput.load(Ordering::Acquire)
    }

    /// Message of the last failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the running operation was asked to stop
    pub fn is_cancel_requested(&self) -> bool {
        let (sequence, status) = self.load();
        status.is_active() && self.cancel_for.load(Ordering::Acquire) == sequence
    }

    /// Ask the running operation to stop at the next unit boundary
    ///
    /// Returns false when nothing is running. The request names the
    /// operation observed here; if that one ends first, the request is
    /// ignored by whatever runs next.
    pub fn request_cancel(&self) -> bool {
        let (sequence, status) = self.load();
        if !status.is_active() {
            return false;
        }
        self.cancel_for.store(sequence, Ordering::Release);
        true
    }

    /// Copy all fields at once
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            progress: self.progress(),
            throughput_bytes_per_sec: self.throughput_bytes_per_sec(),
            last_error: self.last_error(),
        }
    }

    /// Start a new operation ahead of the engine, from the submitting thread
    ///
    /// The engine's next `begin` joins this operation instead of starting
    /// another one, so a cancel made in between still applies.
    pub(crate) fn prepare(&self, status: Status) {
        self.clear();
        self.store(self.sequence() + 1, status);
        self.prepared.store(true, Ordering::Release);
    }

    pub(crate) fn begin(&self, status: Status) {
        let sequence = if self.prepared.swap(false, Ordering::AcqRel) {
            self.sequence()
        } else {
            self.clear();
            self.sequence() + 1
        };
        self.store(sequence, status);
    }

    pub(crate) fn enter_phase(&self, status: Status) {
        self.store(self.sequence(), status);
    }

    pub(crate) fn publish(&self, progress: u8, throughput: Option<u64>) {
        if let Some(rate) = throughput {
            self.throughput.store(rate, Ordering::Release);
        }
        self.progress.store(progress, Ordering::Release);
    }

    pub(crate) fn complete(&self) {
        self.progress.store(100, Ordering::Release);
        self.finish(Status::Completed);
    }

    pub(crate) fn cancelled(&self) {
        self.finish(Status::Cancelled);
    }

    pub(crate) fn fail(&self, error: &Error) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
        self.finish(Status::Error);
    }

    pub(crate) fn reset(&self) {
        self.prepared.store(false, Ordering::Release);
        self.cancel_for.store(0, Ordering::Release);
        self.clear();
        self.store(self.sequence(), Status::Idle);
    }

    fn clear(&self) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.progress.store(0, Ordering::Release);
        self.throughput.store(0, Ordering::Release);
    }

    fn finish(&self, status: Status) {
        self.prepared.store(false, Ordering::Release);
        self.store(self.sequence(), status);
    }
}

/// Unit counting and throughput for one operation
///
/// Percentages stop at 99 until the operation is concluded, so a reader
/// sees 100 only together with `Completed`.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total: usize,
    completed: usize,
    bytes: u64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }

    /// Record one finished unit of `bytes` and return the new percentage
    pub(crate) fn advance(&mut self, bytes: usize) -> u8 {
        self.completed += 1;
        self.bytes += bytes as u64;
        self.percent()
    }

    pub(crate) fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (self.completed * 100 / self.total).min(99) as u8
    }

    /// Cumulative average, `None` until measurable time has passed
    pub(crate) fn throughput(&self) -> Option<u64> {
        let micros = self.started.elapsed().as_micros();
        if micros == 0 {
            return None;
        }
        Some((self.bytes as u128 * 1_000_000 / micros) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let state = SessionState::new();
        let snap = state.snapshot();
        assert_eq!(snap.status, Status::Idle);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.last_error, None);
    }

    #[test]
    fn test_cancel_ignored_when_idle() {
        let state = SessionState::new();
        assert!(!state.request_cancel());
        assert!(!state.is_cancel_requested());

        state.begin(Status::Reading);
        assert!(state.request_cancel());
        assert!(state.is_cancel_requested());

        state.cancelled();
        assert_eq!(state.status(), Status::Cancelled);
        assert!(!state.is_cancel_requested());
        assert_eq!(state.last_error(), None);
    }

    #[test]
    fn test_fail_sets_message_then_status() {
        let state = SessionState::new();
        state.begin(Status::Writing);
        state.fail(&Error::VerifyMismatch);
        assert_eq!(state.status(), Status::Error);
        assert_eq!(state.last_error().as_deref(), Some("verification mismatch"));

        // A new operation clears the previous failure
        state.begin(Status::Erasing);
        assert_eq!(state.last_error(), None);
        assert_eq!(state.progress(), 0);
    }

    #[test]
    fn test_late_cancel_does_not_reach_next_operation() {
        let state = SessionState::new();
        state.begin(Status::Reading);
        let first = state.sequence();

        // The canceller saw the first operation running, but its store
        // lands after that operation already ended
        state.complete();
        state.cancel_for.store(first, Ordering::Release);

        state.begin(Status::Reading);
        assert_ne!(state.sequence(), first);
        assert!(!state.is_cancel_requested());
    }

    #[test]
    fn test_prepared_operation_keeps_early_cancel() {
        let state = SessionState::new();
        state.prepare(Status::Writing);
        assert!(state.request_cancel());

        // The engine picks up the prepared operation on its own thread
        state.begin(Status::Writing);
        assert!(state.is_cancel_requested());
        state.cancelled();

        state.begin(Status::Writing);
        assert!(!state.is_cancel_requested());
    }

    #[test]
    fn test_tracker_caps_below_hundred() {
        let mut tracker = ProgressTracker::new(3);
        assert_eq!(tracker.advance(256), 33);
        assert_eq!(tracker.advance(256), 66);
        assert_eq!(tracker.advance(256), 99);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let state = SessionState::new();
        state.begin(Status::Reading);
        state.publish(50, Some(1234));
        state.reset();
        let snap = state.snapshot();
        assert_eq!(snap.status, Status::Idle);
        assert_eq!(snap.progress, 0);
        assert_eq!(snap.throughput_bytes_per_sec, 0);
    }
}
