//! Read/write handoff for half-duplex links.
//!
//! The write loop must not transmit while the read loop is mid-read on the
//! same wire. Before a burst the writer raises a suspend request and blocks
//! until the reader acknowledges it is parked; dropping the returned
//! [`ReadPause`] releases the reader. Closing the gate wakes every waiter
//! and makes all further suspends fail, so shutdown can never deadlock on
//! the handshake.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

/// Condvar wait granularity. Bounds how long a waiter can miss a wakeup.
const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Default)]
struct GateState {
    suspend_requested: bool,
    suspended: bool,
    closed: bool,
}

/// Coordination point between the read and write loops.
#[derive(Default)]
pub struct ReadGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

/// Raised while the gate is closed.
#[derive(Debug, PartialEq, Eq)]
pub struct GateClosed;

impl ReadGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writer side: request that reading pause, then wait until the reader
    /// acknowledges. Logs once if the acknowledgement takes longer than
    /// `warn_after`. Returns a guard that resumes reading when dropped.
    pub fn suspend_reads(&self, warn_after: Duration) -> Result<ReadPause<'_>, GateClosed> {
        let mut state = self.lock();
        if state.closed {
            return Err(GateClosed);
        }
        state.suspend_requested = true;
        self.cond.notify_all();

        let started = Instant::now();
        let mut warned = false;
        while !state.suspended && !state.closed {
            let (next, _) = self
                .cond
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            if !warned && started.elapsed() >= warn_after {
                warn!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "read loop slow to acknowledge suspend"
                );
                warned = true;
            }
        }
        if state.closed {
            state.suspend_requested = false;
            return Err(GateClosed);
        }
        Ok(ReadPause { gate: self })
    }

    /// Reader side: whether a suspend has been requested.
    pub fn suspend_requested(&self) -> bool {
        self.lock().suspend_requested
    }

    /// Reader side: acknowledge the suspend and block until the writer
    /// resumes or the gate closes.
    pub fn park_until_resumed(&self) -> Result<(), GateClosed> {
        let mut state = self.lock();
        state.suspended = true;
        self.cond.notify_all();
        while state.suspend_requested && !state.closed {
            let (next, _) = self
                .cond
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
        state.suspended = false;
        self.cond.notify_all();
        if state.closed {
            Err(GateClosed)
        } else {
            Ok(())
        }
    }

    /// Wake every waiter and make all further suspends fail.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    fn resume(&self) {
        let mut state = self.lock();
        state.suspend_requested = false;
        self.cond.notify_all();
    }
}

/// Guard holding the read loop parked. Reading resumes on drop.
pub struct ReadPause<'a> {
    gate: &'a ReadGate,
}

impl Drop for ReadPause<'_> {
    fn drop(&mut self) {
        self.gate.resume();
    }
}
