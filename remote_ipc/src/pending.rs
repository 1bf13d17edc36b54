//! Pending-call registry
//!
//! Correlates responses read by the reception loop with the callers blocked
//! on them. Each entry is the sending half of a one-shot channel; the caller
//! keeps the receiving half inside a [`PendingCall`] guard.

use crate::envelope::CallOutcome;
use crate::error::RemoteIpcError;
use core_types::Tag;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

/// Why waiting on a pending call ended without an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingError {
    /// The caller's timeout elapsed
    TimedOut,
    /// The registry was drained because the connection stopped
    Released,
}

#[derive(Default)]
struct Slots {
    closed: bool,
    waiting: HashMap<Tag, SyncSender<CallOutcome>>,
}

/// Concurrent map from tag to waiting caller
#[derive(Default)]
pub struct PendingCalls {
    slots: Mutex<Slots>,
}

impl PendingCalls {
    /// Creates an empty, open registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call
    ///
    /// Fails once the registry has been drained, so that nobody can start
    /// waiting on a connection that will never answer.
    pub fn register(&self, tag: Tag) -> Result<PendingCall<'_>, RemoteIpcError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(RemoteIpcError::ConnectionStopped);
        }
        slots.waiting.insert(tag, tx);
        Ok(PendingCall {
            registry: self,
            tag,
            outcome: rx,
        })
    }

    /// Delivers an outcome to the caller waiting on `tag`
    ///
    /// Returns false when no caller is waiting (late or duplicate response).
    pub fn resolve(&self, tag: Tag, outcome: CallOutcome) -> bool {
        let waiter = self.slots.lock().waiting.remove(&tag);
        match waiter {
            Some(tx) => {
                // The caller may have given up between removal and send.
                let _ = tx.try_send(outcome);
                true
            }
            None => false,
        }
    }

    /// Closes the registry and releases every waiting caller
    ///
    /// Returns the number of callers released. Later calls release nothing.
    pub fn close_and_drain(&self) -> usize {
        let drained = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            std::mem::take(&mut slots.waiting)
        };
        drained.len()
    }

    /// Checks whether the registry was drained
    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    /// Number of calls currently waiting
    pub fn len(&self) -> usize {
        self.slots.lock().waiting.len()
    }

    /// Checks if no call is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, tag: Tag) {
        self.slots.lock().waiting.remove(&tag);
    }
}

/// A caller's registration; removes itself from the registry on drop
pub struct PendingCall<'a> {
    registry: &'a PendingCalls,
    tag: Tag,
    outcome: Receiver<CallOutcome>,
}

impl PendingCall<'_> {
    /// The tag this call was registered under
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Blocks until resolved, released, or `timeout` elapses
    pub fn wait(self, timeout: Option<Duration>) -> Result<CallOutcome, PendingError> {
        match timeout {
            None => self.outcome.recv().map_err(|_| PendingError::Released),
            Some(timeout) => self.outcome.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => PendingError::TimedOut,
                RecvTimeoutError::Disconnected => PendingError::Released,
            }),
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.registry.forget(self.tag);
    }
}
