//! Control messages and connection lifecycle state

use crate::error::RemoteIpcError;
use parking_lot::Mutex;
use std::fmt;

/// Asks the peer to stop its reception loop
pub const STOP_CONNECTION: &str = "stopConnection";
/// Asks the peer whether a target is registered
pub const TARGET_REGISTRATION_CHECK: &str = "targetRegistrationCheck";
/// Tells the peer this side is ready to serve
pub const READINESS_NOTIFICATION: &str = "readinessNotification";

/// Checks if a function name is reserved for connection control
///
/// Control requests are handled by the connection itself and never reach
/// the registered target.
pub fn is_control(function: &str) -> bool {
    matches!(
        function,
        STOP_CONNECTION | TARGET_REGISTRATION_CHECK | READINESS_NOTIFICATION
    )
}

/// Where a connection is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// Constructed, reception loop not started
    Created,
    /// Reception loop running
    Running,
    /// Stop requested; the reception loop is winding down
    Stopping,
    /// Reception loop exited and pending calls released
    Stopped,
}

impl ConnectionPhase {
    /// True until a stop has been requested
    pub fn is_running(self) -> bool {
        matches!(self, ConnectionPhase::Created | ConnectionPhase::Running)
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::Created => "created",
            ConnectionPhase::Running => "running",
            ConnectionPhase::Stopping => "stopping",
            ConnectionPhase::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

struct State {
    phase: ConnectionPhase,
    remote_ready: bool,
}

/// Phase and readiness flag, guarded together
pub(crate) struct Lifecycle {
    state: Mutex<State>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: ConnectionPhase::Created,
                remote_ready: false,
            }),
        }
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        self.state.lock().phase
    }

    /// Moves `Created` to `Running`
    pub(crate) fn start(&self) -> Result<(), RemoteIpcError> {
        let mut state = self.state.lock();
        match state.phase {
            ConnectionPhase::Created => {
                state.phase = ConnectionPhase::Running;
                Ok(())
            }
            ConnectionPhase::Running => Err(RemoteIpcError::AlreadyStarted),
            ConnectionPhase::Stopping | ConnectionPhase::Stopped => {
                Err(RemoteIpcError::ConnectionStopped)
            }
        }
    }

    /// Enters `Stopping`
    ///
    /// Returns the previous phase for the caller that performed the
    /// transition, `None` for everyone else.
    pub(crate) fn begin_stop(&self) -> Option<ConnectionPhase> {
        let mut state = self.state.lock();
        if state.phase.is_running() {
            let previous = state.phase;
            state.phase = ConnectionPhase::Stopping;
            Some(previous)
        } else {
            None
        }
    }

    pub(crate) fn finish(&self) {
        self.state.lock().phase = ConnectionPhase::Stopped;
    }

    pub(crate) fn mark_remote_ready(&self) {
        self.state.lock().remote_ready = true;
    }

    pub(crate) fn is_remote_ready(&self) -> bool {
        self.state.lock().remote_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert!(is_control("stopConnection"));
        assert!(is_control("targetRegistrationCheck"));
        assert!(is_control("readinessNotification"));
        assert!(!is_control("double"));
        assert!(!is_control("StopConnection"));
    }

    #[test]
    fn test_phase_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.phase(), ConnectionPhase::Created);
        assert!(lifecycle.phase().is_running());

        lifecycle.start().unwrap();
        assert_eq!(lifecycle.phase(), ConnectionPhase::Running);
        assert!(matches!(
            lifecycle.start(),
            Err(RemoteIpcError::AlreadyStarted)
        ));

        assert_eq!(lifecycle.begin_stop(), Some(ConnectionPhase::Running));
        assert_eq!(lifecycle.begin_stop(), None);
        assert!(!lifecycle.phase().is_running());

        lifecycle.finish();
        assert_eq!(lifecycle.phase(), ConnectionPhase::Stopped);
        assert!(matches!(
            lifecycle.start(),
            Err(RemoteIpcError::ConnectionStopped)
        ));
    }

    #[test]
    fn test_stop_before_start() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.begin_stop(), Some(ConnectionPhase::Created));
        assert!(matches!(
            lifecycle.start(),
            Err(RemoteIpcError::ConnectionStopped)
        ));
    }

    #[test]
    fn test_remote_ready_flag() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_remote_ready());
        lifecycle.mark_remote_ready();
        assert!(lifecycle.is_remote_ready());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConnectionPhase::Stopping.to_string(), "stopping");
    }
}
