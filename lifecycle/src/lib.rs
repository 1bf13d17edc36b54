//! # Lifecycle
//!
//! Timeout and bounded-wait primitives for the remote-call layers.
//!
//! ## Philosophy
//!
//! - **Monotonic**: Deadlines are `std::time::Instant`s, never wall-clock
//! - **Testability first**: Every time check has a variant taking an explicit `now`
//! - **Mechanism not policy**: Callers pick poll intervals and timeouts
//!
//! ## Core Concepts
//!
//! - `Deadline`: Point in time when an operation should give up
//! - `Timeout`: Duration-based timeout, converted to a deadline when armed
//! - `poll_until`: Sleep-poll a condition until it holds, fails, or the deadline passes

use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A deadline represents a point in time when an operation should time out
///
/// Deadlines are absolute, making them suitable for passing through
/// multiple layers without duration confusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    instant: Instant,
}

impl Deadline {
    /// Creates a deadline at the specified instant
    pub fn at(instant: Instant) -> Self {
        Self { instant }
    }

    /// Creates a deadline `duration` from now
    pub fn after(duration: Duration) -> Self {
        Timeout::after(duration).to_deadline(Instant::now())
    }

    /// Arms an optional timeout; `None` means "wait forever"
    pub fn from_timeout(timeout: Option<Duration>) -> Option<Self> {
        timeout.map(Self::after)
    }

    /// Returns the instant of this deadline
    pub fn instant(&self) -> Instant {
        self.instant
    }

    /// Checks if the deadline has passed at `now`
    pub fn has_passed(&self, now: Instant) -> bool {
        now >= self.instant
    }

    /// Returns time remaining until the deadline at `now`
    ///
    /// Returns None if the deadline has passed.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        if now < self.instant {
            Some(self.instant.duration_since(now))
        } else {
            None
        }
    }

    /// Checks if the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.has_passed(Instant::now())
    }

    /// Returns time remaining until the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.time_remaining(Instant::now())
    }
}

/// Timeout specifies a duration-based timeout
///
/// Unlike Deadline, Timeout is relative and needs to be converted to a
/// Deadline for actual use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Creates a timeout with the specified duration
    pub fn after(duration: Duration) -> Self {
        Self { duration }
    }

    /// Creates a timeout from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self {
            duration: Duration::from_millis(millis),
        }
    }

    /// Creates a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self {
            duration: Duration::from_secs(secs),
        }
    }

    /// Returns the duration of this timeout
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Converts this timeout to a deadline starting from `now`
    pub fn to_deadline(&self, now: Instant) -> Deadline {
        Deadline::at(now + self.duration)
    }
}

/// Why a bounded wait ended without a result
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError<E> {
    /// The deadline passed before the condition held
    #[error("timed out")]
    TimedOut,

    /// The probe gave up with an error
    #[error("{0}")]
    Aborted(E),
}

/// Sleep-polls `probe` until it yields a value
///
/// The probe returns `Ok(Some(value))` when done, `Ok(None)` to be polled
/// again after `interval`, or `Err` to stop immediately. The probe always
/// runs at least once, even with an already-expired deadline. Sleeps never
/// overshoot the deadline by more than scheduling jitter.
pub fn poll_until<T, E>(
    deadline: Option<Deadline>,
    interval: Duration,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
) -> Result<T, PollError<E>> {
    loop {
        if let Some(value) = probe().map_err(PollError::Aborted)? {
            return Ok(value);
        }

        let nap = match deadline {
            Some(deadline) => match deadline.remaining() {
                Some(remaining) => interval.min(remaining),
                None => return Err(PollError::TimedOut),
            },
            None => interval,
        };
        thread::sleep(nap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_deadline_basic() {
        let now = Instant::now();
        let future = now + Duration::from_nanos(1000);
        let deadline = Deadline::at(future);

        assert!(!deadline.has_passed(now));
        assert_eq!(deadline.instant(), future);
        assert!(deadline.has_passed(future));
        assert!(deadline.has_passed(future + Duration::from_nanos(1000)));
    }

    #[test]
    fn test_deadline_time_remaining() {
        let now = Instant::now();
        let deadline = Deadline::at(now + Duration::from_nanos(1000));

        assert_eq!(
            deadline.time_remaining(now),
            Some(Duration::from_nanos(1000))
        );
        assert_eq!(
            deadline.time_remaining(now + Duration::from_nanos(1000)),
            None
        );
        assert_eq!(
            deadline.time_remaining(now + Duration::from_nanos(3000)),
            None
        );
    }

    #[test]
    fn test_timeout_basic() {
        assert_eq!(
            Timeout::from_millis(100).duration(),
            Duration::from_millis(100)
        );
        assert_eq!(Timeout::from_secs(5).duration(), Duration::from_secs(5));
        assert_eq!(
            Timeout::after(Duration::from_millis(500)).duration(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_timeout_to_deadline() {
        let now = Instant::now();
        let deadline = Timeout::from_millis(100).to_deadline(now);

        let expected = now + Duration::from_millis(100);
        assert_eq!(deadline.instant(), expected);
        assert!(!deadline.has_passed(now));
        assert!(deadline.has_passed(expected));
    }

    #[test]
    fn test_from_timeout_none_is_unbounded() {
        assert!(Deadline::from_timeout(None).is_none());
        assert!(Deadline::from_timeout(Some(Duration::from_secs(1))).is_some());
    }

    #[test]
    fn test_poll_until_ready_after_a_few_probes() {
        let probes = Cell::new(0);
        let result: Result<u32, PollError<()>> = poll_until(
            Some(Deadline::after(Duration::from_secs(5))),
            Duration::from_millis(1),
            || {
                probes.set(probes.get() + 1);
                Ok((probes.get() == 3).then_some(7))
            },
        );
        assert_eq!(result, Ok(7));
        assert_eq!(probes.get(), 3);
    }

    #[test]
    fn test_poll_until_times_out() {
        let started = Instant::now();
        let result: Result<(), PollError<()>> = poll_until(
            Some(Deadline::after(Duration::from_millis(50))),
            Duration::from_millis(5),
            || Ok(None),
        );
        assert_eq!(result, Err(PollError::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_poll_until_probes_once_with_expired_deadline() {
        let deadline = Deadline::at(Instant::now());
        let result: Result<&str, PollError<()>> =
            poll_until(Some(deadline), Duration::from_millis(5), || Ok(Some("done")));
        assert_eq!(result, Ok("done"));
    }

    #[test]
    fn test_poll_until_aborts() {
        let result: Result<(), PollError<&str>> =
            poll_until(None, Duration::from_millis(1), || Err("stopped"));
        assert_eq!(result, Err(PollError::Aborted("stopped")));
    }
}
