use std::time::{Duration, Instant};

use crate::error::{StoreError, StoreResult};

/// Point in time after which an operation gives up.
///
/// `Deadline::none()` never expires. A wall-clock deadline (`after`, `at`)
/// bounds a whole step such as a lock wait. An idle deadline (`idle`) bounds
/// the gap between two units of progress: every [`renew`](Self::renew) pushes
/// it `timeout` into the future again, so a long transfer that keeps moving
/// never expires. Deadlines are `Copy` so one value can be handed to each
/// part of an operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    idle: Option<Duration>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { at: None, idle: None }
    }

    pub const fn at(instant: Instant) -> Self {
        Self {
            at: Some(instant),
            idle: None,
        }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            idle: None,
        }
    }

    /// Expires after `timeout` without a [`renew`](Self::renew).
    pub fn idle(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            idle: Some(timeout),
        }
    }

    /// `after(timeout)`, or no deadline when `timeout` is `None`.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(Self::none(), Self::after)
    }

    /// `idle(timeout)`, or no deadline when `timeout` is `None`.
    pub fn from_idle_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or(Self::none(), Self::idle)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn is_idle(&self) -> bool {
        self.idle.is_some()
    }

    /// Record progress. Restarts an idle deadline; no effect on the others.
    pub fn renew(&mut self) {
        if let Some(idle) = self.idle {
            self.at = Instant::now().checked_add(idle);
        }
    }

    /// Time left, `None` when unbounded. Saturates at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// `Err(DeadlineExceeded)` once the deadline has passed.
    pub fn check(&self, operation: &'static str) -> StoreResult<()> {
        if self.is_expired() {
            return Err(StoreError::DeadlineExceeded { operation });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn none_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), None);
        assert!(deadline.check("noop").is_ok());
    }

    #[test]
    fn past_deadline_is_expired() {
        let deadline = Deadline::at(Instant::now() - Duration::from_millis(5));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        let err = deadline.check("read").unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded { operation: "read" }));
    }

    #[test]
    fn from_timeout() {
        assert_eq!(Deadline::from_timeout(None), Deadline::none());
        let deadline = Deadline::from_timeout(Some(Duration::from_secs(60)));
        assert!(!deadline.is_expired());
        assert!(!deadline.is_idle());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(50));
    }

    #[test]
    fn renewed_idle_deadline_outlives_its_timeout() {
        let mut deadline = Deadline::idle(Duration::from_millis(60));
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(20));
            assert!(deadline.check("read").is_ok());
            deadline.renew();
        }
        thread::sleep(Duration::from_millis(80));
        assert!(deadline.is_expired());
    }

    #[test]
    fn renew_leaves_wall_clock_deadlines_alone() {
        let mut deadline = Deadline::at(Instant::now() - Duration::from_millis(1));
        deadline.renew();
        assert!(deadline.is_expired());
        let mut unbounded = Deadline::from_idle_timeout(None);
        unbounded.renew();
        assert_eq!(unbounded, Deadline::none());
    }
}
