//! Cancellable single-shot scheduled tasks
//!
//! A [`Debounce`] holds at most one pending task. Scheduling a new one cancels
//! the previous task, so a superseded task can never fire. Time is passed in
//! explicitly, which keeps the state machines built on top of this fully
//! deterministic; the engine loop supplies `tokio::time::Instant::now()` and
//! sleeps until [`Debounce::deadline`].

use std::time::Duration;
use tokio::time::Instant;

/// A pending task: its payload and when it fires
#[derive(Debug, Clone, PartialEq)]
struct Scheduled<T> {
    fire_at: Instant,
    payload: T,
}

/// Debounced single-shot task carrying a payload of type `T`
#[derive(Debug, Clone)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<Scheduled<T>>,
}

impl<T> Debounce<T> {
    /// Create an idle debouncer with the given quiet period
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Schedule `payload` to fire `delay` after `now`, replacing any pending task.
    ///
    /// Returns `true` if a pending task was cancelled.
    pub fn schedule(&mut self, now: Instant, payload: T) -> bool {
        let superseded = self.pending.is_some();
        self.pending = Some(Scheduled {
            fire_at: now + self.delay,
            payload,
        });
        superseded
    }

    /// Cancel the pending task, returning its payload
    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|scheduled| scheduled.payload)
    }

    /// Take the payload if the task is due at `now`
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some(scheduled) if scheduled.fire_at <= now => self.cancel(),
            _ => None,
        }
    }

    /// When the pending task fires, if any
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|scheduled| scheduled.fire_at)
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[inline]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Earliest of a set of optional deadlines
pub fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_fires_after_delay() {
        let start = Instant::now();
        let mut debounce = Debounce::new(300 * MS);
        assert!(!debounce.schedule(start, 7));

        assert_eq!(debounce.poll(start + 299 * MS), None);
        assert_eq!(debounce.poll(start + 300 * MS), Some(7));
        // Single-shot
        assert_eq!(debounce.poll(start + 301 * MS), None);
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_reschedule_cancels_previous() {
        let start = Instant::now();
        let mut debounce = Debounce::new(100 * MS);
        debounce.schedule(start, "first");
        assert!(debounce.schedule(start + 80 * MS, "second"));

        // The first task would have fired here
        assert_eq!(debounce.poll(start + 100 * MS), None);
        assert_eq!(debounce.deadline(), Some(start + 180 * MS));
        assert_eq!(debounce.poll(start + 180 * MS), Some("second"));
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut debounce = Debounce::new(MS);
        debounce.schedule(start, ());
        assert_eq!(debounce.cancel(), Some(()));
        assert_eq!(debounce.poll(start + 10 * MS), None);
        assert_eq!(debounce.deadline(), None);
    }

    #[test]
    fn test_earliest() {
        let start = Instant::now();
        assert_eq!(earliest([None, None]), None);
        assert_eq!(
            earliest([Some(start + 5 * MS), None, Some(start + 2 * MS)]),
            Some(start + 2 * MS)
        );
    }
}
