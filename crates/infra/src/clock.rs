//! Time source for the executor.
//!
//! Retry scheduling compares against `Clock::now`, and inline execution waits
//! with `Clock::sleep_until`, so tests can run whole backoff schedules
//! instantly with a [`ManualClock`].

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Block until `now() >= at`. Returning late is fine; returning early is not.
    fn sleep_until(&self, at: DateTime<Utc>);
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep_until(&self, at: DateTime<Utc>) {
        loop {
            let remaining = at - Utc::now();
            match remaining.to_std() {
                Ok(d) if !d.is_zero() => thread::sleep(d),
                _ => break,
            }
        }
    }
}

/// Virtual time that only moves when told to (or when someone sleeps).
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep_until(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if *now < at {
            *now = at;
        }
    }
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn sleep_until(&self, at: DateTime<Utc>) {
        (**self).sleep_until(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn manual_clock_moves_only_forward_on_sleep() {
        let start = Utc::now();
        let clock = ManualClock::new(start);

        clock.sleep_until(start + Duration::seconds(3));
        assert_eq!(clock.now(), start + Duration::seconds(3));

        clock.sleep_until(start);
        assert_eq!(clock.now(), start + Duration::seconds(3));

        clock.advance(Duration::seconds(2));
        assert_eq!(clock.now(), start + Duration::seconds(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn system_clock_does_not_wake_early() {
        let clock = SystemClock;
        let at = clock.now() + Duration::milliseconds(20);

        clock.sleep_until(at);
        assert!(clock.now() >= at);
    }
}
