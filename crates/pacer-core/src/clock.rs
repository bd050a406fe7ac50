//! Injectable time source.
//!
//! Every quota decision takes `now` from a [`Clock`] instead of reading the
//! wall clock directly, and every scheduler wait goes through
//! [`Clock::sleep`], so windowed limits and jitter can be driven
//! deterministically in tests with [`ManualClock`].

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `duration` has passed on this clock.
    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

// ---------------------------------------------------------------------------
// SystemClock
// ---------------------------------------------------------------------------

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A clock that only moves when told to.
///
/// Clones share the same instant. Time never moves backwards: `set` to an
/// earlier instant is ignored. `sleep` advances the clock and returns at
/// once.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        if instant > *now {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(epoch());
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), epoch() + chrono::Duration::seconds(90));
    }

    #[test]
    fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::new(epoch());
        clock.set(epoch() + chrono::Duration::seconds(10));
        clock.set(epoch());
        assert_eq!(clock.now(), epoch() + chrono::Duration::seconds(10));
    }

    #[tokio::test]
    async fn manual_sleep_advances_instantly() {
        let clock = ManualClock::new(epoch());
        clock.sleep(Duration::from_secs(3600)).await;
        assert_eq!(clock.now(), epoch() + chrono::Duration::hours(1));
    }

    #[test]
    fn clones_share_the_same_instant() {
        let clock = ManualClock::new(epoch());
        let other = clock.clone();
        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), other.now());
    }
}
