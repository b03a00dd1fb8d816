use std::thread;
use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use parking_lot::Mutex;

/// Time source for record timestamps and the wait loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Idle between two polls.
    fn sleep(&self, d: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the time instead of blocking, so a wait loop driven by
/// it runs as fast as the lister answers.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock();
        match chrono::Duration::from_std(d) {
            Ok(v) => {
                *now = *now + v;
            },
            Err(_) => {
                *now = DateTime::<Utc>::MAX_UTC;
            },
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Clock,
        ManualClock,
    };
    use chrono::{
        TimeZone,
        Utc,
    };
    use std::time::Duration;

    #[test]
    fn test_manual_clock_sleep_advances() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.sleep(Duration::from_secs(90));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 30).unwrap());
    }
}
