use std::sync::RwLock;

use chrono::NaiveDateTime;

use crate::model::{ClockTime, Ms, SlotDate};

/// Source of "now" for the temporal filter and record timestamps.
///
/// The availability filter compares against local wall-clock time, so two
/// callers in different zones can disagree on whether a slot has started.
pub trait Clock: Send + Sync {
    /// Local wall-clock time, no offset.
    fn local_now(&self) -> NaiveDateTime;

    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    fn now_ms(&self) -> Ms {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    at: RwLock<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self { at: RwLock::new(at) }
    }

    pub fn set(&self, at: NaiveDateTime) {
        match self.at.write() {
            Ok(mut guard) => *guard = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }
}

impl Clock for FixedClock {
    fn local_now(&self) -> NaiveDateTime {
        match self.at.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn now_ms(&self) -> Ms {
        self.local_now().and_utc().timestamp_millis()
    }
}

/// "Now" split into the two wire-level components the filter compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNow {
    pub date: SlotDate,
    pub time: ClockTime,
}

impl LocalNow {
    pub fn of(now: NaiveDateTime) -> Self {
        Self {
            date: SlotDate::from_naive(now.date()),
            time: ClockTime::of(now.time()),
        }
    }

    pub fn read(clock: &dyn Clock) -> Self {
        Self::of(clock.local_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::at;

    #[test]
    fn fixed_clock_moves_only_when_set() {
        let clock = FixedClock::new(at("2026-10-18", "08:59"));
        assert_eq!(LocalNow::read(&clock).time.to_string(), "08:59");
        clock.set(at("2026-10-18", "09:01"));
        let now = LocalNow::read(&clock);
        assert_eq!(now.date.to_string(), "2026-10-18");
        assert_eq!(now.time.to_string(), "09:01");
    }

    #[test]
    fn fixed_clock_millis() {
        let clock = FixedClock::new(at("1970-01-01", "00:01"));
        assert_eq!(clock.now_ms(), 60_000);
    }
}
