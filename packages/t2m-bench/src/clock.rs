//! A virtual clock for deterministic temporal testing (spec.md §4
//! VirtualClock, grounded on `bench/tools/clock.py`). The engine always
//! receives `now` as an explicit argument (spec.md §4.6 step 2); this is the
//! one place in the whole workspace allowed to track a mutable "current
//! time" and hand it out.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

use crate::error::Result;

pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
}

impl VirtualClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    /// Advance by an ISO-8601 duration string (e.g. `PT1H`, `P1D`).
    pub fn advance(&self, duration: &str) -> Result<()> {
        let delta = t2m_core::parse_iso_duration(duration)?;
        let mut guard = self.now.lock().unwrap();
        *guard += delta;
        Ok(())
    }

    pub fn set_time(&self, new_time: DateTime<Utc>) {
        *self.now.lock().unwrap() = new_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn advance_moves_time_forward_by_parsed_duration() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = VirtualClock::starting_at(start);
        clock.advance("P1DT2H").unwrap();
        assert_eq!(clock.now(), start + chrono::Duration::hours(26));
    }

    #[test]
    fn two_advances_are_additive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = VirtualClock::starting_at(start);
        clock.advance("PT1H").unwrap();
        clock.advance("PT30M").unwrap();
        assert_eq!(clock.now(), start + chrono::Duration::minutes(90));
    }
}
