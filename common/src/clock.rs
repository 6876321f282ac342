use chrono::{DateTime, Datelike, FixedOffset, Timelike};

use crate::{ports::ClockSource, schedule::DayOfWeek};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub weekday: DayOfWeek,
}

impl LocalTime {
    pub fn from_datetime(now: &DateTime<FixedOffset>) -> Self {
        Self {
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            weekday: DayOfWeek::from_chrono(now.weekday()),
        }
    }

    pub fn weekday_index(&self) -> u8 {
        self.weekday.index()
    }

    /// Unique key for the current minute within the week.
    pub fn minute_of_week(&self) -> u16 {
        self.weekday.index() as u16 * 24 * 60 + self.hour as u16 * 60 + self.minute as u16
    }
}

/// Caches one reading of the clock source per loop tick.
#[derive(Debug)]
pub struct Clock<C> {
    source: C,
    current: Option<LocalTime>,
}

impl<C: ClockSource> Clock<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            current: None,
        }
    }

    pub fn refresh(&mut self) -> Option<LocalTime> {
        self.current = self.source.now().map(|now| LocalTime::from_datetime(&now));
        self.current
    }

    pub fn now(&self) -> Option<LocalTime> {
        self.current
    }

    pub fn is_synchronized(&self) -> bool {
        self.current.is_some()
    }

    pub fn source_mut(&mut self) -> &mut C {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::ManualClock;

    #[test]
    fn splits_local_time_fields() {
        let now = FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 2, 7, 30, 4)
            .unwrap();

        let local = LocalTime::from_datetime(&now);

        // 2026-03-02 is a Monday.
        assert_eq!(
            local,
            LocalTime {
                hour: 7,
                minute: 30,
                second: 4,
                weekday: DayOfWeek::Mon,
            }
        );
        assert_eq!(local.weekday_index(), 1);
        assert_eq!(local.minute_of_week(), 24 * 60 + 7 * 60 + 30);
    }

    #[test]
    fn unsynchronized_until_source_reports_time() {
        let mut clock = Clock::new(ManualClock::unsynchronized());

        assert_eq!(clock.refresh(), None);
        assert!(!clock.is_synchronized());

        clock.source_mut().set(2026, 3, 2, 7, 30, 0);
        assert!(clock.refresh().is_some());
        assert!(clock.is_synchronized());
    }
}
