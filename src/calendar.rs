//! Calendar-day policy.
//!
//! Completions are keyed by calendar date, never by timestamp. Day boundaries
//! are UTC. Components read `today()` once at the start of an operation and
//! carry that value through; they never re-derive it mid-operation.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use std::sync::Mutex;

/// Source of the current instant and calendar date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock pinned to noon UTC of the given date.
    pub fn at_date(date: NaiveDate) -> Self {
        let noon = date
            .and_hms_opt(12, 0, 0)
            .unwrap_or_default()
            .and_utc();
        Self::new(noon)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance_days(&self, days: u64) {
        if let Ok(mut guard) = self.now.lock() {
            if let Some(next) = guard.checked_add_days(Days::new(days)) {
                *guard = next;
            }
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// `date` minus `days`, saturating at the minimum representable date.
pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days))
        .unwrap_or(NaiveDate::MIN)
}

/// `date` minus `months` calendar months (clamped to month end).
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    // Accept full ISO-8601 timestamps by truncating to the date component.
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fixed_clock_today_ignores_time_of_day() {
        let clock = FixedClock::new(
            date(2024, 3, 10)
                .and_hms_opt(23, 59, 59)
                .unwrap()
                .and_utc(),
        );
        assert_eq!(clock.today(), date(2024, 3, 10));
        clock.advance_days(1);
        assert_eq!(clock.today(), date(2024, 3, 11));
    }

    #[test]
    fn test_month_arithmetic_clamps() {
        assert_eq!(months_before(date(2024, 3, 31), 1), date(2024, 2, 29));
        assert_eq!(days_before(date(2024, 3, 1), 1), date(2024, 2, 29));
    }

    #[test]
    fn test_parse_date_accepts_timestamps() {
        assert_eq!(parse_date("2024-05-06"), Some(date(2024, 5, 6)));
        assert_eq!(parse_date("2024-05-06T18:00:00Z"), Some(date(2024, 5, 6)));
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(format_date(date(2024, 5, 6)), "2024-05-06");
    }
}
