//! Trading calendar: weekdays minus exchange holidays.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{JournalError, Result};

#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    /// Calendar with weekends as the only non-trading days
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Parse a holiday list: one `YYYY-MM-DD` per line, blank lines and
    /// `#` comments ignored.
    pub fn parse_holidays(content: &str) -> Result<Self> {
        let mut holidays = BTreeSet::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let date = NaiveDate::parse_from_str(line, "%Y-%m-%d").map_err(|e| {
                JournalError::validation("holidays", format!("line {}: {}", idx + 1, e))
            })?;
            holidays.insert(date);
        }
        Ok(Self { holidays })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            JournalError::Internal(format!("cannot read holiday file {}: {}", path.display(), e))
        })?;
        let calendar = Self::parse_holidays(&content)?;
        tracing::info!("Loaded {} holidays from {}", calendar.holidays.len(), path.display());
        Ok(calendar)
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Trading days in `[start, end]`, both ends inclusive. Zero when
    /// `end < start`.
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        if end < start {
            return 0;
        }

        // Whole weeks contribute five weekdays each; walk the remainder.
        let total_days = (end - start).num_days() + 1;
        let full_weeks = total_days / 7;
        let mut weekdays = full_weeks * 5;
        let mut day = start + Duration::days(full_weeks * 7);
        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                weekdays += 1;
            }
            day += Duration::days(1);
        }

        let holidays = self
            .holidays
            .range(start..=end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .count() as i64;

        weekdays - holidays
    }

    /// Latest trading day strictly before `date`
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date - Duration::days(1);
        while !self.is_trading_day(day) {
            day -= Duration::days(1);
        }
        day
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_weekends_are_not_trading_days() {
        let cal = TradingCalendar::new();
        assert!(cal.is_trading_day(d(2025, 3, 7))); // Friday
        assert!(!cal.is_trading_day(d(2025, 3, 8)));
        assert!(!cal.is_trading_day(d(2025, 3, 9)));
    }

    #[test]
    fn test_trading_days_between_inclusive() {
        let cal = TradingCalendar::new();
        // Mon..Fri
        assert_eq!(cal.trading_days_between(d(2025, 3, 3), d(2025, 3, 7)), 5);
        // same day
        assert_eq!(cal.trading_days_between(d(2025, 3, 3), d(2025, 3, 3)), 1);
        // Mon..next Mon spans a weekend
        assert_eq!(cal.trading_days_between(d(2025, 3, 3), d(2025, 3, 10)), 6);
        // Sat..Sun
        assert_eq!(cal.trading_days_between(d(2025, 3, 8), d(2025, 3, 9)), 0);
        assert_eq!(cal.trading_days_between(d(2025, 3, 10), d(2025, 3, 3)), 0);
    }

    #[test]
    fn test_long_span_matches_day_walk() {
        let cal = TradingCalendar::with_holidays([d(2025, 1, 1), d(2025, 5, 1), d(2025, 5, 3)]);
        let start = d(2024, 12, 20);
        let end = d(2025, 6, 17);

        let mut walked = 0;
        let mut day = start;
        while day <= end {
            if cal.is_trading_day(day) {
                walked += 1;
            }
            day += Duration::days(1);
        }
        assert_eq!(cal.trading_days_between(start, end), walked);
    }

    #[test]
    fn test_parse_holidays() {
        let content = "# Spring festival\n2025-01-28\n2025-01-29  # eve\n\n2025-01-30\n";
        let cal = TradingCalendar::parse_holidays(content).unwrap();
        assert_eq!(cal.holiday_count(), 3);
        assert!(!cal.is_trading_day(d(2025, 1, 29)));
        assert_eq!(cal.previous_trading_day(d(2025, 1, 31)), d(2025, 1, 27));
    }

    #[test]
    fn test_parse_holidays_rejects_garbage() {
        let err = TradingCalendar::parse_holidays("2025-13-01").unwrap_err();
        assert!(matches!(err, JournalError::Validation { .. }));
    }
}
