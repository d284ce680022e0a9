//! # Fixed Calendar
//!
//! 24 hours a day, 30 days a month, 12 months a year: 360 days, 8640 hours.
//! Every year has the same length, so date math is pure integer division
//! with no leap-year branch.
//!
//! Tick `n` is the `n`-th simulated hour after midnight on 1 January of the
//! start year. Tick 0 is the start instant itself; the first executed tick is 1.

use std::fmt;

/// Hours per day.
pub const HOURS_PER_DAY: u64 = 24;
/// Days per month.
pub const DAYS_PER_MONTH: u64 = 30;
/// Months per year.
pub const MONTHS_PER_YEAR: u64 = 12;
/// Hours per month.
pub const HOURS_PER_MONTH: u64 = HOURS_PER_DAY * DAYS_PER_MONTH;
/// Hours per year.
pub const HOURS_PER_YEAR: u64 = HOURS_PER_MONTH * MONTHS_PER_YEAR;

/// A calendar instant with hour resolution.
///
/// Field order makes the derived `Ord` chronological.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameDate {
    /// Year.
    pub year: i32,
    /// Month, 1..=12.
    pub month: u8,
    /// Day of month, 1..=30.
    pub day: u8,
    /// Hour of day, 0..=23.
    pub hour: u8,
}

impl GameDate {
    /// Date of `tick` hours after the start of `start_year`.
    #[must_use]
    pub fn from_tick(start_year: i32, tick: u64) -> Self {
        let years = i32::try_from(tick / HOURS_PER_YEAR).unwrap_or(i32::MAX);
        let in_year = tick % HOURS_PER_YEAR;
        Self {
            year: start_year.saturating_add(years),
            month: (in_year / HOURS_PER_MONTH) as u8 + 1,
            day: ((in_year % HOURS_PER_MONTH) / HOURS_PER_DAY) as u8 + 1,
            hour: (in_year % HOURS_PER_DAY) as u8,
        }
    }

    /// Tick of this date relative to `start_year`, `None` if before it or
    /// if a field is out of range.
    #[must_use]
    pub fn to_tick(&self, start_year: i32) -> Option<u64> {
        let valid = (1..=MONTHS_PER_YEAR).contains(&u64::from(self.month))
            && (1..=DAYS_PER_MONTH).contains(&u64::from(self.day))
            && u64::from(self.hour) < HOURS_PER_DAY;
        if !valid {
            return None;
        }
        let years = u64::try_from(i64::from(self.year) - i64::from(start_year)).ok()?;
        Some(
            years * HOURS_PER_YEAR
                + (u64::from(self.month) - 1) * HOURS_PER_MONTH
                + (u64::from(self.day) - 1) * HOURS_PER_DAY
                + u64::from(self.hour),
        )
    }

    /// Midnight.
    #[inline]
    #[must_use]
    pub const fn is_day_start(&self) -> bool {
        self.hour == 0
    }

    /// Midnight on the 1st.
    #[inline]
    #[must_use]
    pub const fn is_month_start(&self) -> bool {
        self.is_day_start() && self.day == 1
    }

    /// Midnight on 1 January.
    #[inline]
    #[must_use]
    pub const fn is_year_start(&self) -> bool {
        self.is_month_start() && self.month == 1
    }
}

impl fmt::Display for GameDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}.{:02} {:02}:00",
            self.year, self.month, self.day, self.hour
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_length_divides_evenly() {
        assert_eq!(HOURS_PER_YEAR, 8640);
        assert_eq!(HOURS_PER_YEAR % MONTHS_PER_YEAR, 0);
        assert_eq!(HOURS_PER_MONTH % DAYS_PER_MONTH, 0);
    }

    #[test]
    fn test_from_tick() {
        let start = GameDate::from_tick(1444, 0);
        assert_eq!(start, GameDate { year: 1444, month: 1, day: 1, hour: 0 });
        assert!(start.is_year_start());

        let date = GameDate::from_tick(1444, 25);
        assert_eq!(date, GameDate { year: 1444, month: 1, day: 2, hour: 1 });
        assert!(!date.is_day_start());

        let month = GameDate::from_tick(1444, HOURS_PER_MONTH);
        assert_eq!((month.month, month.day, month.hour), (2, 1, 0));
        assert!(month.is_month_start() && !month.is_year_start());

        let last = GameDate::from_tick(1444, HOURS_PER_YEAR - 1);
        assert_eq!(last, GameDate { year: 1444, month: 12, day: 30, hour: 23 });
        assert!(GameDate::from_tick(1444, HOURS_PER_YEAR).is_year_start());
    }

    #[test]
    fn test_to_tick_inverts_from_tick() {
        for tick in [0, 1, 23, 24, 719, 720, 8639, 8640, 100_000] {
            assert_eq!(GameDate::from_tick(1444, tick).to_tick(1444), Some(tick));
        }
        let before = GameDate { year: 1443, month: 12, day: 30, hour: 23 };
        assert_eq!(before.to_tick(1444), None);
        let bad = GameDate { year: 1444, month: 13, day: 1, hour: 0 };
        assert_eq!(bad.to_tick(1444), None);
    }

    #[test]
    fn test_display_and_order() {
        let date = GameDate::from_tick(1444, 11 * HOURS_PER_DAY + 7);
        assert_eq!(date.to_string(), "1444.01.12 07:00");
        assert!(GameDate::from_tick(1444, 5) < GameDate::from_tick(1444, 6));
    }
}
