use chrono::{Datelike, Duration, NaiveDate, Weekday};
use log::trace;
use serde::{Deserialize, Serialize};
use std::{fmt, iter};
use thiserror::Error;

// These are tedious arrays to aid the lookup of month lengths. Indexed by zero-based
// month.
const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const MONTH_LENGTHS_LEAP: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// The furthest number of calendar months a forward search will walk before giving up.
/// 29 February is the rarest valid date and can be 8 years from the previous one
/// (e.g. 2096 to 2104), so 9 years covers every valid rule.
const MAX_MONTH_SEARCH: usize = 12 * 9;

/// Records when a recurring obligation falls due.
///
/// Each variant carries only the parameters it needs, so a weekly rule can never
/// carry a day of month. Payloads are public for pattern matching; build rules with
/// the checked constructors (or call [`RecurrenceRule::validate`]) so that
/// out-of-range parameters are rejected before they reach any date arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Every day is an occurrence
    Daily,
    /// Every week on this day (Sunday = 0, Saturday = 6)
    Weekly { day_of_week: u32 },
    /// Every month on this day (1 - 31). Months too short for the day are skipped.
    Monthly { day_of_month: u32 },
    /// The final day of every month
    MonthlyLastDay,
    /// Every quarter, in the nth month of the quarter (1 - 3) on this day
    Quarterly {
        month_in_quarter: u32,
        day_of_month: u32,
    },
    /// Every year in this month (January = 1, December = 12) on this day
    Yearly { month_of_year: u32, day_of_month: u32 },
    /// Every n days. Without an anchor the interval is counted from the reference
    /// date on every evaluation; with one, occurrences sit at `anchor + k * days`.
    CustomInterval {
        days: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor: Option<NaiveDate>,
    },
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum RuleError {
    #[error("day of week must be between 0 (Sunday) and 6 (Saturday), got {0}")]
    DayOfWeek(u32),
    #[error("day of month must be between 1 and 31, got {0}")]
    DayOfMonth(u32),
    #[error("month in quarter must be between 1 and 3, got {0}")]
    MonthInQuarter(u32),
    #[error("month of year must be between 1 and 12, got {0}")]
    MonthOfYear(u32),
    #[error("a custom interval must be at least one day")]
    Interval,
    #[error("day {1} never occurs in month {0}")]
    NeverOccurs(u32, u32), // month, day
}

impl RecurrenceRule {
    pub fn weekly(day_of_week: u32) -> Result<Self, RuleError> {
        RecurrenceRule::Weekly { day_of_week }.validated()
    }

    pub fn monthly(day_of_month: u32) -> Result<Self, RuleError> {
        RecurrenceRule::Monthly { day_of_month }.validated()
    }

    pub fn quarterly(month_in_quarter: u32, day_of_month: u32) -> Result<Self, RuleError> {
        RecurrenceRule::Quarterly {
            month_in_quarter,
            day_of_month,
        }
        .validated()
    }

    pub fn yearly(month_of_year: u32, day_of_month: u32) -> Result<Self, RuleError> {
        RecurrenceRule::Yearly {
            month_of_year,
            day_of_month,
        }
        .validated()
    }

    pub fn custom_interval(days: u32) -> Result<Self, RuleError> {
        RecurrenceRule::CustomInterval { days, anchor: None }.validated()
    }

    /// A custom interval whose occurrences are fixed to `anchor + k * days`, so the
    /// schedule does not drift with the reference date.
    pub fn anchored_interval(days: u32, anchor: NaiveDate) -> Result<Self, RuleError> {
        RecurrenceRule::CustomInterval {
            days,
            anchor: Some(anchor),
        }
        .validated()
    }

    /// Checks every parameter against its domain.
    pub fn validate(&self) -> Result<(), RuleError> {
        match *self {
            RecurrenceRule::Daily | RecurrenceRule::MonthlyLastDay => Ok(()),
            RecurrenceRule::Weekly { day_of_week } if day_of_week > 6 => {
                Err(RuleError::DayOfWeek(day_of_week))
            }
            RecurrenceRule::Weekly { .. } => Ok(()),
            RecurrenceRule::Monthly { day_of_month } => check_day_of_month(day_of_month),
            RecurrenceRule::Quarterly {
                month_in_quarter,
                day_of_month,
            } => {
                if !(1..=3).contains(&month_in_quarter) {
                    return Err(RuleError::MonthInQuarter(month_in_quarter));
                }
                check_day_of_month(day_of_month)
            }
            RecurrenceRule::Yearly {
                month_of_year,
                day_of_month,
            } => {
                if !(1..=12).contains(&month_of_year) {
                    return Err(RuleError::MonthOfYear(month_of_year));
                }
                check_day_of_month(day_of_month)?;

                // A yearly rule only ever looks at one month, so a day that month
                // never has (31 April, 30 February) would never occur at all.
                if day_of_month > MONTH_LENGTHS_LEAP[(month_of_year - 1) as usize] {
                    return Err(RuleError::NeverOccurs(month_of_year, day_of_month));
                }
                Ok(())
            }
            RecurrenceRule::CustomInterval { days: 0, .. } => Err(RuleError::Interval),
            RecurrenceRule::CustomInterval { .. } => Ok(()),
        }
    }

    fn validated(self) -> Result<Self, RuleError> {
        self.validate()?;
        Ok(self)
    }

    /// Returns the earliest occurrence on or after `reference`.
    ///
    /// A reference date that is itself an occurrence is returned unchanged. Calendar
    /// rules never clamp: a day of month that doesn't exist in a month (e.g. 31 in
    /// February) skips that month entirely. `None` is only returned for rules that
    /// fail [`RecurrenceRule::validate`], or when the result would fall outside the
    /// representable date range.
    pub fn next_occurrence(&self, reference: NaiveDate) -> Option<NaiveDate> {
        let next = match *self {
            RecurrenceRule::Daily => Some(reference),
            RecurrenceRule::Weekly { day_of_week } => {
                if day_of_week > 6 {
                    return None;
                }
                let weekday = reference.weekday().num_days_from_sunday();
                add_days(reference, ((day_of_week + 7 - weekday) % 7) as i64)
            }
            RecurrenceRule::CustomInterval { days, anchor: None } => {
                add_days(reference, days as i64)
            }
            RecurrenceRule::CustomInterval {
                days,
                anchor: Some(anchor),
            } => next_on_lattice(anchor, days, reference),
            RecurrenceRule::Monthly { .. }
            | RecurrenceRule::MonthlyLastDay
            | RecurrenceRule::Quarterly { .. }
            | RecurrenceRule::Yearly { .. } => months_from(reference.year(), reference.month())
                .take(MAX_MONTH_SEARCH)
                .filter_map(|(year, month)| self.date_in_month(year, month))
                .find(|date| *date >= reference),
        };

        trace!("next occurrence of {} from {}: {:?}", self, reference, next);
        next
    }

    /// Returns every occurrence within `start..=end`, in ascending order.
    ///
    /// Month-skipping follows the same policy as [`RecurrenceRule::next_occurrence`].
    /// An unanchored custom interval counts from `start`, so its first occurrence is
    /// `start + days`.
    pub fn occurrences_within(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }

        match *self {
            RecurrenceRule::Daily => dates_at_interval(start, end, 1),
            RecurrenceRule::Weekly { .. } => self
                .next_occurrence(start)
                .map(|first| dates_at_interval(first, end, 7))
                .unwrap_or_default(),
            RecurrenceRule::CustomInterval { days, .. } => match self.next_occurrence(start) {
                Some(first) if days > 0 => dates_at_interval(first, end, days as i64),
                _ => Vec::new(),
            },
            RecurrenceRule::Monthly { .. }
            | RecurrenceRule::MonthlyLastDay
            | RecurrenceRule::Quarterly { .. }
            | RecurrenceRule::Yearly { .. } => {
                let last_month = (end.year(), end.month());

                // There is at most one occurrence per calendar month, so walk the
                // months the interval touches and keep those landing inside it.
                months_from(start.year(), start.month())
                    .take_while(|month| *month <= last_month)
                    .filter_map(|(year, month)| self.date_in_month(year, month))
                    .filter(|date| *date >= start && *date <= end)
                    .collect()
            }
        }
    }

    // The single occurrence of a calendar rule in the given month, if there is one.
    fn date_in_month(&self, year: i32, month: u32) -> Option<NaiveDate> {
        match *self {
            RecurrenceRule::Monthly { day_of_month } => {
                NaiveDate::from_ymd_opt(year, month, day_of_month)
            }
            RecurrenceRule::MonthlyLastDay => {
                NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)?)
            }
            RecurrenceRule::Quarterly {
                month_in_quarter,
                day_of_month,
            } if (month - 1) % 3 + 1 == month_in_quarter => {
                NaiveDate::from_ymd_opt(year, month, day_of_month)
            }
            RecurrenceRule::Yearly {
                month_of_year,
                day_of_month,
            } if month == month_of_year => NaiveDate::from_ymd_opt(year, month, day_of_month),
            _ => None,
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RecurrenceRule::Daily => write!(f, "daily"),
            RecurrenceRule::Weekly { day_of_week } => match weekday_from_sunday(day_of_week) {
                Some(day) => write!(f, "weekly on {:?}", day),
                None => write!(f, "weekly on day {}", day_of_week),
            },
            RecurrenceRule::Monthly { day_of_month } => {
                write!(f, "monthly on day {}", day_of_month)
            }
            RecurrenceRule::MonthlyLastDay => write!(f, "monthly on the last day"),
            RecurrenceRule::Quarterly {
                month_in_quarter,
                day_of_month,
            } => write!(
                f,
                "quarterly in month {} on day {}",
                month_in_quarter, day_of_month
            ),
            RecurrenceRule::Yearly {
                month_of_year,
                day_of_month,
            } => write!(f, "yearly on {:02}-{:02}", month_of_year, day_of_month),
            RecurrenceRule::CustomInterval { days, anchor: None } => {
                write!(f, "every {} days", days)
            }
            RecurrenceRule::CustomInterval {
                days,
                anchor: Some(anchor),
            } => write!(f, "every {} days from {}", days, anchor),
        }
    }
}

/// Number of days in a month (January = 1), accounting for leap years. `None` for a
/// month outside 1 - 12.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let index = month.checked_sub(1)? as usize;
    if is_leap_year(year) {
        MONTH_LENGTHS_LEAP.get(index).copied()
    } else {
        MONTH_LENGTHS.get(index).copied()
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn check_day_of_month(day: u32) -> Result<(), RuleError> {
    if (1..=31).contains(&day) {
        Ok(())
    } else {
        Err(RuleError::DayOfMonth(day))
    }
}

fn weekday_from_sunday(day: u32) -> Option<Weekday> {
    match day {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
}

// Smallest `anchor + k * days` (k >= 0) that is not before `reference`
fn next_on_lattice(anchor: NaiveDate, days: u32, reference: NaiveDate) -> Option<NaiveDate> {
    if anchor >= reference {
        return Some(anchor);
    }
    if days == 0 {
        return None;
    }

    let days = days as i64;
    let elapsed = (reference - anchor).num_days();
    let periods = (elapsed + days - 1) / days;
    add_days(anchor, periods * days)
}

// Get dates at given interval (in days) from start until end date
fn dates_at_interval(start: NaiveDate, end: NaiveDate, interval: i64) -> Vec<NaiveDate> {
    iter::successors(Some(start), |date| add_days(*date, interval))
        .take_while(|date| *date <= end)
        .collect()
}

// Every (year, month) pair from the given month onwards
fn months_from(year: i32, month: u32) -> impl Iterator<Item = (i32, u32)> {
    iter::successors(Some((year, month)), |&(year, month)| {
        if month == 12 {
            Some((year + 1, 1))
        } else {
            Some((year, month + 1))
        }
    })
}
