// src/period.rs

use chrono::{Datelike, Months, NaiveDate};
use std::{fmt, str::FromStr};

use crate::error::SyncError;

/// Number of monthly periods requested per run.
pub const WINDOW_LEN: u32 = 6;

/// Largest accepted `year_offset`.
pub const MAX_YEAR_OFFSET: u32 = 1000;

/// A calendar month in DHIS2's `YYYYMM` form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SyncError::Config(format!("period {:?} is not YYYYMM", s));
        if s.len() != 6 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        let year: i32 = s[..4].parse().map_err(|_| bad())?;
        let month: u32 = s[4..].parse().map_err(|_| bad())?;
        Period::new(year, month).ok_or_else(bad)
    }
}

/// Six consecutive months, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodWindow(Vec<Period>);

impl PeriodWindow {
    pub fn periods(&self) -> &[Period] {
        &self.0
    }

    /// `YYYYMM` strings as used on the wire.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Period::to_string).collect()
    }
}

/// Compute the window of full months preceding `today` shifted back by
/// `year_offset` years.
///
/// The anchor is the first of the shifted month; the window ends with the
/// month before it. Stepping uses calendar months, so no month is skipped or
/// repeated regardless of month length. Fails if the offset is above
/// [`MAX_YEAR_OFFSET`] or reaches past the earliest representable date.
pub fn period_window(today: NaiveDate, year_offset: u32) -> Result<PeriodWindow, SyncError> {
    let out_of_range = || {
        SyncError::Config(format!(
            "year_offset {} puts the window before the earliest supported date",
            year_offset
        ))
    };
    if year_offset > MAX_YEAR_OFFSET {
        return Err(out_of_range());
    }

    // Feb 29 minus whole years lands on Feb 28 when needed.
    let shifted = today
        .checked_sub_months(Months::new(year_offset * 12))
        .ok_or_else(out_of_range)?;
    let anchor = shifted.with_day(1).ok_or_else(out_of_range)?;

    let mut periods = (1..=WINDOW_LEN)
        .map(|back| {
            anchor
                .checked_sub_months(Months::new(back))
                .map(Period::of)
                .ok_or_else(out_of_range)
        })
        .collect::<Result<Vec<_>, _>>()?;
    periods.reverse();
    Ok(PeriodWindow(periods))
}
