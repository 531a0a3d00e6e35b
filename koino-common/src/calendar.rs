//! Calendar and timezone boundary conversion
//!
//! All timestamps enter the system as UTC instants. The group operates on a
//! single configured local timezone (expressed as a UTC offset) and a fixed
//! anchor weekday (the weekly meeting day). This module performs the
//! UTC-to-local conversion exactly once, at the boundary; everything past it
//! (classification, streaks) operates on local dates and minutes of day.

use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Timelike, Utc, Weekday};

/// Converts UTC instants into the group's local calendar
#[derive(Debug, Clone, Copy)]
pub struct Calendar {
    offset: FixedOffset,
    anchor: Weekday,
}

impl Calendar {
    /// Build a calendar from a UTC offset in minutes and an anchor weekday
    pub fn new(utc_offset_minutes: i32, anchor: Weekday) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| Error::Config(format!("invalid UTC offset: {} min", utc_offset_minutes)))?;
        Ok(Self { offset, anchor })
    }

    /// Local calendar date of a UTC instant
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    /// Minute of the local day (0..=1439) of a UTC instant
    pub fn minute_of_day(&self, ts: DateTime<Utc>) -> i64 {
        let local = ts.with_timezone(&self.offset);
        (local.hour() * 60 + local.minute()) as i64
    }

    /// Start of the anchor week containing the given local date
    ///
    /// The anchor week runs from the configured weekday (inclusive) to the
    /// day before the next occurrence. Streaks compare these week starts.
    pub fn week_start(&self, date: NaiveDate) -> NaiveDate {
        let days_back = (7 + date.weekday().num_days_from_monday() as i64
            - self.anchor.num_days_from_monday() as i64)
            % 7;
        date - Duration::days(days_back)
    }
}

/// Parse a weekday name from configuration ("sunday", "wed", ...)
pub fn parse_weekday(name: &str) -> Result<Weekday> {
    name.parse::<Weekday>()
        .map_err(|_| Error::Config(format!("invalid anchor weekday: {}", name)))
}
