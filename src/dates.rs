//! The lookback window sent to the PIT endpoint.

use chrono::{NaiveDate, TimeDelta};
use std::fmt::{Display, Formatter};

/// The number of days the window reaches back from today.
pub const LOOKBACK_DAYS: u32 = 120;

/// The date format the endpoint expects, e.g. `01-03-2024`.
const DATE_FORMAT: &str = "%d-%m-%Y";

/// An immutable pair of calendar dates. `from` is the earlier date.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    /// The default window ending on `to`.
    pub fn ending(to: NaiveDate) -> Self {
        let from = to - TimeDelta::days(i64::from(LOOKBACK_DAYS));
        Self { from, to }
    }

    /// A window of `days` days ending on `to`, or `None` when its start is before the earliest
    /// representable date.
    pub fn lookback(to: NaiveDate, days: u32) -> Option<Self> {
        let from = to.checked_sub_signed(TimeDelta::days(i64::from(days)))?;
        Some(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    /// `from` rendered as `DD-MM-YYYY`.
    pub fn from_param(&self) -> String {
        self.from.format(DATE_FORMAT).to_string()
    }

    /// `to` rendered as `DD-MM-YYYY`.
    pub fn to_param(&self) -> String {
        self.to.format(DATE_FORMAT).to_string()
    }

    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days()
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.from_param(), self.to_param())
    }
}
