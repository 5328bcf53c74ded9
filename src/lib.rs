#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::unreadable_literal)]
#![doc = include_str!("../README.md")]

mod error;
/// Host objects owning a start, an end and a recurrence rule.
pub mod event;
/// The flat key-value representation of a rule.
pub mod mapping;
/// Occurrences of a rule, and iterators to produce them.
pub mod occurrences;
/// Weekdays, optionally qualified with an ordinal.
pub mod weekday;
mod yearinfo;

use std::{collections::BTreeSet, fmt, ops::RangeInclusive, str::FromStr};

use chrono::{NaiveDateTime, Weekday};
use getset::{CopyGetters, Getters};

pub use error::{Error, Result};
pub use mapping::{AsInstant, Field};
pub use occurrences::{Expansion, ExpansionLimits, Iter, expand, expand_with};
pub use weekday::{DayFilter, NthWeekday};
pub use yearinfo::easter;

/// A recurrence rule.
///
/// Every setter validates its input before writing, so a rejected value
/// leaves the field as it was.
#[derive(Getters, CopyGetters, Clone, Debug, PartialEq, Eq)]
pub struct RecurrenceRule {
    /// The anchor of the recurrence. Required to expand.
    #[getset(get_copy = "pub")]
    start: Option<NaiveDateTime>,

    /// At what frequency should this rule reoccur? A rule without one never
    /// recurs.
    #[getset(get_copy = "pub")]
    frequency: Option<Frequency>,

    /// How many frequency units lie between periods.
    #[getset(get_copy = "pub")]
    interval: u32,

    /// The first day of the week, used for week numbers and weekly stepping.
    #[getset(get_copy = "pub")]
    week_start: Weekday,

    /// The number of occurrences to generate.
    #[getset(get_copy = "pub")]
    count: Option<u32>,

    /// The last instant an occurrence may fall on (inclusive).
    #[getset(get_copy = "pub")]
    until: Option<NaiveDateTime>,

    /// Positions to keep from each period's sorted candidates, 1-based,
    /// negative from the end.
    #[getset(get = "pub")]
    by_set_position: BTreeSet<i16>,

    /// Months of the year, 1-12.
    #[getset(get = "pub")]
    by_month: BTreeSet<u8>,

    /// Days of the month, negative from the end of the month.
    #[getset(get = "pub")]
    by_month_day: BTreeSet<i8>,

    /// Days of the year, negative from the end of the year.
    #[getset(get = "pub")]
    by_year_day: BTreeSet<i16>,

    /// Week numbers in the year, negative from the last week.
    #[getset(get = "pub")]
    by_week_number: BTreeSet<i8>,

    /// Weekdays, optionally the nth of them in the period.
    #[getset(get = "pub")]
    by_weekday: BTreeSet<NthWeekday>,

    /// Hours of the day.
    #[getset(get = "pub")]
    by_hour: BTreeSet<u8>,

    /// Minutes of the hour.
    #[getset(get = "pub")]
    by_minute: BTreeSet<u8>,

    /// Seconds of the minute.
    #[getset(get = "pub")]
    by_second: BTreeSet<u8>,

    /// Offsets in days from Easter Sunday.
    #[getset(get = "pub")]
    by_easter: BTreeSet<i16>,
}

const SET_POSITION_RANGE: RangeInclusive<i64> = -366..=366;
const MONTH_RANGE: RangeInclusive<i64> = 1..=12;
const MONTH_DAY_RANGE: RangeInclusive<i64> = -31..=31;
const YEAR_DAY_RANGE: RangeInclusive<i64> = -366..=366;
const WEEK_NUMBER_RANGE: RangeInclusive<i64> = -53..=53;
const HOUR_RANGE: RangeInclusive<i64> = 0..=23;
const MINUTE_RANGE: RangeInclusive<i64> = 0..=59;
const EASTER_RANGE: RangeInclusive<i64> = -366..=366;

impl Default for RecurrenceRule {
    fn default() -> Self {
        Self {
            start: None,
            frequency: None,
            interval: 1,
            week_start: Weekday::Mon,
            count: None,
            until: None,
            by_set_position: BTreeSet::new(),
            by_month: BTreeSet::new(),
            by_month_day: BTreeSet::new(),
            by_year_day: BTreeSet::new(),
            by_week_number: BTreeSet::new(),
            by_weekday: BTreeSet::new(),
            by_hour: BTreeSet::new(),
            by_minute: BTreeSet::new(),
            by_second: BTreeSet::new(),
            by_easter: BTreeSet::new(),
        }
    }
}

impl RecurrenceRule {
    /// Create a new recurrence rule repeating at `frequency` from `start`.
    #[must_use]
    pub fn new(frequency: Frequency, start: NaiveDateTime) -> Self {
        Self {
            start: Some(start),
            frequency: Some(frequency),
            ..Self::default()
        }
    }

    /// Set the anchor of the recurrence.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] if `start` is a string that does not parse.
    pub fn set_start(&mut self, start: impl AsInstant) -> Result<&mut Self> {
        self.start = Some(start.as_instant(Field::Start)?);
        Ok(self)
    }

    /// Remove the anchor of the recurrence.
    pub fn clear_start(&mut self) -> &mut Self {
        self.start = None;
        self
    }

    /// Set, or with [`None`] remove, the frequency.
    pub fn set_frequency(&mut self, frequency: Option<Frequency>) -> &mut Self {
        self.frequency = frequency;
        self
    }

    /// Set the interval between periods.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] if `interval` is zero.
    pub fn set_interval(&mut self, interval: u32) -> Result<&mut Self> {
        if interval == 0 {
            return Err(Error::invalid(Field::Interval, "must be at least 1"));
        }
        self.interval = interval;
        Ok(self)
    }

    /// Set the first day of the week.
    pub fn set_week_start(&mut self, week_start: Weekday) -> &mut Self {
        self.week_start = week_start;
        self
    }

    /// Set, or with [`None`] remove, the number of occurrences.
    ///
    /// Setting a count silently removes any `until`: the most recently set
    /// termination wins.
    pub fn set_count(&mut self, count: Option<u32>) -> &mut Self {
        if count.is_some() {
            self.until = None;
        }
        self.count = count;
        self
    }

    /// Set the inclusive end of the recurrence.
    ///
    /// Setting `until` silently removes any `count`: the most recently set
    /// termination wins.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] if `until` is a string that does not parse.
    pub fn set_until(&mut self, until: impl AsInstant) -> Result<&mut Self> {
        self.until = Some(until.as_instant(Field::Until)?);
        self.count = None;
        Ok(self)
    }

    /// Remove the end of the recurrence.
    pub fn clear_until(&mut self) -> &mut Self {
        self.until = None;
        self
    }

    /// Select positions from each period's candidates. An empty iterator
    /// removes the filter.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for zero or values beyond ±366.
    pub fn set_by_set_position<I>(&mut self, positions: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_set_position =
            normalize(Field::BySetPosition, positions, SET_POSITION_RANGE, false)?;
        Ok(self)
    }

    /// Restrict to months of the year.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for values outside 1-12.
    pub fn set_by_month<I>(&mut self, months: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_month = normalize(Field::ByMonth, months, MONTH_RANGE, false)?;
        Ok(self)
    }

    /// Restrict to days of the month.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for zero or values beyond ±31.
    pub fn set_by_month_day<I>(&mut self, days: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_month_day = normalize(Field::ByMonthDay, days, MONTH_DAY_RANGE, false)?;
        Ok(self)
    }

    /// Restrict to days of the year.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for zero or values beyond ±366.
    pub fn set_by_year_day<I>(&mut self, days: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_year_day = normalize(Field::ByYearDay, days, YEAR_DAY_RANGE, false)?;
        Ok(self)
    }

    /// Restrict to week numbers, as counted with [`Self::week_start`].
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for zero or values beyond ±53.
    pub fn set_by_week_number<I>(&mut self, weeks: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_week_number = normalize(Field::ByWeekNumber, weeks, WEEK_NUMBER_RANGE, false)?;
        Ok(self)
    }

    /// Restrict to weekdays. Accepts [`Weekday`]s as well as [`NthWeekday`]s.
    pub fn set_by_weekday<I>(&mut self, days: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<NthWeekday>,
    {
        self.by_weekday = days.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to hours of the day.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for values outside 0-23.
    pub fn set_by_hour<I>(&mut self, hours: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_hour = normalize(Field::ByHour, hours, HOUR_RANGE, true)?;
        Ok(self)
    }

    /// Restrict to minutes of the hour.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for values outside 0-59.
    pub fn set_by_minute<I>(&mut self, minutes: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_minute = normalize(Field::ByMinute, minutes, MINUTE_RANGE, true)?;
        Ok(self)
    }

    /// Restrict to seconds of the minute.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for values outside 0-59.
    pub fn set_by_second<I>(&mut self, seconds: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_second = normalize(Field::BySecond, seconds, MINUTE_RANGE, true)?;
        Ok(self)
    }

    /// Restrict to days offset from Easter Sunday. `0` is Easter Sunday itself.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for offsets beyond ±366.
    pub fn set_by_easter<I>(&mut self, offsets: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        self.by_easter = normalize(Field::ByEaster, offsets, EASTER_RANGE, true)?;
        Ok(self)
    }

    /// Does this rule describe more than a single instant?
    ///
    /// A rule recurs when it has a frequency and its `until` (if any) differs
    /// from its start. A recurring rule with neither `count` nor `until` is
    /// open-ended, see [`Self::is_bounded`].
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.frequency.is_some() && self.until.is_none_or(|until| Some(until) != self.start)
    }

    /// Does this rule terminate on its own, through `count` or `until`?
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.count.is_some() || self.until.is_some()
    }

    /// Create an iterator over the occurrences of this rule.
    ///
    /// > **Warning! This iterator may be infinite!** Use [`expand`] or
    /// > [`Iterator::take`] for open-ended rules.
    ///
    /// ## Errors
    ///
    /// [`Error::MissingStart`] if the rule has no start.
    pub fn iter(&self) -> Result<Iter> {
        Iter::new(self, &ExpansionLimits::default())
    }

    /// Expand this rule into its occurrences, generating at most `cap` of
    /// them. See [`expand`].
    ///
    /// ## Errors
    ///
    /// See [`expand`].
    pub fn expand(&self, cap: Option<usize>) -> Result<Expansion> {
        expand(self, cap)
    }
}

fn normalize<T, I>(
    field: Field,
    values: I,
    range: RangeInclusive<i64>,
    allow_zero: bool,
) -> Result<BTreeSet<T>>
where
    T: TryFrom<i64> + Ord,
    I: IntoIterator,
    I::Item: Into<i64>,
{
    values
        .into_iter()
        .map(|value| {
            let value = value.into();
            if !range.contains(&value) {
                return Err(Error::invalid(
                    field,
                    format!(
                        "{value} is not within {}..={}",
                        range.start(),
                        range.end()
                    ),
                ));
            }
            if value == 0 && !allow_zero {
                return Err(Error::invalid(field, "0 is not allowed"));
            }
            T::try_from(value)
                .map_err(|_| Error::invalid(field, format!("{value} is out of range")))
        })
        .collect()
}

/// The frequency of a recurring rule, from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Frequency {
    /// Reoccur yearly
    Yearly = 0,
    /// Reoccur monthly
    Monthly = 1,
    /// Reoccur weekly
    Weekly = 2,
    /// Reoccur daily
    Daily = 3,
    /// Reoccur hourly
    Hourly = 4,
    /// Reoccur every minute
    Minutely = 5,
    /// Reoccur every second
    Secondly = 6,
}

impl Frequency {
    /// All frequencies, coarsest first.
    pub const ALL: [Self; 7] = [
        Self::Yearly,
        Self::Monthly,
        Self::Weekly,
        Self::Daily,
        Self::Hourly,
        Self::Minutely,
        Self::Secondly,
    ];

    /// The number used for this frequency in the flat mapping.
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// The upper-case name, e.g. `WEEKLY`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yearly => "YEARLY",
            Self::Monthly => "MONTHLY",
            Self::Weekly => "WEEKLY",
            Self::Daily => "DAILY",
            Self::Hourly => "HOURLY",
            Self::Minutely => "MINUTELY",
            Self::Secondly => "SECONDLY",
        }
    }
}

impl TryFrom<i64> for Frequency {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| Error::invalid(Field::Frequency, format!("{value} is not within 0..=6")))
    }
}

impl FromStr for Frequency {
    type Err = Error;

    /// Accepts names in any case, or the mapping number.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(number) = s.parse::<i64>() {
            return Self::try_from(number);
        }
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid(Field::Frequency, format!("`{s}` is not a frequency")))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
