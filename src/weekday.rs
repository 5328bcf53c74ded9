use std::{cmp::Ordering, fmt, num::NonZeroI8, str::FromStr};

use bitflags::bitflags;
use chrono::Weekday;
use getset::CopyGetters;

use crate::{Error, mapping::Field};

/// The largest absolute ordinal a weekday may carry (the 53rd week of a year).
pub const MAX_ORDINAL: i8 = 53;

bitflags! {
    /// Filter by days of the week. Bit `n` is set for the weekday `n` days
    /// from Monday.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct DayFilter: u8 {
        /// Monday
        const MONDAY = 0b0000001;
        /// Tuesday
        const TUESDAY = 0b0000010;
        /// Wednesday
        const WEDNESDAY = 0b0000100;
        /// Thursday
        const THURSDAY = 0b0001000;
        /// Friday
        const FRIDAY = 0b0010000;
        /// Saturday
        const SATURDAY = 0b0100000;
        /// Sunday
        const SUNDAY = 0b1000000;

        /// Every day of the week.
        const EVERYDAY = Self::WEEKDAYS.bits() | Self::WEEKENDS.bits();
        /// Only weekdays
        const WEEKDAYS = Self::MONDAY.bits()
                        | Self::TUESDAY.bits()
                        | Self::WEDNESDAY.bits()
                        | Self::THURSDAY.bits()
                        | Self::FRIDAY.bits();
        /// Only weekends
        const WEEKENDS = Self::SATURDAY.bits()
                        | Self::SUNDAY.bits();
    }
}

impl DayFilter {
    /// The filter matching exactly one weekday.
    #[must_use]
    pub fn from_weekday(day: Weekday) -> Self {
        Self::from_bits_truncate(1 << day.num_days_from_monday())
    }

    /// Does this filter let `day` through?
    #[must_use]
    pub fn matches(self, day: Weekday) -> bool {
        self.contains(Self::from_weekday(day))
    }
}

/// Resolve a zero-based, Monday-first index into a [`Weekday`].
#[must_use]
pub fn weekday_from_index(index: i64) -> Option<Weekday> {
    u8::try_from(index)
        .ok()
        .and_then(|i| Weekday::try_from(i).ok())
}

/// Parse a weekday from its full name, its two-letter abbreviation or its
/// Monday-first index, ignoring case.
#[must_use]
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    let s = s.trim().to_ascii_uppercase();
    Some(match s.as_str() {
        "MO" | "MONDAY" => Weekday::Mon,
        "TU" | "TUESDAY" => Weekday::Tue,
        "WE" | "WEDNESDAY" => Weekday::Wed,
        "TH" | "THURSDAY" => Weekday::Thu,
        "FR" | "FRIDAY" => Weekday::Fri,
        "SA" | "SATURDAY" => Weekday::Sat,
        "SU" | "SUNDAY" => Weekday::Sun,
        _ => return s.parse().ok().and_then(weekday_from_index),
    })
}

/// The two-letter abbreviation of a weekday, e.g. `TU`.
#[must_use]
pub fn weekday_abbreviation(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

/// A weekday, optionally qualified with which occurrence of it within the
/// period is meant. `2TU` is the second Tuesday, `-1FR` the last Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct NthWeekday {
    /// The day of the week
    day: Weekday,
    /// Which occurrence of the day, counted from the end when negative
    ordinal: Option<NonZeroI8>,
}

impl NthWeekday {
    /// Every occurrence of `day`.
    #[must_use]
    pub const fn every(day: Weekday) -> Self {
        Self { day, ordinal: None }
    }

    /// The `ordinal`th occurrence of `day`. Ordinals are 1-based, negative
    /// ones count back from the end of the period, and zero is rejected.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] if the ordinal is zero or beyond ±53.
    pub fn nth(day: Weekday, ordinal: i64) -> Result<Self, Error> {
        let ordinal = i8::try_from(ordinal)
            .ok()
            .filter(|n| (-MAX_ORDINAL..=MAX_ORDINAL).contains(n))
            .and_then(NonZeroI8::new)
            .ok_or_else(|| {
                Error::invalid(
                    Field::ByWeekday,
                    format!("ordinal {ordinal} must be non-zero and within ±{MAX_ORDINAL}"),
                )
            })?;
        Ok(Self {
            day,
            ordinal: Some(ordinal),
        })
    }

    /// Build from a Monday-first day index and an optional ordinal.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] for a day outside `0..=6` or a bad ordinal.
    pub fn from_parts(day: i64, ordinal: Option<i64>) -> Result<Self, Error> {
        let day = weekday_from_index(day).ok_or_else(|| {
            Error::invalid(Field::ByWeekday, format!("day {day} is not within 0..=6"))
        })?;
        match ordinal {
            Some(n) => Self::nth(day, n),
            None => Ok(Self::every(day)),
        }
    }

    /// The Monday-first index of the day.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.day.num_days_from_monday()
    }
}

impl From<Weekday> for NthWeekday {
    fn from(day: Weekday) -> Self {
        Self::every(day)
    }
}

impl Ord for NthWeekday {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index()
            .cmp(&other.index())
            .then(self.ordinal.cmp(&other.ordinal))
    }
}

impl PartialOrd for NthWeekday {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NthWeekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{n}")?;
        }
        f.write_str(weekday_abbreviation(self.day))
    }
}

impl FromStr for NthWeekday {
    type Err = Error;

    /// Accepts `TU`, `Tuesday`, `1`, `2TU`, `+2TU` and `-1FR`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(day) = parse_weekday(s) {
            return Ok(Self::every(day));
        }

        let split = s
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| Error::invalid(Field::ByWeekday, format!("`{s}` is not a weekday")))?;
        let (ordinal, day) = s.split_at(split);
        let day = parse_weekday(day)
            .ok_or_else(|| Error::invalid(Field::ByWeekday, format!("`{s}` is not a weekday")))?;
        let ordinal = ordinal
            .trim_start_matches('+')
            .parse::<i64>()
            .map_err(|e| Error::invalid(Field::ByWeekday, format!("`{s}`: {e}")))?;
        Self::nth(day, ordinal)
    }
}
