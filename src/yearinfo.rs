//! Per-year calendar tables used while expanding a rule.
//!
//! Days are addressed by their zero-based index from January 1st. Tables run
//! seven days past the end of the year so a weekly period that starts in late
//! December can still be looked up.

use std::collections::BTreeSet;

use chrono::{Datelike, Days, NaiveDate};

use crate::{Frequency, occurrences::Plan};

pub(crate) fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub(crate) fn days_in_year(year: i32) -> i64 {
    if is_leap_year(year) { 366 } else { 365 }
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// The date of Easter Sunday in the Gregorian calendar, using the anonymous
/// (Meeus/Jones/Butcher) algorithm.
#[must_use]
pub fn easter(year: i32) -> Option<NaiveDate> {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15).rem_euclid(30);
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k).rem_euclid(7);
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

#[derive(Debug, Clone, Default)]
pub(crate) struct YearInfo {
    pub year: i32,
    pub year_len: i64,
    pub next_year_len: i64,
    pub first_day: Option<NaiveDate>,
    /// Weekday of January 1st, Monday = 0.
    first_weekday: i64,
    /// Month of each day index.
    pub month: Vec<u8>,
    /// Day of month of each day index.
    pub month_day: Vec<i8>,
    /// Day of month counted from the month's end (-1 = last day).
    pub neg_month_day: Vec<i8>,
    /// Index of the first day of each month; entry 12 is the year length.
    pub month_range: [i64; 13],
    pub week_number: Option<Vec<bool>>,
    pub nth_weekday: Option<Vec<bool>>,
    pub easter: Option<Vec<bool>>,
    built: Option<(i32, u32)>,
}

impl YearInfo {
    /// Weekday (Monday = 0) of any day index, including ones outside the year.
    pub fn weekday(&self, index: i64) -> i64 {
        (self.first_weekday + index).rem_euclid(7)
    }

    /// The date at a day index.
    pub fn date(&self, index: i64) -> Option<NaiveDate> {
        self.first_day?
            .checked_add_days(Days::new(u64::try_from(index).ok()?))
    }

    /// Bring the tables up to date for `year`/`month`, rebuilding only what
    /// changed. Returns [`None`] if the year cannot be represented.
    pub fn rebuild(&mut self, year: i32, month: u32, plan: &Plan) -> Option<()> {
        let year_changed = self.built.is_none_or(|(y, _)| y != year);
        let month_changed = self.built.is_none_or(|(_, m)| m != month);

        if year_changed {
            self.rebuild_year(year, plan)?;
        }
        if !plan.by_nth_weekday.is_empty() && (year_changed || month_changed) {
            self.rebuild_nth_weekday(month, plan);
        }
        self.built = Some((year, month));
        Some(())
    }

    fn rebuild_year(&mut self, year: i32, plan: &Plan) -> Option<()> {
        let first_day = NaiveDate::from_ymd_opt(year, 1, 1)?;
        self.year = year;
        self.year_len = days_in_year(year);
        self.next_year_len = days_in_year(year + 1);
        self.first_day = Some(first_day);
        self.first_weekday = i64::from(first_day.weekday().num_days_from_monday());

        let span = usize::try_from(self.year_len + 7).ok()?;
        self.month.clear();
        self.month_day.clear();
        self.neg_month_day.clear();
        for date in first_day.iter_days().take(span) {
            let day = date.day();
            let length = days_in_month(date.year(), date.month());
            self.month.push(u8::try_from(date.month()).ok()?);
            self.month_day.push(i8::try_from(day).ok()?);
            self.neg_month_day
                .push(i8::try_from(i64::from(day) - i64::from(length) - 1).ok()?);
        }

        let mut index = 0;
        for month in 1..=12 {
            self.month_range[month as usize - 1] = index;
            index += i64::from(days_in_month(year, month));
        }
        self.month_range[12] = index;

        self.week_number = (!plan.by_week_number.is_empty())
            .then(|| self.week_number_mask(&plan.by_week_number, plan.week_start));

        self.easter = if plan.by_easter.is_empty() {
            None
        } else {
            let mut mask = vec![false; span];
            let sunday = easter(year)?.ordinal0();
            for offset in &plan.by_easter {
                let index = i64::from(sunday) + i64::from(*offset);
                if let Some(slot) = usize::try_from(index).ok().and_then(|i| mask.get_mut(i)) {
                    *slot = true;
                }
            }
            Some(mask)
        };

        Some(())
    }

    /// Mark the days falling into the requested week numbers. Week 1 is the
    /// first week with at least four days in the year, weeks beginning on
    /// `week_start`.
    fn week_number_mask(&self, weeks: &BTreeSet<i8>, week_start: i64) -> Vec<bool> {
        let year_len = self.year_len;
        let mut mask = vec![false; usize::try_from(year_len + 7).unwrap_or_default()];

        let first_week_start = (7 - self.first_weekday + week_start).rem_euclid(7);
        let (week_one, week_year_len) = if first_week_start >= 4 {
            (0, year_len + (self.first_weekday - week_start).rem_euclid(7))
        } else {
            (first_week_start, year_len - first_week_start)
        };
        let num_weeks = week_year_len / 7 + (week_year_len % 7) / 4;

        let week_offset = |n: i64| {
            let mut i = week_one + (n - 1) * 7;
            if week_one != first_week_start {
                i -= 7 - first_week_start;
            }
            i
        };

        for &week in weeks {
            let mut n = i64::from(week);
            if n < 0 {
                n += num_weeks + 1;
            }
            if !(1..=num_weeks).contains(&n) {
                continue;
            }
            let start = if n > 1 { week_offset(n) } else { week_one };
            self.mark_week(&mut mask, start, week_start);
        }

        // Week 1 of next year may begin in the last days of this one.
        if weeks.contains(&1) {
            let start = week_offset(num_weeks + 1);
            if start < year_len {
                self.mark_week(&mut mask, start, week_start);
            }
        }

        // Days before this year's week 1 belong to last year's final week.
        if week_one != 0 {
            let last_year_weeks = if weeks.contains(&-1) {
                -1
            } else {
                let previous = NaiveDate::from_ymd_opt(self.year - 1, 1, 1)
                    .map_or(0, |d| i64::from(d.weekday().num_days_from_monday()));
                let previous_week_one = (7 - previous + week_start).rem_euclid(7);
                if previous_week_one >= 4 {
                    let previous_len = days_in_year(self.year - 1);
                    52 + ((previous_len + (previous - week_start).rem_euclid(7)) % 7) / 4
                } else {
                    52 + ((year_len - week_one) % 7) / 4
                }
            };
            if i8::try_from(last_year_weeks).is_ok_and(|w| weeks.contains(&w)) {
                for slot in mask.iter_mut().take(usize::try_from(week_one).unwrap_or_default()) {
                    *slot = true;
                }
            }
        }

        mask
    }

    fn mark_week(&self, mask: &mut [bool], start: i64, week_start: i64) {
        let mut i = start;
        for _ in 0..7 {
            if let Some(slot) = usize::try_from(i).ok().and_then(|i| mask.get_mut(i)) {
                *slot = true;
            }
            i += 1;
            if self.weekday(i) == week_start {
                break;
            }
        }
    }

    /// Mark the nth weekdays: within the month for monthly rules, within the
    /// year (or each selected month) for yearly ones.
    fn rebuild_nth_weekday(&mut self, month: u32, plan: &Plan) {
        let month_span = |m: u32| {
            let m = m as usize;
            (self.month_range[m - 1], self.month_range[m])
        };
        let ranges: Vec<(i64, i64)> = match plan.frequency {
            Frequency::Yearly if plan.by_month.is_empty() => vec![(0, self.year_len)],
            Frequency::Yearly => plan.by_month.iter().map(|&m| month_span(u32::from(m))).collect(),
            Frequency::Monthly => vec![month_span(month)],
            _ => Vec::new(),
        };

        let mut mask = vec![false; usize::try_from(self.year_len).unwrap_or_default()];
        for (first, end) in ranges {
            let last = end - 1;
            for &(day, n) in &plan.by_nth_weekday {
                let n = i64::from(n);
                let i = if n < 0 {
                    let i = last + (n + 1) * 7;
                    i - (self.weekday(i) - day).rem_euclid(7)
                } else {
                    let i = first + (n - 1) * 7;
                    i + (7 - self.weekday(i) + day).rem_euclid(7)
                };
                if (first..=last).contains(&i) {
                    if let Some(slot) = usize::try_from(i).ok().and_then(|i| mask.get_mut(i)) {
                        *slot = true;
                    }
                }
            }
        }
        self.nth_weekday = Some(mask);
    }
}
