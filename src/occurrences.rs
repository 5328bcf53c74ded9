use std::collections::{BTreeSet, VecDeque};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use getset::{CopyGetters, Getters};

use crate::{
    DayFilter, Error, Frequency, NthWeekday, RecurrenceRule, Result,
    weekday::weekday_from_index,
    yearinfo::{YearInfo, days_in_month},
};

/// Generation stops for good past this year.
pub const MAX_YEAR: i32 = 9999;

/// How many periods in a row may produce no occurrence before a rule is
/// considered empty.
pub const DEFAULT_MAX_EMPTY_PERIODS: u32 = 100_000;

/// The Gregorian calendar repeats every 400 years.
const DAYS_PER_400_YEARS: i64 = 146_097;

/// Bounds applied while expanding a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionLimits {
    /// The most occurrences to generate, regardless of `count`/`until`.
    pub cap: Option<usize>,
    /// See [`DEFAULT_MAX_EMPTY_PERIODS`].
    pub max_empty_periods: u32,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            cap: None,
            max_empty_periods: DEFAULT_MAX_EMPTY_PERIODS,
        }
    }
}

impl ExpansionLimits {
    /// Default limits with a cap on the number of occurrences.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap: Some(cap),
            ..Self::default()
        }
    }
}

/// The expanded occurrences of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct Expansion {
    /// The occurrences, strictly increasing.
    #[getset(get = "pub")]
    occurrences: Vec<NaiveDateTime>,
    /// Did the cap stop generation before the rule ran out?
    #[getset(get_copy = "pub")]
    truncated: bool,
}

impl Expansion {
    /// The final occurrence, if any.
    #[must_use]
    pub fn last(&self) -> Option<NaiveDateTime> {
        self.occurrences.last().copied()
    }

    /// Take ownership of the occurrences.
    #[must_use]
    pub fn into_occurrences(self) -> Vec<NaiveDateTime> {
        self.occurrences
    }
}

impl IntoIterator for Expansion {
    type Item = NaiveDateTime;
    type IntoIter = std::vec::IntoIter<NaiveDateTime>;

    fn into_iter(self) -> Self::IntoIter {
        self.occurrences.into_iter()
    }
}

/// Expand `rule` into its occurrences, generating at most `cap` of them.
///
/// A rule that does not recur expands to its start alone.
///
/// ## Errors
///
/// [`Error::MissingStart`] if the rule has no start, and
/// [`Error::UnboundedExpansion`] if it recurs without `count`, `until` or a
/// `cap`.
pub fn expand(rule: &RecurrenceRule, cap: Option<usize>) -> Result<Expansion> {
    expand_with(
        rule,
        &ExpansionLimits {
            cap,
            ..ExpansionLimits::default()
        },
    )
}

/// [`expand`] with explicit [`ExpansionLimits`].
///
/// ## Errors
///
/// See [`expand`].
pub fn expand_with(rule: &RecurrenceRule, limits: &ExpansionLimits) -> Result<Expansion> {
    let mut iter = Iter::new(rule, limits)?;
    if rule.is_recurring() && !rule.is_bounded() && limits.cap.is_none() {
        return Err(Error::UnboundedExpansion);
    }

    let occurrences: Vec<_> = match limits.cap {
        Some(cap) => iter.by_ref().take(cap).collect(),
        None => iter.by_ref().collect(),
    };
    let truncated = limits.cap.is_some_and(|cap| occurrences.len() == cap) && iter.next().is_some();
    if truncated {
        tracing::debug!(cap = ?limits.cap, "Expansion truncated at cap");
    }
    Ok(Expansion {
        occurrences,
        truncated,
    })
}

/// An iterator over the occurrences of a [`RecurrenceRule`].
///
/// The iterator owns everything it needs, so the rule may change while it
/// runs. Asking the rule for a new iterator replays the same sequence.
///
/// > **Warning! This iterator may be infinite!**
#[derive(Debug, Clone)]
pub struct Iter {
    inner: Inner,
}

#[derive(Debug, Clone)]
enum Inner {
    Once(Option<NaiveDateTime>),
    Rule(Box<Walker>),
}

impl Iter {
    pub(crate) fn new(rule: &RecurrenceRule, limits: &ExpansionLimits) -> Result<Self> {
        let start = rule.start.ok_or(Error::MissingStart)?;
        let Some(frequency) = rule.frequency.filter(|_| rule.is_recurring()) else {
            return Ok(Self {
                inner: Inner::Once(Some(start)),
            });
        };

        tracing::debug!(
            %frequency,
            interval = rule.interval,
            count = ?rule.count,
            until = ?rule.until,
            "Expanding recurrence rule"
        );
        let start = start.with_nanosecond(0).unwrap_or(start);
        let plan = Plan::new(rule, frequency, start);
        Ok(Self {
            inner: Inner::Rule(Box::new(Walker::new(plan, limits.max_empty_periods))),
        })
    }
}

impl Iterator for Iter {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Once(start) => start.take(),
            Inner::Rule(walker) => walker.next_occurrence(),
        }
    }
}

/// A rule with every default resolved against its start.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub frequency: Frequency,
    pub interval: i64,
    /// Monday = 0.
    pub week_start: i64,
    pub start: NaiveDateTime,
    pub until: Option<NaiveDateTime>,
    pub count: Option<u32>,
    pub by_set_position: Vec<i16>,
    pub by_month: BTreeSet<u8>,
    pub by_month_day: BTreeSet<i8>,
    pub by_neg_month_day: BTreeSet<i8>,
    pub by_year_day: BTreeSet<i16>,
    pub by_week_number: BTreeSet<i8>,
    pub by_weekday: DayFilter,
    /// (weekday with Monday = 0, ordinal)
    pub by_nth_weekday: Vec<(i64, i8)>,
    pub by_hour: BTreeSet<u8>,
    pub by_minute: BTreeSet<u8>,
    pub by_second: BTreeSet<u8>,
    pub by_easter: BTreeSet<i16>,
}

fn contains<T: TryFrom<i64> + Ord>(set: &BTreeSet<T>, value: i64) -> bool {
    T::try_from(value).is_ok_and(|v| set.contains(&v))
}

fn time(hour: i64, minute: i64, second: i64) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(
        u32::try_from(hour).ok()?,
        u32::try_from(minute).ok()?,
        u32::try_from(second).ok()?,
    )
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

impl Plan {
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rule: &RecurrenceRule, frequency: Frequency, start: NaiveDateTime) -> Self {
        let mut by_month = rule.by_month.clone();
        let mut month_days = rule.by_month_day.clone();
        let mut weekdays = rule.by_weekday.clone();

        // With no day-level filter the rule repeats on the day of its start.
        if rule.by_week_number.is_empty()
            && rule.by_year_day.is_empty()
            && month_days.is_empty()
            && weekdays.is_empty()
            && rule.by_easter.is_empty()
        {
            match frequency {
                Frequency::Yearly => {
                    if by_month.is_empty() {
                        by_month.insert(start.month() as u8);
                    }
                    month_days.insert(start.day() as i8);
                }
                Frequency::Monthly => {
                    month_days.insert(start.day() as i8);
                }
                Frequency::Weekly => {
                    weekdays.insert(NthWeekday::every(start.weekday()));
                }
                _ => {}
            }
        }

        let (by_month_day, by_neg_month_day): (BTreeSet<i8>, BTreeSet<i8>) =
            month_days.into_iter().partition(|day| *day > 0);

        let mut by_weekday = DayFilter::empty();
        let mut by_nth_weekday = Vec::new();
        for day in weekdays {
            match day.ordinal() {
                Some(n) if frequency <= Frequency::Monthly => {
                    by_nth_weekday.push((i64::from(day.index()), n.get()));
                }
                _ => by_weekday |= DayFilter::from_weekday(day.day()),
            }
        }

        let or_start = |set: &BTreeSet<u8>, finer: Frequency, value: u32| {
            if set.is_empty() && frequency < finer {
                BTreeSet::from([value as u8])
            } else {
                set.clone()
            }
        };

        Self {
            frequency,
            interval: i64::from(rule.interval),
            week_start: i64::from(rule.week_start.num_days_from_monday()),
            start,
            until: rule.until,
            count: rule.count,
            by_set_position: rule.by_set_position.iter().copied().collect(),
            by_month,
            by_month_day,
            by_neg_month_day,
            by_year_day: rule.by_year_day.clone(),
            by_week_number: rule.by_week_number.clone(),
            by_weekday,
            by_nth_weekday,
            by_hour: or_start(&rule.by_hour, Frequency::Hourly, start.hour()),
            by_minute: or_start(&rule.by_minute, Frequency::Minutely, start.minute()),
            by_second: or_start(&rule.by_second, Frequency::Secondly, start.second()),
            by_easter: rule.by_easter.clone(),
        }
    }

    /// Every time of day for frequencies of a day or coarser.
    fn day_times(&self) -> Vec<NaiveTime> {
        let mut times = Vec::new();
        for &hour in &self.by_hour {
            for &minute in &self.by_minute {
                for &second in &self.by_second {
                    times.extend(time(hour.into(), minute.into(), second.into()));
                }
            }
        }
        times
    }

    /// The times within the current hour, minute or second.
    fn times_at(&self, hour: i64, minute: i64, second: i64) -> Vec<NaiveTime> {
        match self.frequency {
            Frequency::Hourly => self
                .by_minute
                .iter()
                .flat_map(|&m| self.by_second.iter().map(move |&s| (m, s)))
                .filter_map(|(m, s)| time(hour, m.into(), s.into()))
                .collect(),
            Frequency::Minutely => self
                .by_second
                .iter()
                .filter_map(|&s| time(hour, minute, s.into()))
                .collect(),
            _ => time(hour, minute, second).into_iter().collect(),
        }
    }

    /// Does the time itself fall outside the hour/minute/second filters?
    fn excludes_time(&self, hour: i64, minute: i64, second: i64) -> bool {
        let outside = |set: &BTreeSet<u8>, finer: Frequency, value: i64| {
            self.frequency >= finer && !set.is_empty() && !contains(set, value)
        };
        outside(&self.by_hour, Frequency::Hourly, hour)
            || outside(&self.by_minute, Frequency::Minutely, minute)
            || outside(&self.by_second, Frequency::Secondly, second)
    }

    /// Step `value` by the interval until it lands in `set`, returning the
    /// number of carries into the next unit and the landing value.
    fn distance(&self, value: i64, set: &BTreeSet<u8>, base: i64) -> Option<(i64, i64)> {
        let mut carried = 0;
        let mut value = value;
        for _ in 0..base {
            let next = value + self.interval;
            carried += next.div_euclid(base);
            value = next.rem_euclid(base);
            if contains(set, value) {
                return Some((carried, value));
            }
        }
        None
    }

    #[cfg(test)]
    pub fn test_plan(frequency: Frequency) -> Self {
        let start = NaiveDate::from_ymd_opt(2012, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self::new(&RecurrenceRule::new(frequency, start), frequency, start)
    }
}

/// Where the walk currently stands. Fields may run past their natural range
/// between steps and are normalized before the next period is built.
#[derive(Debug, Clone)]
struct Cursor {
    year: i32,
    month: u32,
    day: i64,
    hour: i64,
    minute: i64,
    second: i64,
    /// Monday = 0.
    weekday: i64,
}

#[derive(Debug, Clone)]
struct Walker {
    plan: Plan,
    info: YearInfo,
    cursor: Cursor,
    times: Vec<NaiveTime>,
    pending: VecDeque<NaiveDateTime>,
    emitted: u64,
    last: Option<NaiveDateTime>,
    empty_periods: u32,
    max_empty_periods: u32,
    finished: bool,
}

impl Walker {
    fn new(plan: Plan, max_empty_periods: u32) -> Self {
        let start = plan.start;
        let cursor = Cursor {
            year: start.year(),
            month: start.month(),
            day: i64::from(start.day()),
            hour: i64::from(start.hour()),
            minute: i64::from(start.minute()),
            second: i64::from(start.second()),
            weekday: i64::from(start.weekday().num_days_from_monday()),
        };
        let times = if plan.frequency < Frequency::Hourly {
            plan.day_times()
        } else if plan.excludes_time(cursor.hour, cursor.minute, cursor.second) {
            Vec::new()
        } else {
            plan.times_at(cursor.hour, cursor.minute, cursor.second)
        };

        Self {
            plan,
            info: YearInfo::default(),
            cursor,
            times,
            pending: VecDeque::new(),
            emitted: 0,
            last: None,
            empty_periods: 0,
            max_empty_periods,
            finished: false,
        }
    }

    fn next_occurrence(&mut self) -> Option<NaiveDateTime> {
        loop {
            if self
                .plan
                .count
                .is_some_and(|count| self.emitted >= u64::from(count))
            {
                // Past max occurrences, no more occurrences
                return None;
            }

            if let Some(next) = self.pending.pop_front() {
                if self.plan.until.is_some_and(|until| next > until) {
                    // Past end date, no more occurrences
                    self.finish();
                    return None;
                }
                if self.last.is_some_and(|last| next <= last) {
                    continue;
                }
                self.emitted += 1;
                self.last = Some(next);
                return Some(next);
            }

            if self.finished {
                return None;
            }
            self.fill_period();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pending.clear();
    }

    /// The date the current period begins on.
    fn period_start(&self) -> Option<NaiveDate> {
        let c = &self.cursor;
        match self.plan.frequency {
            Frequency::Yearly => NaiveDate::from_ymd_opt(c.year, 1, 1),
            Frequency::Monthly => NaiveDate::from_ymd_opt(c.year, c.month, 1),
            _ => NaiveDate::from_ymd_opt(c.year, c.month, u32::try_from(c.day).ok()?),
        }
    }

    /// Generate the candidates of the current period and step to the next.
    fn fill_period(&mut self) {
        let Some(period_start) = self.period_start() else {
            tracing::warn!(year = self.cursor.year, "Recurrence left the calendar");
            self.finish();
            return;
        };
        if self
            .plan
            .until
            .is_some_and(|until| period_start > until.date())
        {
            self.finish();
            return;
        }
        if self
            .info
            .rebuild(self.cursor.year, self.cursor.month, &self.plan)
            .is_none()
        {
            tracing::warn!(year = self.cursor.year, "Recurrence left the calendar");
            self.finish();
            return;
        }

        let first = i64::from(period_start.ordinal0());
        let end = match self.plan.frequency {
            Frequency::Yearly => self.info.year_len,
            Frequency::Monthly => self.info.month_range[self.cursor.month as usize],
            Frequency::Weekly => {
                let mut i = first;
                for _ in 0..7 {
                    i += 1;
                    if self.info.weekday(i) == self.plan.week_start {
                        break;
                    }
                }
                i
            }
            _ => first + 1,
        };

        let mut filtered = false;
        let mut days = Vec::new();
        for i in first..end {
            if self.matches_day(i) {
                days.push(i);
            } else {
                filtered = true;
            }
        }

        let before = self.pending.len();
        let candidates = if self.plan.by_set_position.is_empty() || self.times.is_empty() {
            self.every_candidate(&days)
        } else {
            self.selected_candidates(&days)
        };
        let start = self.plan.start;
        self.pending
            .extend(candidates.into_iter().filter(|at| *at >= start));
        let added = self.pending.len() - before;
        tracing::trace!(%period_start, candidates = added, "Expanded period");

        if added == 0 {
            self.empty_periods += 1;
            if self.empty_periods >= self.max_empty_periods {
                tracing::warn!(
                    periods = self.empty_periods,
                    "No occurrences found in consecutive periods, giving up"
                );
                self.finish();
                return;
            }
        } else {
            self.empty_periods = 0;
        }

        if self.advance(filtered).is_none() {
            tracing::debug!(year = self.cursor.year, "Recurrence reached its last period");
            self.finished = true;
        }
    }

    /// Does day `i` of the current year pass every day-level filter?
    fn matches_day(&self, i: i64) -> bool {
        let plan = &self.plan;
        let info = &self.info;
        let Ok(at) = usize::try_from(i) else {
            return false;
        };

        if !plan.by_month.is_empty()
            && !info.month.get(at).is_some_and(|m| plan.by_month.contains(m))
        {
            return false;
        }
        if let Some(weeks) = &info.week_number {
            if !weeks.get(at).copied().unwrap_or(false) {
                return false;
            }
        }
        if !plan.by_weekday.is_empty() || !plan.by_nth_weekday.is_empty() {
            let plain = weekday_from_index(info.weekday(i)).is_some_and(|d| plan.by_weekday.matches(d));
            let nth = info
                .nth_weekday
                .as_ref()
                .is_some_and(|mask| mask.get(at).copied().unwrap_or(false));
            if !plain && !nth {
                return false;
            }
        }
        if let Some(easter) = &info.easter {
            if !easter.get(at).copied().unwrap_or(false) {
                return false;
            }
        }
        if !(plan.by_month_day.is_empty() && plan.by_neg_month_day.is_empty())
            && !info
                .month_day
                .get(at)
                .is_some_and(|d| plan.by_month_day.contains(d))
            && !info
                .neg_month_day
                .get(at)
                .is_some_and(|d| plan.by_neg_month_day.contains(d))
        {
            return false;
        }
        if !plan.by_year_day.is_empty() {
            let year_len = info.year_len;
            let (from_start, from_end) = if i < year_len {
                (i + 1, i - year_len)
            } else {
                (i + 1 - year_len, i - year_len - info.next_year_len)
            };
            if !contains(&plan.by_year_day, from_start) && !contains(&plan.by_year_day, from_end) {
                return false;
            }
        }
        true
    }

    fn every_candidate(&self, days: &[i64]) -> Vec<NaiveDateTime> {
        days.iter()
            .filter_map(|&i| self.info.date(i))
            .flat_map(|date| self.times.iter().map(move |&t| date.and_time(t)))
            .collect()
    }

    /// Keep only the requested positions of the period's sorted candidates.
    fn selected_candidates(&self, days: &[i64]) -> Vec<NaiveDateTime> {
        let per_day = i64::try_from(self.times.len()).unwrap_or(i64::MAX);
        let day_count = i64::try_from(days.len()).unwrap_or(i64::MAX);
        let mut chosen = Vec::new();

        for &position in &self.plan.by_set_position {
            let position = i64::from(position);
            let (day_pos, time_pos) = if position < 0 {
                (position.div_euclid(per_day), position.rem_euclid(per_day))
            } else {
                ((position - 1) / per_day, (position - 1) % per_day)
            };
            let day_pos = if day_pos < 0 { day_count + day_pos } else { day_pos };

            let day = usize::try_from(day_pos).ok().and_then(|d| days.get(d));
            let time = usize::try_from(time_pos).ok().and_then(|t| self.times.get(t));
            let (Some(&day), Some(&time)) = (day, time) else {
                continue;
            };
            if let Some(date) = self.info.date(day) {
                let at = date.and_time(time);
                if !chosen.contains(&at) {
                    chosen.push(at);
                }
            }
        }

        chosen.sort();
        chosen
    }

    /// Move the cursor to the next period. Returns [`None`] once there is no
    /// further period to visit.
    fn advance(&mut self, filtered: bool) -> Option<()> {
        let plan = &self.plan;
        let c = &mut self.cursor;
        let interval = plan.interval;
        let mut fix_day = false;

        match plan.frequency {
            Frequency::Yearly => {
                c.year = c.year.checked_add(i32::try_from(interval).ok()?)?;
            }
            Frequency::Monthly => {
                let month = i64::from(c.month) - 1 + interval;
                c.year = c.year.checked_add(i32::try_from(month.div_euclid(12)).ok()?)?;
                c.month = u32::try_from(month.rem_euclid(12) + 1).ok()?;
            }
            Frequency::Weekly => {
                let back_to_week_start = if plan.week_start > c.weekday {
                    c.weekday + 1 + (6 - plan.week_start)
                } else {
                    c.weekday - plan.week_start
                };
                c.day += interval * 7 - back_to_week_start;
                c.weekday = plan.week_start;
                fix_day = true;
            }
            Frequency::Daily => {
                c.day += interval;
                fix_day = true;
            }
            Frequency::Hourly => {
                if filtered {
                    // Skip the rest of a day that was filtered out.
                    c.hour += ((23 - c.hour) / interval) * interval;
                }
                let (days, hour) = if plan.by_hour.is_empty() {
                    ((c.hour + interval).div_euclid(24), (c.hour + interval).rem_euclid(24))
                } else {
                    plan.distance(c.hour, &plan.by_hour, 24)?
                };
                c.hour = hour;
                if days != 0 {
                    c.day += days;
                    fix_day = true;
                }
            }
            Frequency::Minutely => {
                if filtered {
                    c.minute += ((1439 - (c.hour * 60 + c.minute)) / interval) * interval;
                }
                let mut valid = false;
                for _ in 0..1440 / gcd(interval, 1440) {
                    let (hours, minute) = if plan.by_minute.is_empty() {
                        ((c.minute + interval).div_euclid(60), (c.minute + interval).rem_euclid(60))
                    } else {
                        plan.distance(c.minute, &plan.by_minute, 60)?
                    };
                    c.minute = minute;
                    let days = (c.hour + hours).div_euclid(24);
                    c.hour = (c.hour + hours).rem_euclid(24);
                    if days != 0 {
                        c.day += days;
                        fix_day = true;
                    }
                    if plan.by_hour.is_empty() || contains(&plan.by_hour, c.hour) {
                        valid = true;
                        break;
                    }
                }
                if !valid {
                    tracing::warn!("Interval never reaches an allowed hour");
                    return None;
                }
            }
            Frequency::Secondly => {
                if filtered {
                    c.second +=
                        ((86399 - (c.hour * 3600 + c.minute * 60 + c.second)) / interval) * interval;
                }
                let mut valid = false;
                for _ in 0..86400 / gcd(interval, 86400) {
                    let (minutes, second) = if plan.by_second.is_empty() {
                        ((c.second + interval).div_euclid(60), (c.second + interval).rem_euclid(60))
                    } else {
                        plan.distance(c.second, &plan.by_second, 60)?
                    };
                    c.second = second;
                    let hours = (c.minute + minutes).div_euclid(60);
                    c.minute = (c.minute + minutes).rem_euclid(60);
                    if hours != 0 {
                        let days = (c.hour + hours).div_euclid(24);
                        c.hour = (c.hour + hours).rem_euclid(24);
                        if days != 0 {
                            c.day += days;
                            fix_day = true;
                        }
                    }
                    if (plan.by_hour.is_empty() || contains(&plan.by_hour, c.hour))
                        && (plan.by_minute.is_empty() || contains(&plan.by_minute, c.minute))
                        && (plan.by_second.is_empty() || contains(&plan.by_second, c.second))
                    {
                        valid = true;
                        break;
                    }
                }
                if !valid {
                    tracing::warn!("Interval never reaches an allowed time");
                    return None;
                }
            }
        }

        if plan.frequency >= Frequency::Hourly {
            self.times = plan.times_at(c.hour, c.minute, c.second);
        }

        if fix_day && c.day > 28 {
            if c.day > DAYS_PER_400_YEARS {
                let cycles = (c.day - 1) / DAYS_PER_400_YEARS;
                c.day -= cycles * DAYS_PER_400_YEARS;
                c.year = c
                    .year
                    .saturating_add(i32::try_from(cycles * 400).unwrap_or(i32::MAX));
            }
            let mut month_len = i64::from(days_in_month(c.year, c.month));
            while c.day > month_len && c.year <= MAX_YEAR {
                c.day -= month_len;
                c.month += 1;
                if c.month == 13 {
                    c.month = 1;
                    c.year += 1;
                }
                month_len = i64::from(days_in_month(c.year, c.month));
            }
        }

        (c.year <= MAX_YEAR).then_some(())
    }
}
