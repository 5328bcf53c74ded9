use chrono::NaiveDateTime;
use getset::{CopyGetters, Getters};

use crate::{AsInstant, Field, RecurrenceRule, Result, expand};

/// Something that happens at `start`, optionally repeating by a rule.
///
/// The event's start is the rule's start. Its end doubles as the rule's
/// `until` unless the rule is bounded by a `count`, in which case the end is
/// only the event's own bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct RecurringEvent {
    /// When the event first happens
    #[getset(get_copy = "pub")]
    start: Option<NaiveDateTime>,
    /// When the event last happens
    #[getset(get_copy = "pub")]
    end: Option<NaiveDateTime>,
    /// How the event repeats
    #[getset(get = "pub")]
    recurrence: RecurrenceRule,
}

impl RecurringEvent {
    /// A one-off event at `start`.
    #[must_use]
    pub fn new(start: NaiveDateTime) -> Self {
        let mut recurrence = RecurrenceRule::default();
        recurrence.start = Some(start);
        Self {
            start: Some(start),
            end: None,
            recurrence,
        }
    }

    /// Move the event, and the start of its rule.
    ///
    /// ## Errors
    ///
    /// [`crate::Error::InvalidValue`] if `start` is a string that does not parse.
    pub fn set_start(&mut self, start: impl AsInstant) -> Result<&mut Self> {
        let start = start.as_instant(Field::Start)?;
        self.start = Some(start);
        self.recurrence.start = Some(start);
        Ok(self)
    }

    /// Set the end of the event. Rules not bounded by a count end there too.
    ///
    /// ## Errors
    ///
    /// [`crate::Error::InvalidValue`] if `end` is a string that does not parse.
    pub fn set_end(&mut self, end: impl AsInstant) -> Result<&mut Self> {
        let end = end.as_instant(Field::Until)?;
        self.end = Some(end);
        if self.recurrence.count.is_none() {
            self.recurrence.until = Some(end);
        }
        Ok(self)
    }

    /// Remove the end of the event, and the `until` of its rule.
    pub fn clear_end(&mut self) -> &mut Self {
        self.end = None;
        self.recurrence.until = None;
        self
    }

    /// Replace the recurrence entirely. Nothing of the previous rule
    /// survives. The event takes the rule's start, and without an explicit
    /// `end` the end is derived from the last occurrence.
    ///
    /// ## Errors
    ///
    /// [`crate::Error::MissingStart`] if neither the rule nor the event has a
    /// start, or any error from deriving the end (see [`Self::normalize`]).
    pub fn set_recurrence(
        &mut self,
        mut recurrence: RecurrenceRule,
        end: Option<NaiveDateTime>,
        cap: Option<usize>,
    ) -> Result<&mut Self> {
        let start = recurrence
            .start
            .or(self.start)
            .ok_or(crate::Error::MissingStart)?;
        recurrence.start = Some(start);
        self.start = Some(start);

        match end {
            Some(end) => {
                if recurrence.count.is_none() {
                    recurrence.until = Some(end);
                }
                self.end = Some(end);
            }
            None => self.end = recurrence.until,
        }
        self.recurrence = recurrence;
        self.normalize(cap)
    }

    /// Does the event repeat?
    ///
    /// Stricter than [`RecurrenceRule::is_recurring`]: the event needs a
    /// start distinct from its end, and a rule that ends through `count` or
    /// `until`.
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.start.is_some()
            && self.start != self.end
            && self.recurrence.is_bounded()
            && self.recurrence.is_recurring()
    }

    /// Every date the event happens on, at most `cap` of them. An event that
    /// does not repeat happens once, at its start.
    ///
    /// ## Errors
    ///
    /// Any error from [`expand`].
    pub fn dates(&self, cap: Option<usize>) -> Result<Vec<NaiveDateTime>> {
        if !self.is_recurring() {
            return Ok(self.start.into_iter().collect());
        }
        Ok(expand(&self.recurrence, cap)?.into_occurrences())
    }

    /// Fill in a missing end from the last date the event happens on.
    ///
    /// ## Errors
    ///
    /// Any error from [`Self::dates`].
    pub fn normalize(&mut self, cap: Option<usize>) -> Result<&mut Self> {
        if self.end.is_none() {
            self.end = self.dates(cap)?.last().copied();
            tracing::debug!(end = ?self.end, "Derived event end from its recurrence");
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Weekday};

    use super::*;
    use crate::Frequency;

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test_log::test]
    fn end_derived_from_count() {
        let mut rule = RecurrenceRule::new(Frequency::Weekly, day(2011, 1, 1));
        rule.set_count(Some(3));
        rule.set_by_weekday([Weekday::Tue, Weekday::Thu]);

        let mut event = RecurringEvent::new(day(2011, 1, 1));
        event.set_recurrence(rule, None, None).unwrap();

        assert!(event.is_recurring());
        assert_eq!(event.end(), Some(day(2011, 1, 11)));
        assert_eq!(event.recurrence().until(), None);
        assert_eq!(
            event.dates(None).unwrap(),
            vec![day(2011, 1, 4), day(2011, 1, 6), day(2011, 1, 11)]
        );
    }

    #[test]
    fn end_becomes_until() {
        let rule = RecurrenceRule::new(Frequency::Daily, day(2011, 1, 1));
        let mut event = RecurringEvent::new(day(2011, 1, 1));
        event
            .set_recurrence(rule, Some(day(2011, 1, 3)), None)
            .unwrap();

        assert_eq!(event.recurrence().until(), Some(day(2011, 1, 3)));
        assert_eq!(
            event.dates(None).unwrap(),
            vec![day(2011, 1, 1), day(2011, 1, 2), day(2011, 1, 3)]
        );
    }

    #[test]
    fn one_off_event() {
        let mut event = RecurringEvent::new(day(2013, 1, 1));
        assert!(!event.is_recurring());
        assert_eq!(event.dates(None).unwrap(), vec![day(2013, 1, 1)]);

        event.normalize(None).unwrap();
        assert_eq!(event.end(), Some(day(2013, 1, 1)));
    }

    #[test]
    fn open_ended_rule_does_not_repeat() {
        let rule = RecurrenceRule::new(Frequency::Daily, day(2013, 1, 1));
        let mut event = RecurringEvent::new(day(2013, 1, 1));
        event.set_recurrence(rule, None, None).unwrap();

        assert!(!event.is_recurring());
        assert_eq!(event.end(), Some(day(2013, 1, 1)));
    }

    #[test]
    fn start_equal_to_end_does_not_repeat() {
        let mut rule = RecurrenceRule::new(Frequency::Daily, day(2013, 1, 1));
        rule.set_count(Some(5));
        let mut event = RecurringEvent::new(day(2013, 1, 1));
        event
            .set_recurrence(rule, Some(day(2013, 1, 1)), None)
            .unwrap();
        assert!(!event.is_recurring());
    }

    #[test]
    fn setters_keep_rule_in_sync() {
        let mut event = RecurringEvent::new(day(2013, 1, 1));
        event.set_start("2013-02-01").unwrap();
        assert_eq!(event.recurrence().start(), Some(day(2013, 2, 1)));

        event.set_end(day(2013, 3, 1)).unwrap();
        assert_eq!(event.recurrence().until(), Some(day(2013, 3, 1)));

        event.clear_end();
        assert_eq!(event.recurrence().until(), None);
    }

    #[test]
    fn replacing_recurrence_drops_old_fields() {
        let mut first = RecurrenceRule::new(Frequency::Monthly, day(2011, 1, 1));
        first.set_by_month([3]).unwrap();
        first.set_count(Some(2));
        let mut event = RecurringEvent::new(day(2011, 1, 1));
        event.set_recurrence(first, None, None).unwrap();
        assert_eq!(event.end(), Some(day(2012, 3, 1)));

        let mut second = RecurrenceRule::default();
        second.set_frequency(Some(Frequency::Daily));
        second.set_count(Some(2));
        event.clear_end();
        event.set_recurrence(second, None, None).unwrap();
        assert!(event.recurrence().by_month().is_empty());
        assert_eq!(event.recurrence().start(), Some(day(2011, 1, 1)));
        assert_eq!(event.end(), Some(day(2011, 1, 2)));
    }
}
