use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Error, Frequency, RecurrenceRule, Result,
    weekday::{NthWeekday, parse_weekday, weekday_from_index},
};

/// A field of a [`RecurrenceRule`], named by its key in the flat mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// `dtstart`
    Start,
    /// `until`
    Until,
    /// `freq`
    Frequency,
    /// `interval`
    Interval,
    /// `wkst`
    WeekStart,
    /// `count`
    Count,
    /// `bysetpos`
    BySetPosition,
    /// `bymonth`
    ByMonth,
    /// `bymonthday`
    ByMonthDay,
    /// `byyearday`
    ByYearDay,
    /// `byweekno`
    ByWeekNumber,
    /// `byweekday`
    ByWeekday,
    /// `byhour`
    ByHour,
    /// `byminute`
    ByMinute,
    /// `bysecond`
    BySecond,
    /// `byeaster`
    ByEaster,
}

impl Field {
    /// Every field, in mapping order.
    pub const ALL: [Self; 16] = [
        Self::Start,
        Self::Until,
        Self::Frequency,
        Self::Interval,
        Self::WeekStart,
        Self::Count,
        Self::BySetPosition,
        Self::ByMonth,
        Self::ByMonthDay,
        Self::ByYearDay,
        Self::ByWeekNumber,
        Self::ByWeekday,
        Self::ByHour,
        Self::ByMinute,
        Self::BySecond,
        Self::ByEaster,
    ];

    /// The key of this field in the flat mapping.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Start => "dtstart",
            Self::Until => "until",
            Self::Frequency => "freq",
            Self::Interval => "interval",
            Self::WeekStart => "wkst",
            Self::Count => "count",
            Self::BySetPosition => "bysetpos",
            Self::ByMonth => "bymonth",
            Self::ByMonthDay => "bymonthday",
            Self::ByYearDay => "byyearday",
            Self::ByWeekNumber => "byweekno",
            Self::ByWeekday => "byweekday",
            Self::ByHour => "byhour",
            Self::ByMinute => "byminute",
            Self::BySecond => "bysecond",
            Self::ByEaster => "byeaster",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| Error::UnknownField(s.to_string()))
    }
}

/// Values that can be turned into an instant.
///
/// Dates become midnight, zoned date-times keep their local wall-clock time,
/// and strings are parsed with [`parse_instant`].
pub trait AsInstant {
    /// Convert, reporting failures against `field`.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] if the value cannot be understood as an instant.
    fn as_instant(&self, field: Field) -> Result<NaiveDateTime>;
}

impl AsInstant for NaiveDateTime {
    fn as_instant(&self, _field: Field) -> Result<NaiveDateTime> {
        Ok(*self)
    }
}

impl AsInstant for NaiveDate {
    fn as_instant(&self, _field: Field) -> Result<NaiveDateTime> {
        Ok(self.and_time(chrono::NaiveTime::MIN))
    }
}

impl<Tz: TimeZone> AsInstant for DateTime<Tz> {
    fn as_instant(&self, _field: Field) -> Result<NaiveDateTime> {
        Ok(self.naive_local())
    }
}

impl AsInstant for &str {
    fn as_instant(&self, field: Field) -> Result<NaiveDateTime> {
        parse_instant(self).ok_or_else(|| {
            Error::invalid(field, format!("`{self}` is not an ISO-8601 date or date-time"))
        })
    }
}

impl AsInstant for String {
    fn as_instant(&self, field: Field) -> Result<NaiveDateTime> {
        self.as_str().as_instant(field)
    }
}

const DATE_TIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%S",
];

/// Parse an ISO-8601 date (`2011-01-01`, read as midnight) or date-time.
///
/// A trailing `Z` or UTC offset is accepted and dropped, keeping the
/// wall-clock time as written.
#[must_use]
pub fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(zoned) = DateTime::parse_from_rfc3339(s) {
        return Some(zoned.naive_local());
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            ["%Y-%m-%d", "%Y%m%d"]
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
                .map(|date| date.and_time(chrono::NaiveTime::MIN))
        })
}

/// Format an instant as ISO-8601, with fractional seconds only when present.
#[must_use]
pub fn format_instant(instant: &NaiveDateTime) -> String {
    if instant.nanosecond() == 0 {
        instant.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        instant.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
    }
}

fn integer(field: Field, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::invalid(field, format!("{n} is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|e| Error::invalid(field, format!("`{s}`: {e}"))),
        other => Err(Error::invalid(field, format!("{other} is not an integer"))),
    }
}

/// Flatten a single value, an array, or a comma separated string into items.
fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        other => vec![other.clone()],
    }
}

fn integers(field: Field, value: &Value) -> Result<Vec<i64>> {
    items(value).iter().map(|v| integer(field, v)).collect()
}

fn weekday_value(field: Field, value: &Value) -> Result<Weekday> {
    let day = match value {
        Value::String(s) => parse_weekday(s),
        other => weekday_from_index(integer(field, other)?),
    };
    day.ok_or_else(|| Error::invalid(field, format!("{value} is not a weekday")))
}

fn nth_weekday(value: &Value) -> Result<NthWeekday> {
    let field = Field::ByWeekday;
    match value {
        Value::String(s) => s.parse(),
        Value::Object(object) => {
            let day = object
                .get("day")
                .ok_or_else(|| Error::invalid(field, "weekday object has no `day`"))?;
            let day = weekday_value(field, day)?;
            match object.get("ordinal") {
                None | Some(Value::Null) => Ok(NthWeekday::every(day)),
                Some(ordinal) => NthWeekday::nth(day, integer(field, ordinal)?),
            }
        }
        other => NthWeekday::from_parts(integer(field, other)?, None),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(values) => values.is_empty(),
        _ => false,
    }
}

impl RecurrenceRule {
    /// Set a field from a loosely typed value, as found in a flat mapping.
    ///
    /// Scalars accept numbers or numeric strings, frequencies and weekdays
    /// also accept their names, instants accept ISO-8601 strings. List fields
    /// accept one value, an array, or a comma separated string, and
    /// `byweekday` items may also be `"2TU"` strings or
    /// `{"day": 1, "ordinal": 2}` objects. `null` or an empty value clears
    /// the field (`interval` falls back to 1, `wkst` to Monday).
    ///
    /// Like the typed setters, setting `count` clears `until` and vice versa.
    ///
    /// ## Errors
    ///
    /// [`Error::InvalidValue`] if the value does not fit the field, in which
    /// case the field is left unchanged.
    pub fn set(&mut self, field: Field, value: &Value) -> Result<&mut Self> {
        if is_empty(value) {
            return Ok(self.clear(field));
        }
        match field {
            Field::Start => self.set_start(instant_string(field, value)?),
            Field::Until => self.set_until(instant_string(field, value)?),
            Field::Frequency => {
                let frequency = match value {
                    Value::String(s) => s.parse()?,
                    other => Frequency::try_from(integer(field, other)?)?,
                };
                Ok(self.set_frequency(Some(frequency)))
            }
            Field::Interval => {
                let interval = u32::try_from(integer(field, value)?)
                    .map_err(|e| Error::invalid(field, e.to_string()))?;
                self.set_interval(interval)
            }
            Field::WeekStart => Ok(self.set_week_start(weekday_value(field, value)?)),
            Field::Count => {
                let count = u32::try_from(integer(field, value)?)
                    .map_err(|e| Error::invalid(field, e.to_string()))?;
                Ok(self.set_count(Some(count)))
            }
            Field::BySetPosition => self.set_by_set_position(integers(field, value)?),
            Field::ByMonth => self.set_by_month(integers(field, value)?),
            Field::ByMonthDay => self.set_by_month_day(integers(field, value)?),
            Field::ByYearDay => self.set_by_year_day(integers(field, value)?),
            Field::ByWeekNumber => self.set_by_week_number(integers(field, value)?),
            Field::ByWeekday => {
                let days = items(value)
                    .iter()
                    .map(nth_weekday)
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.set_by_weekday(days))
            }
            Field::ByHour => self.set_by_hour(integers(field, value)?),
            Field::ByMinute => self.set_by_minute(integers(field, value)?),
            Field::BySecond => self.set_by_second(integers(field, value)?),
            Field::ByEaster => self.set_by_easter(integers(field, value)?),
        }
    }

    /// Reset a field to its unset value.
    pub fn clear(&mut self, field: Field) -> &mut Self {
        match field {
            Field::Start => self.start = None,
            Field::Until => self.until = None,
            Field::Frequency => self.frequency = None,
            Field::Interval => self.interval = 1,
            Field::WeekStart => self.week_start = Weekday::Mon,
            Field::Count => self.count = None,
            Field::BySetPosition => self.by_set_position.clear(),
            Field::ByMonth => self.by_month.clear(),
            Field::ByMonthDay => self.by_month_day.clear(),
            Field::ByYearDay => self.by_year_day.clear(),
            Field::ByWeekNumber => self.by_week_number.clear(),
            Field::ByWeekday => self.by_weekday.clear(),
            Field::ByHour => self.by_hour.clear(),
            Field::ByMinute => self.by_minute.clear(),
            Field::BySecond => self.by_second.clear(),
            Field::ByEaster => self.by_easter.clear(),
        }
        self
    }

    /// The flat mapping of this rule. Only fields holding a value are
    /// present; `wkst` is omitted while it is Monday.
    #[must_use]
    pub fn to_mapping(&self) -> Map<String, Value> {
        fn list<T: Copy + Into<i64>>(values: impl IntoIterator<Item = T>) -> Value {
            values.into_iter().map(|v| Value::from(Into::<i64>::into(v))).collect()
        }

        let mut map = Map::new();
        let mut insert = |field: Field, value: Value| {
            map.insert(field.key().to_string(), value);
        };

        if let Some(start) = &self.start {
            insert(Field::Start, format_instant(start).into());
        }
        if let Some(until) = &self.until {
            insert(Field::Until, format_instant(until).into());
        }
        if let Some(frequency) = self.frequency {
            insert(Field::Frequency, frequency.number().into());
        }
        insert(Field::Interval, self.interval.into());
        if self.week_start != Weekday::Mon {
            insert(Field::WeekStart, self.week_start.num_days_from_monday().into());
        }
        if let Some(count) = self.count {
            insert(Field::Count, count.into());
        }

        let lists: [(Field, Value, bool); 9] = [
            (
                Field::BySetPosition,
                list(self.by_set_position.iter().copied()),
                self.by_set_position.is_empty(),
            ),
            (
                Field::ByMonth,
                list(self.by_month.iter().copied()),
                self.by_month.is_empty(),
            ),
            (
                Field::ByMonthDay,
                list(self.by_month_day.iter().copied()),
                self.by_month_day.is_empty(),
            ),
            (
                Field::ByYearDay,
                list(self.by_year_day.iter().copied()),
                self.by_year_day.is_empty(),
            ),
            (
                Field::ByWeekNumber,
                list(self.by_week_number.iter().copied()),
                self.by_week_number.is_empty(),
            ),
            (
                Field::ByHour,
                list(self.by_hour.iter().copied()),
                self.by_hour.is_empty(),
            ),
            (
                Field::ByMinute,
                list(self.by_minute.iter().copied()),
                self.by_minute.is_empty(),
            ),
            (
                Field::BySecond,
                list(self.by_second.iter().copied()),
                self.by_second.is_empty(),
            ),
            (
                Field::ByEaster,
                list(self.by_easter.iter().copied()),
                self.by_easter.is_empty(),
            ),
        ];
        for (field, value, empty) in lists {
            if !empty {
                insert(field, value);
            }
        }

        if !self.by_weekday.is_empty() {
            let days = self
                .by_weekday
                .iter()
                .map(|day| match day.ordinal() {
                    None => Value::from(day.index()),
                    Some(ordinal) => {
                        let mut object = Map::new();
                        object.insert("day".to_string(), day.index().into());
                        object.insert("ordinal".to_string(), ordinal.get().into());
                        Value::Object(object)
                    }
                })
                .collect();
            insert(Field::ByWeekday, days);
        }

        map
    }

    /// Build a rule from its flat mapping, applying [`Self::set`] per key.
    ///
    /// ## Errors
    ///
    /// [`Error::UnknownField`] for keys that are not rule fields,
    /// [`Error::ConflictingTermination`] if both `count` and `until` hold a
    /// value, and [`Error::InvalidValue`] for values that do not fit.
    pub fn from_mapping(map: &Map<String, Value>) -> Result<Self> {
        let present = |field: Field| map.get(field.key()).is_some_and(|v| !is_empty(v));
        if present(Field::Count) && present(Field::Until) {
            return Err(Error::ConflictingTermination);
        }

        let mut rule = Self::default();
        for (key, value) in map {
            let field: Field = key.parse()?;
            rule.set(field, value)?;
        }
        Ok(rule)
    }
}

fn instant_string(field: Field, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::invalid(field, format!("{other} is not a date string"))),
    }
}

impl From<RecurrenceRule> for Map<String, Value> {
    fn from(rule: RecurrenceRule) -> Self {
        rule.to_mapping()
    }
}

impl TryFrom<Map<String, Value>> for RecurrenceRule {
    type Error = Error;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        Self::from_mapping(&map)
    }
}

impl Serialize for RecurrenceRule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_mapping().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecurrenceRule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::deserialize(deserializer)?;
        Self::from_mapping(&map).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn parse_instant_formats() {
        assert_eq!(parse_instant("2011-01-01"), Some(at(2011, 1, 1, 0, 0, 0)));
        assert_eq!(
            parse_instant("2011-01-01T09:30:15"),
            Some(at(2011, 1, 1, 9, 30, 15))
        );
        assert_eq!(
            parse_instant("2011-01-01 09:30"),
            Some(at(2011, 1, 1, 9, 30, 0))
        );
        assert_eq!(
            parse_instant("2011-01-01T09:30:15+02:00"),
            Some(at(2011, 1, 1, 9, 30, 15))
        );
        assert_eq!(
            parse_instant("20110101T093015Z"),
            Some(at(2011, 1, 1, 9, 30, 15))
        );
        assert_eq!(parse_instant("yesterday"), None);
        assert_eq!(parse_instant("2011-02-30"), None);
    }

    #[test]
    fn format_instant_drops_zero_fraction() {
        assert_eq!(
            format_instant(&at(2011, 1, 1, 9, 30, 15)),
            "2011-01-01T09:30:15"
        );
        let fractional = at(2011, 1, 1, 9, 30, 15)
            .with_nanosecond(500_000_000)
            .unwrap();
        assert_eq!(format_instant(&fractional), "2011-01-01T09:30:15.500");
        assert_eq!(parse_instant(&format_instant(&fractional)), Some(fractional));
    }

    #[test]
    fn mapping_omits_unset_fields() {
        let rule = RecurrenceRule::new(Frequency::Daily, at(2011, 1, 1, 0, 0, 0));
        let map = rule.to_mapping();
        assert_eq!(
            Value::Object(map),
            json!({"dtstart": "2011-01-01T00:00:00", "freq": 3, "interval": 1})
        );
    }

    #[test]
    fn mapping_round_trip() {
        let mut rule = RecurrenceRule::new(Frequency::Monthly, at(2011, 1, 1, 9, 0, 0));
        rule.set_interval(2).unwrap();
        rule.set_week_start(Weekday::Sun);
        rule.set_until(at(2012, 1, 1, 0, 0, 0)).unwrap();
        rule.set_by_set_position([-1]).unwrap();
        rule.set_by_month([1, 3, 5]).unwrap();
        rule.set_by_month_day([-1, 1]).unwrap();
        rule.set_by_year_day([100]).unwrap();
        rule.set_by_week_number([-1, 10]).unwrap();
        rule.set_by_weekday([
            NthWeekday::every(Weekday::Mon),
            NthWeekday::nth(Weekday::Fri, -1).unwrap(),
        ]);
        rule.set_by_hour([9, 17]).unwrap();
        rule.set_by_minute([0, 30]).unwrap();
        rule.set_by_second([0]).unwrap();
        rule.set_by_easter([-2]).unwrap();

        let map = rule.to_mapping();
        assert_eq!(map["byweekday"], json!([0, {"day": 4, "ordinal": -1}]));
        assert_eq!(map["wkst"], json!(6));
        assert_eq!(RecurrenceRule::from_mapping(&map).unwrap(), rule);

        let text = serde_json::to_string(&rule).unwrap();
        let back: RecurrenceRule = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn from_mapping_parses_loose_values() {
        let map = object(json!({
            "dtstart": "2013-01-01",
            "freq": "weekly",
            "interval": "2",
            "wkst": "SU",
            "count": 4,
            "bymonth": "1, 2",
            "byweekday": ["TU", 3, "-1FR", {"day": "MO", "ordinal": 2}],
            "byhour": 9,
        }));
        let rule = RecurrenceRule::from_mapping(&map).unwrap();
        assert_eq!(rule.start(), Some(at(2013, 1, 1, 0, 0, 0)));
        assert_eq!(rule.frequency(), Some(Frequency::Weekly));
        assert_eq!(rule.interval(), 2);
        assert_eq!(rule.week_start(), Weekday::Sun);
        assert_eq!(rule.count(), Some(4));
        assert_eq!(rule.by_month(), &BTreeSet::from([1, 2]));
        assert_eq!(rule.by_hour(), &BTreeSet::from([9]));
        assert_eq!(
            rule.by_weekday(),
            &BTreeSet::from([
                NthWeekday::every(Weekday::Tue),
                NthWeekday::every(Weekday::Thu),
                NthWeekday::nth(Weekday::Fri, -1).unwrap(),
                NthWeekday::nth(Weekday::Mon, 2).unwrap(),
            ])
        );
    }

    #[test]
    fn from_mapping_rejects_unknown_and_conflicting() {
        let unknown = object(json!({"dtstart": "2013-01-01", "colour": "red"}));
        assert_eq!(
            RecurrenceRule::from_mapping(&unknown),
            Err(Error::UnknownField("colour".to_string()))
        );

        let both = object(json!({"count": 3, "until": "2013-02-01"}));
        assert_eq!(
            RecurrenceRule::from_mapping(&both),
            Err(Error::ConflictingTermination)
        );

        let cleared = object(json!({"count": null, "until": "2013-02-01"}));
        assert!(RecurrenceRule::from_mapping(&cleared).is_ok());
    }

    #[test]
    fn zero_ordinal_leaves_weekdays_unset() {
        let mut rule = RecurrenceRule::default();
        let err = rule
            .set(Field::ByWeekday, &json!([{"day": 1, "ordinal": 0}]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidValue {
                field: Field::ByWeekday,
                ..
            }
        ));
        assert!(rule.by_weekday().is_empty());
    }

    #[test]
    fn set_rejects_bad_values() {
        let mut rule = RecurrenceRule::default();
        assert!(rule.set(Field::Frequency, &json!(9)).is_err());
        assert!(rule.set(Field::Frequency, &json!("sometimes")).is_err());
        assert!(rule.set(Field::Interval, &json!(-1)).is_err());
        assert!(rule.set(Field::Count, &json!("many")).is_err());
        assert!(rule.set(Field::Start, &json!("2013-13-01")).is_err());
        assert!(rule.set(Field::Start, &json!(20130101)).is_err());
        assert!(rule.set(Field::WeekStart, &json!(7)).is_err());
        assert!(rule.set(Field::ByMonth, &json!([1, "x"])).is_err());
        assert_eq!(rule, RecurrenceRule::default());
    }

    #[test]
    fn set_null_clears() {
        let mut rule = RecurrenceRule::new(Frequency::Daily, at(2013, 1, 1, 0, 0, 0));
        rule.set(Field::ByHour, &json!([1, 2])).unwrap();
        rule.set(Field::ByHour, &Value::Null).unwrap();
        rule.set(Field::Frequency, &json!("")).unwrap();
        assert!(rule.by_hour().is_empty());
        assert_eq!(rule.frequency(), None);
    }

    #[test]
    fn field_keys_round_trip() {
        for field in Field::ALL {
            assert_eq!(field.key().parse::<Field>().unwrap(), field);
        }
        assert!("byday".parse::<Field>().is_err());
    }
}
