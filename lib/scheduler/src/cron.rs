//! Cron expression parsing and next-fire-time computation for `schedule`
//! triggers (§4.3).
//!
//! No crate anywhere in the source corpus this codebase was grown from
//! parses cron grammar — the nearest relative (`CronSchedule::next_after`)
//! is an explicit placeholder that always returns "one hour later" with a
//! comment admitting a real cron library belongs here. This module is a
//! hand-written 5/6-field evaluator in that struct's shape, grounded on the
//! cron grammar itself rather than on any corpus file.

use crate::error::ValidationError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};

/// A parsed, schedulable cron expression bound to an IANA-style time zone
/// name.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CronSchedule {
    pub expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl CronSchedule {
    /// Creates a schedule, validating the expression immediately. Invalid
    /// cron strings are a hard error at schedule time (§4.3).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCron`] if `expression` does not
    /// parse as a 5- or 6-field cron grammar.
    pub fn new(expression: impl Into<String>) -> Result<Self, ValidationError> {
        let schedule = Self {
            expression: expression.into(),
            timezone: None,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Attaches an IANA-style timezone name (approximated as a fixed
    /// standard-time offset; see [`resolve_tz_offset`]).
    #[must_use]
    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// Re-validates the expression grammar.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCron`] on a malformed expression.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ParsedCron::parse(&self.expression).map(|_| ())
    }

    /// Computes the next fire time strictly after `after`, in the
    /// schedule's timezone, returned in UTC.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCron`] if the expression doesn't
    /// parse, or if no matching time is found within a five year search
    /// horizon (almost always indicates an unsatisfiable day-of-month /
    /// month combination, e.g. `31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
        let parsed = ParsedCron::parse(&self.expression)?;
        let offset = resolve_tz_offset(self.timezone.as_deref().unwrap_or("UTC"));
        let local_after = after.with_timezone(&offset).naive_local();
        let local_next = parsed.next_after(local_after)?;
        Ok(DateTime::<FixedOffset>::from_naive_utc_and_offset(local_next - offset, offset)
            .with_timezone(&Utc))
    }
}

/// A bitset over one cron field's legal range, plus whether the field was
/// the literal wildcard `*` (used to resolve the day-of-month /
/// day-of-week OR rule).
#[derive(Debug, Clone)]
struct FieldSet {
    min: u32,
    allowed: Vec<bool>,
    is_wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value >= self.min
            && ((value - self.min) as usize) < self.allowed.len()
            && self.allowed[(value - self.min) as usize]
    }

    fn parse(field: &str, min: u32, max: u32) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidCron {
            expression: field.to_string(),
            reason,
        };

        let mut allowed = vec![false; (max - min + 1) as usize];
        let is_wildcard = field == "*";

        for part in field.split(',') {
            let (range_part, step) = match part.split_once('/') {
                Some((r, s)) => (
                    r,
                    s.parse::<u32>()
                        .map_err(|_| invalid(format!("bad step in '{part}'")))?,
                ),
                None => (part, 1),
            };
            if step == 0 {
                return Err(invalid(format!("step of zero in '{part}'")));
            }

            let (lo, hi) = if range_part == "*" {
                (min, max)
            } else if let Some((a, b)) = range_part.split_once('-') {
                let lo: u32 = a
                    .parse()
                    .map_err(|_| invalid(format!("bad range start in '{part}'")))?;
                let hi: u32 = b
                    .parse()
                    .map_err(|_| invalid(format!("bad range end in '{part}'")))?;
                (lo, hi)
            } else {
                let v: u32 = range_part
                    .parse()
                    .map_err(|_| invalid(format!("bad value '{range_part}'")))?;
                (v, v)
            };

            if lo > hi || hi > max || lo < min {
                return Err(invalid(format!("value out of range in '{part}'")));
            }

            let mut v = lo;
            while v <= hi {
                // Day-of-week 7 means Sunday, same slot as 0.
                let idx = if max == 7 && v == 7 { 0 } else { v - min };
                allowed[idx as usize] = true;
                v += step;
            }
        }

        Ok(Self {
            min,
            allowed,
            is_wildcard,
        })
    }
}

#[derive(Debug, Clone)]
struct ParsedCron {
    seconds: Option<FieldSet>,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl ParsedCron {
    fn parse(expression: &str) -> Result<Self, ValidationError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let invalid = |reason: &str| ValidationError::InvalidCron {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let (seconds_field, rest): (Option<&str>, &[&str]) = match fields.len() {
            5 => (None, &fields[..]),
            6 => (Some(fields[0]), &fields[1..]),
            _ => return Err(invalid("expected 5 fields or 6 fields (with leading seconds)")),
        };

        Ok(Self {
            seconds: seconds_field.map(|f| FieldSet::parse(f, 0, 59)).transpose()?,
            minutes: FieldSet::parse(rest[0], 0, 59)?,
            hours: FieldSet::parse(rest[1], 0, 23)?,
            days_of_month: FieldSet::parse(rest[2], 1, 31)?,
            months: FieldSet::parse(rest[3], 1, 12)?,
            days_of_week: FieldSet::parse(rest[4], 0, 7)?,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_ok = self.days_of_month.contains(date.day());
        // chrono: Sunday = 0 in our field convention; NaiveDate::weekday() Sunday is 6 in
        // num_days_from_monday, so convert explicitly.
        let dow = date.weekday().num_days_from_sunday();
        let dow_ok = self.days_of_week.contains(dow);

        if self.days_of_month.is_wildcard && self.days_of_week.is_wildcard {
            true
        } else if self.days_of_month.is_wildcard {
            dow_ok
        } else if self.days_of_week.is_wildcard {
            dom_ok
        } else {
            dom_ok || dow_ok
        }
    }

    fn next_after(&self, after: NaiveDateTime) -> Result<NaiveDateTime, ValidationError> {
        let has_seconds = self.seconds.is_some();
        let mut candidate = if has_seconds {
            after + Duration::seconds(1)
        } else {
            (after + Duration::minutes(1))
                .with_second(0)
                .expect("0 is always a valid second")
        };

        let search_horizon = after.year() + 5;
        let mut iterations = 0u32;
        const MAX_ITERATIONS: u32 = 200_000;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS || candidate.year() > search_horizon {
                return Err(ValidationError::InvalidCron {
                    expression: String::new(),
                    reason: "no matching time found within the search horizon".to_string(),
                });
            }

            if !self.months.contains(candidate.month()) {
                candidate = first_of_next_month(candidate);
                continue;
            }
            if !self.day_matches(candidate.date()) {
                candidate = (candidate.date() + Duration::days(1))
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid");
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = next_hour(candidate);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += Duration::minutes(1);
                candidate = candidate.with_second(0).unwrap();
                continue;
            }
            if let Some(seconds) = &self.seconds {
                if !seconds.contains(candidate.second()) {
                    candidate += Duration::seconds(1);
                    continue;
                }
            }

            return Ok(candidate);
        }
    }
}

fn first_of_next_month(dt: NaiveDateTime) -> NaiveDateTime {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("valid first-of-month date")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
}

fn next_hour(dt: NaiveDateTime) -> NaiveDateTime {
    (dt + Duration::hours(1))
        .with_minute(0)
        .and_then(|d| d.with_second(0))
        .expect("0 is always a valid minute/second")
}

/// Approximates an IANA timezone name as a fixed standard-time offset.
///
/// No timezone-database crate (`chrono-tz` or similar) appears anywhere in
/// the source corpus this codebase was grown from, so this is a small,
/// explicit, DST-unaware lookup table rather than a full IANA database;
/// unrecognized names and `"UTC"` both fall back to UTC.
#[must_use]
pub fn resolve_tz_offset(name: &str) -> FixedOffset {
    let hours = match name {
        "UTC" | "Etc/UTC" => 0,
        "America/New_York" | "US/Eastern" => -5,
        "America/Chicago" | "US/Central" => -6,
        "America/Denver" | "US/Mountain" => -7,
        "America/Los_Angeles" | "US/Pacific" => -8,
        "Europe/London" => 0,
        "Europe/Paris" | "Europe/Berlin" => 1,
        "Asia/Tokyo" => 9,
        "Asia/Kolkata" => 5, // offset is +5:30; minutes handled below
        "Australia/Sydney" => 10,
        _ => 0,
    };
    let minutes = if name == "Asia/Kolkata" { 30 } else { 0 };
    FixedOffset::east_opt(hours * 3600 + minutes * 60).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn valid_five_field_expression() {
        assert!(CronSchedule::new("0 * * * *").is_ok());
    }

    #[test]
    fn valid_six_field_expression_with_seconds() {
        assert!(CronSchedule::new("*/15 0 * * * *").is_ok());
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::new("* * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronSchedule::new("0 25 * * *").is_err());
    }

    #[test]
    fn rejects_zero_step() {
        assert!(CronSchedule::new("*/0 * * * *").is_err());
    }

    #[test]
    fn every_hour_on_the_hour() {
        let schedule = CronSchedule::new("0 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn daily_at_specific_time() {
        let schedule = CronSchedule::new("30 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 6, 9, 30, 0).unwrap());
    }

    #[test]
    fn weekday_only_schedule_skips_weekend() {
        // Friday 2024-03-08 at 9:00 -> next Monday 2024-03-11 at 9:00.
        let schedule = CronSchedule::new("0 9 * * 1-5").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 8, 10, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn dom_or_dow_union_when_both_restricted() {
        // "fires on the 1st of the month OR on Mondays"
        let schedule = CronSchedule::new("0 0 1 * 1").unwrap();
        let parsed = ParsedCron::parse(&schedule.expression).unwrap();
        // 2024-03-04 is a Monday, not the 1st.
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert!(parsed.day_matches(monday));
        // 2024-03-01 is a Friday, but is the 1st.
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(parsed.day_matches(first));
    }

    #[test]
    fn timezone_offset_shifts_the_fire_time() {
        let schedule = CronSchedule::new("0 9 * * *")
            .unwrap()
            .with_timezone("America/New_York");
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(after).unwrap();
        // 09:00 America/New_York (UTC-5) is 14:00 UTC.
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap());
    }
}
