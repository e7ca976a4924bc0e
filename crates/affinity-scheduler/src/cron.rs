//! Cron expression parser and occurrence finder.
//! Supports: "MIN HOUR DOM MON DOW" (5-field) and "SEC MIN HOUR DOM MON DOW"
//! (6-field). Wildcards: *, */N, N, N-M, N-M/S, comma lists.
//! Example: "0 8 * * 1-5" = weekdays at 8:00.
//!
//! Evaluation happens in a named IANA timezone; returned instants are UTC.

use affinity_core::error::{CoreError, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// Second the occurrence fires at (0 for 5-field expressions).
    second: u32,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    /// Whether DOM/DOW were written as something narrower than "*".
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a 5- or 6-field cron expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let (second, fields) = match parts.len() {
            5 => (0, &parts[..]),
            6 => {
                // Seconds field: validate fully, fire at the earliest match.
                let secs = parse_field(parts[0], 0, 59)
                    .map_err(|e| invalid(expression, "seconds", &e))?;
                (secs[0], &parts[1..])
            }
            n => {
                return Err(CoreError::InvalidSchedule(format!(
                    "'{expression}': expected 5 or 6 fields, got {n}"
                )));
            }
        };

        let minutes = parse_field(fields[0], 0, 59)
            .map_err(|e| invalid(expression, "minute", &e))?;
        let hours = parse_field(fields[1], 0, 23)
            .map_err(|e| invalid(expression, "hour", &e))?;
        let days_of_month = parse_field(fields[2], 1, 31)
            .map_err(|e| invalid(expression, "day-of-month", &e))?;
        let months = parse_field(fields[3], 1, 12)
            .map_err(|e| invalid(expression, "month", &e))?;
        let days_of_week = parse_field(fields[4], 0, 6)
            .map_err(|e| invalid(expression, "day-of-week", &e))?;

        Ok(Self {
            second,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`.
    /// Minute-resolution scan with a 366-day horizon; None means the
    /// expression never matches inside that window (e.g. "0 0 30 2 *").
    pub fn next_occurrence(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after
            .with_timezone(&tz)
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))?
            + Duration::minutes(1);

        for _ in 0..(366 * 24 * 60) {
            if self.matches_local(&candidate) {
                let fired = candidate.with_second(self.second).unwrap_or(candidate);
                return Some(fired.with_timezone(&Utc));
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn matches_local(&self, t: &DateTime<Tz>) -> bool {
        if !self.minutes.contains(&t.minute()) || !self.hours.contains(&t.hour()) {
            return false;
        }
        if !self.months.contains(&t.month()) {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&t.day());
        let dow_ok = self
            .days_of_week
            .contains(&t.weekday().num_days_from_sunday());
        // Standard cron: both restricted → OR, otherwise AND.
        if self.dom_restricted && self.dow_restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }
}

/// Validate an expression without keeping the schedule.
pub fn validate(expression: &str) -> Result<()> {
    CronSchedule::parse(expression).map(|_| ())
}

/// Resolve an IANA timezone name ("UTC", "Asia/Ho_Chi_Minh", ...).
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::InvalidSchedule(format!("unknown timezone '{name}'")))
}

fn invalid(expression: &str, field: &str, detail: &str) -> CoreError {
    CoreError::InvalidSchedule(format!("'{expression}': bad {field} field: {detail}"))
}

/// Parse one cron field into the sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> std::result::Result<Vec<u32>, String> {
    let mut values = Vec::new();
    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err("empty list entry".into());
        }
        values.extend(parse_part(part, min, max)?);
    }
    if values.is_empty() {
        return Err(format!("'{field}' matches nothing"));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

/// One comma-list entry: *, */N, N, N-M, N-M/S.
fn parse_part(part: &str, min: u32, max: u32) -> std::result::Result<Vec<u32>, String> {
    let (range, step) = match part.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| format!("'{s}' is not a valid step"))?;
            if step == 0 {
                return Err("step must be > 0".into());
            }
            (r, step)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        let lo: u32 = a.parse().map_err(|_| format!("'{a}' is not a number"))?;
        let hi: u32 = b.parse().map_err(|_| format!("'{b}' is not a number"))?;
        if lo > hi {
            return Err(format!("range {lo}-{hi} is inverted"));
        }
        (lo, hi)
    } else {
        let n: u32 = range
            .parse()
            .map_err(|_| format!("'{range}' is not a number"))?;
        (n, n)
    };

    if lo < min || hi > max {
        return Err(format!("{lo}-{hi} outside {min}-{max}"));
    }
    Ok((lo..=hi).step_by(step as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let s = CronSchedule::parse("0 * * * *").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 22, 10, 30)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_specific_time() {
        let s = CronSchedule::parse("0 8 * * *").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 22, 7, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 8, 0));
    }

    #[test]
    fn test_every_5_minutes() {
        let s = CronSchedule::parse("*/5 * * * *").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 22, 10, 2)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 10, 5));
    }

    #[test]
    fn test_strictly_after() {
        // An occurrence exactly at `after` is not returned again.
        let s = CronSchedule::parse("*/5 * * * *").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 22, 10, 5)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 10, 10));
    }

    #[test]
    fn test_weekday_range() {
        // 2026-02-20 is a Friday; "0 9 * * 1-5" next fires Monday 02-23.
        let s = CronSchedule::parse("0 9 * * 1-5").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 20, 10, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 23, 9, 0));
    }

    #[test]
    fn test_dom_dow_or_semantics() {
        // Both restricted: fire on the 15th OR on Sundays, whichever first.
        // 2026-02-10 is a Tuesday; next Sunday is 02-15 — also the 15th.
        let s = CronSchedule::parse("0 0 15 * 0").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 10, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 15, 0, 0));
        // After the 15th, the following Sunday (02-22) wins over the next 15th.
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 15, 12, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 0, 0));
    }

    #[test]
    fn test_comma_list() {
        let s = CronSchedule::parse("0,30 12 * * *").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 22, 12, 5)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 12, 30));
    }

    #[test]
    fn test_timezone_evaluation() {
        // 08:00 in Ho Chi Minh (UTC+7) is 01:00 UTC.
        let tz: Tz = "Asia/Ho_Chi_Minh".parse().unwrap();
        let s = CronSchedule::parse("0 8 * * *").unwrap();
        let next = s.next_occurrence(tz, utc(2026, 2, 22, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 2, 22, 1, 0));
    }

    #[test]
    fn test_six_field_expression() {
        let s = CronSchedule::parse("30 0 8 * * *").unwrap();
        let next = s.next_occurrence(Tz::UTC, utc(2026, 2, 22, 7, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 30).unwrap());
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(validate("bad").is_err());
        assert!(validate("* * * *").is_err());
        assert!(validate("61 * * * *").is_err());
        assert!(validate("*/0 * * * *").is_err());
        assert!(validate("5-2 * * * *").is_err());
        assert!(validate("0 8 32 * *").is_err());
        assert!(validate("not a cron at all").is_err());
    }

    #[test]
    fn test_resolve_timezone() {
        assert!(resolve_timezone("UTC").is_ok());
        assert!(resolve_timezone("America/New_York").is_ok());
        assert!(resolve_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_never_matching_schedule() {
        // Feb 30 never exists.
        let s = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert!(s.next_occurrence(Tz::UTC, utc(2026, 1, 1, 0, 0)).is_none());
    }
}
