//! Schedule derivation and cron expression evaluation.
//!
//! Two halves: `build_cron` translates the user-facing frequency/time/day
//! triple into a five-field cron expression, and `CronExpr` parses and
//! evaluates such expressions so live timers can compute their next fire.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::errors::{BackupError, Result};
use crate::store::{Frequency, Schedule};

/// Translates a frequency/time/day triple into a cron expression.
///
/// Total and side-effect free: anything underspecified (no frequency, daily
/// without a time, weekly without a time or weekday, malformed "HH:MM")
/// yields `None` rather than an error.
pub fn build_cron(
    frequency: Option<Frequency>,
    time_of_day: Option<&str>,
    day_of_week: Option<u8>,
) -> Option<String> {
    match frequency? {
        Frequency::Hourly => Some("0 * * * *".to_string()),
        Frequency::Daily => {
            let (hour, minute) = parse_time(time_of_day?)?;
            Some(format!("{minute} {hour} * * *"))
        }
        Frequency::Weekly => {
            let (hour, minute) = parse_time(time_of_day?)?;
            let day = day_of_week?;
            Some(format!("{minute} {hour} * * {day}"))
        }
    }
}

/// Resolves either schedule variant to a cron expression, if one is derivable.
pub fn derive_expression(schedule: &Schedule) -> Option<String> {
    match schedule {
        Schedule::Cron(expr) => {
            let trimmed = expr.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Schedule::Plan {
            frequency,
            time_of_day,
            day_of_week,
        } => build_cron(*frequency, time_of_day.as_deref(), *day_of_week),
    }
}

fn parse_time(time: &str) -> Option<(u32, u32)> {
    let (hour, minute) = time.split_once(':')?;
    Some((hour.trim().parse().ok()?, minute.trim().parse().ok()?))
}

/// One field of a parsed cron expression: the set of accepted values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
}

impl CronField {
    fn parse(expr: &str, min: u32, max: u32, source: &str) -> Result<Self> {
        let mut values = BTreeSet::new();
        for part in expr.split(',') {
            let part = part.trim();

            let (range, step) = match part.split_once('/') {
                Some((range, step_str)) => {
                    let step: u32 = step_str
                        .parse()
                        .map_err(|_| invalid(source, format!("bad step '{step_str}'")))?;
                    if step == 0 {
                        return Err(invalid(source, "step must be nonzero".to_string()));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| invalid(source, format!("bad range start '{lo}'")))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| invalid(source, format!("bad range end '{hi}'")))?;
                if lo > hi {
                    return Err(invalid(source, format!("inverted range {lo}-{hi}")));
                }
                (lo, hi)
            } else {
                let v: u32 = range
                    .parse()
                    .map_err(|_| invalid(source, format!("bad value '{range}'")))?;
                // A step on a bare value runs to the end of the field, per
                // Vixie cron: "5/15" in the minute field means 5,20,35,50.
                match step {
                    Some(_) => (v, max),
                    None => (v, v),
                }
            };

            if start < min || end > max {
                return Err(invalid(
                    source,
                    format!("value out of range [{min}, {max}]: '{part}'"),
                ));
            }

            values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
        }
        Ok(CronField { values })
    }

    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

fn invalid(expression: &str, reason: String) -> BackupError {
    BackupError::InvalidCronSchedule {
        expression: expression.to_string(),
        reason,
    }
}

/// A parsed five-field cron expression (minute, hour, day-of-month, month,
/// day-of-week with 0 = Sunday).
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                expr,
                format!("expected 5 fields, got {}", fields.len()),
            ));
        }

        Ok(CronExpr {
            minute: CronField::parse(fields[0], 0, 59, expr)?,
            hour: CronField::parse(fields[1], 0, 23, expr)?,
            day_of_month: CronField::parse(fields[2], 1, 31, expr)?,
            month: CronField::parse(fields[3], 1, 12, expr)?,
            day_of_week: CronField::parse(fields[4], 0, 6, expr)?,
        })
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }

    /// First matching instant strictly after `after`, at minute granularity.
    /// Bounded to a one-year search horizon; every parseable expression fires
    /// within that window or not at all (e.g. Feb 30).
    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        let horizon = after + Duration::days(366);
        while candidate <= horizon {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hourly_ignores_time_and_day() {
        assert_eq!(
            build_cron(Some(Frequency::Hourly), Some("14:30"), Some(3)),
            Some("0 * * * *".to_string())
        );
    }

    #[test]
    fn daily_with_time() {
        assert_eq!(
            build_cron(Some(Frequency::Daily), Some("14:30"), None),
            Some("30 14 * * *".to_string())
        );
    }

    #[test]
    fn weekly_with_time_and_day() {
        assert_eq!(
            build_cron(Some(Frequency::Weekly), Some("09:00"), Some(3)),
            Some("0 9 * * 3".to_string())
        );
    }

    #[test]
    fn missing_inputs_yield_none() {
        assert_eq!(build_cron(None, Some("09:00"), Some(3)), None);
        assert_eq!(build_cron(Some(Frequency::Daily), None, None), None);
        assert_eq!(build_cron(Some(Frequency::Weekly), Some("09:00"), None), None);
        assert_eq!(build_cron(Some(Frequency::Weekly), None, Some(1)), None);
        assert_eq!(build_cron(Some(Frequency::Daily), Some("garbage"), None), None);
    }

    #[test]
    fn derive_prefers_raw_cron() {
        let schedule = Schedule::Cron("*/5 * * * *".to_string());
        assert_eq!(derive_expression(&schedule), Some("*/5 * * * *".to_string()));

        let blank = Schedule::Cron("   ".to_string());
        assert_eq!(derive_expression(&blank), None);
    }

    #[test]
    fn derive_resolves_plan() {
        let schedule = Schedule::Plan {
            frequency: Some(Frequency::Weekly),
            time_of_day: Some("09:00".to_string()),
            day_of_week: Some(3),
        };
        assert_eq!(derive_expression(&schedule), Some("0 9 * * 3".to_string()));
    }

    #[test]
    fn parse_accepts_standard_forms() {
        assert!(CronExpr::parse("* * * * *").is_ok());
        assert!(CronExpr::parse("0 * * * *").is_ok());
        assert!(CronExpr::parse("*/15 9-17 * * 1-5").is_ok());
        assert!(CronExpr::parse("0,30 4 1 1 *").is_ok());
    }

    #[test]
    fn parse_rejects_bad_expressions() {
        for expr in ["* *", "60 * * * *", "* 25 * * *", "* * * * 7", "a * * * *", "*/0 * * * *"] {
            let err = CronExpr::parse(expr).unwrap_err();
            assert!(
                matches!(err, BackupError::InvalidCronSchedule { .. }),
                "expected InvalidCronSchedule for '{expr}'"
            );
        }
    }

    #[test]
    fn step_on_bare_value_runs_to_field_end() {
        let expr = CronExpr::parse("5/15 * * * *").unwrap();
        let expected: BTreeSet<u32> = [5, 20, 35, 50].into_iter().collect();
        assert_eq!(expr.minute.values, expected);
    }

    #[test]
    fn matches_exact_minute() {
        let expr = CronExpr::parse("30 4 * * *").unwrap();
        assert!(expr.matches(Utc.with_ymd_and_hms(2024, 1, 15, 4, 30, 0).unwrap()));
        assert!(!expr.matches(Utc.with_ymd_and_hms(2024, 1, 15, 4, 31, 0).unwrap()));
    }

    #[test]
    fn next_run_hourly() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let next = expr.next_run(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap());
    }

    #[test]
    fn next_run_rolls_to_next_day() {
        let expr = CronExpr::parse("0 3 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        let next = expr.next_run(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 3, 0, 0).unwrap());
    }

    #[test]
    fn next_run_weekly_lands_on_weekday() {
        // 2024-01-15 is a Monday; day-of-week 3 is Wednesday.
        let expr = CronExpr::parse("0 9 * * 3").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let next = expr.next_run(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 17, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_run_is_strictly_after() {
        let expr = CronExpr::parse("30 4 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 4, 30, 0).unwrap();
        let next = expr.next_run(at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 16, 4, 30, 0).unwrap());
    }

    #[test]
    fn impossible_date_never_fires() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(expr.next_run(now), None);
    }
}
