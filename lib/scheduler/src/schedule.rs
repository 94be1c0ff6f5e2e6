//! Cron schedules.
//!
//! Standard five-field expressions (minute, hour, day-of-month, month,
//! day-of-week) parsed by `croner`. Month and weekday names are accepted,
//! `0` and `7` both mean Sunday, and when day-of-month and day-of-week are
//! both restricted a day matches if either does. Schedules are evaluated
//! in UTC.

use crate::error::ScheduleError;
use chrono::{DateTime, Timelike, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};

/// A parsed cron schedule.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSchedule {
    expression: String,
    cron: Cron,
}

impl CronSchedule {
    /// Parses a cron expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is malformed or out of range.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let normalized = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        let cron = Cron::new(&normalized)
            .parse()
            .map_err(|e| ScheduleError::InvalidCronExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: normalized,
            cron,
        })
    }

    /// Returns the normalized expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns true if the schedule fires in the minute containing `at`.
    #[must_use]
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.cron
            .is_time_matching(&truncate_to_minute(at))
            .unwrap_or(false)
    }

    /// Returns the first matching minute strictly after `after`, or `None`
    /// if the schedule never fires (e.g. `0 0 31 2 *`).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.find_next_occurrence(&after, false).ok()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl std::fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl TryFrom<String> for CronSchedule {
    type Error = ScheduleError;

    fn try_from(expression: String) -> Result<Self, Self::Error> {
        Self::parse(&expression)
    }
}

impl From<CronSchedule> for String {
    fn from(schedule: CronSchedule) -> Self {
        schedule.expression
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Truncates a timestamp to the start of its minute.
#[must_use]
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_at_seven() {
        let schedule = CronSchedule::parse("0 7 * * *").unwrap();
        assert!(schedule.matches(at(2026, 1, 5, 7, 0)));
        assert!(!schedule.matches(at(2026, 1, 5, 7, 1)));
        assert_eq!(
            schedule.next_after(at(2026, 1, 5, 7, 0)),
            Some(at(2026, 1, 6, 7, 0))
        );
    }

    #[test]
    fn steps_ranges_and_lists() {
        let schedule = CronSchedule::parse("*/15 9-17/4 * * 1,3").unwrap();
        // 2026-01-05 is a Monday
        assert!(schedule.matches(at(2026, 1, 5, 13, 45)));
        assert!(!schedule.matches(at(2026, 1, 5, 11, 0)));
        assert!(!schedule.matches(at(2026, 1, 6, 9, 0)));
    }

    #[test]
    fn names_and_sunday_seven() {
        let schedule = CronSchedule::parse("30 6 * JAN,feb sun").unwrap();
        let seven = CronSchedule::parse("30 6 * 1,2 7").unwrap();
        // 2026-01-04 is a Sunday
        assert!(schedule.matches(at(2026, 1, 4, 6, 30)));
        assert!(seven.matches(at(2026, 1, 4, 6, 30)));
        assert!(!schedule.matches(at(2026, 3, 1, 6, 30)));
    }

    #[test]
    fn day_of_month_or_day_of_week() {
        // the 1st of the month, or any Friday
        let schedule = CronSchedule::parse("0 6 1 * fri").unwrap();
        assert!(schedule.matches(at(2026, 1, 1, 6, 0)));
        assert!(schedule.matches(at(2026, 1, 9, 6, 0)));
        assert!(!schedule.matches(at(2026, 1, 8, 6, 0)));

        // day-of-week unrestricted: only the 1st
        let monthly = CronSchedule::parse("0 6 1 * *").unwrap();
        assert!(!monthly.matches(at(2026, 1, 9, 6, 0)));
    }

    #[test]
    fn next_after_rolls_over_month() {
        let schedule = CronSchedule::parse("0 6 1 * *").unwrap();
        assert_eq!(
            schedule.next_after(at(2026, 1, 31, 23, 59)),
            Some(at(2026, 2, 1, 6, 0))
        );
    }

    #[test]
    fn next_after_same_hour() {
        let schedule = CronSchedule::parse("*/20 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 5, 10, 20, 30).unwrap();
        assert_eq!(schedule.next_after(from), Some(at(2026, 1, 5, 10, 40)));
    }

    #[test]
    fn impossible_schedule_never_fires() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(schedule.next_after(at(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn invalid_expressions_rejected() {
        for expression in ["invalid", "* * * *", "60 * * * *", "* * 0 * *", "*/0 * * * *", "5-1 * * * *", "* * * foo *"] {
            assert!(
                CronSchedule::parse(expression).is_err(),
                "{expression} should be rejected"
            );
        }
    }

    #[test]
    fn serde_as_expression_string() {
        let schedule = CronSchedule::parse("0  7 * * *").unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, r#""0 7 * * *""#);
        let parsed: CronSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schedule);
        assert!(serde_json::from_str::<CronSchedule>(r#""nope""#).is_err());
    }
}
