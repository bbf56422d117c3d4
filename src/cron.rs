//! 5-field cron expressions: `minute hour day month weekday`.
//!
//! Weekday follows the traditional cron convention where Sunday is `0`
//! and the valid range is strictly `0`-`6`; `7` is rejected like any
//! other out-of-range value rather than aliased to Sunday. Each field
//! accepts `*`, a single number, a range `a-b`, a step `*/s` or `a-b/s`,
//! and comma-separated lists of any of the above.

use crate::error::{SchedulerError, Result};
use crate::time::Instant;
use std::collections::BTreeSet;
use std::fmt;

const MAX_SEARCH_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone)]
struct Field {
    values: BTreeSet<u32>,
}

impl Field {
    fn contains(&self, v: u32) -> bool {
        self.values.contains(&v)
    }
}

#[derive(Debug, Clone)]
pub struct CronExpression {
    text: String,
    minute: Field,
    hour: Field,
    day: Field,
    month: Field,
    weekday: Field,
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
impl Eq for CronExpression {}

impl CronExpression {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCronExpression {
                text: text.to_string(),
                reason: format!("expected 5 whitespace-separated fields, found {}", fields.len()),
            });
        }
        let minute = parse_field(text, fields[0], 0, 59)?;
        let hour = parse_field(text, fields[1], 0, 23)?;
        let day = parse_field(text, fields[2], 1, 31)?;
        let month = parse_field(text, fields[3], 1, 12)?;
        let weekday = parse_field(text, fields[4], 0, 6)?;
        Ok(CronExpression {
            text: text.to_string(),
            minute,
            hour,
            day,
            month,
            weekday,
        })
    }

    /// Whether `instant` (already floored to a minute boundary) matches
    /// this expression's calendar fields.
    pub fn matches(&self, instant: Instant) -> bool {
        let f = instant.local_fields();
        self.minute.contains(f.minute)
            && self.hour.contains(f.hour)
            && self.day.contains(f.day)
            && self.month.contains(f.month)
            && self.weekday.contains(f.weekday)
    }

    /// The earliest matching minute strictly after `after`, searching up
    /// to one year ahead. Returns `CronCalculationError` if none is found
    /// within that horizon — a degenerate expression (e.g. Feb 30) can
    /// never match.
    pub fn next_after(&self, after: Instant) -> Result<Instant> {
        self.next_after_named(after, "<unnamed>")
    }

    pub(crate) fn next_after_named(&self, after: Instant, task_name: &str) -> Result<Instant> {
        let mut candidate = after.plus_minutes(1);
        for _ in 0..MAX_SEARCH_MINUTES {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate = candidate.plus_minutes(1);
        }
        Err(SchedulerError::CronCalculationError {
            task: task_name.to_string(),
        })
    }

    /// The minimum spacing, in minutes, between two consecutive matches,
    /// sampled across enough anchors from the Unix epoch to cover
    /// weekly/monthly patterns with uneven gaps (e.g. day-of-month lists
    /// where the gap varies by month length). Used only to warn when a
    /// task's cadence is tighter than the poll interval.
    pub fn min_interval_minutes(&self) -> Option<i64> {
        const SAMPLE_COUNT: usize = 64;
        let mut cursor = self.next_after(Instant::from_millis(0)).ok()?;
        let mut min_gap: Option<i64> = None;
        for _ in 0..SAMPLE_COUNT {
            let next = self.next_after(cursor).ok()?;
            let gap = (next.millis() - cursor.millis()) / 60_000;
            min_gap = Some(min_gap.map_or(gap, |m: i64| m.min(gap)));
            cursor = next;
        }
        min_gap
    }
}

fn parse_field(full_text: &str, raw: &str, min: u32, max: u32) -> Result<Field> {
    let mut values = BTreeSet::new();
    for part in raw.split(',') {
        parse_part(full_text, part, min, max, &mut values)?;
    }
    Ok(Field { values })
}

fn parse_part(
    full_text: &str,
    part: &str,
    min: u32,
    max: u32,
    out: &mut BTreeSet<u32>,
) -> Result<()> {
    let invalid = |reason: String| SchedulerError::InvalidCronExpression {
        text: full_text.to_string(),
        reason,
    };

    let (range_part, step) = match part.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| invalid(format!("invalid step '{}'", s)))?;
            if step == 0 {
                return Err(invalid("step must be positive".to_string()));
            }
            (r, Some(step))
        }
        None => (part, None),
    };

    let (lo, hi) = if range_part == "*" {
        (min, max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let lo: u32 = a
            .parse()
            .map_err(|_| invalid(format!("invalid range start '{}'", a)))?;
        let hi: u32 = b
            .parse()
            .map_err(|_| invalid(format!("invalid range end '{}'", b)))?;
        if lo > hi {
            return Err(invalid(format!("range '{}' is descending", range_part)));
        }
        (lo, hi)
    } else {
        let v: u32 = range_part
            .parse()
            .map_err(|_| invalid(format!("invalid value '{}'", range_part)))?;
        match step {
            // a bare number with a step ("a/s") ranges from a to the field max
            Some(_) => (v, max),
            None => (v, v),
        }
    };

    if lo < min || hi > max {
        return Err(invalid(format!(
            "value '{}' out of range [{}, {}]",
            range_part, min, max
        )));
    }

    let step = step.unwrap_or(1);
    let mut v = lo;
    while v <= hi {
        out.insert(v);
        v += step;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpression::parse("* * *").is_err());
    }

    #[test]
    fn every_minute_matches_any_instant() {
        let expr = CronExpression::parse("* * * * *").unwrap();
        assert!(expr.matches(Instant::from_millis(0)));
        assert!(expr.matches(Instant::from_millis(123 * 60_000)));
    }

    #[test]
    fn step_field_expands_correctly() {
        let expr = CronExpression::parse("*/15 * * * *").unwrap();
        assert!(expr.matches(Instant::from_millis(0)));
        assert!(expr.matches(Instant::from_millis(15 * 60_000)));
        assert!(!expr.matches(Instant::from_millis(10 * 60_000)));
    }

    #[test]
    fn range_with_step() {
        let expr = CronExpression::parse("0 9-17/2 * * *").unwrap();
        let f = &expr.hour;
        assert!(f.contains(9));
        assert!(f.contains(11));
        assert!(!f.contains(10));
        assert!(!f.contains(18));
    }

    #[test]
    fn sunday_is_zero() {
        let expr = CronExpression::parse("0 0 * * 0").unwrap();
        assert!(expr.weekday.contains(0));
        assert!(!expr.weekday.contains(7));
    }

    #[test]
    fn weekday_seven_is_rejected() {
        assert!(CronExpression::parse("0 0 * * 7").is_err());
    }

    #[test]
    fn next_after_finds_next_boundary() {
        let expr = CronExpression::parse("0 * * * *").unwrap();
        let after = Instant::from_millis(30 * 60_000);
        let next = expr.next_after(after).unwrap();
        assert_eq!(next, Instant::from_millis(60 * 60_000));
    }

    #[test]
    fn impossible_expression_errors_within_search_cap() {
        // Feb 30th never exists.
        let expr = CronExpression::parse("0 0 30 2 *").unwrap();
        let result = expr.next_after(Instant::from_millis(0));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_step() {
        assert!(CronExpression::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_value() {
        assert!(CronExpression::parse("60 * * * *").is_err());
    }
}
