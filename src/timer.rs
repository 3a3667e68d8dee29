//! Timer definitions: ISO-8601 durations, RFC 3339 dates and repeating
//! cycles (`R3/PT10M`). Only the first expiry of a cycle is computed.

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::{EngineError, Result};
use crate::model::TimerDefinition;

/// `PnYnMnWnDTnHnMnS`, every part optional.
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$")
        .expect("duration pattern is valid")
});

/// A parsed ISO-8601 duration. Calendar months are kept apart from the
/// fixed-length part because their length depends on the start instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoDuration {
    pub months: u32,
    pub fixed: Duration,
}

impl IsoDuration {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || EngineError::graph(format!("`{text}` is not an ISO-8601 duration"));
        let out_of_range = || EngineError::graph(format!("`{text}`: duration out of range"));

        let captures = DURATION_RE.captures(text).ok_or_else(invalid)?;
        if captures.iter().skip(1).all(|c| c.is_none()) || text.ends_with('T') {
            return Err(invalid());
        }

        let int = |index: usize| -> Result<i64> {
            captures
                .get(index)
                .map(|m| m.as_str().parse::<i64>())
                .transpose()
                .map(|v| v.unwrap_or(0))
                .map_err(|_| out_of_range())
        };

        let (years, months) = (int(1)?, int(2)?);
        let months = years
            .checked_mul(12)
            .and_then(|m| m.checked_add(months))
            .ok_or_else(out_of_range)?;
        let (weeks, days) = (int(3)?, int(4)?);
        let days = weeks
            .checked_mul(7)
            .and_then(|d| d.checked_add(days))
            .ok_or_else(out_of_range)?;
        let seconds: f64 = captures
            .get(7)
            .map(|m| m.as_str().parse::<f64>())
            .transpose()
            .map_err(|_| out_of_range())?
            .unwrap_or(0.0);
        let millis = (seconds * 1000.0).round();
        if !millis.is_finite() || millis >= i64::MAX as f64 {
            return Err(out_of_range());
        }

        let fixed = [
            Duration::try_days(days),
            Duration::try_hours(int(5)?),
            Duration::try_minutes(int(6)?),
            Duration::try_milliseconds(millis as i64),
        ]
        .into_iter()
        .try_fold(Duration::zero(), |total, part| total.checked_add(&part?))
        .ok_or_else(out_of_range)?;

        Ok(Self {
            months: u32::try_from(months).map_err(|_| out_of_range())?,
            fixed,
        })
    }

    /// The instant this duration ends when started at `start`.
    pub fn after(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let shifted = if self.months > 0 {
            start
                .checked_add_months(Months::new(self.months))
                .ok_or_else(|| EngineError::graph("timer expiry out of range"))?
        } else {
            start
        };
        shifted
            .checked_add_signed(self.fixed)
            .ok_or_else(|| EngineError::graph("timer expiry out of range"))
    }
}

fn parse_date(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| EngineError::graph(format!("`{text}` is not an RFC 3339 date: {e}")))
}

fn cycle_interval(text: &str) -> Result<IsoDuration> {
    let mut parts = text.trim().split('/');
    let repeat = parts.next().unwrap_or_default();
    if !repeat.starts_with('R') || !repeat[1..].chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::graph(format!(
            "`{text}` is not a repeating interval"
        )));
    }
    let interval = parts
        .next()
        .ok_or_else(|| EngineError::graph(format!("`{text}` has no interval")))?;
    IsoDuration::parse(interval)
}

/// Check that a definition with literal values can be scheduled. Values
/// using the expression prefix are only known at run time and pass.
pub fn check_definition(definition: &TimerDefinition) -> Result<()> {
    let set = [&definition.duration, &definition.date, &definition.cycle]
        .iter()
        .filter(|v| v.is_some())
        .count();
    if set != 1 {
        return Err(EngineError::graph(
            "timer needs exactly one of duration, date or cycle",
        ));
    }
    fn literal(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|s| !s.starts_with('='))
    }
    if let Some(d) = literal(&definition.duration) {
        IsoDuration::parse(d)?;
    }
    if let Some(d) = literal(&definition.date) {
        parse_date(d)?;
    }
    if let Some(c) = literal(&definition.cycle) {
        cycle_interval(c)?;
    }
    Ok(())
}

/// When a timer armed at `now` expires. Expression-prefixed values must be
/// resolved by the caller first.
pub fn expires_at(definition: &TimerDefinition, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Some(duration) = &definition.duration {
        return IsoDuration::parse(duration)?.after(now);
    }
    if let Some(date) = &definition.date {
        return parse_date(date);
    }
    if let Some(cycle) = &definition.cycle {
        return cycle_interval(cycle)?.after(now);
    }
    Err(EngineError::graph(
        "timer needs exactly one of duration, date or cycle",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parses_clock_durations() {
        let d = IsoDuration::parse("PT1H30M").unwrap();
        assert_eq!(d.months, 0);
        assert_eq!(d.fixed, Duration::minutes(90));
        assert_eq!(IsoDuration::parse("PT0.5S").unwrap().fixed, Duration::milliseconds(500));
        assert_eq!(IsoDuration::parse("P1W2D").unwrap().fixed, Duration::days(9));
    }

    #[test]
    fn calendar_months_respect_month_length() {
        let d = IsoDuration::parse("P1M").unwrap();
        assert_eq!(d.after(at(2024, 1, 31, 0, 0, 0)).unwrap(), at(2024, 2, 29, 0, 0, 0));
    }

    #[test]
    fn rejects_empty_and_malformed_durations() {
        for bad in ["P", "PT", "30S", "PT1H2X", ""] {
            assert!(IsoDuration::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn oversized_durations_are_errors() {
        for huge in [
            "PT9999999999999999H",
            "P9999999999999999999D",
            "P999999999999999999Y",
            "P9999999999999999W",
            "PT99999999999999999999.5S",
        ] {
            let err = IsoDuration::parse(huge).unwrap_err();
            assert!(matches!(err, EngineError::GraphDefinition(_)), "{huge}: {err}");
        }
        assert!(check_definition(&TimerDefinition::duration("PT9999999999999999H")).is_err());
    }

    #[test]
    fn expiry_for_each_timer_form() {
        let now = at(2025, 3, 1, 12, 0, 0);
        assert_eq!(
            expires_at(&TimerDefinition::duration("PT30S"), now).unwrap(),
            at(2025, 3, 1, 12, 0, 30)
        );
        let date = TimerDefinition {
            date: Some("2025-03-02T08:00:00Z".into()),
            ..Default::default()
        };
        assert_eq!(expires_at(&date, now).unwrap(), at(2025, 3, 2, 8, 0, 0));
        let cycle = TimerDefinition {
            cycle: Some("R3/PT10M".into()),
            ..Default::default()
        };
        assert_eq!(expires_at(&cycle, now).unwrap(), at(2025, 3, 1, 12, 10, 0));
    }

    #[test]
    fn check_definition_requires_exactly_one_form() {
        assert!(check_definition(&TimerDefinition::default()).is_err());
        assert!(check_definition(&TimerDefinition {
            duration: Some("PT1M".into()),
            date: Some("2025-01-01T00:00:00Z".into()),
            cycle: None,
        })
        .is_err());
        assert!(check_definition(&TimerDefinition::duration("=reminder_after")).is_ok());
    }
}
