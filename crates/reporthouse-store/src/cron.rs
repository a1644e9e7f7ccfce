//! Schedule fire-time computation.
//!
//! Cron expressions are evaluated in the schedule's own timezone and the
//! resulting instant is stored in UTC. Five-field expressions are
//! normalized to the six-field form with seconds pinned to zero.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Next fire time strictly after `after`, or a human-readable reason why
/// the expression cannot be evaluated (callers disable the schedule).
pub fn compute_next_run(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, String> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| format!("invalid timezone '{timezone}'"))?;
    let normalized = normalize_cron(expression)?;
    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|e| format!("invalid cron expression '{expression}': {e}"))?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("cron expression '{expression}' has no upcoming fire time"))
}

fn normalize_cron(expression: &str) -> Result<String, String> {
    match expression.split_whitespace().count() {
        5 => Ok(format!("0 {}", expression.trim())),
        6 | 7 => Ok(expression.trim().to_string()),
        _ => Err(format!(
            "invalid cron expression (expected 5 or 6 fields): {expression}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_cron_is_normalized() {
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 5, 0, 0).unwrap();
        let next = compute_next_run("0 6 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_six_field_cron_passes_through() {
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 5, 0, 0).unwrap();
        let next = compute_next_run("30 15 6 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 6, 15, 30).unwrap());
    }

    #[test]
    fn test_cron_respects_schedule_timezone() {
        let after = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        // 06:00 in São Paulo (UTC-3) is 09:00 UTC
        let next = compute_next_run("0 6 * * *", "America/Sao_Paulo", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        let after = Utc::now();
        assert!(compute_next_run("not-a-cron", "UTC", after).is_err());
        assert!(compute_next_run("0 6 * * *", "Mars/Olympus", after).is_err());
        assert!(compute_next_run("1 2 3", "UTC", after).is_err());
    }
}
