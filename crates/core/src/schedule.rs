//! Cron expression evaluation.
//!
//! Thin layer over the `cron` crate. Operators write classic five-field
//! Unix expressions (`*/5 * * * *`); the crate wants seconds and year
//! fields, so five-field input is widened before parsing.

use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::Time;

/// Normalise a declared expression into the form accepted by `cron`.
///
/// Backslashes are dropped first so escaped forms such as `*\/5` survive
/// being declared in strings that needed escaping.
pub fn normalize_expression(expression: &str) -> String {
    let cleaned = expression.replace('\\', "");
    let cleaned = cleaned.trim();

    match cleaned.split_whitespace().count() {
        5 => format!("0 {} *", cleaned),
        _ => cleaned.to_string(),
    }
}

/// Check that `expression` parses.
pub fn validate(expression: &str) -> Result<()> {
    parse(expression).map(|_| ())
}

/// First trigger instant strictly after `after`.
pub fn next_after(expression: &str, after: Time) -> Result<Time> {
    parse(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| CoreError::ExhaustedSchedule(expression.to_string()))
}

fn parse(expression: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize_expression(expression)).map_err(|e| {
        CoreError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike, Utc};

    #[test]
    fn test_five_field_expression_is_widened() {
        assert_eq!(normalize_expression("*/5 * * * *"), "0 */5 * * * * *");
        assert_eq!(normalize_expression("@daily"), "@daily");
        assert_eq!(normalize_expression("0 0 * * * * *"), "0 0 * * * * *");
    }

    #[test]
    fn test_backslashes_are_stripped() {
        assert_eq!(normalize_expression("*\\/5 * * * *"), "0 */5 * * * * *");
    }

    #[test]
    fn test_every_minute_fires_strictly_after() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let next = next_after("* * * * *", at).unwrap();

        assert!(next > at);
        assert_eq!(next.minute(), 31);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_shorthand_daily() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let next = next_after("@daily", at).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_malformed_expression() {
        let err = validate("not a schedule").unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule { .. }));
        assert!(err.to_string().contains("not a schedule"));
    }
}
