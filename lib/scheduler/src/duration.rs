//! Parsing for the `<n>[smhd]` duration strings used by `interval.every`,
//! hook/file-watch `debounce`, and dependency-join `debounce`.

use crate::error::ValidationError;
use chrono::Duration;

/// Parses a duration string matching `^\d+[smhd]$` into a [`chrono::Duration`].
///
/// # Errors
///
/// Returns [`ValidationError::InvalidDuration`] if the string does not match
/// the grammar.
pub fn parse_duration(value: &str) -> Result<Duration, ValidationError> {
    let invalid = || ValidationError::InvalidDuration {
        value: value.to_string(),
    };

    if value.is_empty() {
        return Err(invalid());
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit {
        "s" => Duration::seconds(amount),
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => return Err(invalid()),
    };

    Ok(duration)
}
