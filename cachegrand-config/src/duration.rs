//! Duration suffix parsing, companion to [`crate::size`] for the same
//! Open Question. A bare integer is milliseconds; `ms|s|m|h` suffixes
//! scale accordingly.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration string")]
    Empty,
    #[error("invalid duration string '{0}'")]
    Invalid(String),
    #[error("duration '{0}' overflows u64 milliseconds")]
    Overflow(String),
}

pub fn parse_duration_ms(input: &str) -> Result<u64, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let split_at = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split_at);
    if digits.is_empty() {
        return Err(DurationParseError::Invalid(input.to_owned()));
    }

    let value: u64 = digits.parse().map_err(|_| DurationParseError::Invalid(input.to_owned()))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return Err(DurationParseError::Invalid(input.to_owned())),
    };

    value.checked_mul(multiplier).ok_or_else(|| DurationParseError::Overflow(input.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_integers_as_milliseconds() {
        assert_eq!(parse_duration_ms("250").unwrap(), 250);
    }

    #[test]
    fn parses_unit_suffixes() {
        assert_eq!(parse_duration_ms("30s").unwrap(), 30_000);
        assert_eq!(parse_duration_ms("5m").unwrap(), 300_000);
        assert_eq!(parse_duration_ms("2h").unwrap(), 7_200_000);
    }

    #[test]
    fn rejects_unknown_units() {
        assert!(parse_duration_ms("10d").is_err());
        assert!(parse_duration_ms("").is_err());
    }
}
