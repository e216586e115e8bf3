//! Byte-size suffix parsing. `spec.md` §9 leaves the exact suffix
//! grammar as an Open Question; we settled on binary (1024-based)
//! multipliers, case-insensitive, no fractional values — recorded in
//! `DESIGN.md`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("empty size string")]
    Empty,
    #[error("invalid size string '{0}'")]
    Invalid(String),
    #[error("size '{0}' overflows u64")]
    Overflow(String),
}

/// Parses a byte-size string such as `"512"`, `"64k"`, `"4gb"`. The
/// trailing unit (if any) is one of `b|k|kb|m|mb|g|gb`, matched
/// case-insensitively; a bare integer is interpreted as bytes.
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::Empty);
    }

    let split_at = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split_at);
    if digits.is_empty() {
        return Err(SizeParseError::Invalid(input.to_owned()));
    }

    let value: u64 = digits.parse().map_err(|_| SizeParseError::Invalid(input.to_owned()))?;
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return Err(SizeParseError::Invalid(input.to_owned())),
    };

    value.checked_mul(multiplier).ok_or_else(|| SizeParseError::Overflow(input.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_integers_as_bytes() {
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn parses_binary_suffixes_case_insensitively() {
        assert_eq!(parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_size("4gb").unwrap(), 4 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("1MB").unwrap(), 1024 * 1024);
    }

    #[test]
    fn rejects_unknown_suffixes_and_empty_input() {
        assert!(parse_size("10tb").is_err());
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
    }
}
