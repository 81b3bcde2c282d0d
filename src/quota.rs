//! Quota and size string parsing.
//!
//! The management API reports fileset quotas as strings such as `1048576`,
//! `10G`, or an empty value when no limit is set. Units are binary multiples.

use thiserror::Error;

/// Errors raised while converting a quota string into bytes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum QuotaParseError {
    /// The value does not start with a decimal number.
    #[error("Invalid number specified: [{0}]")]
    InvalidNumber(String),
    /// The suffix is not one of `K`, `M`, `G`, `T`, or `P`.
    #[error("invalid unit [{unit}] in quota [{raw}]")]
    InvalidUnit {
        /// Raw quota text.
        raw: String,
        /// Unrecognised suffix.
        unit: String,
    },
    /// The value does not fit in 64 bits once scaled.
    #[error("quota [{0}] overflows a 64-bit byte count")]
    Overflow(String),
}

/// Converts a quota string into a byte count.
///
/// An empty or non-numeric string yields [`QuotaParseError::InvalidNumber`];
/// callers treat that as "no quota set".
///
/// # Errors
///
/// Returns [`QuotaParseError`] when the string is not a number with an
/// optional binary unit suffix.
pub fn parse_quota_bytes(raw: &str) -> Result<u64, QuotaParseError> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(QuotaParseError::InvalidNumber(raw.to_owned()));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| QuotaParseError::Overflow(raw.to_owned()))?;
    let multiplier = unit_multiplier(unit).ok_or_else(|| QuotaParseError::InvalidUnit {
        raw: raw.to_owned(),
        unit: unit.to_owned(),
    })?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| QuotaParseError::Overflow(raw.to_owned()))
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let exponent = match unit.to_ascii_uppercase().as_str() {
        "" => 0,
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        "P" => 5,
        _ => return None,
    };
    Some(1024_u64.pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1048576", 1_048_576)]
    #[case("0", 0)]
    #[case("1K", 1024)]
    #[case("10M", 10 * 1024 * 1024)]
    #[case("2G", 2 * 1024 * 1024 * 1024)]
    #[case("1t", 1024_u64.pow(4))]
    #[case(" 3P ", 3 * 1024_u64.pow(5))]
    fn parses_quota_strings(#[case] raw: &str, #[case] expected: u64) {
        assert_eq!(parse_quota_bytes(raw), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("none")]
    #[case("G")]
    fn non_numeric_values_are_invalid_numbers(#[case] raw: &str) {
        assert_eq!(
            parse_quota_bytes(raw),
            Err(QuotaParseError::InvalidNumber(raw.to_owned()))
        );
    }

    #[test]
    fn rejects_unknown_units() {
        assert!(matches!(
            parse_quota_bytes("5X"),
            Err(QuotaParseError::InvalidUnit { .. })
        ));
        assert!(matches!(
            parse_quota_bytes("5GB"),
            Err(QuotaParseError::InvalidUnit { .. })
        ));
    }

    #[test]
    fn reports_overflow() {
        assert_eq!(
            parse_quota_bytes("99999999999P"),
            Err(QuotaParseError::Overflow(String::from("99999999999P")))
        );
    }
}
