//! Common types and utilities shared across domain models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds in one day
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Milliseconds in one hour
pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Timestamp in milliseconds since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp for the current moment
    ///
    /// Falls back to timestamp 0 if the system clock is before UNIX_EPOCH.
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_else(|_| std::time::Duration::from_secs(0))
                .as_millis() as i64,
        )
    }

    /// Creates a timestamp from milliseconds since Unix epoch
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since Unix epoch
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns the timestamp as seconds since Unix epoch
    pub fn as_seconds(&self) -> i64 {
        self.0 / 1000
    }

    /// Returns a timestamp shifted by the given number of milliseconds
    pub fn plus_millis(&self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Next modification time after `previous`: never moves backwards
    pub fn advance_from(previous: Timestamp) -> Self {
        let now = Self::now();
        if now > previous {
            now
        } else {
            previous.plus_millis(1)
        }
    }

    /// Absolute distance between two timestamps in milliseconds
    pub fn abs_diff_millis(&self, other: Timestamp) -> i64 {
        (self.0 - other.0).abs()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-point money in minor units (1/100 of the currency unit)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Creates an amount from minor units
    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Creates an amount from whole currency units
    pub fn from_major(major: i64) -> Self {
        Self(major.saturating_mul(100))
    }

    /// Returns the amount in minor units
    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn saturating_add(self, other: Money) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_mul(self, factor: i64) -> Self {
        Self(self.0.saturating_mul(factor))
    }

    /// Parses decimal text ("225", "225.5", "-3.10") without floating point.
    ///
    /// More than two fractional digits are accepted only when the extra digits are zero.
    pub fn parse_decimal(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        if digits.is_empty() {
            return Err(format!("'{}' is not a decimal amount", text));
        }

        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(format!("'{}' is not a decimal amount", text));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(format!("'{}' is not a decimal amount", text));
        }
        if fraction.len() > 2 && fraction[2..].chars().any(|c| c != '0') {
            return Err(format!("'{}' has more than two decimal places", text));
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("'{}' is out of range", text))?
        };
        let mut cents = 0i64;
        for (i, c) in fraction.chars().take(2).enumerate() {
            let digit = i64::from(c as u8 - b'0');
            cents += if i == 0 { digit * 10 } else { digit };
        }

        let minor = whole_value
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .ok_or_else(|| format!("'{}' is out of range", text))?;
        Ok(Self(if negative { -minor } else { minor }))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        f.pad(&format!("{}{}.{:02}", sign, abs / 100, abs % 100))
    }
}

/// Trait for types that can validate themselves
pub trait Validator {
    /// Validates the instance and returns errors if invalid
    fn validate(&self) -> Result<(), Vec<String>>;

    /// Returns true if the instance is valid
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_millis() {
        let t = Timestamp::from_millis(1234567890123);
        assert_eq!(t.as_millis(), 1234567890123);
        assert_eq!(t.as_seconds(), 1234567890);
    }

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp::from_millis(1000);
        let t2 = Timestamp::from_millis(2000);
        assert!(t1 < t2);
        assert_eq!(t1.abs_diff_millis(t2), 1000);
        assert_eq!(t2.abs_diff_millis(t1), 1000);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let future = Timestamp::now().plus_millis(60_000);
        let next = Timestamp::advance_from(future);
        assert_eq!(next.as_millis(), future.as_millis() + 1);

        let past = Timestamp::from_millis(0);
        assert!(Timestamp::advance_from(past) > past);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_major(225).to_string(), "225.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-310).to_string(), "-3.10");
    }

    #[test]
    fn test_money_parse_decimal() {
        assert_eq!(Money::parse_decimal("225").unwrap().minor(), 22500);
        assert_eq!(Money::parse_decimal("225.5").unwrap().minor(), 22550);
        assert_eq!(Money::parse_decimal("0.07").unwrap().minor(), 7);
        assert_eq!(Money::parse_decimal(".5").unwrap().minor(), 50);
        assert_eq!(Money::parse_decimal("-3.10").unwrap().minor(), -310);
        assert_eq!(Money::parse_decimal("12.500").unwrap().minor(), 1250);
    }

    #[test]
    fn test_money_parse_rejects_garbage() {
        assert!(Money::parse_decimal("").is_err());
        assert!(Money::parse_decimal(".").is_err());
        assert!(Money::parse_decimal("12.345").is_err());
        assert!(Money::parse_decimal("1e3").is_err());
        assert!(Money::parse_decimal("abc").is_err());
    }

    #[test]
    fn test_money_serializes_as_minor_units() {
        let json = serde_json::to_string(&Money::from_minor(22500)).unwrap();
        assert_eq!(json, "22500");
    }
}
