//! Metron Decimal - Fixed-Point Values
//!
//! Signed fixed-point decimal used for stored values and for every sum or
//! average computed over them. Values carry six fractional digits in an
//! `i128` mantissa, so large sums accumulate without floating point drift.
//!
//! Parsing is strict: no exponents, no NaN or infinities, and never more
//! fractional digits than the scale holds.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of integer digits accepted when parsing.
const MAX_INTEGER_DIGITS: usize = 24;

// =============================================================================
// Parse Errors
// =============================================================================

/// Reasons a textual or floating point value is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalParseError {
    #[error("value is empty")]
    Empty,

    #[error("value is not finite")]
    NotFinite,

    #[error("invalid character {0:?} in numeric value")]
    InvalidCharacter(char),

    #[error("malformed numeric value")]
    Malformed,

    #[error("too many fractional digits ({digits}, at most {max} allowed)")]
    TooManyFractionalDigits { digits: usize, max: u32 },

    #[error("value magnitude exceeds 10^24")]
    OutOfRange,
}

// =============================================================================
// Decimal
// =============================================================================

/// Signed fixed-point number with [`Decimal::SCALE_DIGITS`] fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Decimal(i128);

impl Decimal {
    pub const SCALE_DIGITS: u32 = 6;
    pub const SCALE: i128 = 1_000_000;
    pub const ZERO: Decimal = Decimal(0);
    pub const ONE: Decimal = Decimal(Self::SCALE);

    /// Build a decimal from its raw scaled mantissa.
    pub const fn from_mantissa(mantissa: i128) -> Self {
        Self(mantissa)
    }

    /// The raw scaled mantissa.
    pub const fn mantissa(self) -> i128 {
        self.0
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as i128 * Self::SCALE)
    }

    pub fn checked_add(self, other: Decimal) -> Option<Decimal> {
        self.0.checked_add(other.0).map(Decimal)
    }

    /// Divide by an integer count, rounding half away from zero.
    pub fn checked_div_count(self, count: u64) -> Option<Decimal> {
        if count == 0 {
            return None;
        }
        let divisor = count as i128;
        let quotient = self.0 / divisor;
        let remainder = self.0 % divisor;
        let rounded = if remainder.unsigned_abs() * 2 >= divisor.unsigned_abs() {
            quotient + self.0.signum()
        } else {
            quotient
        };
        Some(Decimal(rounded))
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Lossy conversion for display and charting.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl FromStr for Decimal {
    type Err = DecimalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DecimalParseError::Empty);
        }

        let (negative, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let lowered = body.to_ascii_lowercase();
        if matches!(lowered.as_str(), "nan" | "inf" | "infinity") {
            return Err(DecimalParseError::NotFinite);
        }

        if let Some(bad) = body.chars().find(|c| !c.is_ascii_digit() && *c != '.') {
            return Err(DecimalParseError::InvalidCharacter(bad));
        }

        let (int_part, frac_part) = match body.split_once('.') {
            Some((int_part, frac_part)) => {
                if frac_part.is_empty() || frac_part.contains('.') {
                    return Err(DecimalParseError::Malformed);
                }
                (int_part, frac_part)
            }
            None => (body, ""),
        };

        if int_part.is_empty() {
            return Err(DecimalParseError::Malformed);
        }

        if frac_part.len() > Self::SCALE_DIGITS as usize {
            return Err(DecimalParseError::TooManyFractionalDigits {
                digits: frac_part.len(),
                max: Self::SCALE_DIGITS,
            });
        }

        let significant = int_part.trim_start_matches('0');
        if significant.len() > MAX_INTEGER_DIGITS {
            return Err(DecimalParseError::OutOfRange);
        }

        let integer = significant
            .bytes()
            .fold(0i128, |acc, b| acc * 10 + (b - b'0') as i128);

        let mut fraction = frac_part
            .bytes()
            .fold(0i128, |acc, b| acc * 10 + (b - b'0') as i128);
        for _ in frac_part.len()..Self::SCALE_DIGITS as usize {
            fraction *= 10;
        }

        let magnitude = integer * Self::SCALE + fraction;
        Ok(Decimal(if negative { -magnitude } else { magnitude }))
    }
}

impl TryFrom<f64> for Decimal {
    type Error = DecimalParseError;

    /// Converts through the shortest round-trip representation, so `0.1`
    /// stays exact while `1e-7` is rejected for excess precision.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(DecimalParseError::NotFinite);
        }
        format!("{}", value).parse()
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let scale = Self::SCALE as u128;
        let integer = magnitude / scale;
        let fraction = magnitude % scale;

        if self.0 < 0 {
            f.write_str("-")?;
        }
        if fraction == 0 {
            write!(f, "{}", integer)
        } else {
            let digits = format!("{:06}", fraction);
            write!(f, "{}.{}", integer, digits.trim_end_matches('0'))
        }
    }
}

// =============================================================================
// Serde
// =============================================================================

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }
}

struct DecimalVisitor;

impl<'de> Visitor<'de> for DecimalVisitor {
    type Value = Decimal;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal number or decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Decimal, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Decimal, E> {
        Ok(Decimal::from_i64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Decimal, E> {
        v.to_string().parse().map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Decimal, E> {
        Decimal::try_from(v).map_err(E::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
