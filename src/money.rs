use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

lazy_static! {
    // Longest numeric prefix, the way a browser's parseFloat reads it.
    static ref NUMERIC_PREFIX: Regex =
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").unwrap();
}

/// Parse user-entered amount text leniently
///
/// Reads the longest leading numeric prefix of `input` after skipping leading
/// whitespace, so `"3 apples"` reads as `3.0`. Empty, non-numeric, or
/// non-finite input reads as `0.0`. Negative values are accepted as-is.
///
/// # Examples
/// ```
/// use splitbill::money::parse_amount;
///
/// assert_eq!(parse_amount("2.5"), 2.5);
/// assert_eq!(parse_amount("  7kg"), 7.0);
/// assert_eq!(parse_amount(""), 0.0);
/// assert_eq!(parse_amount("abc"), 0.0);
/// assert_eq!(parse_amount("-4"), -4.0);
/// ```
pub fn parse_amount(input: &str) -> f64 {
    NUMERIC_PREFIX
        .find(input.trim_start())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// An amount of money held as integer cents
///
/// Floating point only appears once, when a line total is rounded to cents.
/// Every sum after that is exact. Serializes as a fixed 2-decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Round a floating point amount to the nearest cent
    pub fn from_f64_rounded(amount: f64) -> Self {
        if !amount.is_finite() {
            return Money::ZERO;
        }
        Money((amount * 100.0).round() as i64)
    }

    /// Parse a stored amount string (e.g. a legacy `"16.00"`) with the same
    /// lenient rules as [`parse_amount`]
    pub fn parse_lenient(input: &str) -> Self {
        Money::from_f64_rounded(parse_amount(input))
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Money::parse_lenient(&text))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}
