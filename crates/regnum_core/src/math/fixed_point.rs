//! # Fixed-Point Arithmetic
//!
//! **CRITICAL: NO FLOATING POINT IN SIMULATION STATE**
//!
//! `FixedPoint64` is a signed Q32.32 number: 32 integer bits, 32 fractional
//! bits, stored in an `i64`. Every operation is integer arithmetic, so the
//! same inputs give the same bits on every platform and compiler.
//!
//! ## Rounding and Overflow
//!
//! - `*` and `/` truncate toward zero.
//! - `+`, `-`, `*`, `/` and negation **saturate** at [`FixedPoint64::MIN`] /
//!   [`FixedPoint64::MAX`]. They never wrap.
//! - `/` and `%` return [`MathResult`]; a zero divisor is
//!   [`MathError::DivisionByZero`], never an infinity or a NaN.
//! - `%` is exact and takes the sign of the dividend.
//!
//! ## Literals
//!
//! Decimal strings parse exactly when the value is representable at 2^-32
//! resolution (`"0.5"`, `"-12.375"`); other values truncate toward zero.
//! `Display` prints the exact decimal expansion, so printing and parsing
//! round-trip.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Rem, Sub, SubAssign};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MathError, MathResult};

/// Number of fractional bits.
pub const FRACTIONAL_BITS: u32 = 32;

/// Raw value of 1.0.
const ONE_RAW: i64 = 1 << FRACTIONAL_BITS;

/// Raw value of 0.5.
const HALF_RAW: i64 = 1 << (FRACTIONAL_BITS - 1);

/// Mask selecting the fractional bits.
const FRACTION_MASK: i64 = ONE_RAW - 1;

/// Fraction digits beyond this cannot change the truncated result.
const MAX_FRACTION_DIGITS: usize = 38;

/// Signed Q32.32 fixed-point number.
///
/// # Range
///
/// - Minimum: -2147483648.0
/// - Maximum: 2147483647.99999999976716935634613037109375
/// - Resolution: 2^-32
///
/// # Example
///
/// ```rust
/// use regnum_core::FixedPoint64;
///
/// let rate: FixedPoint64 = "0.25".parse().unwrap();
/// let base = FixedPoint64::from_int(12);
/// assert_eq!((base * rate).to_int(), 3);
/// assert!((base / FixedPoint64::ZERO).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FixedPoint64(i64);

#[inline]
fn saturate(value: i128) -> i64 {
    if value > i128::from(i64::MAX) {
        i64::MAX
    } else if value < i128::from(i64::MIN) {
        i64::MIN
    } else {
        value as i64
    }
}

impl FixedPoint64 {
    /// 0.0
    pub const ZERO: Self = Self(0);

    /// 1.0
    pub const ONE: Self = Self(ONE_RAW);

    /// 0.5
    pub const HALF: Self = Self(HALF_RAW);

    /// Largest representable value.
    pub const MAX: Self = Self(i64::MAX);

    /// Smallest representable value.
    pub const MIN: Self = Self(i64::MIN);

    /// One unit of least precision (2^-32).
    pub const EPSILON: Self = Self(1);

    /// Creates a value from an integer. Every `i32` is representable.
    #[inline]
    #[must_use]
    pub const fn from_int(value: i32) -> Self {
        Self((value as i64) << FRACTIONAL_BITS)
    }

    /// Creates a value from raw Q32.32 bits.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw Q32.32 bits.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Creates `numerator / denominator`, truncated toward zero and saturated.
    ///
    /// # Errors
    ///
    /// Returns [`MathError::DivisionByZero`] if `denominator` is zero.
    #[inline]
    pub fn from_ratio(numerator: i64, denominator: i64) -> MathResult<Self> {
        if denominator == 0 {
            return Err(MathError::DivisionByZero);
        }
        let scaled = i128::from(numerator) << FRACTIONAL_BITS;
        Ok(Self(saturate(scaled / i128::from(denominator))))
    }

    /// Integer part, truncated toward zero.
    #[inline]
    #[must_use]
    pub const fn to_int(self) -> i32 {
        (self.0 / ONE_RAW) as i32
    }

    /// Nearest integer, halves rounded away from zero, saturated to `i32`.
    #[must_use]
    pub fn to_nearest_int(self) -> i32 {
        let raw = i128::from(self.0);
        let half = i128::from(HALF_RAW);
        let rounded = if raw >= 0 {
            (raw + half) >> FRACTIONAL_BITS
        } else {
            -((half - raw) >> FRACTIONAL_BITS)
        };
        rounded.clamp(i128::from(i32::MIN), i128::from(i32::MAX)) as i32
    }

    /// Largest integer value not greater than `self`.
    #[inline]
    #[must_use]
    pub const fn floor(self) -> Self {
        Self(self.0 & !FRACTION_MASK)
    }

    /// Smallest integer value not less than `self`, saturated.
    #[inline]
    #[must_use]
    pub const fn ceil(self) -> Self {
        if self.0 & FRACTION_MASK == 0 {
            self
        } else {
            Self(self.floor().0.saturating_add(ONE_RAW))
        }
    }

    /// `self - self.floor()`, always in `[0, 1)`.
    #[inline]
    #[must_use]
    pub const fn fractional(self) -> Self {
        Self(self.0 & FRACTION_MASK)
    }

    /// Absolute value, saturated (`MIN.abs() == MAX`).
    #[inline]
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Returns true if the value is below zero.
    #[inline]
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Returns true if the value is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiplies by an integer, saturated.
    #[inline]
    #[must_use]
    pub const fn mul_int(self, rhs: i64) -> Self {
        Self(self.0.saturating_mul(rhs))
    }

    /// Division truncated toward zero, saturated.
    ///
    /// # Errors
    ///
    /// Returns [`MathError::DivisionByZero`] if `rhs` is zero.
    #[inline]
    pub fn checked_div(self, rhs: Self) -> MathResult<Self> {
        if rhs.0 == 0 {
            return Err(MathError::DivisionByZero);
        }
        let numerator = i128::from(self.0) << FRACTIONAL_BITS;
        Ok(Self(saturate(numerator / i128::from(rhs.0))))
    }

    /// Remainder with the sign of the dividend.
    ///
    /// # Errors
    ///
    /// Returns [`MathError::DivisionByZero`] if `rhs` is zero.
    #[inline]
    pub fn checked_rem(self, rhs: Self) -> MathResult<Self> {
        if rhs.0 == 0 {
            return Err(MathError::DivisionByZero);
        }
        Ok(Self(self.0.wrapping_rem(rhs.0)))
    }

    /// Little-endian encoding of the raw bits.
    #[inline]
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decodes little-endian raw bits.
    #[inline]
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(i64::from_le_bytes(bytes))
    }
}

impl Add for FixedPoint64 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for FixedPoint64 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for FixedPoint64 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for FixedPoint64 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for FixedPoint64 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self::Output {
        let product = i128::from(self.0) * i128::from(rhs.0);
        Self(saturate(product / i128::from(ONE_RAW)))
    }
}

impl MulAssign for FixedPoint64 {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

/// Division yields a `Result` so a zero divisor can never go unnoticed.
impl Div for FixedPoint64 {
    type Output = MathResult<Self>;

    #[inline]
    fn div(self, rhs: Self) -> Self::Output {
        self.checked_div(rhs)
    }
}

impl Rem for FixedPoint64 {
    type Output = MathResult<Self>;

    #[inline]
    fn rem(self, rhs: Self) -> Self::Output {
        self.checked_rem(rhs)
    }
}

impl Neg for FixedPoint64 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self::Output {
        Self(self.0.saturating_neg())
    }
}

impl From<i32> for FixedPoint64 {
    #[inline]
    fn from(value: i32) -> Self {
        Self::from_int(value)
    }
}

impl fmt::Display for FixedPoint64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude >> FRACTIONAL_BITS;
        let mut fraction = magnitude & (FRACTION_MASK as u64);

        if self.0 < 0 {
            f.write_str("-")?;
        }
        write!(f, "{whole}.")?;
        if fraction == 0 {
            return f.write_str("0");
        }
        // Each step strips one factor of two; at most 32 digits.
        while fraction != 0 {
            fraction *= 10;
            write!(f, "{}", fraction >> FRACTIONAL_BITS)?;
            fraction &= FRACTION_MASK as u64;
        }
        Ok(())
    }
}

impl fmt::Debug for FixedPoint64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedPoint64({self})")
    }
}

/// `floor(0.digits * 2^32)` computed exactly in `u128`.
fn fraction_bits(digits: &str) -> u128 {
    let digits = &digits[..digits.len().min(MAX_FRACTION_DIGITS)];
    if digits.is_empty() {
        return 0;
    }
    let count = digits.len() as u32;
    let numerator = digits
        .bytes()
        .fold(0u128, |acc, b| acc * 10 + u128::from(b - b'0'));
    // 10^n = 2^n * 5^n; cancel the powers of two against 2^32.
    if count <= FRACTIONAL_BITS {
        (numerator << (FRACTIONAL_BITS - count)) / 5u128.pow(count)
    } else {
        numerator / (5u128.pow(count) << (count - FRACTIONAL_BITS))
    }
}

impl FromStr for FixedPoint64 {
    type Err = MathError;

    fn from_str(input: &str) -> MathResult<Self> {
        let parse_error = || MathError::Parse {
            input: input.to_owned(),
        };
        let range_error = || MathError::OutOfRange {
            input: input.to_owned(),
        };

        let text = input.trim();
        let (negative, body) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (whole_digits, fraction_digits) = body.split_once('.').unwrap_or((body, ""));
        if whole_digits.is_empty() && fraction_digits.is_empty() {
            return Err(parse_error());
        }
        if !whole_digits
            .bytes()
            .chain(fraction_digits.bytes())
            .all(|b| b.is_ascii_digit())
        {
            return Err(parse_error());
        }

        let whole: u128 = if whole_digits.is_empty() {
            0
        } else {
            whole_digits.parse().map_err(|_| range_error())?
        };
        if whole > 1u128 << FRACTIONAL_BITS {
            return Err(range_error());
        }

        let magnitude = (whole << FRACTIONAL_BITS) | fraction_bits(fraction_digits);
        let magnitude = i128::try_from(magnitude).map_err(|_| range_error())?;
        let raw = if negative { -magnitude } else { magnitude };
        i64::try_from(raw).map(Self).map_err(|_| range_error())
    }
}

impl Serialize for FixedPoint64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct FixedPointVisitor;

impl<'de> Visitor<'de> for FixedPointVisitor {
    type Value = FixedPoint64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a decimal string such as \"1.25\"")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        value.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        i32::try_from(value)
            .map(FixedPoint64::from_int)
            .map_err(|_| E::custom(format!("{value} is outside the Q32.32 range")))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        i32::try_from(value)
            .map(FixedPoint64::from_int)
            .map_err(|_| E::custom(format!("{value} is outside the Q32.32 range")))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Err(E::custom(format!(
            "floating point value {value} refused; write it as a decimal string"
        )))
    }
}

impl<'de> Deserialize<'de> for FixedPoint64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FixedPointVisitor)
    }
}
