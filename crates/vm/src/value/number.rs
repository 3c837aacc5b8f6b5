//! Integer and fixed-point arithmetic
//!
//! Integers are backed by `BigInt` and range-checked against their kind
//! after every operation. `Word*` kinds wrap around instead of failing.
//! Fixed-point numbers carry eight decimal places and are computed in
//! `i128` before being narrowed to their 64-bit representation.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UserErrorKind};

/// Scale of fixed-point values: eight decimal places
pub const FIXED_SCALE: i128 = 100_000_000;

/// Number of decimal places of fixed-point values
pub const FIXED_DECIMALS: usize = 8;

/// Integer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntegerKind {
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    UInt,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Word8,
    Word16,
    Word32,
    Word64,
}

impl IntegerKind {
    pub const ALL: [IntegerKind; 18] = [
        IntegerKind::Int,
        IntegerKind::Int8,
        IntegerKind::Int16,
        IntegerKind::Int32,
        IntegerKind::Int64,
        IntegerKind::Int128,
        IntegerKind::Int256,
        IntegerKind::UInt,
        IntegerKind::UInt8,
        IntegerKind::UInt16,
        IntegerKind::UInt32,
        IntegerKind::UInt64,
        IntegerKind::UInt128,
        IntegerKind::UInt256,
        IntegerKind::Word8,
        IntegerKind::Word16,
        IntegerKind::Word32,
        IntegerKind::Word64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IntegerKind::Int => "Int",
            IntegerKind::Int8 => "Int8",
            IntegerKind::Int16 => "Int16",
            IntegerKind::Int32 => "Int32",
            IntegerKind::Int64 => "Int64",
            IntegerKind::Int128 => "Int128",
            IntegerKind::Int256 => "Int256",
            IntegerKind::UInt => "UInt",
            IntegerKind::UInt8 => "UInt8",
            IntegerKind::UInt16 => "UInt16",
            IntegerKind::UInt32 => "UInt32",
            IntegerKind::UInt64 => "UInt64",
            IntegerKind::UInt128 => "UInt128",
            IntegerKind::UInt256 => "UInt256",
            IntegerKind::Word8 => "Word8",
            IntegerKind::Word16 => "Word16",
            IntegerKind::Word32 => "Word32",
            IntegerKind::Word64 => "Word64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Width in bits; `None` for the arbitrary-precision kinds
    pub fn bits(&self) -> Option<u32> {
        match self {
            IntegerKind::Int | IntegerKind::UInt => None,
            IntegerKind::Int8 | IntegerKind::UInt8 | IntegerKind::Word8 => Some(8),
            IntegerKind::Int16 | IntegerKind::UInt16 | IntegerKind::Word16 => Some(16),
            IntegerKind::Int32 | IntegerKind::UInt32 | IntegerKind::Word32 => Some(32),
            IntegerKind::Int64 | IntegerKind::UInt64 | IntegerKind::Word64 => Some(64),
            IntegerKind::Int128 | IntegerKind::UInt128 => Some(128),
            IntegerKind::Int256 | IntegerKind::UInt256 => Some(256),
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            IntegerKind::Int
                | IntegerKind::Int8
                | IntegerKind::Int16
                | IntegerKind::Int32
                | IntegerKind::Int64
                | IntegerKind::Int128
                | IntegerKind::Int256
        )
    }

    pub fn is_wrapping(&self) -> bool {
        matches!(
            self,
            IntegerKind::Word8 | IntegerKind::Word16 | IntegerKind::Word32 | IntegerKind::Word64
        )
    }

    pub fn min(&self) -> Option<BigInt> {
        match (self.is_signed(), self.bits()) {
            (false, _) => Some(BigInt::zero()),
            (true, Some(bits)) => Some(-(BigInt::one() << (bits - 1))),
            (true, None) => None,
        }
    }

    pub fn max(&self) -> Option<BigInt> {
        let bits = self.bits()?;
        if self.is_signed() {
            Some((BigInt::one() << (bits - 1)) - 1)
        } else {
            Some((BigInt::one() << bits) - 1)
        }
    }
}

impl fmt::Display for IntegerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An integer of a specific kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegerValue {
    pub kind: IntegerKind,
    pub value: BigInt,
}

impl IntegerValue {
    /// Create an integer, failing if `value` is out of range for `kind`
    pub fn new<V: Into<BigInt>>(kind: IntegerKind, value: V) -> Result<Self> {
        let value = value.into();
        if kind.is_wrapping() {
            return Ok(Self::wrapped(kind, value));
        }
        if let Some(min) = IntegerKind::min(&kind) {
            if value < min {
                return Err(UserErrorKind::Underflow.into());
            }
        }
        if let Some(max) = IntegerKind::max(&kind) {
            if value > max {
                return Err(UserErrorKind::Overflow.into());
            }
        }
        Ok(Self { kind, value })
    }

    pub fn int<V: Into<BigInt>>(value: V) -> Self {
        Self {
            kind: IntegerKind::Int,
            value: value.into(),
        }
    }

    pub fn uint64(value: u64) -> Self {
        Self {
            kind: IntegerKind::UInt64,
            value: BigInt::from(value),
        }
    }

    fn wrapped(kind: IntegerKind, value: BigInt) -> Self {
        let bits = kind.bits().unwrap_or(64);
        let modulus = BigInt::one() << bits;
        let mut value = value % &modulus;
        if value.is_negative() {
            value += modulus;
        }
        Self { kind, value }
    }

    fn same_kind(&self, other: &IntegerValue) -> Result<()> {
        if self.kind != other.kind {
            return Err(UserErrorKind::TypeMismatch {
                expected: self.kind.to_string(),
                actual: other.kind.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub fn add(&self, other: &IntegerValue) -> Result<Self> {
        self.same_kind(other)?;
        Self::new(self.kind, &self.value + &other.value)
    }

    pub fn sub(&self, other: &IntegerValue) -> Result<Self> {
        self.same_kind(other)?;
        Self::new(self.kind, &self.value - &other.value)
    }

    pub fn mul(&self, other: &IntegerValue) -> Result<Self> {
        self.same_kind(other)?;
        Self::new(self.kind, &self.value * &other.value)
    }

    pub fn div(&self, other: &IntegerValue) -> Result<Self> {
        self.same_kind(other)?;
        if other.value.is_zero() {
            return Err(UserErrorKind::DivisionByZero.into());
        }
        Self::new(self.kind, &self.value / &other.value)
    }

    pub fn rem(&self, other: &IntegerValue) -> Result<Self> {
        self.same_kind(other)?;
        if other.value.is_zero() {
            return Err(UserErrorKind::DivisionByZero.into());
        }
        Self::new(self.kind, &self.value % &other.value)
    }

    pub fn neg(&self) -> Result<Self> {
        if !self.kind.is_signed() {
            return Err(UserErrorKind::TypeMismatch {
                expected: "signed integer".to_string(),
                actual: self.kind.to_string(),
            }
            .into());
        }
        Self::new(self.kind, -&self.value)
    }

    /// Convert to another kind, failing on out-of-range values unless the
    /// target kind wraps
    pub fn convert(&self, kind: IntegerKind) -> Result<Self> {
        Self::new(kind, self.value.clone())
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.value.to_u64()
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.value.to_usize()
    }

    pub fn to_i128(&self) -> Option<i128> {
        self.value.to_i128()
    }
}

impl fmt::Display for IntegerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Fixed-point kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixedKind {
    Fix64,
    UFix64,
}

impl FixedKind {
    pub fn name(&self) -> &'static str {
        match self {
            FixedKind::Fix64 => "Fix64",
            FixedKind::UFix64 => "UFix64",
        }
    }

    fn bounds(&self) -> (i128, i128) {
        match self {
            FixedKind::Fix64 => (i64::MIN as i128, i64::MAX as i128),
            FixedKind::UFix64 => (0, u64::MAX as i128),
        }
    }

    /// Range-check a scaled value
    pub fn check(&self, scaled: i128) -> Result<i128> {
        let (min, max) = self.bounds();
        if scaled < min {
            return Err(UserErrorKind::Underflow.into());
        }
        if scaled > max {
            return Err(UserErrorKind::Overflow.into());
        }
        Ok(scaled)
    }

    pub fn add(&self, a: i128, b: i128) -> Result<i128> {
        self.check(a + b)
    }

    pub fn sub(&self, a: i128, b: i128) -> Result<i128> {
        self.check(a - b)
    }

    pub fn mul(&self, a: i128, b: i128) -> Result<i128> {
        let product = a.checked_mul(b).ok_or(UserErrorKind::Overflow)?;
        self.check(product / FIXED_SCALE)
    }

    pub fn div(&self, a: i128, b: i128) -> Result<i128> {
        if b == 0 {
            return Err(UserErrorKind::DivisionByZero.into());
        }
        let scaled = a.checked_mul(FIXED_SCALE).ok_or(UserErrorKind::Overflow)?;
        self.check(scaled / b)
    }

    pub fn rem(&self, a: i128, b: i128) -> Result<i128> {
        if b == 0 {
            return Err(UserErrorKind::DivisionByZero.into());
        }
        self.check(a % b)
    }
}

/// Parse a decimal literal such as `12.5` into a scaled value
pub fn parse_fixed(text: &str) -> Result<i128> {
    let invalid = || UserErrorKind::InvalidArgument(format!("invalid fixed-point literal `{}`", text));
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (integer, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if integer.is_empty() || fraction.len() > FIXED_DECIMALS {
        return Err(invalid().into());
    }
    let integer: i128 = integer.parse().map_err(|_| invalid())?;
    let fraction: i128 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = FIXED_DECIMALS);
        padded.parse().map_err(|_| invalid())?
    };
    let scaled = integer
        .checked_mul(FIXED_SCALE)
        .and_then(|v| v.checked_add(fraction))
        .ok_or(UserErrorKind::Overflow)?;
    Ok(if negative { -scaled } else { scaled })
}

/// Render a scaled value with all eight decimal places
pub fn format_fixed(scaled: i128) -> String {
    let sign = if scaled < 0 { "-" } else { "" };
    let magnitude = scaled.unsigned_abs();
    let scale = FIXED_SCALE as u128;
    format!(
        "{}{}.{:0width$}",
        sign,
        magnitude / scale,
        magnitude % scale,
        width = FIXED_DECIMALS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_bounds() {
        assert_eq!(IntegerKind::max(&IntegerKind::UInt8), Some(BigInt::from(255)));
        assert_eq!(IntegerKind::min(&IntegerKind::Int8), Some(BigInt::from(-128)));
        assert_eq!(IntegerKind::max(&IntegerKind::Int), None);
        assert_eq!(IntegerKind::min(&IntegerKind::UInt), Some(BigInt::zero()));
    }

    #[test]
    fn test_overflow_and_underflow() {
        let max = IntegerValue::new(IntegerKind::UInt8, 255).unwrap();
        let one = IntegerValue::new(IntegerKind::UInt8, 1).unwrap();
        assert_eq!(max.add(&one).unwrap_err().user_kind(), Some(&UserErrorKind::Overflow));
        let zero = IntegerValue::new(IntegerKind::UInt8, 0).unwrap();
        assert_eq!(zero.sub(&one).unwrap_err().user_kind(), Some(&UserErrorKind::Underflow));
        assert_eq!(one.div(&zero).unwrap_err().user_kind(), Some(&UserErrorKind::DivisionByZero));
    }

    #[test]
    fn test_words_wrap() {
        let max = IntegerValue::new(IntegerKind::Word8, 255).unwrap();
        let one = IntegerValue::new(IntegerKind::Word8, 1).unwrap();
        assert_eq!(max.add(&one).unwrap().value, BigInt::zero());
        assert_eq!(IntegerValue::new(IntegerKind::Word8, -1).unwrap().value, BigInt::from(255));
    }

    #[test]
    fn test_mixed_kinds_are_rejected() {
        let a = IntegerValue::int(1);
        let b = IntegerValue::uint64(1);
        assert!(matches!(a.add(&b).unwrap_err().user_kind(), Some(UserErrorKind::TypeMismatch { .. })));
    }

    #[test]
    fn test_fixed_parse_and_format() {
        assert_eq!(parse_fixed("1.5").unwrap(), 150_000_000);
        assert_eq!(parse_fixed("-0.00000001").unwrap(), -1);
        assert_eq!(format_fixed(150_000_000), "1.50000000");
        assert_eq!(format_fixed(-1), "-0.00000001");
        assert!(parse_fixed("1.123456789").is_err());
    }

    #[test]
    fn test_fixed_arithmetic() {
        let kind = FixedKind::UFix64;
        let a = parse_fixed("2.5").unwrap();
        let b = parse_fixed("4.0").unwrap();
        assert_eq!(format_fixed(kind.mul(a, b).unwrap()), "10.00000000");
        assert_eq!(format_fixed(kind.div(a, b).unwrap()), "0.62500000");
        assert_eq!(kind.sub(a, b).unwrap_err().user_kind(), Some(&UserErrorKind::Underflow));
        assert!(FixedKind::Fix64.sub(a, b).is_ok());
    }

    proptest! {
        #[test]
        fn sized_arithmetic_matches_primitive(a in any::<u32>(), b in any::<u32>()) {
            let x = IntegerValue::new(IntegerKind::UInt32, a).unwrap();
            let y = IntegerValue::new(IntegerKind::UInt32, b).unwrap();
            match a.checked_add(b) {
                Some(sum) => prop_assert_eq!(x.add(&y).unwrap().value, BigInt::from(sum)),
                None => prop_assert!(x.add(&y).is_err()),
            }
            match a.checked_sub(b) {
                Some(difference) => prop_assert_eq!(x.sub(&y).unwrap().value, BigInt::from(difference)),
                None => prop_assert!(x.sub(&y).is_err()),
            }
        }

        #[test]
        fn fixed_format_parses_back(scaled in any::<i64>()) {
            let text = format_fixed(scaled as i128);
            prop_assert_eq!(parse_fixed(&text).unwrap(), scaled as i128);
        }
    }
}
