// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression_type::ExpressionType;

use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

/// Abstracts over a constant value that appears as a leaf of the expression
/// tree. Floating point values are stored as their bit patterns so that
/// constants can be compared and hashed structurally without running into
/// NaN != NaN.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ConstantDomain {
    Bool(bool),
    /// A machine integer of any width and signedness; the width lives in the
    /// expression type, the value here is unbounded.
    Int(BigInt),
    /// The raw two's complement bit pattern of a fixed-point number. The
    /// format lives in the expression type.
    Fixed(BigInt),
    /// The bit pattern of a 32 bit floating point number.
    F32(u32),
    /// The bit pattern of a 64 bit floating point number.
    F64(u64),
}

impl From<bool> for ConstantDomain {
    fn from(b: bool) -> ConstantDomain {
        ConstantDomain::Bool(b)
    }
}

impl From<f32> for ConstantDomain {
    fn from(f: f32) -> ConstantDomain {
        ConstantDomain::F32(f.to_bits())
    }
}

impl From<f64> for ConstantDomain {
    fn from(f: f64) -> ConstantDomain {
        ConstantDomain::F64(f.to_bits())
    }
}

impl From<i64> for ConstantDomain {
    fn from(i: i64) -> ConstantDomain {
        ConstantDomain::Int(BigInt::from(i))
    }
}

impl From<u64> for ConstantDomain {
    fn from(u: u64) -> ConstantDomain {
        ConstantDomain::Int(BigInt::from(u))
    }
}

impl ConstantDomain {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstantDomain::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            ConstantDomain::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstantDomain::F32(bits) => Some(f32::from_bits(*bits) as f64),
            ConstantDomain::F64(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            ConstantDomain::Bool(b) => !*b,
            ConstantDomain::Int(i) | ConstantDomain::Fixed(i) => i.is_zero(),
            ConstantDomain::F32(bits) => f32::from_bits(*bits) == 0.0,
            ConstantDomain::F64(bits) => f64::from_bits(*bits) == 0.0,
        }
    }

    /// Returns the value resulting from adding self to other, if both are
    /// integers.
    pub fn add(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) => Some(ConstantDomain::Int(a + b)),
            _ => None,
        }
    }

    /// Returns the value resulting from subtracting other from self, if both
    /// are integers.
    pub fn sub(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) => Some(ConstantDomain::Int(a - b)),
            _ => None,
        }
    }

    /// Returns the value resulting from multiplying self by other, if both
    /// are integers.
    pub fn mul(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) => Some(ConstantDomain::Int(a * b)),
            _ => None,
        }
    }

    /// Truncating integer division; None if other is zero or the operands
    /// are not integers.
    pub fn div(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) if !b.is_zero() => {
                Some(ConstantDomain::Int(a / b))
            }
            _ => None,
        }
    }

    pub fn rem(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) if !b.is_zero() => {
                Some(ConstantDomain::Int(a % b))
            }
            _ => None,
        }
    }

    pub fn neg(&self) -> Option<Self> {
        match self {
            ConstantDomain::Int(a) => Some(ConstantDomain::Int(-a)),
            _ => None,
        }
    }

    pub fn less_than(&self, other: &Self) -> Option<bool> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) => Some(a < b),
            _ => None,
        }
    }

    pub fn less_or_equal(&self, other: &Self) -> Option<bool> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) => Some(a <= b),
            _ => None,
        }
    }

    pub fn equals(&self, other: &Self) -> Option<bool> {
        match (self, other) {
            (ConstantDomain::Int(a), ConstantDomain::Int(b)) => Some(a == b),
            (ConstantDomain::Bool(a), ConstantDomain::Bool(b)) => Some(a == b),
            _ => None,
        }
    }

    /// Reinterprets an integer constant in the value range of the target
    /// type, wrapping two's complement style. Non-integer constants and
    /// non-integer targets do not fold.
    pub fn cast_to(&self, target: &ExpressionType) -> Option<Self> {
        let value = self.as_int()?;
        match target {
            ExpressionType::UnsignedBv { width } => {
                Some(ConstantDomain::Int(truncate_unsigned(value, *width)))
            }
            ExpressionType::SignedBv { width } => {
                let unsigned = truncate_unsigned(value, *width);
                let half = BigInt::one() << (width - 1);
                if unsigned >= half {
                    Some(ConstantDomain::Int(unsigned - (BigInt::one() << width)))
                } else {
                    Some(ConstantDomain::Int(unsigned))
                }
            }
            ExpressionType::Bool => Some(ConstantDomain::Bool(!value.is_zero())),
            _ => None,
        }
    }

    /// The low `width` bits of the two's complement representation of this
    /// value, as a non-negative integer.
    pub fn to_unsigned_bits(&self, width: u32) -> BigInt {
        match self {
            ConstantDomain::Int(i) | ConstantDomain::Fixed(i) => truncate_unsigned(i, width),
            ConstantDomain::F32(bits) => truncate_unsigned(&BigInt::from(*bits), width),
            ConstantDomain::F64(bits) => truncate_unsigned(&BigInt::from(*bits), width),
            ConstantDomain::Bool(b) => BigInt::from(*b as u8),
        }
    }
}

/// The low `width` bits of a two's complement representation of `value`, as
/// a non-negative integer.
pub fn truncate_unsigned(value: &BigInt, width: u32) -> BigInt {
    let modulus = BigInt::one() << width;
    let mut r = value % &modulus;
    if r.sign() == Sign::Minus {
        r += &modulus;
    }
    r
}

/// Interprets a non-negative bit pattern as a two's complement signed value
/// of the given width.
pub fn bits_to_signed(bits: &BigInt, width: u32) -> BigInt {
    debug_assert!(!bits.is_negative());
    let half = BigInt::one() << (width - 1);
    if *bits >= half {
        bits - (BigInt::one() << width)
    } else {
        bits.clone()
    }
}

/// Narrows a bit pattern to u64 for diagnostics; values the checker extracts
/// from models always fit.
pub fn bits_to_u64(bits: &BigInt) -> Option<u64> {
    bits.to_u64()
}
