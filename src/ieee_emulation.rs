// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! In abstract encoding, floating point values live in the solver's real
//! theory, so the rounded operators compute the exact real result and then
//! clamp it back into the target format: saturation at the largest normal,
//! flush to zero below the smallest subnormal, and quantization to the
//! subnormal step in between. Only binary32 and binary64 are recognized;
//! other formats pass through with a diagnostic.

use crate::expression::{ExprRef, Expression};
use crate::expression_type::ExpressionType;
use crate::lowering::SmtContext;
use crate::smt_backend::TermRef;

use lazy_static::lazy_static;
use log::warn;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;

fn pow2(exponent: i64) -> BigRational {
    if exponent >= 0 {
        BigRational::from_integer(BigInt::one() << exponent)
    } else {
        BigRational::new(BigInt::one(), BigInt::one() << -exponent)
    }
}

lazy_static! {
    // binary32: (2 - 2^-23) * 2^127, 2^-126, 2^-149.
    static ref SINGLE_MAX_NORMAL: BigRational =
        BigRational::from_integer((BigInt::one() << 24) - BigInt::one()) * pow2(104);
    static ref SINGLE_MIN_NORMAL: BigRational = pow2(-126);
    static ref SINGLE_MIN_SUBNORMAL: BigRational = pow2(-149);
    // binary64: (2 - 2^-52) * 2^1023, 2^-1022, 2^-1074.
    static ref DOUBLE_MAX_NORMAL: BigRational =
        BigRational::from_integer((BigInt::one() << 53) - BigInt::one()) * pow2(971);
    static ref DOUBLE_MIN_NORMAL: BigRational = pow2(-1022);
    static ref DOUBLE_MIN_SUBNORMAL: BigRational = pow2(-1074);
    static ref ONE_HALF: BigRational = BigRational::new(BigInt::one(), BigInt::from(2));
}

struct FloatFormat {
    max_normal: &'static BigRational,
    min_normal: &'static BigRational,
    min_subnormal: &'static BigRational,
}

fn recognized_format(exponent: u32, fraction: u32) -> Option<FloatFormat> {
    match (exponent, fraction) {
        (8, 23) => Some(FloatFormat {
            max_normal: &SINGLE_MAX_NORMAL,
            min_normal: &SINGLE_MIN_NORMAL,
            min_subnormal: &SINGLE_MIN_SUBNORMAL,
        }),
        (11, 52) => Some(FloatFormat {
            max_normal: &DOUBLE_MAX_NORMAL,
            min_normal: &DOUBLE_MIN_NORMAL,
            min_subnormal: &DOUBLE_MIN_SUBNORMAL,
        }),
        _ => None,
    }
}

impl SmtContext {
    /// Lowers a rounded floating point operator over real-modelled
    /// operands: the exact real result followed by the format clamp.
    /// Division additionally maps a zero divisor to the signed largest
    /// normal, and the multiplicative operators force an exact zero when
    /// an operand is zero.
    pub(crate) fn convert_ieee_arith_emulated(&mut self, expr: &ExprRef) -> TermRef {
        let (exponent, fraction) = match expr.typ.as_ref() {
            ExpressionType::FloatBv { exponent, fraction } => (*exponent, *fraction),
            _ => unreachable!("rounded operator of non float type"),
        };
        let zero = self.mk_smt_real(&BigRational::from_integer(BigInt::from(0)));
        match &expr.kind {
            Expression::IeeeAdd { left, right, .. } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let raw = self.mk_add(&a, &b);
                self.apply_ieee754_semantics(&raw, exponent, fraction, None)
            }
            Expression::IeeeSub { left, right, .. } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let raw = self.mk_sub(&a, &b);
                self.apply_ieee754_semantics(&raw, exponent, fraction, None)
            }
            Expression::IeeeMul { left, right, .. } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let raw = self.mk_mul(&a, &b);
                let a_zero = self.mk_eq(&a, &zero);
                let b_zero = self.mk_eq(&b, &zero);
                let operand_zero = self.mk_or(&a_zero, &b_zero);
                self.apply_ieee754_semantics(&raw, exponent, fraction, Some(operand_zero))
            }
            Expression::IeeeDiv { left, right, .. } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let raw = self.mk_div(&a, &b);
                let format = match recognized_format(exponent, fraction) {
                    Some(format) => format,
                    None => {
                        warn!(
                            "no emulation for float format e{}f{}; passing the real division through",
                            exponent, fraction
                        );
                        return raw;
                    }
                };
                let rounded = self.apply_ieee754_semantics(&raw, exponent, fraction, None);
                // x / 0 is the largest normal, carrying the dividend's sign.
                let max = self.mk_smt_real(format.max_normal);
                let neg_max = self.mk_smt_real(&-format.max_normal.clone());
                let negative = self.mk_lt(&a, &zero);
                let signed_max = self.mk_ite(&negative, &neg_max, &max);
                let divisor_zero = self.mk_eq(&b, &zero);
                self.mk_ite(&divisor_zero, &signed_max, &rounded)
            }
            Expression::IeeeFma {
                factor1,
                factor2,
                addend,
                ..
            } => {
                let a = self.lower_term(factor1);
                let b = self.lower_term(factor2);
                let c = self.lower_term(addend);
                let product = self.mk_mul(&a, &b);
                let raw = self.mk_add(&product, &c);
                let a_zero = self.mk_eq(&a, &zero);
                let b_zero = self.mk_eq(&b, &zero);
                let product_zero = self.mk_or(&a_zero, &b_zero);
                // Only the product's contribution vanishes.
                let c_rounded = self.apply_ieee754_semantics(&c, exponent, fraction, None);
                let rounded = self.apply_ieee754_semantics(&raw, exponent, fraction, None);
                self.mk_ite(&product_zero, &c_rounded, &rounded)
            }
            _ => unreachable!(),
        }
    }

    /// Clamps an exact real result into the given format. The checks apply
    /// in priority order: overflow, then flush to zero, then subnormal
    /// quantization, then the normal range passes through. When
    /// `operand_zero` holds the result is an exact zero regardless.
    pub(crate) fn apply_ieee754_semantics(
        &mut self,
        result: &TermRef,
        exponent: u32,
        fraction: u32,
        operand_zero: Option<TermRef>,
    ) -> TermRef {
        let format = match recognized_format(exponent, fraction) {
            Some(format) => format,
            None => {
                warn!(
                    "no emulation for float format e{}f{}; passing the real result through",
                    exponent, fraction
                );
                return result.clone();
            }
        };
        let zero = self.mk_smt_real(&BigRational::from_integer(BigInt::from(0)));
        let max = self.mk_smt_real(format.max_normal);
        let neg_max = self.mk_smt_real(&-format.max_normal.clone());
        let min_normal = self.mk_smt_real(format.min_normal);
        let step = self.mk_smt_real(format.min_subnormal);
        let half = self.mk_smt_real(&ONE_HALF);

        let negative = self.mk_lt(result, &zero);
        let negated = self.mk_neg(result);
        let magnitude = self.mk_ite(&negative, &negated, result);

        // Quantize to the nearest multiple of the subnormal step:
        // step * floor(|x| / step + 1/2), sign reapplied.
        let ratio = self.mk_div(&magnitude, &step);
        let biased = self.mk_add(&ratio, &half);
        let floored = self.mk_real2int(&biased);
        let rounded_ratio = self.mk_int2real(&floored);
        let quantized_magnitude = self.mk_mul(&rounded_ratio, &step);
        let negated_quantized = self.mk_neg(&quantized_magnitude);
        let quantized = self.mk_ite(&negative, &negated_quantized, &quantized_magnitude);

        let is_subnormal = self.mk_lt(&magnitude, &min_normal);
        let underflows = self.mk_lt(&magnitude, &step);
        let overflows_pos = self.mk_gt(result, &max);
        let overflows_neg = self.mk_lt(result, &neg_max);

        let clamped = self.mk_ite(&is_subnormal, &quantized, result);
        let clamped = self.mk_ite(&underflows, &zero, &clamped);
        let clamped = self.mk_ite(&overflows_neg, &neg_max, &clamped);
        let clamped = self.mk_ite(&overflows_pos, &max, &clamped);
        match operand_zero {
            Some(cond) => self.mk_ite(&cond, &zero, &clamped),
            None => clamped,
        }
    }
}
