// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Counterexample reconstruction: after a satisfiable check, `get` maps an
//! expression back to a literal expression using the backend's model, the
//! capabilities for aggregates, and constant folding for anything built on
//! top of resolved leaves.

use crate::constant_domain::ConstantDomain;
use crate::expression::{self, Expr, ExprRef, Expression};
use crate::expression_type::{ArraySize, ExpressionType, TypeRef};
use crate::lowering::SmtContext;
use crate::smt_backend::TermRef;

use log::{error, warn};
use log_derive::logfn_inputs;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

/// Model arrays are never materialized beyond 2^10 elements.
const MAX_ARRAY_DOMAIN: u32 = 10;

impl SmtContext {
    /// Reconstructs the concrete value the current model assigns to an
    /// expression. Valid after `solve` returned satisfiable.
    #[logfn_inputs(TRACE)]
    pub fn get(&mut self, expr: &ExprRef) -> ExprRef {
        match &expr.kind {
            Expression::CompileTimeConstant(..) => expr.clone(),
            // Addresses are already symbolic constants.
            Expression::AddressOf { .. } => expr.clone(),
            Expression::ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => {
                // Recurse only into the branch the model takes.
                let cond = self.get(condition);
                match cond.as_constant().and_then(|c| c.as_bool()) {
                    Some(true) => self.get(consequent),
                    Some(false) => self.get(alternate),
                    None => self.get_by_type(expr),
                }
            }
            // A store chain resolves to its innermost updated value.
            Expression::Store { .. } => {
                let (_, _, value) = self.decompose_store_chain(expr);
                self.get(&value)
            }
            Expression::Variable { .. }
            | Expression::Index { .. }
            | Expression::Member { .. }
            | Expression::PointerObject { .. }
            | Expression::PointerOffset { .. }
            | Expression::PointerCapability { .. }
            | Expression::SameObject { .. } => self.get_by_type(expr),
            _ => {
                let resolved = expr.map_operands(&mut |child| self.get(child));
                expression::simplify(&resolved)
            }
        }
    }

    /// Resolves an expression through the model according to its type.
    fn get_by_type(&mut self, expr: &ExprRef) -> ExprRef {
        match expr.typ.as_ref() {
            ExpressionType::Array { .. } => self.get_array(expr),
            ExpressionType::Struct { .. } | ExpressionType::Pointer { .. } => {
                let term = self.lower_term(expr);
                let api = self.tuple_api();
                api.tuple_get(self, &expr.typ, &term)
            }
            _ => {
                let term = self.lower_term(expr);
                self.get_by_ast(&expr.typ, &term)
            }
        }
    }

    /// Reads a scalar value of the given type out of a term's model
    /// assignment.
    pub fn get_by_ast(&mut self, typ: &TypeRef, term: &TermRef) -> ExprRef {
        match typ.as_ref() {
            ExpressionType::Bool => expression::constant_bool(self.model_bool(term)),
            ExpressionType::UnsignedBv { width } | ExpressionType::SignedBv { width } => {
                let value = if self.int_encoding() {
                    self.model_int(term)
                } else {
                    let bits = self.model_bv_bits(term);
                    if typ.is_signed_bv() {
                        crate::constant_domain::bits_to_signed(&bits, *width)
                    } else {
                        bits
                    }
                };
                expression::constant_int(typ, value)
            }
            ExpressionType::Union { .. } => {
                let bits = if self.int_encoding() {
                    self.model_int(term)
                } else {
                    self.model_bv_bits(term)
                };
                Expr::make(
                    typ.clone(),
                    Expression::CompileTimeConstant(ConstantDomain::Int(bits)),
                )
            }
            ExpressionType::FixedBv {
                width,
                integer_bits,
            } => {
                let fraction_bits = width - integer_bits;
                let bits = if self.int_encoding() {
                    match self.model_rational(term) {
                        Some(value) => {
                            // Scale back to the raw representation.
                            let scaled = value * BigRational::from_integer(
                                BigInt::one() << fraction_bits,
                            );
                            scaled.round().to_integer()
                        }
                        None => return self.unsupported_model(typ),
                    }
                } else {
                    self.model_bv_bits(term)
                };
                Expr::make(
                    typ.clone(),
                    Expression::CompileTimeConstant(ConstantDomain::Fixed(bits)),
                )
            }
            ExpressionType::FloatBv { exponent, fraction } => {
                if self.int_encoding() {
                    let value = match self.model_rational(term) {
                        Some(value) => rational_to_f64(&value),
                        None => return self.unsupported_model(typ),
                    };
                    let constant = match exponent + fraction + 1 {
                        32 => ConstantDomain::F32((value as f32).to_bits()),
                        64 => ConstantDomain::F64(value.to_bits()),
                        _ => return self.unsupported_model(typ),
                    };
                    Expr::make(typ.clone(), Expression::CompileTimeConstant(constant))
                } else {
                    let api = self.fp_api();
                    let constant = api.get_fpbv(self, term, *exponent, *fraction);
                    Expr::make(typ.clone(), Expression::CompileTimeConstant(constant))
                }
            }
            _ => self.unsupported_model(typ),
        }
    }

    /// Materializes an array value element by element, capped at 2^10
    /// entries.
    fn get_array(&mut self, expr: &ExprRef) -> ExprRef {
        let flat_type = self.flatten_array_type(&expr.typ);
        let subtype = flat_type.array_subtype().clone();
        let domain_width = self
            .array_domain_width(&flat_type)
            .min(MAX_ARRAY_DOMAIN);
        let count = match flat_type.array_size() {
            ArraySize::Constant(n) => (*n).min(1u64 << domain_width),
            _ => 1u64 << domain_width,
        };
        let term = self.lower_term(expr);
        let mut members = Vec::with_capacity(count as usize);
        for i in 0..count {
            let element = if subtype.is_tuple_kind() {
                let api = self.tuple_api();
                api.tuple_get_array_elem(self, &term, i, &subtype)
            } else {
                let api = self.array_api();
                api.get_array_elem(self, &term, i, &subtype)
            };
            members.push(element);
        }
        Expr::make(flat_type, Expression::ConstantArray { members })
    }

    /// Rebuilds a scalar literal from a raw non-negative bit pattern.
    pub fn get_by_value(&mut self, typ: &TypeRef, bits: BigInt) -> ExprRef {
        match typ.as_ref() {
            ExpressionType::Bool => expression::constant_bool(!bits.is_zero()),
            ExpressionType::UnsignedBv { .. } => expression::constant_int(typ, bits),
            ExpressionType::SignedBv { width } => expression::constant_int(
                typ,
                crate::constant_domain::bits_to_signed(&bits, *width),
            ),
            ExpressionType::FixedBv { .. } => Expr::make(
                typ.clone(),
                Expression::CompileTimeConstant(ConstantDomain::Fixed(bits)),
            ),
            ExpressionType::FloatBv { exponent, fraction } => {
                let constant = match exponent + fraction + 1 {
                    32 => ConstantDomain::F32(bits.to_u32().unwrap_or(0)),
                    64 => ConstantDomain::F64(bits.to_u64().unwrap_or(0)),
                    _ => return self.unsupported_model(typ),
                };
                Expr::make(typ.clone(), Expression::CompileTimeConstant(constant))
            }
            _ => self.unsupported_model(typ),
        }
    }

    /// Handles a model value shape with no reconstruction rule: fatal, or
    /// a zero literal when the context was configured to degrade.
    pub(crate) fn unsupported_model(&mut self, typ: &TypeRef) -> ExprRef {
        if self.options().unsupported_models_as_zero {
            warn!("no model reconstruction for type {:?}; reporting zero", typ);
            return expression::gen_zero(typ);
        }
        error!("no model reconstruction for type {:?}", typ);
        panic!("no model reconstruction for type");
    }
}

/// Converts a model rational to the nearest double. A nonzero value too
/// small for the conversion becomes the smallest representable nonzero
/// magnitude with the correct sign, so that a counterexample never reports
/// a spurious zero.
pub fn rational_to_f64(value: &BigRational) -> f64 {
    let converted = value.to_f64().unwrap_or(0.0);
    if converted == 0.0 && !value.is_zero() {
        let tiny = f64::from_bits(1);
        if value.is_negative() {
            -tiny
        } else {
            tiny
        }
    } else {
        converted
    }
}
