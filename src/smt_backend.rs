// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression::ExprRef;
use crate::lowering::SmtContext;

use log::error;
use num_bigint::BigInt;
use num_rational::BigRational;
use std::any::Any;
use std::fmt::Debug;
use std::rc::Rc;

/// The result of using the solver to check the satisfiability of the
/// current proof context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SmtResult {
    Satisfiable,
    Unsatisfiable,
    Undefined,
}

pub type SortRef = Rc<Sort>;

/// A solver-level sort. One instance is cached per distinct type descriptor
/// and shared for the lifetime of the context.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Sort {
    Bool,
    Int,
    Real,
    BitVector { width: u32 },
    FloatingPoint { exponent: u32, fraction: u32 },
    RoundingMode,
    Array { domain: SortRef, range: SortRef },
    Struct { fields: Vec<SortRef> },
}

impl Sort {
    pub fn is_bool(&self) -> bool {
        matches!(self, Sort::Bool)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Sort::Int | Sort::Real)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Sort::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Sort::Struct { .. })
    }

    /// The width in bits of a bit-vector or floating point sort.
    pub fn data_width(&self) -> u32 {
        match self {
            Sort::Bool => 1,
            Sort::BitVector { width } => *width,
            Sort::FloatingPoint { exponent, fraction } => exponent + fraction + 1,
            _ => unreachable!("data_width of sort {:?}", self),
        }
    }

    /// The index width of an array sort. Unbounded integer domains report
    /// the conventional machine word width.
    pub fn domain_width(&self) -> u32 {
        match self {
            Sort::Array { domain, .. } => match domain.as_ref() {
                Sort::BitVector { width } => *width,
                Sort::Int => 64,
                _ => unreachable!("array domain of sort {:?}", domain),
            },
            _ => unreachable!("domain_width of sort {:?}", self),
        }
    }

    pub fn range(&self) -> &SortRef {
        match self {
            Sort::Array { range, .. } => range,
            _ => unreachable!("range of sort {:?}", self),
        }
    }
}

pub type TermRef = Rc<dyn SolverTerm>;

/// A solver term, owned by the proof context that created it and released
/// when the context level it was created at is popped.
///
/// The handful of operations that backends may want to specialize per term
/// are methods here; the defaults delegate back to the context's primitive
/// builders. Backends with no native record sorts override `project`,
/// `update` and `eq_term` on their own term type.
pub trait SolverTerm: Debug {
    fn sort(&self) -> SortRef;

    fn as_any(&self) -> &dyn Any;

    /// self == other.
    fn eq_term(&self, ctx: &mut SmtContext, this: &TermRef, other: &TermRef) -> TermRef {
        ctx.mk_eq(this, other)
    }

    /// cond ? self : false_operand.
    fn ite(
        &self,
        ctx: &mut SmtContext,
        this: &TermRef,
        cond: &TermRef,
        false_operand: &TermRef,
    ) -> TermRef {
        ctx.mk_ite(cond, this, false_operand)
    }

    /// A copy of self with the element at `index` (a field number for
    /// records, an array index otherwise) replaced by `value`. When the
    /// index is symbolic the caller passes it as `index_expr`.
    fn update(
        &self,
        ctx: &mut SmtContext,
        this: &TermRef,
        value: &TermRef,
        index: u64,
        index_expr: Option<&ExprRef>,
    ) -> TermRef {
        let sort = self.sort();
        assert!(sort.is_array(), "update of non-array term {:?}", self);
        let index_term = match index_expr {
            Some(e) => ctx.lower_term(e),
            None => ctx.mk_domain_index(index, sort.domain_width()),
        };
        ctx.mk_store(this, &index_term, value)
    }

    /// Reads the element of self at the given index expression.
    fn select(&self, ctx: &mut SmtContext, this: &TermRef, index: &ExprRef) -> TermRef {
        let index_term = ctx.lower_term(index);
        ctx.mk_select(this, &index_term)
    }

    /// Extracts the numbered field of a record term. Only meaningful for
    /// terms of struct sort.
    fn project(&self, _ctx: &mut SmtContext, _this: &TermRef, field: u32) -> TermRef {
        missing_primitive("term", &format!("project field {}", field))
    }
}

/// Logs and aborts: a backend was asked for a primitive it does not
/// implement, which is an internal configuration error rather than a
/// recoverable condition.
pub fn missing_primitive(backend: &str, primitive: &str) -> ! {
    error!("{} does not implement {}", backend, primitive);
    panic!("{} does not implement {}", backend, primitive);
}

macro_rules! backend_binary_ops {
    ($($name:ident),* $(,)?) => {
        $(fn $name(&mut self, _a: &TermRef, _b: &TermRef) -> TermRef {
            missing_primitive(self.name(), stringify!($name))
        })*
    };
}

macro_rules! backend_unary_ops {
    ($($name:ident),* $(,)?) => {
        $(fn $name(&mut self, _a: &TermRef) -> TermRef {
            missing_primitive(self.name(), stringify!($name))
        })*
    };
}

/// The primitive term builders and solver process controls a concrete
/// backend supplies. Every method has a default that aborts after logging;
/// a backend only implements what the encodings it is used with can reach.
pub trait SmtBackend: Debug {
    /// The backend name used in diagnostics.
    fn name(&self) -> &str;

    // Sorts.

    fn mk_bool_sort(&mut self) -> SortRef {
        missing_primitive(self.name(), "mk_bool_sort")
    }

    fn mk_int_sort(&mut self) -> SortRef {
        missing_primitive(self.name(), "mk_int_sort")
    }

    fn mk_real_sort(&mut self) -> SortRef {
        missing_primitive(self.name(), "mk_real_sort")
    }

    fn mk_bv_sort(&mut self, _width: u32) -> SortRef {
        missing_primitive(self.name(), "mk_bv_sort")
    }

    fn mk_fpbv_sort(&mut self, _exponent: u32, _fraction: u32) -> SortRef {
        missing_primitive(self.name(), "mk_fpbv_sort")
    }

    fn mk_fpbv_rm_sort(&mut self) -> SortRef {
        missing_primitive(self.name(), "mk_fpbv_rm_sort")
    }

    fn mk_array_sort(&mut self, _domain: &SortRef, _range: &SortRef) -> SortRef {
        missing_primitive(self.name(), "mk_array_sort")
    }

    // Numeric terms over Int/Real sorts.

    backend_binary_ops!(mk_add, mk_sub, mk_mul, mk_div, mk_mod);
    backend_unary_ops!(mk_neg, mk_real2int, mk_int2real, mk_isint);

    // Bit-vector terms.

    backend_binary_ops!(
        mk_bvadd, mk_bvsub, mk_bvmul, mk_bvsdiv, mk_bvudiv, mk_bvsmod, mk_bvumod, mk_bvand,
        mk_bvor, mk_bvxor, mk_bvshl, mk_bvashr, mk_bvlshr, mk_concat,
    );
    backend_unary_ops!(mk_bvneg, mk_bvnot);

    // Booleans.

    backend_binary_ops!(mk_and, mk_or, mk_xor, mk_implies);
    backend_unary_ops!(mk_not);

    // Comparisons. The greater-than family defaults to argument-swapped
    // less-than, and disequality to negated equality.

    backend_binary_ops!(mk_lt, mk_le, mk_bvult, mk_bvule, mk_bvslt, mk_bvsle, mk_eq);

    fn mk_gt(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        debug_assert!(a.sort().is_numeric() && b.sort().is_numeric());
        self.mk_lt(b, a)
    }

    fn mk_ge(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        debug_assert!(a.sort().is_numeric() && b.sort().is_numeric());
        self.mk_le(b, a)
    }

    fn mk_bvugt(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        self.mk_bvult(b, a)
    }

    fn mk_bvuge(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        self.mk_bvule(b, a)
    }

    fn mk_bvsgt(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        self.mk_bvslt(b, a)
    }

    fn mk_bvsge(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        self.mk_bvsle(b, a)
    }

    fn mk_neq(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        let eq = self.mk_eq(a, b);
        self.mk_not(&eq)
    }

    // Structure.

    fn mk_ite(&mut self, _cond: &TermRef, _t: &TermRef, _f: &TermRef) -> TermRef {
        missing_primitive(self.name(), "mk_ite")
    }

    fn mk_store(&mut self, _array: &TermRef, _index: &TermRef, _value: &TermRef) -> TermRef {
        missing_primitive(self.name(), "mk_store")
    }

    fn mk_select(&mut self, _array: &TermRef, _index: &TermRef) -> TermRef {
        missing_primitive(self.name(), "mk_select")
    }

    fn mk_extract(&mut self, _a: &TermRef, _high: u32, _low: u32) -> TermRef {
        missing_primitive(self.name(), "mk_extract")
    }

    fn mk_sign_ext(&mut self, _a: &TermRef, _extra_bits: u32) -> TermRef {
        missing_primitive(self.name(), "mk_sign_ext")
    }

    fn mk_zero_ext(&mut self, _a: &TermRef, _extra_bits: u32) -> TermRef {
        missing_primitive(self.name(), "mk_zero_ext")
    }

    fn mk_quantifier(&mut self, _is_forall: bool, _bounds: &[TermRef], _body: &TermRef) -> TermRef {
        missing_primitive(self.name(), "mk_quantifier")
    }

    // Literals and symbols.

    fn mk_smt_int(&mut self, _value: &BigInt) -> TermRef {
        missing_primitive(self.name(), "mk_smt_int")
    }

    fn mk_smt_real(&mut self, _value: &BigRational) -> TermRef {
        missing_primitive(self.name(), "mk_smt_real")
    }

    /// A bit-vector literal; negative values are encoded two's complement.
    fn mk_smt_bv(&mut self, _value: &BigInt, _width: u32) -> TermRef {
        missing_primitive(self.name(), "mk_smt_bv")
    }

    fn mk_smt_bool(&mut self, _value: bool) -> TermRef {
        missing_primitive(self.name(), "mk_smt_bool")
    }

    fn mk_smt_symbol(&mut self, _name: &str, _sort: &SortRef) -> TermRef {
        missing_primitive(self.name(), "mk_smt_symbol")
    }

    // Solver controls.

    fn assert_term(&mut self, _term: &TermRef) {
        missing_primitive(self.name(), "assert_term")
    }

    fn check_sat(&mut self) -> SmtResult {
        missing_primitive(self.name(), "check_sat")
    }

    fn push_solver(&mut self) {}

    fn pop_solver(&mut self) {}

    // Model queries, valid after a satisfiable check.

    fn model_bool(&mut self, _term: &TermRef) -> bool {
        missing_primitive(self.name(), "model_bool")
    }

    /// The unsigned bit pattern assigned to a bit-vector term.
    fn model_bv_bits(&mut self, _term: &TermRef) -> BigInt {
        missing_primitive(self.name(), "model_bv_bits")
    }

    /// The value assigned to an Int sorted term.
    fn model_int(&mut self, _term: &TermRef) -> BigInt {
        missing_primitive(self.name(), "model_int")
    }

    /// The value assigned to a Real sorted term, if the model gives it a
    /// rational interpretation.
    fn model_rational(&mut self, _term: &TermRef) -> Option<BigRational> {
        missing_primitive(self.name(), "model_rational")
    }

    /// The bit pattern assigned to a floating point term.
    fn model_fp_bits(&mut self, _term: &TermRef) -> u64 {
        missing_primitive(self.name(), "model_fp_bits")
    }
}
