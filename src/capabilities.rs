// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::expression::{ExprRef, RoundingMode};
use crate::expression_type::TypeRef;
use crate::lowering::SmtContext;
use crate::smt_backend::{missing_primitive, SortRef, TermRef};

use std::fmt::Debug;

/// Lowers record-shaped values (structs and the pointer record) for
/// backends with native tuple or datatype support, or emulates them for
/// backends without. At most one instance per context.
///
/// Methods receive the owning context so they can build subsidiary terms
/// with its primitive wrappers; reentrant calls back into the lowering are
/// allowed.
pub trait TupleCapability: Debug {
    /// The sort of a struct or pointer type. Nested aggregate members
    /// recurse through the context's sort cache.
    fn mk_struct_sort(&self, ctx: &mut SmtContext, typ: &TypeRef) -> SortRef;

    /// Lowers a struct literal expression to a record term.
    fn tuple_create(&self, ctx: &mut SmtContext, expr: &ExprRef) -> TermRef;

    /// A fresh, unconstrained record term of the given sort.
    fn tuple_fresh(&self, ctx: &mut SmtContext, sort: &SortRef, name: &str) -> TermRef;

    /// A named record variable.
    fn mk_tuple_symbol(&self, ctx: &mut SmtContext, name: &str, sort: &SortRef) -> TermRef;

    /// A named variable whose type is an array with a record element type.
    fn mk_tuple_array_symbol(&self, ctx: &mut SmtContext, expr: &ExprRef) -> TermRef;

    /// Lowers an array literal with record elements. `elements` holds one
    /// term per element, or the single initializer when `is_array_of`.
    fn tuple_array_create(
        &self,
        ctx: &mut SmtContext,
        array_type: &TypeRef,
        elements: &[TermRef],
        is_array_of: bool,
        domain: &SortRef,
    ) -> TermRef;

    /// Reconstructs a struct-typed counterexample value from a record term.
    fn tuple_get(&self, ctx: &mut SmtContext, typ: &TypeRef, term: &TermRef) -> ExprRef;

    /// Reconstructs one record element of an array term.
    fn tuple_get_array_elem(
        &self,
        ctx: &mut SmtContext,
        array: &TermRef,
        index: u64,
        subtype: &TypeRef,
    ) -> ExprRef;

    fn push_ctx(&self) {}

    fn pop_ctx(&self) {}

    /// Flushes any deferred record axioms before a satisfiability check.
    fn add_tuple_constraints_for_solving(&self, _ctx: &mut SmtContext) {}
}

/// Lowers array values for backends whose array theory needs help, and
/// reconstructs array elements from models. At most one instance per
/// context.
pub trait ArrayCapability: Debug {
    /// False for backends whose array theory cannot range over booleans;
    /// the lowering then stores single-bit vectors instead.
    fn supports_bools_in_arrays(&self) -> bool {
        true
    }

    /// True if the backend can build a uniformly initialized array of
    /// unbounded size directly.
    fn can_init_unbounded_arrays(&self) -> bool {
        false
    }

    /// A named array variable. `subtype` is the element sort.
    fn mk_array_symbol(
        &self,
        ctx: &mut SmtContext,
        name: &str,
        sort: &SortRef,
        subtype: &SortRef,
    ) -> TermRef;

    /// An array with every element equal to `initializer`, indexed by
    /// `domain_width` bits. The default materializes a fresh array and
    /// stores the initializer at every index, which is only viable for
    /// small domains; backends with a native constant-array construct
    /// override this.
    fn convert_array_of(
        &self,
        ctx: &mut SmtContext,
        initializer: &TermRef,
        domain_width: u32,
    ) -> TermRef {
        let range = initializer.sort();
        let sort = ctx.mk_array_sort_for_domain(domain_width, &range);
        let name = ctx.mk_fresh_name("array_of::");
        let mut array = self.mk_array_symbol(ctx, &name, &sort, &range);
        for i in 0..(1u64 << domain_width) {
            let index = ctx.mk_domain_index(i, domain_width);
            array = ctx.mk_store(&array, &index, initializer);
        }
        array
    }

    /// Reconstructs one element of an array term from the model.
    fn get_array_elem(
        &self,
        ctx: &mut SmtContext,
        array: &TermRef,
        index: u64,
        subtype: &TypeRef,
    ) -> ExprRef;

    fn push_ctx(&self) {}

    fn pop_ctx(&self) {}

    fn add_array_constraints_for_solving(&self, _ctx: &mut SmtContext) {}
}

macro_rules! fp_binary_ops {
    ($($name:ident),* $(,)?) => {
        $(fn $name(&self, _ctx: &mut SmtContext, _a: &TermRef, _b: &TermRef) -> TermRef {
            missing_primitive("fp capability", stringify!($name))
        })*
    };
}

macro_rules! fp_rounded_binary_ops {
    ($($name:ident),* $(,)?) => {
        $(fn $name(
            &self,
            _ctx: &mut SmtContext,
            _a: &TermRef,
            _b: &TermRef,
            _rm: &TermRef,
        ) -> TermRef {
            missing_primitive("fp capability", stringify!($name))
        })*
    };
}

macro_rules! fp_unary_ops {
    ($($name:ident),* $(,)?) => {
        $(fn $name(&self, _ctx: &mut SmtContext, _a: &TermRef) -> TermRef {
            missing_primitive("fp capability", stringify!($name))
        })*
    };
}

/// Lowers IEEE floating point operations in exact encoding. Only consulted
/// when the context encoding is exact; abstract encoding goes through the
/// emulation layer instead. At most one instance per context.
pub trait FpCapability: Debug {
    /// A floating point literal of the given format.
    fn mk_smt_fpbv(
        &self,
        _ctx: &mut SmtContext,
        _value: &ConstantDomain,
        _exponent: u32,
        _fraction: u32,
    ) -> TermRef {
        missing_primitive("fp capability", "mk_smt_fpbv")
    }

    /// A rounding mode literal.
    fn mk_fpbv_rm(&self, _ctx: &mut SmtContext, _rm: RoundingMode) -> TermRef {
        missing_primitive("fp capability", "mk_fpbv_rm")
    }

    fp_rounded_binary_ops!(mk_fpbv_add, mk_fpbv_sub, mk_fpbv_mul, mk_fpbv_div);

    fn mk_fpbv_fma(
        &self,
        _ctx: &mut SmtContext,
        _a: &TermRef,
        _b: &TermRef,
        _c: &TermRef,
        _rm: &TermRef,
    ) -> TermRef {
        missing_primitive("fp capability", "mk_fpbv_fma")
    }

    fn mk_fpbv_sqrt(&self, _ctx: &mut SmtContext, _a: &TermRef, _rm: &TermRef) -> TermRef {
        missing_primitive("fp capability", "mk_fpbv_sqrt")
    }

    fp_binary_ops!(mk_fpbv_eq, mk_fpbv_lt, mk_fpbv_le);

    fn mk_fpbv_gt(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef) -> TermRef {
        self.mk_fpbv_lt(ctx, b, a)
    }

    fn mk_fpbv_ge(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef) -> TermRef {
        self.mk_fpbv_le(ctx, b, a)
    }

    fp_unary_ops!(
        mk_fpbv_neg,
        mk_fpbv_abs,
        mk_fpbv_is_nan,
        mk_fpbv_is_inf,
        mk_fpbv_is_normal,
    );

    /// Reconstructs the bit pattern of a floating point term from the
    /// model.
    fn get_fpbv(
        &self,
        _ctx: &mut SmtContext,
        _term: &TermRef,
        _exponent: u32,
        _fraction: u32,
    ) -> ConstantDomain {
        missing_primitive("fp capability", "get_fpbv")
    }

    fn push_ctx(&self) {}

    fn pop_ctx(&self) {}
}
