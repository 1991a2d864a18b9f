// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::capabilities::{ArrayCapability, FpCapability, TupleCapability};
use crate::constant_domain::{bits_to_signed, ConstantDomain};
use crate::expression::{self, Expr, ExprRef, Expression, RoundingMode};
use crate::expression_type::{self, ExpressionType, TypeRef};
use crate::options::{Encoding, Options};
use crate::smt_backend::{SmtBackend, SmtResult, Sort, SortRef, TermRef};

use log::{error, warn};
use log_derive::logfn_inputs;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Mutex;

/// The object id of the null pointer.
pub const NULL_OBJECT: u32 = 0;
/// The object id handed to pointers with no known provenance.
pub const INVALID_OBJECT: u32 = 1;

/// The incremental proof context: lowers expressions to solver terms
/// through a memoizing cache, owns every term it creates, and snapshots all
/// of its state at each push so a pop restores it exactly.
#[derive(Debug)]
pub struct SmtContext {
    backend: Box<dyn SmtBackend>,
    options: Options,
    int_encoding: bool,
    ctx_level: u32,

    tuple_api: Option<Rc<dyn TupleCapability>>,
    array_api: Option<Rc<dyn ArrayCapability>>,
    fp_api: Option<Rc<dyn FpCapability>>,

    /// Memoizes lowered expressions together with the context level each
    /// term was created at, so a pop can purge exactly the entries that
    /// are about to die.
    term_cache: Mutex<HashMap<ExprRef, (TermRef, u32)>>,
    sort_cache: HashMap<TypeRef, SortRef>,

    /// Every term created since context construction, in creation order.
    /// Truncated to the recorded mark on pop, releasing the terms of the
    /// closed level en masse.
    live_terms: Vec<TermRef>,
    live_term_marks: Vec<usize>,

    boolean_sort: Option<SortRef>,
    /// In abstract encoding, a 64 element array holding 2^0 .. 2^63; shifts
    /// become a select from this array followed by a multiply or divide.
    int_shift_powers: Option<TermRef>,

    quantifier_counter: u32,
    fresh_counter: HashMap<String, u32>,

    /// The record type substituted for every pointer.
    pointer_struct: TypeRef,
    pub(crate) object_ids: Vec<HashMap<String, u32>>,
    pub(crate) next_object_id: Vec<u32>,
    pub(crate) renumber_map: Vec<HashMap<String, u32>>,
}

macro_rules! forward_binary {
    ($($name:ident),* $(,)?) => {
        $(pub fn $name(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
            let t = self.backend.$name(a, b);
            self.record_term(t)
        })*
    };
}

macro_rules! forward_unary {
    ($($name:ident),* $(,)?) => {
        $(pub fn $name(&mut self, a: &TermRef) -> TermRef {
            let t = self.backend.$name(a);
            self.record_term(t)
        })*
    };
}

impl SmtContext {
    /// Creates a context over the given backend. The caller registers the
    /// capabilities the backend provides and then calls `post_init` before
    /// lowering anything.
    pub fn new(backend: Box<dyn SmtBackend>, options: Options) -> SmtContext {
        let int_encoding = options.encoding == Encoding::Abstract;
        let ptr_field = expression_type::uint_type(options.pointer_width);
        let mut members = vec![ptr_field.clone(), ptr_field.clone()];
        let mut member_names = vec!["pointer_object".to_string(), "pointer_offset".to_string()];
        if options.capability_pointers {
            members.push(ptr_field);
            member_names.push("pointer_cap_info".to_string());
        }
        let pointer_struct =
            expression_type::struct_type("pointer_struct", members, member_names);
        SmtContext {
            backend,
            options,
            int_encoding,
            ctx_level: 0,
            tuple_api: None,
            array_api: None,
            fp_api: None,
            term_cache: Mutex::new(HashMap::new()),
            sort_cache: HashMap::new(),
            live_terms: Vec::new(),
            live_term_marks: Vec::new(),
            boolean_sort: None,
            int_shift_powers: None,
            quantifier_counter: 0,
            fresh_counter: HashMap::new(),
            pointer_struct,
            object_ids: vec![HashMap::new()],
            next_object_id: vec![INVALID_OBJECT + 1],
            renumber_map: vec![HashMap::new()],
        }
    }

    /// Finishes construction once all capabilities are registered: caches
    /// the boolean sort and, in abstract encoding, lowers the shift powers
    /// array.
    pub fn post_init(&mut self) {
        let sort = self.backend.mk_bool_sort();
        self.boolean_sort = Some(sort);
        if self.int_encoding {
            let elem_type = expression_type::uint_type(64);
            let members = (0..64)
                .map(|i| expression::constant_int(&elem_type, BigInt::one() << i))
                .collect();
            let arr_type = expression_type::array_type(
                elem_type,
                crate::expression_type::ArraySize::Constant(64),
            );
            let arr = Expr::make(arr_type, Expression::ConstantArray { members });
            let powers = self.lower_term(&arr);
            self.int_shift_powers = Some(powers);
        }
    }

    pub fn register_tuple_capability(&mut self, api: Rc<dyn TupleCapability>) {
        if self.tuple_api.is_some() {
            error!("tuple capability registered twice");
            panic!("tuple capability registered twice");
        }
        self.tuple_api = Some(api);
    }

    pub fn register_array_capability(&mut self, api: Rc<dyn ArrayCapability>) {
        if self.array_api.is_some() {
            error!("array capability registered twice");
            panic!("array capability registered twice");
        }
        self.array_api = Some(api);
    }

    pub fn register_fp_capability(&mut self, api: Rc<dyn FpCapability>) {
        if self.fp_api.is_some() {
            error!("fp capability registered twice");
            panic!("fp capability registered twice");
        }
        self.fp_api = Some(api);
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn int_encoding(&self) -> bool {
        self.int_encoding
    }

    pub fn ctx_level(&self) -> u32 {
        self.ctx_level
    }

    /// The record type every pointer lowers to.
    pub fn pointer_struct_type(&self) -> TypeRef {
        self.pointer_struct.clone()
    }

    /// The record layout of a struct or pointer type.
    pub fn struct_def(&self, typ: &TypeRef) -> TypeRef {
        if typ.is_pointer() {
            self.pointer_struct.clone()
        } else {
            typ.clone()
        }
    }

    pub(crate) fn tuple_api(&self) -> Rc<dyn TupleCapability> {
        match &self.tuple_api {
            Some(api) => api.clone(),
            None => {
                error!("no tuple capability registered");
                panic!("no tuple capability registered");
            }
        }
    }

    pub(crate) fn array_api(&self) -> Rc<dyn ArrayCapability> {
        match &self.array_api {
            Some(api) => api.clone(),
            None => {
                error!("no array capability registered");
                panic!("no array capability registered");
            }
        }
    }

    pub(crate) fn fp_api(&self) -> Rc<dyn FpCapability> {
        match &self.fp_api {
            Some(api) => api.clone(),
            None => {
                error!("no fp capability registered");
                panic!("no fp capability registered");
            }
        }
    }

    /// Takes ownership of a freshly built term; it stays alive until the
    /// current context level is popped.
    pub fn record_term(&mut self, term: TermRef) -> TermRef {
        self.live_terms.push(term.clone());
        term
    }

    pub fn live_term_count(&self) -> usize {
        self.live_terms.len()
    }

    // Primitive wrappers: each builds through the backend and records the
    // result into the live set.

    forward_binary!(
        mk_add, mk_sub, mk_mul, mk_div, mk_mod, mk_bvadd, mk_bvsub, mk_bvmul, mk_bvsdiv,
        mk_bvudiv, mk_bvsmod, mk_bvumod, mk_bvand, mk_bvor, mk_bvxor, mk_bvshl, mk_bvashr,
        mk_bvlshr, mk_concat, mk_and, mk_or, mk_xor, mk_implies, mk_lt, mk_le, mk_gt, mk_ge,
        mk_bvult, mk_bvule, mk_bvslt, mk_bvsle, mk_bvugt, mk_bvuge, mk_bvsgt, mk_bvsge, mk_eq,
        mk_neq,
    );

    forward_unary!(mk_neg, mk_bvneg, mk_bvnot, mk_not, mk_real2int, mk_int2real, mk_isint);

    pub fn mk_ite(&mut self, cond: &TermRef, t: &TermRef, f: &TermRef) -> TermRef {
        let r = self.backend.mk_ite(cond, t, f);
        self.record_term(r)
    }

    pub fn mk_store(&mut self, array: &TermRef, index: &TermRef, value: &TermRef) -> TermRef {
        let r = self.backend.mk_store(array, index, value);
        self.record_term(r)
    }

    pub fn mk_select(&mut self, array: &TermRef, index: &TermRef) -> TermRef {
        let r = self.backend.mk_select(array, index);
        self.record_term(r)
    }

    pub fn mk_extract_term(&mut self, a: &TermRef, high: u32, low: u32) -> TermRef {
        let r = self.backend.mk_extract(a, high, low);
        self.record_term(r)
    }

    pub fn mk_sign_ext(&mut self, a: &TermRef, extra_bits: u32) -> TermRef {
        let r = self.backend.mk_sign_ext(a, extra_bits);
        self.record_term(r)
    }

    pub fn mk_zero_ext(&mut self, a: &TermRef, extra_bits: u32) -> TermRef {
        let r = self.backend.mk_zero_ext(a, extra_bits);
        self.record_term(r)
    }

    pub fn mk_quantifier(
        &mut self,
        is_forall: bool,
        bounds: &[TermRef],
        body: &TermRef,
    ) -> TermRef {
        let r = self.backend.mk_quantifier(is_forall, bounds, body);
        self.record_term(r)
    }

    pub fn mk_smt_int(&mut self, value: &BigInt) -> TermRef {
        let r = self.backend.mk_smt_int(value);
        self.record_term(r)
    }

    pub fn mk_smt_real(&mut self, value: &BigRational) -> TermRef {
        let r = self.backend.mk_smt_real(value);
        self.record_term(r)
    }

    pub fn mk_smt_bv(&mut self, value: &BigInt, width: u32) -> TermRef {
        let r = self.backend.mk_smt_bv(value, width);
        self.record_term(r)
    }

    pub fn mk_smt_bool(&mut self, value: bool) -> TermRef {
        let r = self.backend.mk_smt_bool(value);
        self.record_term(r)
    }

    pub fn mk_smt_symbol(&mut self, name: &str, sort: &SortRef) -> TermRef {
        let r = self.backend.mk_smt_symbol(name, sort);
        self.record_term(r)
    }

    /// Negates a boolean term.
    pub fn invert(&mut self, term: &TermRef) -> TermRef {
        assert!(term.sort().is_bool(), "invert of non boolean term");
        self.mk_not(term)
    }

    /// An index literal for an array domain of the given width.
    pub fn mk_domain_index(&mut self, index: u64, domain_width: u32) -> TermRef {
        if self.int_encoding {
            self.mk_smt_int(&BigInt::from(index))
        } else {
            self.mk_smt_bv(&BigInt::from(index), domain_width)
        }
    }

    /// The index sort for an array domain of the given width (an unbounded
    /// integer in abstract encoding).
    pub fn mk_domain_sort(&mut self, domain_width: u32) -> SortRef {
        if self.int_encoding {
            self.backend.mk_int_sort()
        } else {
            self.backend.mk_bv_sort(domain_width)
        }
    }

    /// An array sort indexed by `domain_width` bits (an unbounded integer
    /// domain in abstract encoding).
    pub fn mk_array_sort_for_domain(&mut self, domain_width: u32, range: &SortRef) -> SortRef {
        let domain = self.mk_domain_sort(domain_width);
        self.backend.mk_array_sort(&domain, range)
    }

    fn mk_int_bv_sort(&mut self, width: u32) -> SortRef {
        if self.int_encoding {
            self.backend.mk_int_sort()
        } else {
            self.backend.mk_bv_sort(width)
        }
    }

    pub fn boolean_sort(&self) -> SortRef {
        self.boolean_sort
            .clone()
            .expect("post_init must run before lowering")
    }

    /// The sort a value of the given type lowers to. Cached per type for
    /// the context lifetime.
    #[logfn_inputs(TRACE)]
    pub fn lower_sort(&mut self, typ: &TypeRef) -> SortRef {
        if let Some(sort) = self.sort_cache.get(typ) {
            return sort.clone();
        }
        let sort = match typ.as_ref() {
            ExpressionType::Bool => self.boolean_sort(),
            ExpressionType::UnsignedBv { width } | ExpressionType::SignedBv { width } => {
                self.mk_int_bv_sort(*width)
            }
            ExpressionType::FixedBv { width, .. } => {
                if self.int_encoding {
                    self.backend.mk_real_sort()
                } else {
                    self.backend.mk_bv_sort(*width)
                }
            }
            ExpressionType::FloatBv { exponent, fraction } => {
                if self.int_encoding {
                    self.backend.mk_real_sort()
                } else {
                    self.backend.mk_fpbv_sort(*exponent, *fraction)
                }
            }
            ExpressionType::Union { .. } => self.mk_int_bv_sort(typ.bit_width()),
            ExpressionType::Struct { .. } | ExpressionType::Pointer { .. } => {
                let api = self.tuple_api();
                api.mk_struct_sort(self, typ)
            }
            ExpressionType::Array { .. } => {
                let flat = self.flatten_array_type(typ);
                let element = flat.array_subtype().clone();
                let domain_width = self.array_domain_width(&flat);
                let range = if element.is_tuple_kind() {
                    let api = self.tuple_api();
                    api.mk_struct_sort(self, &element)
                } else if element.is_bool() && !self.array_api().supports_bools_in_arrays() {
                    self.backend.mk_bv_sort(1)
                } else {
                    self.lower_sort(&element)
                };
                self.mk_array_sort_for_domain(domain_width, &range)
            }
        };
        self.sort_cache.insert(typ.clone(), sort.clone());
        sort
    }

    /// Lowers an expression to a solver term, memoized per context level.
    #[logfn_inputs(TRACE)]
    pub fn lower_term(&mut self, expr: &ExprRef) -> TermRef {
        // Address identity depends on the renumbering state, which the memo
        // cache does not key on. The same goes for the pointer field
        // projections applied directly to an address.
        match &expr.kind {
            Expression::AddressOf { .. } => return self.lower_term_uncached(expr),
            Expression::PointerObject { pointer }
            | Expression::PointerOffset { pointer }
            | Expression::PointerCapability { pointer }
                if matches!(
                    skip_pointer_casts(pointer).kind,
                    Expression::AddressOf { .. }
                ) =>
            {
                return self.lower_term_uncached(expr);
            }
            _ => {}
        }
        {
            let cache = self.term_cache.lock().unwrap();
            if let Some((term, _)) = cache.get(expr) {
                return term.clone();
            }
        }
        let term = self.lower_term_uncached(expr);
        let mut cache = self.term_cache.lock().unwrap();
        cache
            .entry(expr.clone())
            .or_insert_with(|| (term.clone(), self.ctx_level));
        term
    }

    fn lower_term_uncached(&mut self, expr: &ExprRef) -> TermRef {
        use self::Expression::*;
        match &expr.kind {
            CompileTimeConstant(..) | Variable { .. } => self.convert_terminal(expr),

            ConstantStruct { .. } => {
                let api = self.tuple_api();
                api.tuple_create(self, expr)
            }
            ConstantUnion { value, .. } => self.convert_union_literal(expr, value.as_ref()),
            ConstantArray { .. } | ConstantArrayOf { .. } => self.array_create(expr),

            Add { left, right } | Sub { left, right }
                if left.typ.is_pointer() || right.typ.is_pointer() =>
            {
                self.convert_pointer_arith(expr)
            }
            Add { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                if self.int_encoding {
                    self.mk_add(&a, &b)
                } else if expr.typ.is_float_bv() {
                    self.unsupported_expr(expr)
                } else {
                    self.mk_bvadd(&a, &b)
                }
            }
            Sub { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                if self.int_encoding {
                    self.mk_sub(&a, &b)
                } else if expr.typ.is_float_bv() {
                    self.unsupported_expr(expr)
                } else {
                    self.mk_bvsub(&a, &b)
                }
            }
            Mul { left, right } => self.convert_mul(expr, left, right),
            Div { left, right } => self.convert_div(expr, left, right),
            Rem { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                if self.int_encoding {
                    self.mk_mod(&a, &b)
                } else if expr.typ.is_unsigned_bv() {
                    self.mk_bvumod(&a, &b)
                } else {
                    self.mk_bvsmod(&a, &b)
                }
            }
            Neg { operand } => {
                let a = self.lower_term(operand);
                if self.int_encoding {
                    self.mk_neg(&a)
                } else if expr.typ.is_float_bv() {
                    let api = self.fp_api();
                    api.mk_fpbv_neg(self, &a)
                } else {
                    self.mk_bvneg(&a)
                }
            }
            Abs { operand } => self.convert_abs(expr, operand),

            IeeeAdd { .. } | IeeeSub { .. } | IeeeMul { .. } | IeeeDiv { .. } | IeeeFma { .. } => {
                if self.int_encoding {
                    self.convert_ieee_arith_emulated(expr)
                } else {
                    self.convert_ieee_arith_exact(expr)
                }
            }
            IeeeSqrt {
                operand,
                rounding_mode,
            } => {
                if self.int_encoding {
                    // No abstract-mode rule for sqrt.
                    self.unsupported_expr(expr)
                } else {
                    let rm = self.convert_rounding_mode(rounding_mode);
                    let a = self.lower_term(operand);
                    let api = self.fp_api();
                    api.mk_fpbv_sqrt(self, &a, &rm)
                }
            }

            And { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_and(&a, &b)
            }
            Or { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_or(&a, &b)
            }
            Xor { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_xor(&a, &b)
            }
            Implies { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_implies(&a, &b)
            }
            LogicalNot { operand } => {
                let a = self.lower_term(operand);
                self.mk_not(&a)
            }

            BitAnd { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_bvand(&a, &b)
            }
            BitOr { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_bvor(&a, &b)
            }
            BitXor { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_bvxor(&a, &b)
            }
            BitNot { operand } => {
                let a = self.lower_term(operand);
                self.mk_bvnot(&a)
            }
            Shl { left, right } | LShr { left, right } | AShr { left, right } => {
                self.convert_shift(expr, left, right)
            }

            Equals { left, right } => self.convert_equality(expr, left, right, false),
            Ne { left, right } => self.convert_equality(expr, left, right, true),
            LessThan { .. } | LessOrEqual { .. } | GreaterThan { .. } | GreaterOrEqual { .. } => {
                self.convert_relation(expr)
            }

            ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => {
                let cond = self.lower_term(condition);
                let t = self.lower_term(consequent);
                let f = self.lower_term(alternate);
                t.ite(self, &t, &cond, &f)
            }

            Index { .. } => self.convert_array_index(expr),
            Store { .. } => self.convert_array_store(expr),
            MemberUpdate {
                source,
                member,
                value,
            } => self.convert_member_update(expr, source, member, value),
            Member { source, member } => self.convert_member(expr, source, member),

            AddressOf { .. } => self.convert_addr_of(expr),
            PointerObject { pointer } => {
                let stripped = skip_pointer_casts(pointer);
                let t = self.lower_term(&stripped);
                t.project(self, &t, 0)
            }
            PointerOffset { pointer } => {
                let stripped = skip_pointer_casts(pointer);
                let t = self.lower_term(&stripped);
                t.project(self, &t, 1)
            }
            PointerCapability { pointer } => {
                assert!(
                    self.options.capability_pointers,
                    "pointer capability field read without capability pointers enabled"
                );
                let stripped = skip_pointer_casts(pointer);
                let t = self.lower_term(&stripped);
                t.project(self, &t, 2)
            }
            SameObject { left, right } => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let obj_a = a.project(self, &a, 0);
                let obj_b = b.project(self, &b, 0);
                self.mk_eq(&obj_a, &obj_b)
            }

            Typecast { operand } => self.convert_typecast(expr, operand),
            Bitcast { operand } => self.convert_bitcast(expr, operand),
            Extract { from, upper, lower } => self.convert_extract(from, *upper, *lower),
            Concat { left, right } => {
                if self.int_encoding {
                    self.convert_concat_emulated(left, right)
                } else {
                    let a = self.lower_term(left);
                    let b = self.lower_term(right);
                    self.mk_concat(&a, &b)
                }
            }

            IsNan { operand } => self.convert_fp_class(operand, FpClass::Nan),
            IsInf { operand } => self.convert_fp_class(operand, FpClass::Inf),
            IsNormal { operand } => self.convert_fp_class(operand, FpClass::Normal),
            IsFinite { operand } => self.convert_fp_class(operand, FpClass::Finite),

            Forall { bound, body } => self.convert_quantifier(true, bound, body),
            Exists { bound, body } => self.convert_quantifier(false, bound, body),
        }
    }

    /// Lowers literals and variables.
    fn convert_terminal(&mut self, expr: &ExprRef) -> TermRef {
        match &expr.kind {
            Expression::Variable { name } => {
                if expr.typ.is_tuple_kind() {
                    let sort = self.lower_sort(&expr.typ);
                    let api = self.tuple_api();
                    api.mk_tuple_symbol(self, name, &sort)
                } else if expr.typ.is_array() {
                    let flat = self.flatten_array_type(&expr.typ);
                    if flat.array_subtype().is_tuple_kind() {
                        let api = self.tuple_api();
                        api.mk_tuple_array_symbol(self, expr)
                    } else {
                        let sort = self.lower_sort(&expr.typ);
                        let range = sort.range().clone();
                        let api = self.array_api();
                        api.mk_array_symbol(self, name, &sort, &range)
                    }
                } else {
                    let sort = self.lower_sort(&expr.typ);
                    self.mk_smt_symbol(name, &sort)
                }
            }
            Expression::CompileTimeConstant(c) => self.convert_literal(&expr.typ, c),
            _ => unreachable!("convert_terminal on non terminal {:?}", expr.kind),
        }
    }

    fn convert_literal(&mut self, typ: &TypeRef, c: &ConstantDomain) -> TermRef {
        match typ.as_ref() {
            ExpressionType::Bool => {
                let b = c.as_bool().unwrap_or(!c.is_zero());
                self.mk_smt_bool(b)
            }
            ExpressionType::UnsignedBv { width } | ExpressionType::SignedBv { width } => {
                let value = c
                    .as_int()
                    .cloned()
                    .unwrap_or_else(|| c.to_unsigned_bits(*width));
                if self.int_encoding {
                    self.mk_smt_int(&value)
                } else {
                    self.mk_smt_bv(&value, *width)
                }
            }
            ExpressionType::Union { .. } => {
                let width = typ.bit_width();
                let bits = c.to_unsigned_bits(width);
                if self.int_encoding {
                    self.mk_smt_int(&bits)
                } else {
                    self.mk_smt_bv(&bits, width)
                }
            }
            ExpressionType::FixedBv {
                width,
                integer_bits,
            } => {
                let bits = c.to_unsigned_bits(*width);
                if self.int_encoding {
                    let fraction_bits = width - integer_bits;
                    let value = BigRational::new(
                        bits_to_signed(&bits, *width),
                        BigInt::one() << fraction_bits,
                    );
                    self.mk_smt_real(&value)
                } else {
                    self.mk_smt_bv(&bits, *width)
                }
            }
            ExpressionType::FloatBv { exponent, fraction } => {
                if self.int_encoding {
                    let f = c.as_f64().unwrap_or(0.0);
                    if f.is_finite() {
                        let value = BigRational::from_float(f)
                            .expect("finite float always has a rational value");
                        self.mk_smt_real(&value)
                    } else {
                        warn!("no abstract encoding for non finite literal {:?}", c);
                        self.mk_smt_real(&BigRational::from_integer(BigInt::from(0)))
                    }
                } else {
                    let api = self.fp_api();
                    api.mk_smt_fpbv(self, c, *exponent, *fraction)
                }
            }
            ExpressionType::Pointer { .. } => {
                // The only pointer literal is null.
                assert!(c.is_zero(), "non null pointer literal {:?}", c);
                let def = self.pointer_struct.clone();
                let members = def.struct_fields().0.iter().map(expression::gen_zero).collect();
                let null = Expr::make(
                    typ.clone(),
                    Expression::ConstantStruct { members },
                );
                let api = self.tuple_api();
                api.tuple_create(self, &null)
            }
            _ => unreachable!("literal {:?} of type {:?}", c, typ),
        }
    }

    fn convert_union_literal(&mut self, expr: &ExprRef, value: Option<&ExprRef>) -> TermRef {
        let width = expr.typ.bit_width();
        let blob_type = expression_type::uint_type(width);
        let raw = match value {
            None => expression::gen_zero(&blob_type),
            Some(v) => {
                let member_width = v.typ.bit_width();
                let as_bits =
                    expression::bitcast(&expression_type::uint_type(member_width), v.clone());
                if member_width == width {
                    as_bits
                } else {
                    expression::typecast(&blob_type, as_bits)
                }
            }
        };
        self.lower_term(&raw)
    }

    fn convert_mul(&mut self, expr: &ExprRef, left: &ExprRef, right: &ExprRef) -> TermRef {
        if self.int_encoding {
            let a = self.lower_term(left);
            let b = self.lower_term(right);
            return self.mk_mul(&a, &b);
        }
        match expr.typ.as_ref() {
            ExpressionType::FixedBv {
                width,
                integer_bits,
            } => {
                let fraction_bits = width - integer_bits;
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let a = self.mk_sign_ext(&a, fraction_bits);
                let b = self.mk_sign_ext(&b, fraction_bits);
                let product = self.mk_bvmul(&a, &b);
                self.mk_extract_term(&product, fraction_bits + width - 1, fraction_bits)
            }
            ExpressionType::FloatBv { .. } => self.unsupported_expr(expr),
            _ => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                self.mk_bvmul(&a, &b)
            }
        }
    }

    fn convert_div(&mut self, expr: &ExprRef, left: &ExprRef, right: &ExprRef) -> TermRef {
        if self.int_encoding {
            let a = self.lower_term(left);
            let b = self.lower_term(right);
            return self.mk_div(&a, &b);
        }
        match expr.typ.as_ref() {
            ExpressionType::FixedBv {
                width,
                integer_bits,
            } => {
                let fraction_bits = width - integer_bits;
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                let zeros = self.mk_smt_bv(&BigInt::from(0), fraction_bits);
                let a = self.mk_concat(&a, &zeros);
                let b = self.mk_sign_ext(&b, fraction_bits);
                let quotient = self.mk_bvsdiv(&a, &b);
                self.mk_extract_term(&quotient, width - 1, 0)
            }
            ExpressionType::FloatBv { .. } => self.unsupported_expr(expr),
            _ => {
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                if expr.typ.is_unsigned_bv() {
                    self.mk_bvudiv(&a, &b)
                } else {
                    self.mk_bvsdiv(&a, &b)
                }
            }
        }
    }

    fn convert_abs(&mut self, expr: &ExprRef, operand: &ExprRef) -> TermRef {
        if expr.typ.is_unsigned_bv() {
            return self.lower_term(operand);
        }
        if !self.int_encoding && expr.typ.is_float_bv() {
            let a = self.lower_term(operand);
            let api = self.fp_api();
            return api.mk_fpbv_abs(self, &a);
        }
        let zero = expression::gen_zero(&operand.typ);
        let negated = expression::neg(&expr.typ, operand.clone());
        let rewritten = expression::conditional(
            &expr.typ,
            expression::less_than(operand.clone(), zero),
            negated,
            operand.clone(),
        );
        self.lower_term(&rewritten)
    }

    fn convert_ieee_arith_exact(&mut self, expr: &ExprRef) -> TermRef {
        use self::Expression::*;
        let api = self.fp_api();
        match &expr.kind {
            IeeeAdd {
                left,
                right,
                rounding_mode,
            } => {
                let rm = self.convert_rounding_mode(rounding_mode);
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                api.mk_fpbv_add(self, &a, &b, &rm)
            }
            IeeeSub {
                left,
                right,
                rounding_mode,
            } => {
                let rm = self.convert_rounding_mode(rounding_mode);
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                api.mk_fpbv_sub(self, &a, &b, &rm)
            }
            IeeeMul {
                left,
                right,
                rounding_mode,
            } => {
                let rm = self.convert_rounding_mode(rounding_mode);
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                api.mk_fpbv_mul(self, &a, &b, &rm)
            }
            IeeeDiv {
                left,
                right,
                rounding_mode,
            } => {
                let rm = self.convert_rounding_mode(rounding_mode);
                let a = self.lower_term(left);
                let b = self.lower_term(right);
                api.mk_fpbv_div(self, &a, &b, &rm)
            }
            IeeeFma {
                factor1,
                factor2,
                addend,
                rounding_mode,
            } => {
                let rm = self.convert_rounding_mode(rounding_mode);
                let a = self.lower_term(factor1);
                let b = self.lower_term(factor2);
                let c = self.lower_term(addend);
                api.mk_fpbv_fma(self, &a, &b, &c, &rm)
            }
            _ => unreachable!(),
        }
    }

    /// Lowers an explicitly rounded operator's rounding mode operand to a
    /// backend rounding mode term. A symbolic mode becomes a case split
    /// over the four modes.
    pub fn convert_rounding_mode(&mut self, rm_expr: &ExprRef) -> TermRef {
        let api = self.fp_api();
        if let Some(c) = rm_expr.as_constant() {
            let value = c
                .as_int()
                .and_then(|i| crate::constant_domain::bits_to_u64(i))
                .and_then(|i| RoundingMode::from_i64(i as i64))
                .unwrap_or_else(|| {
                    error!("unrecognized rounding mode literal {:?}", c);
                    panic!("unrecognized rounding mode literal");
                });
            return api.mk_fpbv_rm(self, value);
        }
        let symbolic = self.lower_term(rm_expr);
        let mut result = api.mk_fpbv_rm(self, RoundingMode::NearestEven);
        let width = rm_expr.typ.bit_width();
        for (tag, mode) in [
            (1u64, RoundingMode::TowardNegative),
            (2u64, RoundingMode::TowardPositive),
            (3u64, RoundingMode::TowardZero),
        ] {
            let literal = if self.int_encoding {
                self.mk_smt_int(&BigInt::from(tag))
            } else {
                self.mk_smt_bv(&BigInt::from(tag), width)
            };
            let is_mode = self.mk_eq(&symbolic, &literal);
            let mode_term = api.mk_fpbv_rm(self, mode);
            result = self.mk_ite(&is_mode, &mode_term, &result);
        }
        result
    }

    fn convert_shift(&mut self, expr: &ExprRef, left: &ExprRef, right: &ExprRef) -> TermRef {
        // The shift amount must have the width of the shifted value.
        let right = if left.typ.bit_width() == right.typ.bit_width() {
            right.clone()
        } else {
            expression::typecast(&left.typ, right.clone())
        };
        let a = self.lower_term(left);
        let b = self.lower_term(&right);
        if self.int_encoding {
            let powers = self
                .int_shift_powers
                .clone()
                .expect("post_init must run before lowering");
            let factor = self.mk_select(&powers, &b);
            return match &expr.kind {
                Expression::Shl { .. } => self.mk_mul(&a, &factor),
                Expression::LShr { .. } | Expression::AShr { .. } => self.mk_div(&a, &factor),
                _ => unreachable!(),
            };
        }
        match &expr.kind {
            Expression::Shl { .. } => self.mk_bvshl(&a, &b),
            Expression::AShr { .. } => self.mk_bvashr(&a, &b),
            Expression::LShr { .. } => self.mk_bvlshr(&a, &b),
            _ => unreachable!(),
        }
    }

    fn convert_equality(
        &mut self,
        _expr: &ExprRef,
        left: &ExprRef,
        right: &ExprRef,
        negated: bool,
    ) -> TermRef {
        let a = self.lower_term(left);
        let b = self.lower_term(right);
        let eq = if !self.int_encoding && left.typ.is_float_bv() {
            let api = self.fp_api();
            api.mk_fpbv_eq(self, &a, &b)
        } else {
            a.eq_term(self, &a, &b)
        };
        if negated {
            self.mk_not(&eq)
        } else {
            eq
        }
    }

    fn convert_relation(&mut self, expr: &ExprRef) -> TermRef {
        use self::Expression::*;
        let (left, right) = match &expr.kind {
            LessThan { left, right }
            | LessOrEqual { left, right }
            | GreaterThan { left, right }
            | GreaterOrEqual { left, right } => (left, right),
            _ => unreachable!(),
        };
        if left.typ.is_pointer() && right.typ.is_pointer() {
            return self.convert_ptr_cmp(expr, left, right);
        }
        let a = self.lower_term(left);
        let b = self.lower_term(right);
        if !self.int_encoding && left.typ.is_float_bv() {
            let api = self.fp_api();
            return match &expr.kind {
                LessThan { .. } => api.mk_fpbv_lt(self, &a, &b),
                LessOrEqual { .. } => api.mk_fpbv_le(self, &a, &b),
                GreaterThan { .. } => api.mk_fpbv_gt(self, &a, &b),
                GreaterOrEqual { .. } => api.mk_fpbv_ge(self, &a, &b),
                _ => unreachable!(),
            };
        }
        if self.int_encoding {
            return match &expr.kind {
                LessThan { .. } => self.mk_lt(&a, &b),
                LessOrEqual { .. } => self.mk_le(&a, &b),
                GreaterThan { .. } => self.mk_gt(&a, &b),
                GreaterOrEqual { .. } => self.mk_ge(&a, &b),
                _ => unreachable!(),
            };
        }
        let signed = left.typ.is_signed_bv() || left.typ.is_fixed_bv();
        match &expr.kind {
            LessThan { .. } => {
                if signed {
                    self.mk_bvslt(&a, &b)
                } else {
                    self.mk_bvult(&a, &b)
                }
            }
            LessOrEqual { .. } => {
                if signed {
                    self.mk_bvsle(&a, &b)
                } else {
                    self.mk_bvule(&a, &b)
                }
            }
            GreaterThan { .. } => {
                if signed {
                    self.mk_bvsgt(&a, &b)
                } else {
                    self.mk_bvugt(&a, &b)
                }
            }
            GreaterOrEqual { .. } => {
                if signed {
                    self.mk_bvsge(&a, &b)
                } else {
                    self.mk_bvuge(&a, &b)
                }
            }
            _ => unreachable!(),
        }
    }

    fn convert_member_update(
        &mut self,
        expr: &ExprRef,
        source: &ExprRef,
        member: &str,
        value: &ExprRef,
    ) -> TermRef {
        if expr.typ.is_union() {
            let width = expr.typ.bit_width();
            let member_width = value.typ.bit_width();
            let member_bits = expression::bitcast(
                &expression_type::uint_type(member_width),
                value.clone(),
            );
            let updated = if member_width == width {
                member_bits
            } else {
                // Unions put every member at offset zero: keep the blob's
                // high bits, replace the low ones.
                let blob = expression::bitcast(
                    &expression_type::uint_type(width),
                    source.clone(),
                );
                let high = expression::extract(
                    &expression_type::uint_type(width - member_width),
                    blob,
                    width - 1,
                    member_width,
                );
                expression::concat(&expression_type::uint_type(width), high, member_bits)
            };
            let recast = expression::bitcast(&expr.typ, updated);
            return self.lower_term(&recast);
        }
        let def = self.struct_def(&source.typ);
        let field = def.member_index(member);
        let src = self.lower_term(source);
        let val = self.lower_term(value);
        src.update(self, &src, &val, field as u64, None)
    }

    fn convert_member(&mut self, expr: &ExprRef, source: &ExprRef, member: &str) -> TermRef {
        if source.typ.is_union() {
            let width = source.typ.bit_width();
            let member_width = expr.typ.bit_width();
            let blob =
                expression::bitcast(&expression_type::uint_type(width), source.clone());
            let bits = expression::extract(
                &expression_type::uint_type(member_width),
                blob,
                member_width - 1,
                0,
            );
            let read = expression::bitcast(&expr.typ, bits);
            return self.lower_term(&read);
        }
        let def = self.struct_def(&source.typ);
        let field = def.member_index(member);
        let src = self.lower_term(source);
        src.project(self, &src, field as u32)
    }

    fn convert_typecast(&mut self, expr: &ExprRef, operand: &ExprRef) -> TermRef {
        let target = &expr.typ;
        let source = &operand.typ;
        if target == source || (target.is_pointer() && source.is_pointer()) {
            return self.lower_term(operand);
        }
        if target.is_bool() {
            let t = self.lower_term(operand);
            let zero = self.convert_literal(source, &ConstantDomain::Int(BigInt::from(0)));
            let eq = self.mk_eq(&t, &zero);
            return self.mk_not(&eq);
        }
        let int_like = |t: &TypeRef| t.is_signed_bv() || t.is_unsigned_bv() || t.is_union();
        if int_like(target) && source.is_bool() {
            let cond = self.lower_term(operand);
            let one = self.convert_literal(target, &ConstantDomain::Int(BigInt::from(1)));
            let zero = self.convert_literal(target, &ConstantDomain::Int(BigInt::from(0)));
            return self.mk_ite(&cond, &one, &zero);
        }
        if int_like(target) && int_like(source) {
            let t = self.lower_term(operand);
            if self.int_encoding {
                // Unbounded integers: a resize changes nothing.
                return t;
            }
            let source_width = source.bit_width();
            let target_width = target.bit_width();
            return if target_width == source_width {
                t
            } else if target_width > source_width {
                if source.is_signed_bv() {
                    self.mk_sign_ext(&t, target_width - source_width)
                } else {
                    self.mk_zero_ext(&t, target_width - source_width)
                }
            } else {
                self.mk_extract_term(&t, target_width - 1, 0)
            };
        }
        self.unsupported_expr(expr)
    }

    fn convert_bitcast(&mut self, expr: &ExprRef, operand: &ExprRef) -> TermRef {
        let t = self.lower_term(operand);
        let target_sort = self.lower_sort(&expr.typ);
        if t.sort() == target_sort {
            return t;
        }
        self.unsupported_expr(expr)
    }

    fn convert_extract(&mut self, from: &ExprRef, upper: u32, lower: u32) -> TermRef {
        let t = self.lower_term(from);
        let width = upper - lower + 1;
        if self.int_encoding {
            // (x / 2^lower) mod 2^width
            let shifted = if lower == 0 {
                t
            } else {
                let divisor = self.mk_smt_int(&(BigInt::one() << lower));
                self.mk_div(&t, &divisor)
            };
            let modulus = self.mk_smt_int(&(BigInt::one() << width));
            return self.mk_mod(&shifted, &modulus);
        }
        if lower == 0 && t.sort().data_width() == width {
            return t;
        }
        self.mk_extract_term(&t, upper, lower)
    }

    fn convert_concat_emulated(&mut self, left: &ExprRef, right: &ExprRef) -> TermRef {
        let right_width = right.typ.bit_width();
        let a = self.lower_term(left);
        let b = self.lower_term(right);
        let factor = self.mk_smt_int(&(BigInt::one() << right_width));
        let shifted = self.mk_mul(&a, &factor);
        self.mk_add(&shifted, &b)
    }

    fn convert_fp_class(&mut self, operand: &ExprRef, class: FpClass) -> TermRef {
        if self.int_encoding || !operand.typ.is_float_bv() {
            // Real-modelled and non-float values are always finite normals.
            return match class {
                FpClass::Nan | FpClass::Inf => self.mk_smt_bool(false),
                FpClass::Normal | FpClass::Finite => self.mk_smt_bool(true),
            };
        }
        let t = self.lower_term(operand);
        let api = self.fp_api();
        match class {
            FpClass::Nan => api.mk_fpbv_is_nan(self, &t),
            FpClass::Inf => api.mk_fpbv_is_inf(self, &t),
            FpClass::Normal => api.mk_fpbv_is_normal(self, &t),
            FpClass::Finite => {
                let is_inf = api.mk_fpbv_is_inf(self, &t);
                let is_nan = api.mk_fpbv_is_nan(self, &t);
                let non_finite = self.mk_or(&is_inf, &is_nan);
                self.mk_not(&non_finite)
            }
        }
    }

    fn convert_quantifier(&mut self, is_forall: bool, bound: &ExprRef, body: &ExprRef) -> TermRef {
        let name = bound
            .as_variable_name()
            .expect("quantifier bound operand must be a variable")
            .to_string();
        let n = self.quantifier_counter;
        self.quantifier_counter += 1;
        let fresh = expression::variable(&bound.typ, &format!("quantifier_bound!{}", n));
        let body = expression::substitute_variable(body, &name, &fresh);
        let bound_term = self.lower_term(&fresh);
        let body_term = self.lower_term(&body);
        self.mk_quantifier(is_forall, &[bound_term], &body_term)
    }

    /// Converts a single-bit vector to a boolean.
    pub fn make_bit_bool(&mut self, term: &TermRef) -> TermRef {
        if term.sort().is_bool() {
            return term.clone();
        }
        let one = self.mk_smt_bv(&BigInt::one(), 1);
        self.mk_eq(term, &one)
    }

    /// Converts a boolean to a single-bit vector.
    pub fn make_bool_bit(&mut self, term: &TermRef) -> TermRef {
        if !term.sort().is_bool() {
            return term.clone();
        }
        let one = self.mk_smt_bv(&BigInt::one(), 1);
        let zero = self.mk_smt_bv(&BigInt::from(0), 1);
        self.mk_ite(term, &one, &zero)
    }

    /// The conjunction of the given terms; true when empty.
    pub fn make_n_ary_and(&mut self, terms: &[TermRef]) -> TermRef {
        match terms.split_first() {
            None => self.mk_smt_bool(true),
            Some((first, rest)) => {
                let mut acc = first.clone();
                for t in rest {
                    acc = self.mk_and(&acc, t);
                }
                acc
            }
        }
    }

    /// The disjunction of the given terms; false when empty.
    pub fn make_n_ary_or(&mut self, terms: &[TermRef]) -> TermRef {
        match terms.split_first() {
            None => self.mk_smt_bool(false),
            Some((first, rest)) => {
                let mut acc = first.clone();
                for t in rest {
                    acc = self.mk_or(&acc, t);
                }
                acc
            }
        }
    }

    /// A name that no earlier call with the same tag has produced.
    pub fn mk_fresh_name(&mut self, tag: &str) -> String {
        let counter = self.fresh_counter.entry(tag.to_string()).or_insert(0);
        let name = format!("{}{}", tag, *counter);
        *counter += 1;
        name
    }

    /// A fresh unconstrained term of the given sort. Array sorts need the
    /// element sort for backends that track it.
    pub fn mk_fresh(&mut self, sort: &SortRef, tag: &str, subtype: Option<&SortRef>) -> TermRef {
        let name = self.mk_fresh_name(tag);
        match sort.as_ref() {
            Sort::Struct { .. } => {
                let api = self.tuple_api();
                api.tuple_fresh(self, sort, &name)
            }
            Sort::Array { .. } => {
                let range = subtype.expect("fresh array needs an element sort").clone();
                let api = self.array_api();
                api.mk_array_symbol(self, &name, sort, &range)
            }
            _ => self.mk_smt_symbol(&name, sort),
        }
    }

    /// Asserts a boolean expression in the current context level.
    #[logfn_inputs(TRACE)]
    pub fn assert_expr(&mut self, expr: &ExprRef) {
        let term = self.lower_term(expr);
        assert!(term.sort().is_bool(), "assertion of non boolean expression");
        self.backend.assert_term(&term);
    }

    /// Opens a new context level. Everything asserted or created after this
    /// point is discarded by the matching pop.
    pub fn push(&mut self) {
        self.ctx_level += 1;
        self.live_term_marks.push(self.live_terms.len());
        self.object_ids.push(self.object_ids.last().unwrap().clone());
        self.next_object_id
            .push(*self.next_object_id.last().unwrap());
        self.renumber_map.push(self.renumber_map.last().unwrap().clone());
        if let Some(api) = &self.tuple_api {
            api.push_ctx();
        }
        if let Some(api) = &self.array_api {
            api.push_ctx();
        }
        if let Some(api) = &self.fp_api {
            api.push_ctx();
        }
        self.backend.push_solver();
    }

    /// Closes the innermost context level: purges cache entries created in
    /// it, releases its terms, restores the pointer model snapshots and
    /// pops the backend.
    pub fn pop(&mut self) {
        assert!(self.ctx_level > 0, "pop without matching push");
        {
            let level = self.ctx_level;
            let mut cache = self.term_cache.lock().unwrap();
            cache.retain(|_, (_, l)| *l < level);
        }
        self.ctx_level -= 1;
        let mark = self.live_term_marks.pop().unwrap();
        self.live_terms.truncate(mark);
        self.object_ids.pop();
        self.next_object_id.pop();
        self.renumber_map.pop();
        if let Some(api) = &self.tuple_api {
            api.pop_ctx();
        }
        if let Some(api) = &self.array_api {
            api.pop_ctx();
        }
        if let Some(api) = &self.fp_api {
            api.pop_ctx();
        }
        self.backend.pop_solver();
    }

    /// Flushes deferred capability constraints and checks satisfiability.
    pub fn solve(&mut self) -> SmtResult {
        if let Some(api) = self.tuple_api.clone() {
            api.add_tuple_constraints_for_solving(self);
        }
        if let Some(api) = self.array_api.clone() {
            api.add_array_constraints_for_solving(self);
        }
        self.backend.check_sat()
    }

    // Model queries, delegated to the backend.

    pub(crate) fn model_bool(&mut self, term: &TermRef) -> bool {
        self.backend.model_bool(term)
    }

    pub(crate) fn model_bv_bits(&mut self, term: &TermRef) -> BigInt {
        self.backend.model_bv_bits(term)
    }

    pub(crate) fn model_int(&mut self, term: &TermRef) -> BigInt {
        self.backend.model_int(term)
    }

    pub(crate) fn model_rational(&mut self, term: &TermRef) -> Option<BigRational> {
        self.backend.model_rational(term)
    }

    pub fn model_fp_bits(&mut self, term: &TermRef) -> u64 {
        self.backend.model_fp_bits(term)
    }

    /// Handles an expression the current encoding has no rule for: either a
    /// fatal abort, or a zero literal substitution when the context was
    /// configured to degrade.
    pub(crate) fn unsupported_expr(&mut self, expr: &ExprRef) -> TermRef {
        if self.options.unsupported_exprs_as_zero {
            warn!(
                "no lowering rule for {:?} in this encoding; substituting zero",
                expr.kind
            );
            let zero = expression::gen_zero(&expr.typ);
            return self.lower_term(&zero);
        }
        error!("no lowering rule for {:?} in this encoding", expr.kind);
        panic!("no lowering rule for expression");
    }
}

enum FpClass {
    Nan,
    Inf,
    Normal,
    Finite,
}

/// Strips value-preserving pointer casts so that field projections see the
/// underlying pointer record.
fn skip_pointer_casts(expr: &ExprRef) -> ExprRef {
    let mut current = expr;
    loop {
        match &current.kind {
            Expression::Typecast { operand } | Expression::Bitcast { operand }
                if operand.typ.is_pointer() =>
            {
                current = operand;
            }
            _ => return current.clone(),
        }
    }
}
