// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! A self-contained reference backend. Terms are ground syntax trees; the
//! satisfiability check propagates bindings out of asserted equalities and
//! then evaluates every assertion under them. It decides exactly the
//! queries whose symbols it can bind that way and reports `Undefined` for
//! the rest, which is all the checker's replay and test harnesses need.

use crate::capabilities::{ArrayCapability, FpCapability, TupleCapability};
use crate::constant_domain::{bits_to_signed, truncate_unsigned, ConstantDomain};
use crate::expression::{Expr, ExprRef, Expression, RoundingMode};
use crate::expression_type::{ArraySize, TypeRef};
use crate::lowering::SmtContext;
use crate::options::Options;
use crate::smt_backend::{SmtBackend, SmtResult, SolverTerm, Sort, SortRef, TermRef};

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Builds a fully capable context over a fresh ground backend.
pub fn ground_context(options: Options) -> SmtContext {
    let mut ctx = SmtContext::new(Box::new(GroundBackend::new()), options);
    ctx.register_tuple_capability(Rc::new(GroundTupleCapability));
    ctx.register_array_capability(Rc::new(GroundArrayCapability));
    ctx.register_fp_capability(Rc::new(GroundFpCapability));
    ctx.post_init();
    ctx
}

#[derive(Clone, Debug)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Real2Int,
    Int2Real,
    IsInt,
    BvAdd,
    BvSub,
    BvMul,
    BvSDiv,
    BvUDiv,
    BvSMod,
    BvUMod,
    BvNeg,
    BvNot,
    BvAnd,
    BvOr,
    BvXor,
    BvShl,
    BvAShr,
    BvLShr,
    Concat,
    Not,
    And,
    Or,
    Xor,
    Implies,
    Lt,
    Le,
    BvUlt,
    BvUle,
    BvSlt,
    BvSle,
    Eq,
    Ite,
    Store,
    Select,
    Extract { high: u32, low: u32 },
    SignExt(u32),
    ZeroExt(u32),
    Project(u32),
    TupleUpdate(u32),
    Quantifier { forall: bool },
    FpAdd,
    FpSub,
    FpMul,
    FpDiv,
    FpFma,
    FpSqrt,
    FpEq,
    FpLt,
    FpLe,
    FpNeg,
    FpAbs,
    FpIsNan,
    FpIsInf,
    FpIsNormal,
}

#[derive(Clone, Debug)]
enum Node {
    BoolLit(bool),
    IntLit(BigInt),
    RealLit(BigRational),
    /// Unsigned bit pattern; the width lives in the sort.
    BvLit(BigInt),
    /// Bit pattern; the format lives in the sort.
    FpLit(u64),
    RmLit(RoundingMode),
    Symbol(String),
    Tuple(Vec<TermRef>),
    App { op: Op, args: Vec<TermRef> },
}

/// A term of the ground backend: a sort and a syntax node.
#[derive(Debug)]
pub struct GroundTerm {
    sort: SortRef,
    node: Node,
}

fn term(sort: SortRef, node: Node) -> TermRef {
    Rc::new(GroundTerm { sort, node })
}

fn g(t: &TermRef) -> &GroundTerm {
    t.as_any()
        .downcast_ref::<GroundTerm>()
        .expect("term from a different backend")
}

impl SolverTerm for GroundTerm {
    fn sort(&self) -> SortRef {
        self.sort.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Record equality is a per-field conjunction; everything else goes to
    /// the primitive equality.
    fn eq_term(&self, ctx: &mut SmtContext, this: &TermRef, other: &TermRef) -> TermRef {
        if let Sort::Struct { fields } = self.sort.as_ref() {
            let mut parts = Vec::with_capacity(fields.len());
            for i in 0..fields.len() {
                let a = this.project(ctx, this, i as u32);
                let b = other.project(ctx, other, i as u32);
                parts.push(a.eq_term(ctx, &a, &b));
            }
            return ctx.make_n_ary_and(&parts);
        }
        ctx.mk_eq(this, other)
    }

    fn update(
        &self,
        ctx: &mut SmtContext,
        this: &TermRef,
        value: &TermRef,
        index: u64,
        index_expr: Option<&ExprRef>,
    ) -> TermRef {
        match self.sort.as_ref() {
            Sort::Struct { .. } => {
                let field = index as u32;
                let node = match &self.node {
                    Node::Tuple(members) => {
                        let mut members = members.clone();
                        members[field as usize] = value.clone();
                        Node::Tuple(members)
                    }
                    _ => Node::App {
                        op: Op::TupleUpdate(field),
                        args: vec![this.clone(), value.clone()],
                    },
                };
                ctx.record_term(term(self.sort.clone(), node))
            }
            Sort::Array { .. } => {
                let index_term = match index_expr {
                    Some(e) => ctx.lower_term(e),
                    None => ctx.mk_domain_index(index, self.sort.domain_width()),
                };
                ctx.mk_store(this, &index_term, value)
            }
            _ => unreachable!("update of scalar term {:?}", self),
        }
    }

    fn project(&self, ctx: &mut SmtContext, this: &TermRef, field: u32) -> TermRef {
        let field_sort = match self.sort.as_ref() {
            Sort::Struct { fields } => fields[field as usize].clone(),
            _ => unreachable!("project of non record term {:?}", self),
        };
        match &self.node {
            Node::Tuple(members) => members[field as usize].clone(),
            _ => ctx.record_term(term(
                field_sort,
                Node::App {
                    op: Op::Project(field),
                    args: vec![this.clone()],
                },
            )),
        }
    }
}

/// A concrete value in a model.
#[derive(Clone, Debug, PartialEq)]
enum Value {
    Bool(bool),
    Int(BigInt),
    Real(BigRational),
    Bv(BigInt),
    Fp(u64),
    Rm(RoundingMode),
    Tuple(Vec<Value>),
    Array {
        elems: BTreeMap<BigInt, Value>,
        default: Option<Box<Value>>,
    },
}

impl Value {
    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<&BigInt> {
        match self {
            Value::Int(i) | Value::Bv(i) => Some(i),
            _ => None,
        }
    }
}

fn zero_of_sort(sort: &SortRef) -> Value {
    match sort.as_ref() {
        Sort::Bool => Value::Bool(false),
        Sort::Int => Value::Int(BigInt::from(0)),
        Sort::Real => Value::Real(BigRational::from_integer(BigInt::from(0))),
        Sort::BitVector { .. } => Value::Bv(BigInt::from(0)),
        Sort::FloatingPoint { .. } => Value::Fp(0),
        Sort::RoundingMode => Value::Rm(RoundingMode::NearestEven),
        Sort::Struct { fields } => Value::Tuple(fields.iter().map(zero_of_sort).collect()),
        Sort::Array { range, .. } => Value::Array {
            elems: BTreeMap::new(),
            default: Some(Box::new(zero_of_sort(range))),
        },
    }
}

#[derive(Debug)]
pub struct GroundBackend {
    assertions: Vec<TermRef>,
    frames: Vec<usize>,
    model: HashMap<String, Value>,
}

impl GroundBackend {
    pub fn new() -> GroundBackend {
        GroundBackend {
            assertions: Vec::new(),
            frames: Vec::new(),
            model: HashMap::new(),
        }
    }

    fn eval(&self, t: &TermRef, env: &HashMap<String, Value>) -> Option<Value> {
        let gt = g(t);
        match &gt.node {
            Node::BoolLit(b) => Some(Value::Bool(*b)),
            Node::IntLit(i) => Some(Value::Int(i.clone())),
            Node::RealLit(r) => Some(Value::Real(r.clone())),
            Node::BvLit(b) => Some(Value::Bv(b.clone())),
            Node::FpLit(bits) => Some(Value::Fp(*bits)),
            Node::RmLit(rm) => Some(Value::Rm(*rm)),
            Node::Symbol(name) => env.get(name).cloned(),
            Node::Tuple(members) => {
                let values = members
                    .iter()
                    .map(|m| self.eval(m, env))
                    .collect::<Option<Vec<_>>>()?;
                Some(Value::Tuple(values))
            }
            Node::App { op, args } => self.eval_app(&gt.sort, op, args, env),
        }
    }

    fn eval_app(
        &self,
        sort: &SortRef,
        op: &Op,
        args: &[TermRef],
        env: &HashMap<String, Value>,
    ) -> Option<Value> {
        match op {
            // Lazy forms first: conditionals take one branch, selects walk
            // the store chain, projections peel record structure.
            Op::Ite => {
                let cond = self.eval(&args[0], env)?.as_bool()?;
                if cond {
                    self.eval(&args[1], env)
                } else {
                    self.eval(&args[2], env)
                }
            }
            Op::Select => {
                let index = self.eval(&args[1], env)?;
                self.eval_select(&args[0], &index, env)
            }
            Op::Project(field) => self.eval_project(&args[0], *field, env),
            Op::Quantifier { .. } => None,

            Op::Store => {
                let base = self.eval(&args[0], env)?;
                let index = self.eval(&args[1], env)?;
                let value = self.eval(&args[2], env)?;
                let key = index.as_int()?.clone();
                match base {
                    Value::Array { mut elems, default } => {
                        elems.insert(key, value);
                        Some(Value::Array { elems, default })
                    }
                    _ => None,
                }
            }
            Op::TupleUpdate(field) => {
                let base = self.eval(&args[0], env)?;
                let value = self.eval(&args[1], env)?;
                match base {
                    Value::Tuple(mut members) => {
                        members[*field as usize] = value;
                        Some(Value::Tuple(members))
                    }
                    _ => None,
                }
            }

            Op::Not => Some(Value::Bool(!self.eval(&args[0], env)?.as_bool()?)),
            Op::And | Op::Or | Op::Xor | Op::Implies => {
                let a = self.eval(&args[0], env)?.as_bool()?;
                let b = self.eval(&args[1], env)?.as_bool()?;
                Some(Value::Bool(match op {
                    Op::And => a && b,
                    Op::Or => a || b,
                    Op::Xor => a != b,
                    _ => !a || b,
                }))
            }
            Op::Eq => {
                let a = self.eval(&args[0], env)?;
                let b = self.eval(&args[1], env)?;
                Some(Value::Bool(a == b))
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let a = self.eval(&args[0], env)?;
                let b = self.eval(&args[1], env)?;
                match (a, b) {
                    (Value::Int(a), Value::Int(b)) => {
                        if matches!(op, Op::Div | Op::Mod) && b.is_zero() {
                            return None;
                        }
                        Some(Value::Int(match op {
                            Op::Add => a + b,
                            Op::Sub => a - b,
                            Op::Mul => a * b,
                            Op::Div => a / b,
                            _ => a % b,
                        }))
                    }
                    (Value::Real(a), Value::Real(b)) => {
                        if matches!(op, Op::Div | Op::Mod) && b.is_zero() {
                            return None;
                        }
                        Some(Value::Real(match op {
                            Op::Add => a + b,
                            Op::Sub => a - b,
                            Op::Mul => a * b,
                            Op::Div => a / b,
                            _ => a % b,
                        }))
                    }
                    _ => None,
                }
            }
            Op::Neg => match self.eval(&args[0], env)? {
                Value::Int(i) => Some(Value::Int(-i)),
                Value::Real(r) => Some(Value::Real(-r)),
                _ => None,
            },
            Op::Real2Int => match self.eval(&args[0], env)? {
                Value::Real(r) => Some(Value::Int(r.floor().to_integer())),
                _ => None,
            },
            Op::Int2Real => match self.eval(&args[0], env)? {
                Value::Int(i) => Some(Value::Real(BigRational::from_integer(i))),
                _ => None,
            },
            Op::IsInt => match self.eval(&args[0], env)? {
                Value::Real(r) => Some(Value::Bool(r.is_integer())),
                _ => None,
            },
            Op::Lt | Op::Le => {
                let a = self.eval(&args[0], env)?;
                let b = self.eval(&args[1], env)?;
                let ordering = match (a, b) {
                    (Value::Int(a), Value::Int(b)) => a.cmp(&b),
                    (Value::Real(a), Value::Real(b)) => a.cmp(&b),
                    _ => return None,
                };
                Some(Value::Bool(if matches!(op, Op::Lt) {
                    ordering == std::cmp::Ordering::Less
                } else {
                    ordering != std::cmp::Ordering::Greater
                }))
            }

            Op::BvAdd | Op::BvSub | Op::BvMul | Op::BvUDiv | Op::BvUMod | Op::BvAnd | Op::BvOr
            | Op::BvXor => {
                let width = sort.data_width();
                let a = self.bv_operand(&args[0], env)?;
                let b = self.bv_operand(&args[1], env)?;
                if matches!(op, Op::BvUDiv | Op::BvUMod) && b.is_zero() {
                    return None;
                }
                let raw = match op {
                    Op::BvAdd => a + b,
                    Op::BvSub => a - b,
                    Op::BvMul => a * b,
                    Op::BvUDiv => a / b,
                    Op::BvUMod => a % b,
                    Op::BvAnd => a & b,
                    Op::BvOr => a | b,
                    _ => a ^ b,
                };
                Some(Value::Bv(truncate_unsigned(&raw, width)))
            }
            Op::BvSDiv | Op::BvSMod => {
                let width = sort.data_width();
                let a = bits_to_signed(&self.bv_operand(&args[0], env)?, width);
                let b = bits_to_signed(&self.bv_operand(&args[1], env)?, width);
                if b.is_zero() {
                    return None;
                }
                let raw = if matches!(op, Op::BvSDiv) { a / b } else { a % b };
                Some(Value::Bv(truncate_unsigned(&raw, width)))
            }
            Op::BvNeg => {
                let width = sort.data_width();
                let a = self.bv_operand(&args[0], env)?;
                Some(Value::Bv(truncate_unsigned(&-a, width)))
            }
            Op::BvNot => {
                let width = sort.data_width();
                let a = self.bv_operand(&args[0], env)?;
                let mask = (BigInt::one() << width) - BigInt::one();
                Some(Value::Bv(mask - a))
            }
            Op::BvShl | Op::BvLShr | Op::BvAShr => {
                let width = sort.data_width();
                let a = self.bv_operand(&args[0], env)?;
                let amount = self.bv_operand(&args[1], env)?;
                let shift = amount.to_u64().unwrap_or(u64::MAX);
                let raw = if shift >= u64::from(width) {
                    match op {
                        Op::BvAShr => {
                            let signed = bits_to_signed(&a, width);
                            if signed.is_negative() {
                                BigInt::from(-1)
                            } else {
                                BigInt::from(0)
                            }
                        }
                        _ => BigInt::from(0),
                    }
                } else {
                    match op {
                        Op::BvShl => a << shift,
                        Op::BvLShr => a >> shift,
                        _ => bits_to_signed(&a, width) >> shift,
                    }
                };
                Some(Value::Bv(truncate_unsigned(&raw, width)))
            }
            Op::Concat => {
                let right_width = g(&args[1]).sort.data_width();
                let a = self.bv_operand(&args[0], env)?;
                let b = self.bv_operand(&args[1], env)?;
                Some(Value::Bv((a << right_width) | b))
            }
            Op::Extract { high, low } => {
                let a = self.bv_operand(&args[0], env)?;
                let width = *high - *low + 1;
                Some(Value::Bv(truncate_unsigned(&(a >> *low), width)))
            }
            Op::SignExt(extra) => {
                let source_width = g(&args[0]).sort.data_width();
                let a = self.bv_operand(&args[0], env)?;
                let signed = bits_to_signed(&a, source_width);
                Some(Value::Bv(truncate_unsigned(&signed, source_width + *extra)))
            }
            Op::ZeroExt(_) => Some(Value::Bv(self.bv_operand(&args[0], env)?)),
            Op::BvUlt | Op::BvUle => {
                let a = self.bv_operand(&args[0], env)?;
                let b = self.bv_operand(&args[1], env)?;
                Some(Value::Bool(if matches!(op, Op::BvUlt) {
                    a < b
                } else {
                    a <= b
                }))
            }
            Op::BvSlt | Op::BvSle => {
                let width = g(&args[0]).sort.data_width();
                let a = bits_to_signed(&self.bv_operand(&args[0], env)?, width);
                let b = bits_to_signed(&self.bv_operand(&args[1], env)?, width);
                Some(Value::Bool(if matches!(op, Op::BvSlt) {
                    a < b
                } else {
                    a <= b
                }))
            }

            Op::FpAdd | Op::FpSub | Op::FpMul | Op::FpDiv => {
                // Host arithmetic; faithful for round-to-nearest-even.
                let width = sort.data_width();
                let a = self.fp_operand(&args[0], env)?;
                let b = self.fp_operand(&args[1], env)?;
                let result = if width == 32 {
                    let (a, b) = (a as f32, b as f32);
                    f64::from(match op {
                        Op::FpAdd => a + b,
                        Op::FpSub => a - b,
                        Op::FpMul => a * b,
                        _ => a / b,
                    })
                } else {
                    match op {
                        Op::FpAdd => a + b,
                        Op::FpSub => a - b,
                        Op::FpMul => a * b,
                        _ => a / b,
                    }
                };
                Some(Value::Fp(fp_encode(result, width)))
            }
            Op::FpFma => {
                let width = sort.data_width();
                let a = self.fp_operand(&args[0], env)?;
                let b = self.fp_operand(&args[1], env)?;
                let c = self.fp_operand(&args[2], env)?;
                let result = if width == 32 {
                    f64::from((a as f32).mul_add(b as f32, c as f32))
                } else {
                    a.mul_add(b, c)
                };
                Some(Value::Fp(fp_encode(result, width)))
            }
            Op::FpSqrt => {
                let width = sort.data_width();
                let a = self.fp_operand(&args[0], env)?;
                let result = if width == 32 {
                    f64::from((a as f32).sqrt())
                } else {
                    a.sqrt()
                };
                Some(Value::Fp(fp_encode(result, width)))
            }
            Op::FpNeg | Op::FpAbs => {
                let width = g(&args[0]).sort.data_width();
                let a = self.fp_operand(&args[0], env)?;
                let result = if matches!(op, Op::FpNeg) { -a } else { a.abs() };
                Some(Value::Fp(fp_encode(result, width)))
            }
            Op::FpEq | Op::FpLt | Op::FpLe => {
                let a = self.fp_operand(&args[0], env)?;
                let b = self.fp_operand(&args[1], env)?;
                Some(Value::Bool(match op {
                    Op::FpEq => a == b,
                    Op::FpLt => a < b,
                    _ => a <= b,
                }))
            }
            Op::FpIsNan => Some(Value::Bool(self.fp_operand(&args[0], env)?.is_nan())),
            Op::FpIsInf => Some(Value::Bool(self.fp_operand(&args[0], env)?.is_infinite())),
            Op::FpIsNormal => Some(Value::Bool(self.fp_operand(&args[0], env)?.is_normal())),
        }
    }

    fn bv_operand(&self, t: &TermRef, env: &HashMap<String, Value>) -> Option<BigInt> {
        match self.eval(t, env)? {
            Value::Bv(b) => Some(b),
            _ => None,
        }
    }

    fn fp_operand(&self, t: &TermRef, env: &HashMap<String, Value>) -> Option<f64> {
        let width = g(t).sort.data_width();
        match self.eval(t, env)? {
            Value::Fp(bits) => Some(fp_decode(bits, width)),
            _ => None,
        }
    }

    /// Reads through a store chain without materializing the base array.
    fn eval_select(
        &self,
        array: &TermRef,
        index: &Value,
        env: &HashMap<String, Value>,
    ) -> Option<Value> {
        let gt = g(array);
        match &gt.node {
            Node::App {
                op: Op::Store,
                args,
            } => {
                let written = self.eval(&args[1], env)?;
                if written == *index {
                    self.eval(&args[2], env)
                } else {
                    self.eval_select(&args[0], index, env)
                }
            }
            Node::App { op: Op::Ite, args } => {
                if self.eval(&args[0], env)?.as_bool()? {
                    self.eval_select(&args[1], index, env)
                } else {
                    self.eval_select(&args[2], index, env)
                }
            }
            _ => match self.eval(array, env)? {
                Value::Array { elems, default } => match elems.get(index.as_int()?) {
                    Some(v) => Some(v.clone()),
                    None => default.map(|d| *d),
                },
                _ => None,
            },
        }
    }

    fn eval_project(
        &self,
        record: &TermRef,
        field: u32,
        env: &HashMap<String, Value>,
    ) -> Option<Value> {
        let gt = g(record);
        match &gt.node {
            Node::Tuple(members) => self.eval(&members[field as usize], env),
            Node::App {
                op: Op::TupleUpdate(updated),
                args,
            } => {
                if *updated == field {
                    self.eval(&args[1], env)
                } else {
                    self.eval_project(&args[0], field, env)
                }
            }
            _ => match self.eval(record, env)? {
                Value::Tuple(members) => Some(members[field as usize].clone()),
                _ => None,
            },
        }
    }

    /// Flattens nested conjunctions into the individual conjuncts.
    fn collect_conjuncts(t: &TermRef, out: &mut Vec<TermRef>) {
        if let Node::App { op: Op::And, args } = &g(t).node {
            Self::collect_conjuncts(&args[0], out);
            Self::collect_conjuncts(&args[1], out);
        } else {
            out.push(t.clone());
        }
    }

    fn model_value(&self, t: &TermRef) -> Value {
        self.eval(t, &self.model)
            .unwrap_or_else(|| zero_of_sort(&t.sort()))
    }
}

impl Default for GroundBackend {
    fn default() -> Self {
        GroundBackend::new()
    }
}

impl SmtBackend for GroundBackend {
    fn name(&self) -> &str {
        "ground"
    }

    fn mk_bool_sort(&mut self) -> SortRef {
        Rc::new(Sort::Bool)
    }

    fn mk_int_sort(&mut self) -> SortRef {
        Rc::new(Sort::Int)
    }

    fn mk_real_sort(&mut self) -> SortRef {
        Rc::new(Sort::Real)
    }

    fn mk_bv_sort(&mut self, width: u32) -> SortRef {
        Rc::new(Sort::BitVector { width })
    }

    fn mk_fpbv_sort(&mut self, exponent: u32, fraction: u32) -> SortRef {
        Rc::new(Sort::FloatingPoint { exponent, fraction })
    }

    fn mk_fpbv_rm_sort(&mut self) -> SortRef {
        Rc::new(Sort::RoundingMode)
    }

    fn mk_array_sort(&mut self, domain: &SortRef, range: &SortRef) -> SortRef {
        Rc::new(Sort::Array {
            domain: domain.clone(),
            range: range.clone(),
        })
    }

    fn mk_add(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Add, g(a).sort.clone())
    }

    fn mk_sub(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Sub, g(a).sort.clone())
    }

    fn mk_mul(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Mul, g(a).sort.clone())
    }

    fn mk_div(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Div, g(a).sort.clone())
    }

    fn mk_mod(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Mod, g(a).sort.clone())
    }

    fn mk_neg(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::Neg, g(a).sort.clone())
    }

    fn mk_real2int(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::Real2Int, Rc::new(Sort::Int))
    }

    fn mk_int2real(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::Int2Real, Rc::new(Sort::Real))
    }

    fn mk_isint(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::IsInt, Rc::new(Sort::Bool))
    }

    fn mk_bvadd(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvAdd, g(a).sort.clone())
    }

    fn mk_bvsub(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvSub, g(a).sort.clone())
    }

    fn mk_bvmul(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvMul, g(a).sort.clone())
    }

    fn mk_bvsdiv(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvSDiv, g(a).sort.clone())
    }

    fn mk_bvudiv(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvUDiv, g(a).sort.clone())
    }

    fn mk_bvsmod(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvSMod, g(a).sort.clone())
    }

    fn mk_bvumod(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvUMod, g(a).sort.clone())
    }

    fn mk_bvneg(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::BvNeg, g(a).sort.clone())
    }

    fn mk_bvnot(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::BvNot, g(a).sort.clone())
    }

    fn mk_bvand(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvAnd, g(a).sort.clone())
    }

    fn mk_bvor(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvOr, g(a).sort.clone())
    }

    fn mk_bvxor(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvXor, g(a).sort.clone())
    }

    fn mk_bvshl(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvShl, g(a).sort.clone())
    }

    fn mk_bvashr(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvAShr, g(a).sort.clone())
    }

    fn mk_bvlshr(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvLShr, g(a).sort.clone())
    }

    fn mk_concat(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        let width = g(a).sort.data_width() + g(b).sort.data_width();
        binary(a, b, Op::Concat, Rc::new(Sort::BitVector { width }))
    }

    fn mk_not(&mut self, a: &TermRef) -> TermRef {
        unary(a, Op::Not, Rc::new(Sort::Bool))
    }

    fn mk_and(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::And, Rc::new(Sort::Bool))
    }

    fn mk_or(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Or, Rc::new(Sort::Bool))
    }

    fn mk_xor(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Xor, Rc::new(Sort::Bool))
    }

    fn mk_implies(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Implies, Rc::new(Sort::Bool))
    }

    fn mk_lt(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Lt, Rc::new(Sort::Bool))
    }

    fn mk_le(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Le, Rc::new(Sort::Bool))
    }

    fn mk_bvult(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvUlt, Rc::new(Sort::Bool))
    }

    fn mk_bvule(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvUle, Rc::new(Sort::Bool))
    }

    fn mk_bvslt(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvSlt, Rc::new(Sort::Bool))
    }

    fn mk_bvsle(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::BvSle, Rc::new(Sort::Bool))
    }

    fn mk_eq(&mut self, a: &TermRef, b: &TermRef) -> TermRef {
        binary(a, b, Op::Eq, Rc::new(Sort::Bool))
    }

    fn mk_ite(&mut self, cond: &TermRef, t: &TermRef, f: &TermRef) -> TermRef {
        term(
            g(t).sort.clone(),
            Node::App {
                op: Op::Ite,
                args: vec![cond.clone(), t.clone(), f.clone()],
            },
        )
    }

    fn mk_store(&mut self, array: &TermRef, index: &TermRef, value: &TermRef) -> TermRef {
        term(
            g(array).sort.clone(),
            Node::App {
                op: Op::Store,
                args: vec![array.clone(), index.clone(), value.clone()],
            },
        )
    }

    fn mk_select(&mut self, array: &TermRef, index: &TermRef) -> TermRef {
        let range = g(array).sort.range().clone();
        term(
            range,
            Node::App {
                op: Op::Select,
                args: vec![array.clone(), index.clone()],
            },
        )
    }

    fn mk_extract(&mut self, a: &TermRef, high: u32, low: u32) -> TermRef {
        term(
            Rc::new(Sort::BitVector {
                width: high - low + 1,
            }),
            Node::App {
                op: Op::Extract { high, low },
                args: vec![a.clone()],
            },
        )
    }

    fn mk_sign_ext(&mut self, a: &TermRef, extra_bits: u32) -> TermRef {
        let width = g(a).sort.data_width() + extra_bits;
        term(
            Rc::new(Sort::BitVector { width }),
            Node::App {
                op: Op::SignExt(extra_bits),
                args: vec![a.clone()],
            },
        )
    }

    fn mk_zero_ext(&mut self, a: &TermRef, extra_bits: u32) -> TermRef {
        let width = g(a).sort.data_width() + extra_bits;
        term(
            Rc::new(Sort::BitVector { width }),
            Node::App {
                op: Op::ZeroExt(extra_bits),
                args: vec![a.clone()],
            },
        )
    }

    fn mk_quantifier(&mut self, is_forall: bool, bounds: &[TermRef], body: &TermRef) -> TermRef {
        let mut args = bounds.to_vec();
        args.push(body.clone());
        term(
            Rc::new(Sort::Bool),
            Node::App {
                op: Op::Quantifier { forall: is_forall },
                args,
            },
        )
    }

    fn mk_smt_int(&mut self, value: &BigInt) -> TermRef {
        term(Rc::new(Sort::Int), Node::IntLit(value.clone()))
    }

    fn mk_smt_real(&mut self, value: &BigRational) -> TermRef {
        term(Rc::new(Sort::Real), Node::RealLit(value.clone()))
    }

    fn mk_smt_bv(&mut self, value: &BigInt, width: u32) -> TermRef {
        term(
            Rc::new(Sort::BitVector { width }),
            Node::BvLit(truncate_unsigned(value, width)),
        )
    }

    fn mk_smt_bool(&mut self, value: bool) -> TermRef {
        term(Rc::new(Sort::Bool), Node::BoolLit(value))
    }

    fn mk_smt_symbol(&mut self, name: &str, sort: &SortRef) -> TermRef {
        term(sort.clone(), Node::Symbol(name.to_string()))
    }

    fn assert_term(&mut self, t: &TermRef) {
        self.assertions.push(t.clone());
    }

    fn push_solver(&mut self) {
        self.frames.push(self.assertions.len());
    }

    fn pop_solver(&mut self) {
        let mark = self.frames.pop().expect("pop without matching push");
        self.assertions.truncate(mark);
    }

    /// Binds symbols by propagating asserted equalities to a fixed point,
    /// then evaluates every assertion under the bindings.
    fn check_sat(&mut self) -> SmtResult {
        let mut conjuncts = Vec::new();
        for a in &self.assertions {
            Self::collect_conjuncts(a, &mut conjuncts);
        }
        let mut env: HashMap<String, Value> = HashMap::new();
        loop {
            let mut progress = false;
            for c in &conjuncts {
                match &g(c).node {
                    Node::Symbol(name) => {
                        if !env.contains_key(name) {
                            env.insert(name.clone(), Value::Bool(true));
                            progress = true;
                        }
                    }
                    Node::App { op: Op::Not, args } => {
                        if let Node::Symbol(name) = &g(&args[0]).node {
                            if !env.contains_key(name) {
                                env.insert(name.clone(), Value::Bool(false));
                                progress = true;
                            }
                        }
                    }
                    Node::App { op: Op::Eq, args } => {
                        for (sym, val) in [(0usize, 1usize), (1, 0)] {
                            if let Node::Symbol(name) = &g(&args[sym]).node {
                                if !env.contains_key(name) {
                                    if let Some(v) = self.eval(&args[val], &env) {
                                        env.insert(name.clone(), v);
                                        progress = true;
                                    }
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            if !progress {
                break;
            }
        }
        let mut verdict = SmtResult::Satisfiable;
        for c in &conjuncts {
            match self.eval(c, &env) {
                Some(Value::Bool(true)) => {}
                Some(Value::Bool(false)) => {
                    self.model = env;
                    return SmtResult::Unsatisfiable;
                }
                _ => verdict = SmtResult::Undefined,
            }
        }
        self.model = env;
        verdict
    }

    fn model_bool(&mut self, t: &TermRef) -> bool {
        match self.model_value(t) {
            Value::Bool(b) => b,
            _ => false,
        }
    }

    fn model_bv_bits(&mut self, t: &TermRef) -> BigInt {
        match self.model_value(t) {
            Value::Bv(b) => b,
            Value::Int(i) => i,
            _ => BigInt::from(0),
        }
    }

    fn model_int(&mut self, t: &TermRef) -> BigInt {
        match self.model_value(t) {
            Value::Int(i) | Value::Bv(i) => i,
            _ => BigInt::from(0),
        }
    }

    fn model_rational(&mut self, t: &TermRef) -> Option<BigRational> {
        match self.model_value(t) {
            Value::Real(r) => Some(r),
            Value::Int(i) => Some(BigRational::from_integer(i)),
            _ => None,
        }
    }

    fn model_fp_bits(&mut self, t: &TermRef) -> u64 {
        match self.model_value(t) {
            Value::Fp(bits) => bits,
            _ => 0,
        }
    }
}

fn binary(a: &TermRef, b: &TermRef, op: Op, sort: SortRef) -> TermRef {
    term(
        sort,
        Node::App {
            op,
            args: vec![a.clone(), b.clone()],
        },
    )
}

fn unary(a: &TermRef, op: Op, sort: SortRef) -> TermRef {
    term(
        sort,
        Node::App {
            op,
            args: vec![a.clone()],
        },
    )
}

fn fp_decode(bits: u64, width: u32) -> f64 {
    if width == 32 {
        f64::from(f32::from_bits(bits as u32))
    } else {
        f64::from_bits(bits)
    }
}

fn fp_encode(value: f64, width: u32) -> u64 {
    if width == 32 {
        u64::from((value as f32).to_bits())
    } else {
        value.to_bits()
    }
}

/// Tuple support: record terms are node-level tuples of field terms, so
/// projection and equality decompose structurally.
#[derive(Debug)]
pub struct GroundTupleCapability;

impl GroundTupleCapability {
    /// A record symbol is a tuple of per-field symbols, recursively for
    /// record fields, so that field equalities reach nameable leaves.
    fn named_record(&self, ctx: &mut SmtContext, name: &str, sort: &SortRef) -> TermRef {
        let fields = match sort.as_ref() {
            Sort::Struct { fields } => fields.clone(),
            _ => unreachable!("record symbol of non struct sort {:?}", sort),
        };
        let members = fields
            .iter()
            .enumerate()
            .map(|(i, field_sort)| {
                let field_name = format!("{}.{}", name, i);
                match field_sort.as_ref() {
                    Sort::Struct { .. } => self.named_record(ctx, &field_name, field_sort),
                    _ => ctx.record_term(term(
                        field_sort.clone(),
                        Node::Symbol(field_name),
                    )),
                }
            })
            .collect();
        ctx.record_term(term(sort.clone(), Node::Tuple(members)))
    }
}

impl TupleCapability for GroundTupleCapability {
    fn mk_struct_sort(&self, ctx: &mut SmtContext, typ: &TypeRef) -> SortRef {
        let def = ctx.struct_def(typ);
        let fields = def
            .struct_fields()
            .0
            .iter()
            .map(|member| ctx.lower_sort(member))
            .collect();
        Rc::new(Sort::Struct { fields })
    }

    fn tuple_create(&self, ctx: &mut SmtContext, expr: &ExprRef) -> TermRef {
        let members = match &expr.kind {
            Expression::ConstantStruct { members } => members.clone(),
            _ => unreachable!("tuple_create on {:?}", expr.kind),
        };
        let terms: Vec<TermRef> = members.iter().map(|m| ctx.lower_term(m)).collect();
        let sort = ctx.lower_sort(&expr.typ);
        ctx.record_term(term(sort, Node::Tuple(terms)))
    }

    fn tuple_fresh(&self, ctx: &mut SmtContext, sort: &SortRef, name: &str) -> TermRef {
        self.named_record(ctx, name, sort)
    }

    fn mk_tuple_symbol(&self, ctx: &mut SmtContext, name: &str, sort: &SortRef) -> TermRef {
        self.named_record(ctx, name, sort)
    }

    fn mk_tuple_array_symbol(&self, ctx: &mut SmtContext, expr: &ExprRef) -> TermRef {
        let name = expr
            .as_variable_name()
            .expect("tuple array symbol must be a variable")
            .to_string();
        let sort = ctx.lower_sort(&expr.typ);
        ctx.record_term(term(sort, Node::Symbol(name)))
    }

    fn tuple_array_create(
        &self,
        ctx: &mut SmtContext,
        array_type: &TypeRef,
        elements: &[TermRef],
        is_array_of: bool,
        domain: &SortRef,
    ) -> TermRef {
        let range = elements[0].sort();
        let sort = Rc::new(Sort::Array {
            domain: domain.clone(),
            range,
        });
        let name = ctx.mk_fresh_name("tuple_array::");
        let mut array = ctx.record_term(term(sort.clone(), Node::Symbol(name)));
        let domain_width = sort.domain_width();
        if is_array_of {
            let count = match array_type.array_size() {
                ArraySize::Constant(n) => *n,
                _ => 1u64 << domain_width.min(10),
            };
            for i in 0..count {
                let index = ctx.mk_domain_index(i, domain_width);
                array = ctx.mk_store(&array, &index, &elements[0]);
            }
        } else {
            for (i, element) in elements.iter().enumerate() {
                let index = ctx.mk_domain_index(i as u64, domain_width);
                array = ctx.mk_store(&array, &index, element);
            }
        }
        array
    }

    fn tuple_get(&self, ctx: &mut SmtContext, typ: &TypeRef, t: &TermRef) -> ExprRef {
        let def = ctx.struct_def(typ);
        let (member_types, _) = def.struct_fields();
        let member_types = member_types.to_vec();
        let mut members = Vec::with_capacity(member_types.len());
        for (i, member_type) in member_types.iter().enumerate() {
            let field = t.project(ctx, t, i as u32);
            let value = if member_type.is_tuple_kind() {
                self.tuple_get(ctx, member_type, &field)
            } else {
                ctx.get_by_ast(member_type, &field)
            };
            members.push(value);
        }
        Expr::make(typ.clone(), Expression::ConstantStruct { members })
    }

    fn tuple_get_array_elem(
        &self,
        ctx: &mut SmtContext,
        array: &TermRef,
        index: u64,
        subtype: &TypeRef,
    ) -> ExprRef {
        let domain_width = array.sort().domain_width();
        let index_term = ctx.mk_domain_index(index, domain_width);
        let element = ctx.mk_select(array, &index_term);
        self.tuple_get(ctx, subtype, &element)
    }
}

/// Array support: the backend has a native array theory, so symbols and
/// model reads are direct.
#[derive(Debug)]
pub struct GroundArrayCapability;

impl ArrayCapability for GroundArrayCapability {
    fn mk_array_symbol(
        &self,
        ctx: &mut SmtContext,
        name: &str,
        sort: &SortRef,
        _subtype: &SortRef,
    ) -> TermRef {
        ctx.record_term(term(sort.clone(), Node::Symbol(name.to_string())))
    }

    fn get_array_elem(
        &self,
        ctx: &mut SmtContext,
        array: &TermRef,
        index: u64,
        subtype: &TypeRef,
    ) -> ExprRef {
        let domain_width = array.sort().domain_width();
        let index_term = ctx.mk_domain_index(index, domain_width);
        let element = ctx.mk_select(array, &index_term);
        ctx.get_by_ast(subtype, &element)
    }
}

/// Floating point support over host arithmetic; faithful for the
/// round-to-nearest-even mode.
#[derive(Debug)]
pub struct GroundFpCapability;

impl FpCapability for GroundFpCapability {
    fn mk_smt_fpbv(
        &self,
        ctx: &mut SmtContext,
        value: &ConstantDomain,
        exponent: u32,
        fraction: u32,
    ) -> TermRef {
        let width = exponent + fraction + 1;
        let bits = match value {
            ConstantDomain::F32(bits) if width == 32 => u64::from(*bits),
            ConstantDomain::F64(bits) if width == 64 => *bits,
            _ => fp_encode(value.as_f64().unwrap_or(0.0), width),
        };
        let sort = Rc::new(Sort::FloatingPoint { exponent, fraction });
        ctx.record_term(term(sort, Node::FpLit(bits)))
    }

    fn mk_fpbv_rm(&self, ctx: &mut SmtContext, rm: RoundingMode) -> TermRef {
        ctx.record_term(term(Rc::new(Sort::RoundingMode), Node::RmLit(rm)))
    }

    fn mk_fpbv_add(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef, rm: &TermRef) -> TermRef {
        ctx.record_term(term(
            a.sort(),
            Node::App {
                op: Op::FpAdd,
                args: vec![a.clone(), b.clone(), rm.clone()],
            },
        ))
    }

    fn mk_fpbv_sub(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef, rm: &TermRef) -> TermRef {
        ctx.record_term(term(
            a.sort(),
            Node::App {
                op: Op::FpSub,
                args: vec![a.clone(), b.clone(), rm.clone()],
            },
        ))
    }

    fn mk_fpbv_mul(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef, rm: &TermRef) -> TermRef {
        ctx.record_term(term(
            a.sort(),
            Node::App {
                op: Op::FpMul,
                args: vec![a.clone(), b.clone(), rm.clone()],
            },
        ))
    }

    fn mk_fpbv_div(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef, rm: &TermRef) -> TermRef {
        ctx.record_term(term(
            a.sort(),
            Node::App {
                op: Op::FpDiv,
                args: vec![a.clone(), b.clone(), rm.clone()],
            },
        ))
    }

    fn mk_fpbv_fma(
        &self,
        ctx: &mut SmtContext,
        a: &TermRef,
        b: &TermRef,
        c: &TermRef,
        rm: &TermRef,
    ) -> TermRef {
        ctx.record_term(term(
            a.sort(),
            Node::App {
                op: Op::FpFma,
                args: vec![a.clone(), b.clone(), c.clone(), rm.clone()],
            },
        ))
    }

    fn mk_fpbv_sqrt(&self, ctx: &mut SmtContext, a: &TermRef, rm: &TermRef) -> TermRef {
        ctx.record_term(term(
            a.sort(),
            Node::App {
                op: Op::FpSqrt,
                args: vec![a.clone(), rm.clone()],
            },
        ))
    }

    fn mk_fpbv_eq(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef) -> TermRef {
        ctx.record_term(binary(a, b, Op::FpEq, Rc::new(Sort::Bool)))
    }

    fn mk_fpbv_lt(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef) -> TermRef {
        ctx.record_term(binary(a, b, Op::FpLt, Rc::new(Sort::Bool)))
    }

    fn mk_fpbv_le(&self, ctx: &mut SmtContext, a: &TermRef, b: &TermRef) -> TermRef {
        ctx.record_term(binary(a, b, Op::FpLe, Rc::new(Sort::Bool)))
    }

    fn mk_fpbv_neg(&self, ctx: &mut SmtContext, a: &TermRef) -> TermRef {
        ctx.record_term(unary(a, Op::FpNeg, a.sort()))
    }

    fn mk_fpbv_abs(&self, ctx: &mut SmtContext, a: &TermRef) -> TermRef {
        ctx.record_term(unary(a, Op::FpAbs, a.sort()))
    }

    fn mk_fpbv_is_nan(&self, ctx: &mut SmtContext, a: &TermRef) -> TermRef {
        ctx.record_term(unary(a, Op::FpIsNan, Rc::new(Sort::Bool)))
    }

    fn mk_fpbv_is_inf(&self, ctx: &mut SmtContext, a: &TermRef) -> TermRef {
        ctx.record_term(unary(a, Op::FpIsInf, Rc::new(Sort::Bool)))
    }

    fn mk_fpbv_is_normal(&self, ctx: &mut SmtContext, a: &TermRef) -> TermRef {
        ctx.record_term(unary(a, Op::FpIsNormal, Rc::new(Sort::Bool)))
    }

    fn get_fpbv(
        &self,
        ctx: &mut SmtContext,
        t: &TermRef,
        exponent: u32,
        fraction: u32,
    ) -> ConstantDomain {
        let bits = ctx.model_fp_bits(t);
        if exponent + fraction + 1 == 32 {
            ConstantDomain::F32(bits as u32)
        } else {
            ConstantDomain::F64(bits)
        }
    }
}
