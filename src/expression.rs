// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::expression_type::{ArraySize, ExpressionType, TypeRef};

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub type ExprRef = Rc<Expr>;

/// A typed node of the intermediate expression tree handed to the lowering
/// engine. Nodes are immutable and shared; structural equality and hashing
/// make them usable as memoization keys.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Expr {
    pub typ: TypeRef,
    pub kind: Expression,
}

/// The rounding mode applied by the explicitly rounded floating point
/// operators. Encoded as a small integer when it appears as a constant
/// operand.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RoundingMode {
    NearestEven,
    TowardNegative,
    TowardPositive,
    TowardZero,
}

impl RoundingMode {
    pub fn from_i64(value: i64) -> Option<RoundingMode> {
        match value {
            0 => Some(RoundingMode::NearestEven),
            1 => Some(RoundingMode::TowardNegative),
            2 => Some(RoundingMode::TowardPositive),
            3 => Some(RoundingMode::TowardZero),
            _ => None,
        }
    }
}

/// The operation performed by an expression node. Operand types are
/// constrained by the IR builder, not re-checked here; the lowering asserts
/// the few invariants it relies on.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Expression {
    /// A literal value.
    CompileTimeConstant(ConstantDomain),
    /// A free variable, identified by name. Address-taken variables get
    /// their object identity from the pointer model.
    Variable { name: Rc<String> },
    /// An aggregate literal, one operand per member in declaration order.
    ConstantStruct { members: Vec<ExprRef> },
    /// A union literal initializing at most one member.
    ConstantUnion {
        init_field: Option<String>,
        value: Option<ExprRef>,
    },
    /// An array literal with one operand per element.
    ConstantArray { members: Vec<ExprRef> },
    /// An array literal with every element equal to the initializer.
    ConstantArrayOf { initializer: ExprRef },

    Add { left: ExprRef, right: ExprRef },
    Sub { left: ExprRef, right: ExprRef },
    Mul { left: ExprRef, right: ExprRef },
    Div { left: ExprRef, right: ExprRef },
    Rem { left: ExprRef, right: ExprRef },
    Neg { operand: ExprRef },
    Abs { operand: ExprRef },

    /// Explicitly rounded IEEE floating point operations. The rounding mode
    /// is itself an expression; a symbolic mode lowers to a case split in
    /// exact encoding.
    IeeeAdd {
        left: ExprRef,
        right: ExprRef,
        rounding_mode: ExprRef,
    },
    IeeeSub {
        left: ExprRef,
        right: ExprRef,
        rounding_mode: ExprRef,
    },
    IeeeMul {
        left: ExprRef,
        right: ExprRef,
        rounding_mode: ExprRef,
    },
    IeeeDiv {
        left: ExprRef,
        right: ExprRef,
        rounding_mode: ExprRef,
    },
    IeeeFma {
        factor1: ExprRef,
        factor2: ExprRef,
        addend: ExprRef,
        rounding_mode: ExprRef,
    },
    IeeeSqrt {
        operand: ExprRef,
        rounding_mode: ExprRef,
    },

    And { left: ExprRef, right: ExprRef },
    Or { left: ExprRef, right: ExprRef },
    Xor { left: ExprRef, right: ExprRef },
    Implies { left: ExprRef, right: ExprRef },
    LogicalNot { operand: ExprRef },

    BitAnd { left: ExprRef, right: ExprRef },
    BitOr { left: ExprRef, right: ExprRef },
    BitXor { left: ExprRef, right: ExprRef },
    BitNot { operand: ExprRef },
    Shl { left: ExprRef, right: ExprRef },
    LShr { left: ExprRef, right: ExprRef },
    AShr { left: ExprRef, right: ExprRef },

    Equals { left: ExprRef, right: ExprRef },
    Ne { left: ExprRef, right: ExprRef },
    LessThan { left: ExprRef, right: ExprRef },
    LessOrEqual { left: ExprRef, right: ExprRef },
    GreaterThan { left: ExprRef, right: ExprRef },
    GreaterOrEqual { left: ExprRef, right: ExprRef },

    ConditionalExpression {
        condition: ExprRef,
        consequent: ExprRef,
        alternate: ExprRef,
    },

    /// Reads an array element.
    Index { source: ExprRef, index: ExprRef },
    /// A functional array update.
    Store {
        source: ExprRef,
        index: ExprRef,
        value: ExprRef,
    },
    /// A functional struct or union member update.
    MemberUpdate {
        source: ExprRef,
        member: String,
        value: ExprRef,
    },
    /// Reads a struct or union member.
    Member { source: ExprRef, member: String },

    AddressOf { operand: ExprRef },
    PointerObject { pointer: ExprRef },
    PointerOffset { pointer: ExprRef },
    PointerCapability { pointer: ExprRef },
    SameObject { left: ExprRef, right: ExprRef },

    /// A value-converting cast to the node's own type.
    Typecast { operand: ExprRef },
    /// A bit-reinterpreting cast to the node's own type.
    Bitcast { operand: ExprRef },
    Extract {
        from: ExprRef,
        upper: u32,
        lower: u32,
    },
    Concat { left: ExprRef, right: ExprRef },

    IsNan { operand: ExprRef },
    IsInf { operand: ExprRef },
    IsNormal { operand: ExprRef },
    IsFinite { operand: ExprRef },

    Forall { bound: ExprRef, body: ExprRef },
    Exists { bound: ExprRef, body: ExprRef },
}

impl Expr {
    pub fn make(typ: TypeRef, kind: Expression) -> ExprRef {
        Rc::new(Expr { typ, kind })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, Expression::CompileTimeConstant(..))
    }

    pub fn as_constant(&self) -> Option<&ConstantDomain> {
        match &self.kind {
            Expression::CompileTimeConstant(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_variable_name(&self) -> Option<&str> {
        match &self.kind {
            Expression::Variable { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// The immediate sub-expressions of this node, in operand order.
    pub fn operands(&self) -> Vec<&ExprRef> {
        use self::Expression::*;
        match &self.kind {
            CompileTimeConstant(..) | Variable { .. } => vec![],
            ConstantStruct { members } | ConstantArray { members } => members.iter().collect(),
            ConstantUnion { value, .. } => value.iter().collect(),
            ConstantArrayOf { initializer } => vec![initializer],
            Add { left, right }
            | Sub { left, right }
            | Mul { left, right }
            | Div { left, right }
            | Rem { left, right }
            | And { left, right }
            | Or { left, right }
            | Xor { left, right }
            | Implies { left, right }
            | BitAnd { left, right }
            | BitOr { left, right }
            | BitXor { left, right }
            | Shl { left, right }
            | LShr { left, right }
            | AShr { left, right }
            | Equals { left, right }
            | Ne { left, right }
            | LessThan { left, right }
            | LessOrEqual { left, right }
            | GreaterThan { left, right }
            | GreaterOrEqual { left, right }
            | SameObject { left, right }
            | Concat { left, right } => vec![left, right],
            Neg { operand }
            | Abs { operand }
            | LogicalNot { operand }
            | BitNot { operand }
            | AddressOf { operand }
            | Typecast { operand }
            | Bitcast { operand }
            | IsNan { operand }
            | IsInf { operand }
            | IsNormal { operand }
            | IsFinite { operand } => vec![operand],
            IeeeAdd {
                left,
                right,
                rounding_mode,
            }
            | IeeeSub {
                left,
                right,
                rounding_mode,
            }
            | IeeeMul {
                left,
                right,
                rounding_mode,
            }
            | IeeeDiv {
                left,
                right,
                rounding_mode,
            } => vec![rounding_mode, left, right],
            IeeeFma {
                factor1,
                factor2,
                addend,
                rounding_mode,
            } => vec![rounding_mode, factor1, factor2, addend],
            IeeeSqrt {
                operand,
                rounding_mode,
            } => vec![rounding_mode, operand],
            ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => vec![condition, consequent, alternate],
            Index { source, index } => vec![source, index],
            Store {
                source,
                index,
                value,
            } => vec![source, index, value],
            MemberUpdate { source, value, .. } => vec![source, value],
            Member { source, .. } => vec![source],
            PointerObject { pointer }
            | PointerOffset { pointer }
            | PointerCapability { pointer } => vec![pointer],
            Extract { from, .. } => vec![from],
            Forall { bound, body } | Exists { bound, body } => vec![bound, body],
        }
    }

    /// Rebuilds this node with each immediate sub-expression replaced by
    /// `f(child)`. Leaves are returned unchanged.
    pub fn map_operands(self: &Rc<Self>, f: &mut dyn FnMut(&ExprRef) -> ExprRef) -> ExprRef {
        use self::Expression::*;
        let kind = match &self.kind {
            CompileTimeConstant(..) | Variable { .. } => return self.clone(),
            ConstantStruct { members } => ConstantStruct {
                members: members.iter().map(|m| f(m)).collect(),
            },
            ConstantArray { members } => ConstantArray {
                members: members.iter().map(|m| f(m)).collect(),
            },
            ConstantUnion { init_field, value } => ConstantUnion {
                init_field: init_field.clone(),
                value: value.as_ref().map(|v| f(v)),
            },
            ConstantArrayOf { initializer } => ConstantArrayOf {
                initializer: f(initializer),
            },
            Add { left, right } => Add {
                left: f(left),
                right: f(right),
            },
            Sub { left, right } => Sub {
                left: f(left),
                right: f(right),
            },
            Mul { left, right } => Mul {
                left: f(left),
                right: f(right),
            },
            Div { left, right } => Div {
                left: f(left),
                right: f(right),
            },
            Rem { left, right } => Rem {
                left: f(left),
                right: f(right),
            },
            Neg { operand } => Neg {
                operand: f(operand),
            },
            Abs { operand } => Abs {
                operand: f(operand),
            },
            IeeeAdd {
                left,
                right,
                rounding_mode,
            } => IeeeAdd {
                left: f(left),
                right: f(right),
                rounding_mode: f(rounding_mode),
            },
            IeeeSub {
                left,
                right,
                rounding_mode,
            } => IeeeSub {
                left: f(left),
                right: f(right),
                rounding_mode: f(rounding_mode),
            },
            IeeeMul {
                left,
                right,
                rounding_mode,
            } => IeeeMul {
                left: f(left),
                right: f(right),
                rounding_mode: f(rounding_mode),
            },
            IeeeDiv {
                left,
                right,
                rounding_mode,
            } => IeeeDiv {
                left: f(left),
                right: f(right),
                rounding_mode: f(rounding_mode),
            },
            IeeeFma {
                factor1,
                factor2,
                addend,
                rounding_mode,
            } => IeeeFma {
                factor1: f(factor1),
                factor2: f(factor2),
                addend: f(addend),
                rounding_mode: f(rounding_mode),
            },
            IeeeSqrt {
                operand,
                rounding_mode,
            } => IeeeSqrt {
                operand: f(operand),
                rounding_mode: f(rounding_mode),
            },
            And { left, right } => And {
                left: f(left),
                right: f(right),
            },
            Or { left, right } => Or {
                left: f(left),
                right: f(right),
            },
            Xor { left, right } => Xor {
                left: f(left),
                right: f(right),
            },
            Implies { left, right } => Implies {
                left: f(left),
                right: f(right),
            },
            LogicalNot { operand } => LogicalNot {
                operand: f(operand),
            },
            BitAnd { left, right } => BitAnd {
                left: f(left),
                right: f(right),
            },
            BitOr { left, right } => BitOr {
                left: f(left),
                right: f(right),
            },
            BitXor { left, right } => BitXor {
                left: f(left),
                right: f(right),
            },
            BitNot { operand } => BitNot {
                operand: f(operand),
            },
            Shl { left, right } => Shl {
                left: f(left),
                right: f(right),
            },
            LShr { left, right } => LShr {
                left: f(left),
                right: f(right),
            },
            AShr { left, right } => AShr {
                left: f(left),
                right: f(right),
            },
            Equals { left, right } => Equals {
                left: f(left),
                right: f(right),
            },
            Ne { left, right } => Ne {
                left: f(left),
                right: f(right),
            },
            LessThan { left, right } => LessThan {
                left: f(left),
                right: f(right),
            },
            LessOrEqual { left, right } => LessOrEqual {
                left: f(left),
                right: f(right),
            },
            GreaterThan { left, right } => GreaterThan {
                left: f(left),
                right: f(right),
            },
            GreaterOrEqual { left, right } => GreaterOrEqual {
                left: f(left),
                right: f(right),
            },
            ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => ConditionalExpression {
                condition: f(condition),
                consequent: f(consequent),
                alternate: f(alternate),
            },
            Index { source, index } => Index {
                source: f(source),
                index: f(index),
            },
            Store {
                source,
                index,
                value,
            } => Store {
                source: f(source),
                index: f(index),
                value: f(value),
            },
            MemberUpdate {
                source,
                member,
                value,
            } => MemberUpdate {
                source: f(source),
                member: member.clone(),
                value: f(value),
            },
            Member { source, member } => Member {
                source: f(source),
                member: member.clone(),
            },
            AddressOf { operand } => AddressOf {
                operand: f(operand),
            },
            PointerObject { pointer } => PointerObject {
                pointer: f(pointer),
            },
            PointerOffset { pointer } => PointerOffset {
                pointer: f(pointer),
            },
            PointerCapability { pointer } => PointerCapability {
                pointer: f(pointer),
            },
            SameObject { left, right } => SameObject {
                left: f(left),
                right: f(right),
            },
            Typecast { operand } => Typecast {
                operand: f(operand),
            },
            Bitcast { operand } => Bitcast {
                operand: f(operand),
            },
            Extract { from, upper, lower } => Extract {
                from: f(from),
                upper: *upper,
                lower: *lower,
            },
            Concat { left, right } => Concat {
                left: f(left),
                right: f(right),
            },
            IsNan { operand } => IsNan {
                operand: f(operand),
            },
            IsInf { operand } => IsInf {
                operand: f(operand),
            },
            IsNormal { operand } => IsNormal {
                operand: f(operand),
            },
            IsFinite { operand } => IsFinite {
                operand: f(operand),
            },
            Forall { bound, body } => Forall {
                bound: f(bound),
                body: f(body),
            },
            Exists { bound, body } => Exists {
                bound: f(bound),
                body: f(body),
            },
        };
        Expr::make(self.typ.clone(), kind)
    }
}

/// Replaces every free occurrence of the named variable in `body` with
/// `replacement`. Used to give quantifier bound variables fresh names.
pub fn substitute_variable(body: &ExprRef, name: &str, replacement: &ExprRef) -> ExprRef {
    match &body.kind {
        Expression::Variable { name: n } if n.as_str() == name => replacement.clone(),
        _ => body.map_operands(&mut |child| substitute_variable(child, name, replacement)),
    }
}

/// Folds constant sub-expressions bottom up. Only the integer and boolean
/// rules the index flattener relies on are implemented; anything else is
/// left for the solver.
pub fn simplify(expr: &ExprRef) -> ExprRef {
    use self::Expression::*;
    let expr = expr.map_operands(&mut |child| simplify(child));
    let folded = match &expr.kind {
        Add { left, right } => fold_binary(left, right, ConstantDomain::add),
        Sub { left, right } => fold_binary(left, right, ConstantDomain::sub),
        Mul { left, right } => fold_binary(left, right, ConstantDomain::mul),
        Div { left, right } => fold_binary(left, right, ConstantDomain::div),
        Rem { left, right } => fold_binary(left, right, ConstantDomain::rem),
        Neg { operand } => operand.as_constant().and_then(|c| c.neg()),
        LessThan { left, right } => {
            fold_compare(left, right, ConstantDomain::less_than)
        }
        LessOrEqual { left, right } => {
            fold_compare(left, right, ConstantDomain::less_or_equal)
        }
        GreaterThan { left, right } => {
            fold_compare(right, left, ConstantDomain::less_than)
        }
        GreaterOrEqual { left, right } => {
            fold_compare(right, left, ConstantDomain::less_or_equal)
        }
        Equals { left, right } => fold_compare(left, right, ConstantDomain::equals),
        Ne { left, right } => {
            fold_compare(left, right, ConstantDomain::equals).map(|c| match c {
                ConstantDomain::Bool(b) => ConstantDomain::Bool(!b),
                other => other,
            })
        }
        Typecast { operand } => operand
            .as_constant()
            .and_then(|c| c.cast_to(expr.typ.as_ref())),
        ConditionalExpression {
            condition,
            consequent,
            alternate,
        } => match condition.as_constant().and_then(|c| c.as_bool()) {
            Some(true) => return consequent.clone(),
            Some(false) => return alternate.clone(),
            None => None,
        },
        _ => None,
    };
    match folded {
        Some(c) => Expr::make(expr.typ.clone(), CompileTimeConstant(c)),
        None => expr,
    }
}

fn fold_binary(
    left: &ExprRef,
    right: &ExprRef,
    op: fn(&ConstantDomain, &ConstantDomain) -> Option<ConstantDomain>,
) -> Option<ConstantDomain> {
    op(left.as_constant()?, right.as_constant()?)
}

fn fold_compare(
    left: &ExprRef,
    right: &ExprRef,
    op: fn(&ConstantDomain, &ConstantDomain) -> Option<bool>,
) -> Option<ConstantDomain> {
    Some(ConstantDomain::Bool(op(
        left.as_constant()?,
        right.as_constant()?,
    )?))
}

pub fn constant_int(typ: &TypeRef, value: impl Into<BigInt>) -> ExprRef {
    Expr::make(
        typ.clone(),
        Expression::CompileTimeConstant(ConstantDomain::Int(value.into())),
    )
}

pub fn constant_bool(value: bool) -> ExprRef {
    Expr::make(
        crate::expression_type::bool_type(),
        Expression::CompileTimeConstant(ConstantDomain::Bool(value)),
    )
}

pub fn variable(typ: &TypeRef, name: &str) -> ExprRef {
    Expr::make(
        typ.clone(),
        Expression::Variable {
            name: Rc::new(name.to_string()),
        },
    )
}

pub fn typecast(typ: &TypeRef, operand: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Typecast { operand })
}

pub fn bitcast(typ: &TypeRef, operand: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Bitcast { operand })
}

pub fn add(typ: &TypeRef, left: ExprRef, right: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Add { left, right })
}

pub fn mul(typ: &TypeRef, left: ExprRef, right: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Mul { left, right })
}

pub fn neg(typ: &TypeRef, operand: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Neg { operand })
}

pub fn less_than(left: ExprRef, right: ExprRef) -> ExprRef {
    Expr::make(
        crate::expression_type::bool_type(),
        Expression::LessThan { left, right },
    )
}

pub fn equals(left: ExprRef, right: ExprRef) -> ExprRef {
    Expr::make(
        crate::expression_type::bool_type(),
        Expression::Equals { left, right },
    )
}

pub fn conditional(
    typ: &TypeRef,
    condition: ExprRef,
    consequent: ExprRef,
    alternate: ExprRef,
) -> ExprRef {
    Expr::make(
        typ.clone(),
        Expression::ConditionalExpression {
            condition,
            consequent,
            alternate,
        },
    )
}

pub fn index(typ: &TypeRef, source: ExprRef, idx: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Index { source, index: idx })
}

pub fn store(source: ExprRef, idx: ExprRef, value: ExprRef) -> ExprRef {
    Expr::make(
        source.typ.clone(),
        Expression::Store {
            source,
            index: idx,
            value,
        },
    )
}

pub fn member(typ: &TypeRef, source: ExprRef, name: &str) -> ExprRef {
    Expr::make(
        typ.clone(),
        Expression::Member {
            source,
            member: name.to_string(),
        },
    )
}

pub fn extract(typ: &TypeRef, from: ExprRef, upper: u32, lower: u32) -> ExprRef {
    Expr::make(typ.clone(), Expression::Extract { from, upper, lower })
}

pub fn concat(typ: &TypeRef, left: ExprRef, right: ExprRef) -> ExprRef {
    Expr::make(typ.clone(), Expression::Concat { left, right })
}

/// Builds the zero literal of the given type. Aggregates recurse member
/// wise; arrays of constant or unbounded size become uniform initializers.
pub fn gen_zero(typ: &TypeRef) -> ExprRef {
    use crate::expression_type::ExpressionType::*;
    let kind = match typ.as_ref() {
        Bool => Expression::CompileTimeConstant(ConstantDomain::Bool(false)),
        UnsignedBv { .. } | SignedBv { .. } => {
            Expression::CompileTimeConstant(ConstantDomain::Int(BigInt::from(0)))
        }
        FixedBv { .. } => Expression::CompileTimeConstant(ConstantDomain::Fixed(BigInt::from(0))),
        FloatBv { fraction, .. } => {
            if *fraction == 23 {
                Expression::CompileTimeConstant(ConstantDomain::F32(0))
            } else {
                Expression::CompileTimeConstant(ConstantDomain::F64(0))
            }
        }
        Struct { members, .. } => Expression::ConstantStruct {
            members: members.iter().map(gen_zero).collect(),
        },
        Union { .. } => Expression::ConstantUnion {
            init_field: None,
            value: None,
        },
        Array { subtype, size } => match size {
            ArraySize::Constant(n) => Expression::ConstantArray {
                members: (0..*n).map(|_| gen_zero(subtype)).collect(),
            },
            _ => Expression::ConstantArrayOf {
                initializer: gen_zero(subtype),
            },
        },
        Pointer { .. } => {
            // The null pointer: object zero at offset zero. The member count
            // is fixed up against the pointer record type during lowering.
            Expression::CompileTimeConstant(ConstantDomain::Int(BigInt::from(0)))
        }
    };
    Expr::make(typ.clone(), kind)
}

/// Builds the literal one of a scalar type.
pub fn gen_one(typ: &TypeRef) -> ExprRef {
    use crate::expression_type::ExpressionType::*;
    let kind = match typ.as_ref() {
        Bool => Expression::CompileTimeConstant(ConstantDomain::Bool(true)),
        UnsignedBv { .. } | SignedBv { .. } => {
            Expression::CompileTimeConstant(ConstantDomain::Int(BigInt::from(1)))
        }
        FixedBv {
            width,
            integer_bits,
        } => Expression::CompileTimeConstant(ConstantDomain::Fixed(
            BigInt::from(1) << (width - integer_bits),
        )),
        FloatBv { fraction, .. } => {
            if *fraction == 23 {
                Expression::CompileTimeConstant(ConstantDomain::F32(1.0f32.to_bits()))
            } else {
                Expression::CompileTimeConstant(ConstantDomain::F64(1.0f64.to_bits()))
            }
        }
        _ => unreachable!("gen_one of non scalar type {:?}", typ),
    };
    Expr::make(typ.clone(), kind)
}
