// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expression::ExprRef;

use serde::{Deserialize, Serialize};
use std::rc::Rc;

pub type TypeRef = Rc<ExpressionType>;

/// The size of an array dimension. Most arrays the checker sees have a size
/// that is known at conversion time, but heap objects can have a symbolic
/// size and some modelling arrays are unbounded.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArraySize {
    Constant(u64),
    Symbolic(ExprRef),
    Infinite,
}

/// Describes the value domain of a typed expression. Immutable once
/// constructed; the lowering engine only ever reads these.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ExpressionType {
    Bool,
    UnsignedBv {
        width: u32,
    },
    SignedBv {
        width: u32,
    },
    /// A binary fixed-point number: `integer_bits` whole bits followed by
    /// `width - integer_bits` fraction bits.
    FixedBv {
        width: u32,
        integer_bits: u32,
    },
    /// An IEEE-754 style binary float with the given exponent and fraction
    /// widths. The fraction width excludes the hidden bit.
    FloatBv {
        exponent: u32,
        fraction: u32,
    },
    Struct {
        name: String,
        members: Vec<TypeRef>,
        member_names: Vec<String>,
    },
    /// Unions are modelled as an opaque bit blob the size of the widest
    /// member; reads and writes reinterpret the relevant bit range.
    Union {
        name: String,
        members: Vec<TypeRef>,
        member_names: Vec<String>,
    },
    Array {
        subtype: TypeRef,
        size: ArraySize,
    },
    /// Pointers carry an opaque pointee type id rather than the pointee type
    /// itself. The lowering substitutes a fixed object/offset record for
    /// every pointer, so the id is never interpreted here and recursive
    /// record layouts terminate naturally.
    Pointer {
        pointee: Option<u32>,
    },
}

impl ExpressionType {
    /// Returns true if this type is a signed machine integer.
    pub fn is_signed_bv(&self) -> bool {
        matches!(self, ExpressionType::SignedBv { .. })
    }

    /// Returns true if this type is an unsigned machine integer.
    pub fn is_unsigned_bv(&self) -> bool {
        matches!(self, ExpressionType::UnsignedBv { .. })
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, ExpressionType::Bool)
    }

    pub fn is_fixed_bv(&self) -> bool {
        matches!(self, ExpressionType::FixedBv { .. })
    }

    pub fn is_float_bv(&self) -> bool {
        matches!(self, ExpressionType::FloatBv { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, ExpressionType::Struct { .. })
    }

    pub fn is_union(&self) -> bool {
        matches!(self, ExpressionType::Union { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ExpressionType::Array { .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, ExpressionType::Pointer { .. })
    }

    /// True for the types that lower through the tuple capability rather
    /// than through a native scalar or array sort.
    pub fn is_tuple_kind(&self) -> bool {
        self.is_struct() || self.is_pointer()
    }

    /// The number of bits used to represent a value of this type. Structs
    /// are the sum of their members, unions the widest member rounded up to
    /// a whole number of bytes, constant-sized arrays the product of element
    /// width and length. Symbolic and infinite arrays report zero.
    pub fn bit_width(&self) -> u32 {
        use self::ExpressionType::*;
        match self {
            Bool => 1,
            UnsignedBv { width } | SignedBv { width } | FixedBv { width, .. } => *width,
            FloatBv { exponent, fraction } => exponent + fraction + 1,
            Struct { members, .. } => members.iter().map(|m| m.bit_width()).sum(),
            Union { members, .. } => {
                let widest = members.iter().map(|m| m.bit_width()).max().unwrap_or(0);
                (widest + 7) / 8 * 8
            }
            Array { subtype, size } => match size {
                ArraySize::Constant(n) => subtype.bit_width() * (*n as u32),
                _ => 0,
            },
            Pointer { .. } => 0,
        }
    }

    /// The ordered member types and names of a struct or union.
    pub fn struct_fields(&self) -> (&[TypeRef], &[String]) {
        match self {
            ExpressionType::Struct {
                members,
                member_names,
                ..
            }
            | ExpressionType::Union {
                members,
                member_names,
                ..
            } => (members, member_names),
            _ => unreachable!("struct_fields called on non aggregate type {:?}", self),
        }
    }

    /// The positional index of the named member of a struct or union.
    pub fn member_index(&self, name: &str) -> usize {
        let (_, names) = self.struct_fields();
        names
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| unreachable!("member {} not found in {:?}", name, self))
    }

    /// The element type of an array.
    pub fn array_subtype(&self) -> &TypeRef {
        match self {
            ExpressionType::Array { subtype, .. } => subtype,
            _ => unreachable!("array_subtype called on non array type {:?}", self),
        }
    }

    pub fn array_size(&self) -> &ArraySize {
        match self {
            ExpressionType::Array { size, .. } => size,
            _ => unreachable!("array_size called on non array type {:?}", self),
        }
    }
}

pub fn bool_type() -> TypeRef {
    Rc::new(ExpressionType::Bool)
}

pub fn uint_type(width: u32) -> TypeRef {
    Rc::new(ExpressionType::UnsignedBv { width })
}

pub fn int_type(width: u32) -> TypeRef {
    Rc::new(ExpressionType::SignedBv { width })
}

pub fn fixed_type(width: u32, integer_bits: u32) -> TypeRef {
    Rc::new(ExpressionType::FixedBv {
        width,
        integer_bits,
    })
}

pub fn single_type() -> TypeRef {
    Rc::new(ExpressionType::FloatBv {
        exponent: 8,
        fraction: 23,
    })
}

pub fn double_type() -> TypeRef {
    Rc::new(ExpressionType::FloatBv {
        exponent: 11,
        fraction: 52,
    })
}

pub fn array_type(subtype: TypeRef, size: ArraySize) -> TypeRef {
    Rc::new(ExpressionType::Array { subtype, size })
}

pub fn struct_type(name: &str, members: Vec<TypeRef>, member_names: Vec<String>) -> TypeRef {
    Rc::new(ExpressionType::Struct {
        name: name.to_string(),
        members,
        member_names,
    })
}

pub fn union_type(name: &str, members: Vec<TypeRef>, member_names: Vec<String>) -> TypeRef {
    Rc::new(ExpressionType::Union {
        name: name.to_string(),
        members,
        member_names,
    })
}

pub fn pointer_type() -> TypeRef {
    Rc::new(ExpressionType::Pointer { pointee: None })
}
