// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Pointer encoding: every pointer lowers to a fixed record of an object id
//! and an offset within that object (plus capability metadata when
//! enabled). Object ids are handed out per named symbol, versioned by the
//! renumbering map, and snapshotted with the context level.

use crate::expression::{self, Expr, ExprRef, Expression};
use crate::expression_type;
use crate::lowering::SmtContext;
use crate::smt_backend::TermRef;

use log::error;

impl SmtContext {
    /// The object id for the current address generation of a named symbol,
    /// allocated on first use.
    pub(crate) fn object_id_for(&mut self, name: &str) -> u32 {
        let generation = self
            .renumber_map
            .last()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0);
        let key = format!("{}#{}", name, generation);
        if let Some(id) = self.object_ids.last().unwrap().get(&key) {
            return *id;
        }
        let id = *self.next_object_id.last().unwrap();
        *self.next_object_id.last_mut().unwrap() = id + 1;
        self.object_ids.last_mut().unwrap().insert(key, id);
        id
    }

    /// Bumps the address generation of a symbol, so that the next
    /// address-of yields a fresh object id. Models memory reuse after
    /// free/realloc; undone by popping the level the bump happened in.
    pub fn renumber_symbol_address(&mut self, name: &str) {
        let entry = self
            .renumber_map
            .last_mut()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0);
        *entry += 1;
    }

    /// Lowers taking the address of a variable, an element of a variable,
    /// or a member of a variable.
    pub(crate) fn convert_addr_of(&mut self, expr: &ExprRef) -> TermRef {
        let operand = match &expr.kind {
            Expression::AddressOf { operand } => operand,
            _ => unreachable!(),
        };
        let field_type = expression_type::uint_type(self.options().pointer_width);
        let (object, offset) = match &operand.kind {
            Expression::Variable { name } => {
                let name = name.to_string();
                (
                    self.object_id_for(&name),
                    expression::constant_int(&field_type, 0u64),
                )
            }
            Expression::Index { source, index } if source.as_variable_name().is_some() => {
                let name = source.as_variable_name().unwrap().to_string();
                (
                    self.object_id_for(&name),
                    expression::typecast(&field_type, index.clone()),
                )
            }
            Expression::Member { source, member } if source.as_variable_name().is_some() => {
                let name = source.as_variable_name().unwrap().to_string();
                let field = source.typ.member_index(member) as u64;
                (
                    self.object_id_for(&name),
                    expression::constant_int(&field_type, field),
                )
            }
            _ => return self.unsupported_expr(expr),
        };
        let mut members = vec![expression::constant_int(&field_type, object as u64), offset];
        if self.options().capability_pointers {
            members.push(expression::constant_int(&field_type, 0u64));
        }
        let record = Expr::make(expr.typ.clone(), Expression::ConstantStruct { members });
        let api = self.tuple_api();
        api.tuple_create(self, &record)
    }

    /// Pointer arithmetic: the offset field moves, the object id does not.
    /// Offsets are in the IR's own units; any element-size scaling happened
    /// before lowering.
    pub(crate) fn convert_pointer_arith(&mut self, expr: &ExprRef) -> TermRef {
        let (left, right, is_add) = match &expr.kind {
            Expression::Add { left, right } => (left, right, true),
            Expression::Sub { left, right } => (left, right, false),
            _ => unreachable!(),
        };
        if left.typ.is_pointer() && right.typ.is_pointer() {
            if is_add {
                error!("addition of two pointer operands");
                panic!("addition of two pointer operands");
            }
            // Pointer difference: offset minus offset, resized to the
            // result type.
            let a = self.lower_term(left);
            let b = self.lower_term(right);
            let off_a = a.project(self, &a, 1);
            let off_b = b.project(self, &b, 1);
            let diff = if self.int_encoding() {
                self.mk_sub(&off_a, &off_b)
            } else {
                self.mk_bvsub(&off_a, &off_b)
            };
            return self.resize_to_width(diff, self.options().pointer_width, expr.typ.bit_width());
        }
        let (pointer, delta) = if left.typ.is_pointer() {
            (left, right)
        } else {
            if !is_add {
                error!("subtraction of a pointer from an integer");
                panic!("subtraction of a pointer from an integer");
            }
            (right, left)
        };
        let offset_type = expression_type::uint_type(self.options().pointer_width);
        let delta = expression::typecast(&offset_type, delta.clone());
        let p = self.lower_term(pointer);
        let offset = p.project(self, &p, 1);
        let d = self.lower_term(&delta);
        let moved = match (self.int_encoding(), is_add) {
            (true, true) => self.mk_add(&offset, &d),
            (true, false) => self.mk_sub(&offset, &d),
            (false, true) => self.mk_bvadd(&offset, &d),
            (false, false) => self.mk_bvsub(&offset, &d),
        };
        p.update(self, &p, &moved, 1, None)
    }

    /// Relational comparison of two pointers: same object and the offsets
    /// compare as unsigned quantities.
    pub(crate) fn convert_ptr_cmp(
        &mut self,
        expr: &ExprRef,
        left: &ExprRef,
        right: &ExprRef,
    ) -> TermRef {
        let a = self.lower_term(left);
        let b = self.lower_term(right);
        let obj_a = a.project(self, &a, 0);
        let obj_b = b.project(self, &b, 0);
        let same_object = self.mk_eq(&obj_a, &obj_b);
        let off_a = a.project(self, &a, 1);
        let off_b = b.project(self, &b, 1);
        let int_encoding = self.int_encoding();
        let offsets = match &expr.kind {
            Expression::LessThan { .. } => {
                if int_encoding {
                    self.mk_lt(&off_a, &off_b)
                } else {
                    self.mk_bvult(&off_a, &off_b)
                }
            }
            Expression::LessOrEqual { .. } => {
                if int_encoding {
                    self.mk_le(&off_a, &off_b)
                } else {
                    self.mk_bvule(&off_a, &off_b)
                }
            }
            Expression::GreaterThan { .. } => {
                if int_encoding {
                    self.mk_gt(&off_a, &off_b)
                } else {
                    self.mk_bvugt(&off_a, &off_b)
                }
            }
            Expression::GreaterOrEqual { .. } => {
                if int_encoding {
                    self.mk_ge(&off_a, &off_b)
                } else {
                    self.mk_bvuge(&off_a, &off_b)
                }
            }
            _ => unreachable!(),
        };
        self.mk_and(&same_object, &offsets)
    }

    fn resize_to_width(&mut self, term: TermRef, from: u32, to: u32) -> TermRef {
        if self.int_encoding() || from == to {
            term
        } else if to < from {
            self.mk_extract_term(&term, to - 1, 0)
        } else {
            self.mk_sign_ext(&term, to - from)
        }
    }
}
