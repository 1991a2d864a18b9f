// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Multi-dimensional arrays are lowered to one-dimensional solver arrays:
//! the type collapses to a single row-major dimension and index/update
//! chains collapse to one linear index expression.

use crate::expression::{self, Expr, ExprRef, Expression};
use crate::expression_type::{self, ArraySize, TypeRef};
use crate::lowering::SmtContext;
use crate::smt_backend::TermRef;

use log::error;

/// The smallest width w such that 2^w covers n distinct indices.
pub fn size_to_bit_width(n: u64) -> u32 {
    let mut width = 1;
    while width < 64 && (1u64 << width) < n {
        width += 1;
    }
    width
}

impl SmtContext {
    /// The index width of an array type: derived from the element count
    /// when it is known, from the size expression's type when symbolic, and
    /// the machine word width when unbounded.
    pub fn array_domain_width(&self, typ: &TypeRef) -> u32 {
        match typ.array_size() {
            ArraySize::Constant(n) => size_to_bit_width(*n),
            ArraySize::Symbolic(size) => size.typ.bit_width(),
            ArraySize::Infinite => self.options().word_size,
        }
    }

    /// Collapses nested constant-sized array dimensions into a single
    /// row-major dimension. Arrays with a symbolic or unbounded outer
    /// dimension keep their shape.
    pub fn flatten_array_type(&self, typ: &TypeRef) -> TypeRef {
        if !typ.array_subtype().is_array() {
            return typ.clone();
        }
        let mut total: u64 = 1;
        let mut current = typ.clone();
        loop {
            match current.array_size() {
                ArraySize::Constant(n) => total *= n,
                _ => return typ.clone(),
            }
            let subtype = current.array_subtype().clone();
            if !subtype.is_array() {
                return expression_type::array_type(subtype, ArraySize::Constant(total));
            }
            current = subtype;
        }
    }

    /// Collapses a nested array literal into a flat one, row major.
    pub fn flatten_array_body(&self, expr: &ExprRef) -> ExprRef {
        fn collect(expr: &ExprRef, out: &mut Vec<ExprRef>) {
            match &expr.kind {
                Expression::ConstantArray { members } => {
                    for m in members {
                        collect(m, out);
                    }
                }
                _ => out.push(expr.clone()),
            }
        }
        let mut members = Vec::new();
        collect(expr, &mut members);
        let flat_type = self.flatten_array_type(&expr.typ);
        Expr::make(flat_type, Expression::ConstantArray { members })
    }

    /// Walks a chain of index operations down to the underlying array and
    /// combines the per-dimension indices into one linear index, constant
    /// folded where possible.
    pub(crate) fn decompose_select_chain(&mut self, expr: &ExprRef) -> (ExprRef, ExprRef) {
        let mut indices = Vec::new();
        let mut current = expr.clone();
        loop {
            match &current.kind {
                Expression::Index { source, index } => {
                    indices.push(index.clone());
                    let source = source.clone();
                    current = source;
                }
                _ => break,
            }
        }
        let base = current;
        indices.reverse();
        let linear = self.linearize_indices(&base, &indices);
        (base, linear)
    }

    /// The store analogue of `decompose_select_chain`: returns the base
    /// array, the linear index, and the innermost updated value.
    pub(crate) fn decompose_store_chain(&mut self, expr: &ExprRef) -> (ExprRef, ExprRef, ExprRef) {
        let base = match &expr.kind {
            Expression::Store { source, .. } => source.clone(),
            _ => unreachable!("decompose_store_chain on {:?}", expr.kind),
        };
        let mut indices = Vec::new();
        let mut current = expr.clone();
        let updated_value;
        loop {
            match &current.kind {
                Expression::Store { index, value, .. } => {
                    indices.push(index.clone());
                    if value.typ.is_array() && matches!(value.kind, Expression::Store { .. }) {
                        let value = value.clone();
                        current = value;
                    } else {
                        updated_value = value.clone();
                        break;
                    }
                }
                _ => unreachable!(),
            }
        }
        let linear = self.linearize_indices(&base, &indices);
        (base, linear, updated_value)
    }

    /// Row-major linearization: for indices i0..ik over dimensions d0..dk,
    /// the flat index is ((i0 * d1 + i1) * d2 + i2) ...
    fn linearize_indices(&mut self, base: &ExprRef, indices: &[ExprRef]) -> ExprRef {
        let flat_type = self.flatten_array_type(&base.typ);
        let domain_width = self.array_domain_width(&flat_type);
        let index_type = expression_type::uint_type(domain_width);
        let mut dims = Vec::new();
        let mut t = base.typ.clone();
        while t.is_array() {
            dims.push(match t.array_size() {
                ArraySize::Constant(n) => *n,
                _ => 1,
            });
            let subtype = t.array_subtype().clone();
            t = subtype;
        }
        let mut linear = expression::typecast(&index_type, indices[0].clone());
        for (k, idx) in indices.iter().enumerate().skip(1) {
            let dim = expression::constant_int(&index_type, dims[k]);
            linear = expression::mul(&index_type, linear, dim);
            let idx = expression::typecast(&index_type, idx.clone());
            linear = expression::add(&index_type, linear, idx);
        }
        expression::simplify(&linear)
    }

    /// Lowers an element read, flattening any multi-dimensional chain
    /// first.
    pub(crate) fn convert_array_index(&mut self, expr: &ExprRef) -> TermRef {
        let (base, index) = self.decompose_select_chain(expr);
        let array = self.lower_term(&base);
        let result = array.select(self, &array, &index);
        if expr.typ.is_bool() && !self.array_api().supports_bools_in_arrays() {
            self.make_bit_bool(&result)
        } else {
            result
        }
    }

    /// Lowers a functional element update, flattening any nested chain
    /// first.
    pub(crate) fn convert_array_store(&mut self, expr: &ExprRef) -> TermRef {
        let (base, index, value) = self.decompose_store_chain(expr);
        let array = self.lower_term(&base);
        let mut value_term = self.lower_term(&value);
        if value.typ.is_bool() && !self.array_api().supports_bools_in_arrays() {
            value_term = self.make_bool_bit(&value_term);
        }
        array.update(self, &array, &value_term, 0, Some(&index))
    }

    /// Lowers an array literal. Aggregate elements go through the tuple
    /// capability's array constructors; everything else becomes a fresh
    /// array with one store per element, or the capability's uniform
    /// initializer.
    pub(crate) fn array_create(&mut self, expr: &ExprRef) -> TermRef {
        let flat_type = self.flatten_array_type(&expr.typ);
        let subtype = flat_type.array_subtype().clone();
        let domain_width = self.array_domain_width(&flat_type);
        if subtype.is_tuple_kind() {
            return self.tuple_array_create_dispatch(expr, &flat_type, domain_width);
        }
        match &expr.kind {
            Expression::ConstantArrayOf { initializer } => {
                if matches!(flat_type.array_size(), ArraySize::Infinite)
                    && !self.array_api().can_init_unbounded_arrays()
                {
                    error!("uniform initialization of an unbounded array");
                    panic!("uniform initialization of an unbounded array");
                }
                let mut init = self.lower_term(initializer);
                if initializer.typ.is_bool() && !self.array_api().supports_bools_in_arrays() {
                    init = self.make_bool_bit(&init);
                }
                let api = self.array_api();
                api.convert_array_of(self, &init, domain_width)
            }
            Expression::ConstantArray { .. } => {
                let flat = self.flatten_array_body(expr);
                let members = match &flat.kind {
                    Expression::ConstantArray { members } => members.clone(),
                    _ => unreachable!(),
                };
                let sort = self.lower_sort(&expr.typ);
                let range = sort.range().clone();
                let name = self.mk_fresh_name("constant_array::");
                let api = self.array_api();
                let mut array = api.mk_array_symbol(self, &name, &sort, &range);
                for (i, m) in members.iter().enumerate() {
                    let mut value = self.lower_term(m);
                    if m.typ.is_bool() && !api.supports_bools_in_arrays() {
                        value = self.make_bool_bit(&value);
                    }
                    let index = self.mk_domain_index(i as u64, domain_width);
                    array = self.mk_store(&array, &index, &value);
                }
                array
            }
            _ => unreachable!("array_create on {:?}", expr.kind),
        }
    }

    fn tuple_array_create_dispatch(
        &mut self,
        expr: &ExprRef,
        flat_type: &TypeRef,
        domain_width: u32,
    ) -> TermRef {
        let domain = self.mk_domain_sort(domain_width);
        match &expr.kind {
            Expression::ConstantArrayOf { initializer } => {
                let init = self.lower_term(initializer);
                let api = self.tuple_api();
                api.tuple_array_create(self, flat_type, &[init], true, &domain)
            }
            Expression::ConstantArray { .. } => {
                let flat = self.flatten_array_body(expr);
                let members = match &flat.kind {
                    Expression::ConstantArray { members } => members.clone(),
                    _ => unreachable!(),
                };
                let elements: Vec<TermRef> =
                    members.iter().map(|m| self.lower_term(m)).collect();
                let api = self.tuple_api();
                api.tuple_array_create(self, flat_type, &elements, false, &domain)
            }
            _ => unreachable!(),
        }
    }
}
