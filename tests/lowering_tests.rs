// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// End to end tests that drive the lowering engine over the ground backend:
// expressions go in through the proof context, the ground solver decides
// the assertions it can bind, and `get` reconstructs model values.

use satori::array_flattener::size_to_bit_width;
use satori::constant_domain::ConstantDomain;
use satori::expression::{self, Expr, Expression};
use satori::expression_type::{self, ArraySize};
use satori::ground_backend::{ground_context, GroundBackend, GroundTupleCapability};
use satori::lowering::SmtContext;
use satori::options::{Encoding, Options};
use satori::smt_backend::SmtResult;

use num_bigint::BigInt;
use std::rc::Rc;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn exact_ctx() -> SmtContext {
    init();
    ground_context(Options::new(Encoding::Exact))
}

fn abstract_ctx() -> SmtContext {
    init();
    ground_context(Options::new(Encoding::Abstract))
}

#[test]
fn contradictory_assertions_are_unsatisfiable() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let x = expression::variable(&u32t, "x");
    ctx.assert_expr(&expression::equals(
        x.clone(),
        expression::constant_int(&u32t, 5u64),
    ));
    ctx.assert_expr(&expression::equals(x, expression::constant_int(&u32t, 6u64)));
    assert_eq!(ctx.solve(), SmtResult::Unsatisfiable);
}

#[test]
fn satisfiable_assertions_produce_a_model() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let x = expression::variable(&u32t, "x");
    ctx.assert_expr(&expression::equals(
        x.clone(),
        expression::constant_int(&u32t, 5u64),
    ));
    ctx.assert_expr(&expression::less_than(
        x.clone(),
        expression::constant_int(&u32t, 10u64),
    ));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&x), expression::constant_int(&u32t, 5u64));
}

#[test]
fn boolean_structure_is_decided() {
    let mut ctx = exact_ctx();
    let bt = expression_type::bool_type();
    let p = expression::variable(&bt, "p");
    let q = expression::variable(&bt, "q");
    let not_q = Expr::make(bt.clone(), Expression::LogicalNot { operand: q.clone() });
    let both = Expr::make(
        bt.clone(),
        Expression::And {
            left: p.clone(),
            right: not_q,
        },
    );
    ctx.assert_expr(&both);
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&p), expression::constant_bool(true));
    assert_eq!(ctx.get(&q), expression::constant_bool(false));
}

#[test]
fn machine_addition_wraps_two_s_complement() {
    let mut ctx = exact_ctx();
    let u8t = expression_type::uint_type(8);
    let sum = expression::add(
        &u8t,
        expression::constant_int(&u8t, 200u64),
        expression::constant_int(&u8t, 100u64),
    );
    let y = expression::variable(&u8t, "y");
    ctx.assert_expr(&expression::equals(y.clone(), sum));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), expression::constant_int(&u8t, 44u64));
}

#[test]
fn signed_widening_cast_sign_extends() {
    let mut ctx = exact_ctx();
    let i8t = expression_type::int_type(8);
    let i32t = expression_type::int_type(32);
    let x = expression::variable(&i8t, "x");
    let y = expression::variable(&i32t, "y");
    ctx.assert_expr(&expression::equals(
        x.clone(),
        expression::constant_int(&i8t, -5i64),
    ));
    ctx.assert_expr(&expression::equals(
        y.clone(),
        expression::typecast(&i32t, x),
    ));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), expression::constant_int(&i32t, -5i64));
}

#[test]
fn fixed_point_multiply_rescales_the_product() {
    let mut ctx = exact_ctx();
    // 8.8 fixed point: 1.5 * 2.5 == 3.75.
    let ft = expression_type::fixed_type(16, 8);
    let a = Expr::make(
        ft.clone(),
        Expression::CompileTimeConstant(ConstantDomain::Fixed(BigInt::from(384))),
    );
    let b = Expr::make(
        ft.clone(),
        Expression::CompileTimeConstant(ConstantDomain::Fixed(BigInt::from(640))),
    );
    let y = expression::variable(&ft, "y");
    ctx.assert_expr(&expression::equals(y.clone(), expression::mul(&ft, a, b)));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(
        ctx.get(&y),
        Expr::make(
            ft,
            Expression::CompileTimeConstant(ConstantDomain::Fixed(BigInt::from(960))),
        )
    );
}

#[test]
fn lowering_is_memoized_per_expression() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let e = expression::add(
        &u32t,
        expression::variable(&u32t, "x"),
        expression::constant_int(&u32t, 1u64),
    );
    let t1 = ctx.lower_term(&e);
    let t2 = ctx.lower_term(&e);
    assert!(Rc::ptr_eq(&t1, &t2));
}

#[test]
fn pop_purges_terms_lowered_in_the_popped_level() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let outer = expression::variable(&u32t, "outer");
    let t_outer = ctx.lower_term(&outer);

    ctx.push();
    let inner = expression::mul(
        &u32t,
        expression::variable(&u32t, "x"),
        expression::constant_int(&u32t, 2u64),
    );
    let t_inner = ctx.lower_term(&inner);
    assert!(Rc::ptr_eq(&t_inner, &ctx.lower_term(&inner)));
    ctx.pop();

    // The inner entry died with its level; the outer one survived.
    let t_again = ctx.lower_term(&inner);
    assert!(!Rc::ptr_eq(&t_inner, &t_again));
    assert!(Rc::ptr_eq(&t_outer, &ctx.lower_term(&outer)));
}

#[test]
fn pop_releases_the_level_s_terms() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let before = ctx.live_term_count();
    ctx.push();
    ctx.lower_term(&expression::variable(&u32t, "scratch"));
    assert!(ctx.live_term_count() > before);
    ctx.pop();
    assert_eq!(ctx.live_term_count(), before);
}

#[test]
fn index_widths_cover_the_element_count() {
    assert_eq!(size_to_bit_width(1), 1);
    assert_eq!(size_to_bit_width(2), 1);
    assert_eq!(size_to_bit_width(3), 2);
    assert_eq!(size_to_bit_width(6), 3);
    assert_eq!(size_to_bit_width(1024), 10);
    assert_eq!(size_to_bit_width(1025), 11);
}

#[test]
fn nested_arrays_flatten_to_one_dimension() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let inner = expression_type::array_type(u32t.clone(), ArraySize::Constant(3));
    let nested = expression_type::array_type(inner, ArraySize::Constant(2));
    let flat = expression_type::array_type(u32t, ArraySize::Constant(6));
    assert_eq!(ctx.lower_sort(&nested), ctx.lower_sort(&flat));
}

#[test]
fn multi_dimensional_store_and_read_agree_on_the_cell() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let u8t = expression_type::uint_type(8);
    let row = expression_type::array_type(u32t.clone(), ArraySize::Constant(3));
    let grid = expression_type::array_type(row.clone(), ArraySize::Constant(2));
    let a = expression::variable(&grid, "a");

    // a' = a with a[1][2] replaced by 7.
    let one = expression::constant_int(&u8t, 1u64);
    let two = expression::constant_int(&u8t, 2u64);
    let row1 = expression::index(&row, a.clone(), one.clone());
    let inner_store = expression::store(
        row1,
        two.clone(),
        expression::constant_int(&u32t, 7u64),
    );
    let updated = expression::store(a, one.clone(), inner_store);

    let read_back = expression::index(
        &u32t,
        expression::index(&row, updated.clone(), one),
        two.clone(),
    );
    let y = expression::variable(&u32t, "y");
    ctx.assert_expr(&expression::equals(y.clone(), read_back));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), expression::constant_int(&u32t, 7u64));
}

#[test]
fn reading_another_cell_misses_the_update() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let u8t = expression_type::uint_type(8);
    let row = expression_type::array_type(u32t.clone(), ArraySize::Constant(3));
    let grid = expression_type::array_type(row.clone(), ArraySize::Constant(2));
    let a = expression::variable(&grid, "a");

    let one = expression::constant_int(&u8t, 1u64);
    let two = expression::constant_int(&u8t, 2u64);
    let zero = expression::constant_int(&u8t, 0u64);
    let row1 = expression::index(&row, a.clone(), one.clone());
    let inner_store = expression::store(
        row1,
        two.clone(),
        expression::constant_int(&u32t, 7u64),
    );
    let updated = expression::store(a, one, inner_store);

    // [0][2] is a different flat cell, so the read falls through to the
    // unconstrained base array and the query stays undecided.
    let other = expression::index(
        &u32t,
        expression::index(&row, updated, zero),
        two,
    );
    let y = expression::variable(&u32t, "y");
    ctx.assert_expr(&expression::equals(y, other));
    assert_eq!(ctx.solve(), SmtResult::Undefined);
}

#[test]
fn struct_update_and_read_round_trip() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let bt = expression_type::bool_type();
    let point = expression_type::struct_type(
        "point",
        vec![u32t.clone(), bt],
        vec!["a".to_string(), "b".to_string()],
    );
    let s = expression::variable(&point, "s");
    let updated = Expr::make(
        point.clone(),
        Expression::MemberUpdate {
            source: s,
            member: "a".to_string(),
            value: expression::constant_int(&u32t, 7u64),
        },
    );
    let read = expression::member(&u32t, updated, "a");
    let y = expression::variable(&u32t, "y");
    ctx.assert_expr(&expression::equals(y.clone(), read));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), expression::constant_int(&u32t, 7u64));
}

#[test]
fn struct_model_extraction_resolves_each_field() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let bt = expression_type::bool_type();
    let point = expression_type::struct_type(
        "point",
        vec![u32t.clone(), bt.clone()],
        vec!["a".to_string(), "b".to_string()],
    );
    let s = expression::variable(&point, "s");
    ctx.assert_expr(&expression::equals(
        expression::member(&u32t, s.clone(), "a"),
        expression::constant_int(&u32t, 5u64),
    ));
    ctx.assert_expr(&expression::equals(
        expression::member(&bt, s.clone(), "b"),
        expression::constant_bool(true),
    ));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(
        ctx.get(&s),
        Expr::make(
            point,
            Expression::ConstantStruct {
                members: vec![
                    expression::constant_int(&u32t, 5u64),
                    expression::constant_bool(true),
                ],
            },
        )
    );
}

#[test]
fn union_write_reinterprets_under_another_member() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let u16t = expression_type::uint_type(16);
    let union_t = expression_type::union_type(
        "blob",
        vec![u32t.clone(), u16t.clone()],
        vec!["f".to_string(), "g".to_string()],
    );
    let zeroed = Expr::make(
        union_t.clone(),
        Expression::ConstantUnion {
            init_field: None,
            value: None,
        },
    );
    let written = Expr::make(
        union_t,
        Expression::MemberUpdate {
            source: zeroed,
            member: "g".to_string(),
            value: expression::constant_int(&u16t, 0xBEEFu64),
        },
    );
    let read = expression::member(&u32t, written, "f");
    let y = expression::variable(&u32t, "y");
    ctx.assert_expr(&expression::equals(y.clone(), read));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), expression::constant_int(&u32t, 0xBEEFu64));
}

#[test]
fn pointer_equality_ignores_value_preserving_casts() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let pt = expression_type::pointer_type();
    let p = Expr::make(
        pt.clone(),
        Expression::AddressOf {
            operand: expression::variable(&u32t, "x"),
        },
    );
    let cast = expression::typecast(&pt, p.clone());
    let same = Expr::make(
        expression_type::bool_type(),
        Expression::SameObject {
            left: p,
            right: cast,
        },
    );
    ctx.assert_expr(&same);
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
}

#[test]
fn null_is_not_the_address_of_any_symbol() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let pt = expression_type::pointer_type();
    let null = expression::gen_zero(&pt);
    let p = Expr::make(
        pt,
        Expression::AddressOf {
            operand: expression::variable(&u32t, "x"),
        },
    );
    let same = Expr::make(
        expression_type::bool_type(),
        Expression::SameObject {
            left: null,
            right: p,
        },
    );
    ctx.assert_expr(&same);
    assert_eq!(ctx.solve(), SmtResult::Unsatisfiable);
}

#[test]
fn pointer_arithmetic_moves_only_the_offset() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let u64t = expression_type::uint_type(64);
    let pt = expression_type::pointer_type();
    let p = Expr::make(
        pt.clone(),
        Expression::AddressOf {
            operand: expression::variable(&u32t, "x"),
        },
    );
    let q = Expr::make(
        pt,
        Expression::Add {
            left: p.clone(),
            right: expression::constant_int(&u64t, 3u64),
        },
    );
    let same = Expr::make(
        expression_type::bool_type(),
        Expression::SameObject {
            left: p,
            right: q.clone(),
        },
    );
    ctx.assert_expr(&same);
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    let offset = Expr::make(u64t.clone(), Expression::PointerOffset { pointer: q });
    assert_eq!(ctx.get(&offset), expression::constant_int(&u64t, 3u64));
}

#[test]
fn pointer_difference_subtracts_offsets() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let u64t = expression_type::uint_type(64);
    let i64t = expression_type::int_type(64);
    let pt = expression_type::pointer_type();
    let p = Expr::make(
        pt.clone(),
        Expression::AddressOf {
            operand: expression::variable(&u32t, "x"),
        },
    );
    let q = Expr::make(
        pt,
        Expression::Add {
            left: p.clone(),
            right: expression::constant_int(&u64t, 3u64),
        },
    );
    let diff = Expr::make(i64t.clone(), Expression::Sub { left: q, right: p });
    let y = expression::variable(&i64t, "y");
    ctx.assert_expr(&expression::equals(y.clone(), diff));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), expression::constant_int(&i64t, 3i64));
}

#[test]
#[should_panic(expected = "addition of two pointer operands")]
fn adding_two_pointers_aborts() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let pt = expression_type::pointer_type();
    let p = Expr::make(
        pt.clone(),
        Expression::AddressOf {
            operand: expression::variable(&u32t, "x"),
        },
    );
    let bad = Expr::make(
        pt,
        Expression::Add {
            left: p.clone(),
            right: p,
        },
    );
    ctx.lower_term(&bad);
}

#[test]
fn renumbering_allocates_a_fresh_object_until_popped() {
    let mut ctx = exact_ctx();
    let u32t = expression_type::uint_type(32);
    let u64t = expression_type::uint_type(64);
    let pt = expression_type::pointer_type();
    let p = Expr::make(
        pt,
        Expression::AddressOf {
            operand: expression::variable(&u32t, "x"),
        },
    );
    let object = Expr::make(u64t, Expression::PointerObject { pointer: p });
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    let original = ctx.get(&object);

    ctx.push();
    ctx.renumber_symbol_address("x");
    let renumbered = ctx.get(&object);
    assert_ne!(renumbered, original);
    ctx.pop();

    assert_eq!(ctx.get(&object), original);
}

#[test]
fn shifts_agree_between_encodings() {
    let u32t = expression_type::uint_type(32);
    let shifted = Expr::make(
        u32t.clone(),
        Expression::Shl {
            left: expression::constant_int(&u32t, 13u64),
            right: expression::constant_int(&u32t, 2u64),
        },
    );
    for mut ctx in [exact_ctx(), abstract_ctx()] {
        let y = expression::variable(&u32t, "y");
        ctx.assert_expr(&expression::equals(y.clone(), shifted.clone()));
        assert_eq!(ctx.solve(), SmtResult::Satisfiable);
        assert_eq!(ctx.get(&y), expression::constant_int(&u32t, 52u64));
    }
}

fn double_literal(bits: u64) -> satori::expression::ExprRef {
    Expr::make(
        expression_type::double_type(),
        Expression::CompileTimeConstant(ConstantDomain::F64(bits)),
    )
}

fn rounding_operand() -> satori::expression::ExprRef {
    expression::constant_int(&expression_type::uint_type(8), 0u64)
}

#[test]
fn emulated_division_by_zero_yields_the_signed_largest_normal() {
    let mut ctx = abstract_ctx();
    let dt = expression_type::double_type();
    let div = Expr::make(
        dt.clone(),
        Expression::IeeeDiv {
            left: double_literal(1.0f64.to_bits()),
            right: double_literal(0.0f64.to_bits()),
            rounding_mode: rounding_operand(),
        },
    );
    let y = expression::variable(&dt, "y");
    ctx.assert_expr(&expression::equals(y.clone(), div));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), double_literal(f64::MAX.to_bits()));
}

#[test]
fn emulated_overflow_saturates_at_the_largest_normal() {
    let mut ctx = abstract_ctx();
    let dt = expression_type::double_type();
    let product = Expr::make(
        dt.clone(),
        Expression::IeeeMul {
            left: double_literal(1.0e308f64.to_bits()),
            right: double_literal(10.0f64.to_bits()),
            rounding_mode: rounding_operand(),
        },
    );
    let y = expression::variable(&dt, "y");
    ctx.assert_expr(&expression::equals(y.clone(), product));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), double_literal(f64::MAX.to_bits()));
}

#[test]
fn emulated_underflow_flushes_to_zero() {
    let mut ctx = abstract_ctx();
    let dt = expression_type::double_type();
    // The smallest subnormal halved vanishes, even though neither operand
    // is zero.
    let product = Expr::make(
        dt.clone(),
        Expression::IeeeMul {
            left: double_literal(1),
            right: double_literal(0.5f64.to_bits()),
            rounding_mode: rounding_operand(),
        },
    );
    let y = expression::variable(&dt, "y");
    ctx.assert_expr(&expression::equals(y.clone(), product));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), double_literal(0));
}

#[test]
fn emulated_subnormals_quantize_to_the_nearest_step() {
    let mut ctx = abstract_ctx();
    let dt = expression_type::double_type();
    // 5 * 2^-1074 divided by two lands halfway between steps and rounds up
    // to 3 * 2^-1074.
    let quotient = Expr::make(
        dt.clone(),
        Expression::IeeeDiv {
            left: double_literal(5),
            right: double_literal(2.0f64.to_bits()),
            rounding_mode: rounding_operand(),
        },
    );
    let y = expression::variable(&dt, "y");
    ctx.assert_expr(&expression::equals(y.clone(), quotient));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), double_literal(3));
}

#[test]
fn quantified_assertions_stay_undecided() {
    let mut ctx = exact_ctx();
    let u8t = expression_type::uint_type(8);
    let i = expression::variable(&u8t, "i");
    let claim = Expr::make(
        expression_type::bool_type(),
        Expression::Forall {
            bound: i.clone(),
            body: expression::equals(i.clone(), i),
        },
    );
    ctx.assert_expr(&claim);
    assert_eq!(ctx.solve(), SmtResult::Undefined);
}

#[test]
fn model_arrays_are_capped() {
    let mut ctx = exact_ctx();
    let u8t = expression_type::uint_type(8);
    let big = expression_type::array_type(u8t, ArraySize::Constant(2000));
    let a = expression::variable(&big, "a");
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    let value = ctx.get(&a);
    match &value.kind {
        Expression::ConstantArray { members } => assert_eq!(members.len(), 1024),
        other => panic!("expected an array literal, got {:?}", other),
    }
}

#[test]
#[should_panic(expected = "no lowering rule")]
fn unsupported_expressions_abort_by_default() {
    let mut ctx = abstract_ctx();
    let dt = expression_type::double_type();
    let sqrt = Expr::make(
        dt,
        Expression::IeeeSqrt {
            operand: double_literal(2.0f64.to_bits()),
            rounding_mode: rounding_operand(),
        },
    );
    ctx.lower_term(&sqrt);
}

#[test]
fn unsupported_expressions_degrade_to_zero_when_configured() {
    init();
    let mut options = Options::new(Encoding::Abstract);
    options.unsupported_exprs_as_zero = true;
    let mut ctx = ground_context(options);
    let dt = expression_type::double_type();
    let sqrt = Expr::make(
        dt.clone(),
        Expression::IeeeSqrt {
            operand: double_literal(2.0f64.to_bits()),
            rounding_mode: rounding_operand(),
        },
    );
    let y = expression::variable(&dt, "y");
    ctx.assert_expr(&expression::equals(y.clone(), sqrt));
    assert_eq!(ctx.solve(), SmtResult::Satisfiable);
    assert_eq!(ctx.get(&y), double_literal(0));
}

#[test]
#[should_panic(expected = "tuple capability registered twice")]
fn registering_a_capability_twice_aborts() {
    let mut ctx = exact_ctx();
    ctx.register_tuple_capability(Rc::new(GroundTupleCapability));
}

#[test]
#[should_panic(expected = "no tuple capability registered")]
fn lowering_a_record_without_the_capability_aborts() {
    init();
    let mut ctx = SmtContext::new(
        Box::new(GroundBackend::new()),
        Options::new(Encoding::Exact),
    );
    let u32t = expression_type::uint_type(32);
    let point =
        expression_type::struct_type("point", vec![u32t], vec!["a".to_string()]);
    ctx.lower_term(&expression::variable(&point, "s"));
}
