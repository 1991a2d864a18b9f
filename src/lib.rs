// Copyright (c) the Satori contributors.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Lowers a typed intermediate expression tree to the term language of an
//! SMT solver backend, maintains an incremental push/pop proof context over
//! the lowered terms, and reconstructs counterexample values from solver
//! models.

pub mod array_flattener;
pub mod capabilities;
pub mod constant_domain;
pub mod expression;
pub mod expression_type;
pub mod ground_backend;
pub mod ieee_emulation;
pub mod lowering;
pub mod model_extractor;
pub mod options;
pub mod pointer_model;
pub mod smt_backend;
