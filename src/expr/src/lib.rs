// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Core expression language.
//!
//! An [`Expression`] is what the SQL expression rewriter produces for a
//! single AST expression: column references into the schema of the plan
//! under construction, correlated references into an enclosing scope,
//! constants, and calls of [`Func`]s.

#![warn(missing_debug_implementations)]

mod row;
mod scalar;

pub use row::{compose_cnf, decompose_comparison, row_arg, row_len, split_cnf};
pub use scalar::func::{CastFunc, Func, FunctionRegistry};
pub use scalar::{Constant, CorrelatedColumn, EvalError, Expression, FuncError, ScalarFunction};
