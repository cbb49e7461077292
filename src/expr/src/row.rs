// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Utilities for row-valued expressions.
//!
//! A row value is either a call of the row constructor, as in `(a, b)`, or a
//! constant holding a tuple datum. Every other expression is a row of length
//! one.

use quill_repr::Datum;

use crate::scalar::func::Func;
use crate::scalar::{Constant, Expression, FuncError};

/// Returns the number of columns `expr` contains.
pub fn row_len(expr: &Expression) -> usize {
    match expr {
        Expression::ScalarFunction(f) if f.func == Func::Row => f.args.len(),
        Expression::Constant(Constant {
            value: Datum::Row(fields),
            ..
        }) => fields.len(),
        _ => 1,
    }
}

/// Returns the `idx`th component of the row value `expr`.
///
/// A scalar is treated as a row of length one, so `row_arg(e, 0)` returns
/// `e` itself.
///
/// # Panics
///
/// Panics if `idx` is out of bounds for the row.
pub fn row_arg(expr: &Expression, idx: usize) -> Expression {
    match expr {
        Expression::ScalarFunction(f) if f.func == Func::Row => f.args[idx].clone(),
        Expression::Constant(Constant {
            value: Datum::Row(fields),
            typ,
        }) => {
            let value = fields[idx].clone();
            let typ = match typ {
                quill_repr::ScalarType::Row(types) if types.len() == fields.len() => {
                    types[idx].clone()
                }
                _ => value.scalar_type(),
            };
            Expression::literal(value, typ)
        }
        _ => {
            assert_eq!(idx, 0, "row_arg({}) called on a scalar expression", idx);
            expr.clone()
        }
    }
}

/// Builds `left func right`.
///
/// If both sides are scalars the result is a single call. If both sides are
/// rows of the same length, `(a0, a1) func (b0, b1)` is decomposed into
/// `(a0 func b0) AND (a1 func b1)`, recursively for nested rows. Rows of
/// different lengths are an error.
pub fn decompose_comparison(
    left: &Expression,
    right: &Expression,
    func: Func,
) -> Result<Expression, FuncError> {
    let (left_len, right_len) = (row_len(left), row_len(right));
    if left_len == 1 && right_len == 1 {
        return Expression::call(func, vec![left.clone(), right.clone()]);
    }
    if left_len != right_len {
        return Err(FuncError::OperandColumns(left_len));
    }
    let mut conditions = Vec::with_capacity(left_len);
    for i in 0..left_len {
        conditions.push(decompose_comparison(
            &row_arg(left, i),
            &row_arg(right, i),
            func.clone(),
        )?);
    }
    Ok(compose_cnf(conditions))
}

/// Conjoins `conditions` with AND.
///
/// A single condition is returned as is. An empty list yields `true`.
pub fn compose_cnf(conditions: Vec<Expression>) -> Expression {
    conditions
        .into_iter()
        .reduce(|acc, cond| acc.and(cond))
        .unwrap_or_else(Expression::literal_true)
}

/// Splits `expr` into the items of its top-level conjunction.
pub fn split_cnf(expr: Expression) -> Vec<Expression> {
    let mut out = vec![];
    let mut todo = vec![expr];
    while let Some(expr) = todo.pop() {
        match expr {
            Expression::ScalarFunction(f) if f.func == Func::And => {
                todo.extend(f.args.into_iter().rev());
            }
            other => out.push(other),
        }
    }
    out
}
