// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use quill_repr::{Column, ColumnId, Datum, ScalarType};

use self::func::Func;

pub mod func;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Expression {
    /// A column of the plan the expression is evaluated against.
    Column(Column),
    /// A column of an enclosing query's plan.
    CorrelatedColumn(CorrelatedColumn),
    /// A literal value.
    Constant(Constant),
    /// A function call.
    ScalarFunction(ScalarFunction),
}

/// A reference to a column that belongs to an enclosing scope.
///
/// This is a copy of the outer column's descriptor, not a pointer into the
/// outer schema, so the outer plan is free to be rebuilt around it.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CorrelatedColumn {
    pub column: Column,
    /// How many scopes out the column lives, where 1 is the immediately
    /// enclosing query.
    pub depth: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Constant {
    pub value: Datum,
    pub typ: ScalarType,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ScalarFunction {
    pub func: Func,
    pub args: Vec<Expression>,
    /// The type the call returns.
    pub typ: ScalarType,
}

impl Expression {
    pub fn literal(value: Datum, typ: ScalarType) -> Expression {
        Expression::Constant(Constant { value, typ })
    }

    /// A literal whose type is the natural type of `value`.
    pub fn literal_datum(value: Datum) -> Expression {
        let typ = value.scalar_type();
        Expression::literal(value, typ)
    }

    pub fn literal_null() -> Expression {
        Expression::literal(Datum::Null, ScalarType::Null)
    }

    pub fn literal_true() -> Expression {
        Expression::literal(Datum::Bool(true), ScalarType::Bool)
    }

    /// Builds a call of `func` over `args`.
    ///
    /// Fails if `func` does not accept `args.len()` arguments.
    pub fn call(func: Func, args: Vec<Expression>) -> Result<Expression, FuncError> {
        func.check_arity(args.len())?;
        let typ = func.output_type(&args);
        Ok(Expression::ScalarFunction(ScalarFunction { func, args, typ }))
    }

    /// Conjoins `self` and `other`.
    pub fn and(self, other: Expression) -> Expression {
        Expression::ScalarFunction(ScalarFunction {
            func: Func::And,
            args: vec![self, other],
            typ: ScalarType::Bool,
        })
    }

    /// The type of the value this expression produces.
    pub fn typ(&self) -> ScalarType {
        match self {
            Expression::Column(c) => c.typ.clone(),
            Expression::CorrelatedColumn(c) => c.column.typ.clone(),
            Expression::Constant(c) => c.typ.clone(),
            Expression::ScalarFunction(f) => f.typ.clone(),
        }
    }

    /// Returns the function this expression calls, if it is a call.
    pub fn as_function(&self) -> Option<&ScalarFunction> {
        match self {
            Expression::ScalarFunction(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_literal_true(&self) -> bool {
        matches!(
            self,
            Expression::Constant(Constant {
                value: Datum::Bool(true),
                ..
            })
        )
    }

    /// Direct sub-expressions.
    pub fn children(&self) -> &[Expression] {
        match self {
            Expression::ScalarFunction(f) => &f.args,
            _ => &[],
        }
    }

    /// Applies `f` to `self` and then to every sub-expression, pre-order.
    pub fn visit_pre<F>(&self, f: &mut F)
    where
        F: FnMut(&Expression),
    {
        f(self);
        for child in self.children() {
            child.visit_pre(f);
        }
    }

    /// Applies `f` to every sub-expression and then to `self`, post-order.
    pub fn visit_mut_post<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Expression),
    {
        if let Expression::ScalarFunction(func) = self {
            for arg in &mut func.args {
                arg.visit_mut_post(f);
            }
        }
        f(self);
    }

    /// The ids of all (uncorrelated) columns referenced by this expression.
    pub fn column_ids(&self) -> BTreeSet<ColumnId> {
        let mut out = BTreeSet::new();
        self.visit_pre(&mut |e| {
            if let Expression::Column(c) = e {
                out.insert(c.id);
            }
        });
        out
    }

    /// All correlated columns referenced by this expression.
    pub fn correlated_columns(&self) -> Vec<&CorrelatedColumn> {
        let mut out = vec![];
        collect_correlated(self, &mut out);
        out
    }

    /// Reports whether any correlated column in this expression reaches out
    /// further than `level` scopes.
    pub fn has_free_correlation(&self, level: usize) -> bool {
        self.correlated_columns().iter().any(|c| c.depth > level)
    }

    /// Reports whether this expression calls a function for which `pred`
    /// returns true.
    pub fn contains_func<P>(&self, mut pred: P) -> bool
    where
        P: FnMut(&Func) -> bool,
    {
        let mut found = false;
        self.visit_pre(&mut |e| {
            if let Expression::ScalarFunction(f) = e {
                found |= pred(&f.func);
            }
        });
        found
    }
}

fn collect_correlated<'a>(expr: &'a Expression, out: &mut Vec<&'a CorrelatedColumn>) {
    match expr {
        Expression::CorrelatedColumn(c) => out.push(c),
        Expression::ScalarFunction(f) => {
            for arg in &f.args {
                collect_correlated(arg, out);
            }
        }
        Expression::Column(_) | Expression::Constant(_) => (),
    }
}

impl From<Column> for Expression {
    fn from(column: Column) -> Expression {
        Expression::Column(column)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::Column(c) => write!(f, "{}", c),
            Expression::CorrelatedColumn(c) => write!(f, "{}^{}", c.column, c.depth),
            Expression::Constant(c) => write!(f, "{}", c.value),
            Expression::ScalarFunction(func) => match &func.func {
                Func::Cast(cast) => write!(f, "cast({} as {})", func.args[0], cast.target()),
                other => write!(f, "{}({})", other, func.args.iter().join(", ")),
            },
        }
    }
}

/// An error while constructing an expression.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FuncError {
    #[error("function {0} does not exist")]
    UnknownFunction(String),
    #[error("function {func} takes {expected} argument(s), but {got} were supplied")]
    WrongArgumentCount {
        func: String,
        expected: String,
        got: usize,
    },
    #[error("cannot cast to {0}")]
    UnsupportedCast(ScalarType),
    #[error("Operand should contain {0} column(s)")]
    OperandColumns(usize),
}

/// An error while evaluating an expression or a plan.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("invalid input for {target}: {value}")]
    InvalidCast { value: String, target: ScalarType },
    #[error("division by zero")]
    DivisionByZero,
    #[error("Subquery returns more than 1 row")]
    MultipleRows,
    #[error("internal error: {0}")]
    Internal(String),
}
