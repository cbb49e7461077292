// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::error::Error;
use std::fmt;

use quill_expr::{EvalError, FuncError};
use quill_repr::{ColumnName, ScalarType, SchemaError};

use crate::catalog::CatalogError;
use crate::session::VarError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanError {
    /// An operand or subquery produced the wrong number of columns.
    OperandColumns(usize),
    UnknownColumn(ColumnName),
    AmbiguousColumn(ColumnName),
    UnknownSystemVariable(String),
    UnknownFunction(String),
    WrongArgumentCount {
        func: String,
        expected: String,
        got: usize,
    },
    UnsupportedCast(ScalarType),
    /// An aggregate call appeared where no aggregation is planned.
    AggregateNotAllowed,
    /// A 1-based position did not name a column.
    PositionOutOfRange(usize),
    UnknownParameter(usize),
    /// The expression stack did not end up holding exactly one expression.
    InvalidStack(usize),
    Catalog(CatalogError),
    Var(VarError),
    Eval(EvalError),
    /// A bug in the planner rather than in the statement.
    Internal(String),
}

impl PlanError {
    pub(crate) fn internal(msg: impl Into<String>) -> PlanError {
        PlanError::Internal(msg.into())
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OperandColumns(n) => write!(f, "Operand should contain {} column(s)", n),
            Self::UnknownColumn(name) => write!(f, "column \"{}\" does not exist", name),
            Self::AmbiguousColumn(name) => {
                write!(f, "column reference \"{}\" is ambiguous", name)
            }
            Self::UnknownSystemVariable(name) => write!(f, "Unknown system variable '{}'", name),
            Self::UnknownFunction(name) => write!(f, "function {} does not exist", name),
            Self::WrongArgumentCount {
                func,
                expected,
                got,
            } => write!(
                f,
                "function {} takes {} argument(s), but {} were supplied",
                func, expected, got
            ),
            Self::UnsupportedCast(typ) => write!(f, "cannot cast to {}", typ),
            Self::AggregateNotAllowed => {
                f.write_str("aggregate functions are not allowed in this context")
            }
            Self::PositionOutOfRange(n) => write!(f, "position {} is out of range", n),
            Self::UnknownParameter(n) => write!(f, "there is no parameter ${}", n),
            Self::InvalidStack(len) => write!(f, "expression stack length {} is invalid", len),
            Self::Catalog(e) => write!(f, "{}", e),
            Self::Var(e) => write!(f, "{}", e),
            Self::Eval(e) => write!(f, "{}", e),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl Error for PlanError {}

impl From<FuncError> for PlanError {
    fn from(e: FuncError) -> PlanError {
        match e {
            FuncError::UnknownFunction(name) => PlanError::UnknownFunction(name),
            FuncError::WrongArgumentCount {
                func,
                expected,
                got,
            } => PlanError::WrongArgumentCount {
                func,
                expected,
                got,
            },
            FuncError::UnsupportedCast(typ) => PlanError::UnsupportedCast(typ),
            FuncError::OperandColumns(n) => PlanError::OperandColumns(n),
        }
    }
}

impl From<SchemaError> for PlanError {
    fn from(e: SchemaError) -> PlanError {
        match e {
            SchemaError::AmbiguousColumn(name) => PlanError::AmbiguousColumn(name),
        }
    }
}

impl From<CatalogError> for PlanError {
    fn from(e: CatalogError) -> PlanError {
        PlanError::Catalog(e)
    }
}

impl From<VarError> for PlanError {
    fn from(e: VarError) -> PlanError {
        match e {
            VarError::UnknownParameter(name) => PlanError::UnknownSystemVariable(name),
            e => PlanError::Var(e),
        }
    }
}

impl From<EvalError> for PlanError {
    fn from(e: EvalError) -> PlanError {
        PlanError::Eval(e)
    }
}
