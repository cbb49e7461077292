// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The parsed SQL expression tree the rewriter consumes.
//!
//! Parsing happens elsewhere; this module only fixes the shape of the tree.
//! Every node kind the rewriter understands is a variant of [`Expr`], so the
//! compiler points out every place a new kind must be handled.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use quill_expr::Func;
use quill_repr::{ColumnName, Datum, ScalarType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// A possibly qualified column reference, e.g. `t.a`.
    Identifier(ColumnName),
    /// A literal value.
    Value(Datum),
    /// A prepared statement parameter, e.g. `$1`.
    Parameter(usize),
    /// A reference to the n-th output column, 1-based, e.g. `ORDER BY 2`.
    Position(usize),
    /// A parenthesized expression.
    Nested(Box<Expr>),
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `<expr> [NOT] BETWEEN <low> AND <high>`
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// `CASE [<operand>] WHEN <condition> THEN <result> ... [ELSE <else_result>] END`
    Case {
        operand: Option<Box<Expr>>,
        when_clauses: Vec<WhenClause>,
        else_result: Option<Box<Expr>>,
    },
    /// `<expr> [NOT] LIKE <pattern> [ESCAPE <escape>]`
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        escape: char,
        negated: bool,
    },
    /// `<expr> [NOT] REGEXP <pattern>`
    Regexp {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    /// `<expr> [NOT] IN (<list>)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `<expr> [NOT] IN (<subquery>)`
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Query>,
        negated: bool,
    },
    /// `EXISTS (<subquery>)`
    Exists(Box<Query>),
    /// A parenthesized subquery used as a value.
    Subquery(Box<Query>),
    /// `<left> <op> {ANY | ALL} (<subquery>)`
    Quantified {
        left: Box<Expr>,
        op: BinaryOperator,
        quantifier: Quantifier,
        subquery: Box<Query>,
    },
    /// `(<expr>, <expr>, ...)` or `ROW(...)`
    Row(Vec<Expr>),
    /// `CAST(<expr> AS <data_type>)`
    Cast {
        expr: Box<Expr>,
        data_type: ScalarType,
    },
    /// A call of a scalar function.
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// A call of an aggregate function.
    Aggregate(AggregateCall),
    /// `<expr> IS [NOT] NULL`
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// `<expr> IS [NOT] {TRUE | FALSE}`
    IsTruth {
        expr: Box<Expr>,
        truth: bool,
        negated: bool,
    },
    /// `@name`, `@name := <value>`, `@@name`, `@@global.name`
    Variable(Variable),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhenClause {
    pub condition: Expr,
    pub result: Expr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// `@@name` rather than `@name`.
    pub is_system: bool,
    /// `@@global.name`.
    pub is_global: bool,
    /// The assigned value in `@name := <value>`.
    pub value: Option<Box<Expr>>,
}

/// Identifies one aggregate call within a statement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct AggregateId(pub u64);

impl AggregateId {
    /// Allocates an id that has not been handed out before in this process.
    pub fn next() -> AggregateId {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        AggregateId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateCall {
    pub id: AggregateId,
    pub func: AggregateFunc,
    pub args: Vec<Expr>,
    pub distinct: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFunc {
    /// The type of the aggregate over an input of type `input`.
    pub fn output_type(&self, input: &ScalarType) -> ScalarType {
        match self {
            AggregateFunc::Count => ScalarType::Int64,
            AggregateFunc::Avg => ScalarType::Float64,
            AggregateFunc::Sum if *input == ScalarType::Float64 => ScalarType::Float64,
            AggregateFunc::Sum => ScalarType::Int64,
            AggregateFunc::Max | AggregateFunc::Min => input.clone(),
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Max => "max",
            AggregateFunc::Min => "min",
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOperator {
    Plus,
    Minus,
    BitNeg,
    Not,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOperator {
    And,
    Or,
    Xor,
    Eq,
    NotEq,
    /// `<=>`
    NullEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    IntDivide,
    Modulo,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOperator {
    /// The scalar function implementing this operator.
    pub fn func(&self) -> Func {
        match self {
            BinaryOperator::And => Func::And,
            BinaryOperator::Or => Func::Or,
            BinaryOperator::Xor => Func::Xor,
            BinaryOperator::Eq => Func::Eq,
            BinaryOperator::NotEq => Func::NotEq,
            BinaryOperator::NullEq => Func::NullEq,
            BinaryOperator::Lt => Func::Lt,
            BinaryOperator::LtEq => Func::Lte,
            BinaryOperator::Gt => Func::Gt,
            BinaryOperator::GtEq => Func::Gte,
            BinaryOperator::Plus => Func::Plus,
            BinaryOperator::Minus => Func::Minus,
            BinaryOperator::Multiply => Func::Mul,
            BinaryOperator::Divide => Func::Div,
            BinaryOperator::IntDivide => Func::IntDiv,
            BinaryOperator::Modulo => Func::Mod,
            BinaryOperator::BitAnd => Func::BitAnd,
            BinaryOperator::BitOr => Func::BitOr,
            BinaryOperator::BitXor => Func::BitXor,
            BinaryOperator::ShiftLeft => Func::LeftShift,
            BinaryOperator::ShiftRight => Func::RightShift,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quantifier {
    Any,
    All,
}

/// The body of a `SELECT` over at most one table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub projection: Vec<SelectItem>,
    pub from: Option<TableFactor>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<String> },
    Wildcard,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableFactor {
    pub name: String,
    pub alias: Option<String>,
}

impl Expr {
    pub fn ident(column: &str) -> Expr {
        Expr::Identifier(ColumnName::bare(column))
    }

    pub fn qualified(table: &str, column: &str) -> Expr {
        Expr::Identifier(ColumnName::qualified(table, column))
    }

    pub fn value(datum: impl Into<Datum>) -> Expr {
        Expr::Value(datum.into())
    }

    pub fn binary(self, op: BinaryOperator, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, expr: Expr) -> Expr {
        Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn aggregate(func: AggregateFunc, args: Vec<Expr>) -> Expr {
        Expr::Aggregate(AggregateCall {
            id: AggregateId::next(),
            func,
            args,
            distinct: false,
        })
    }

    /// Collects the aggregate calls in this expression, not descending into
    /// subqueries or into the arguments of other aggregates.
    pub fn aggregates(&self) -> Vec<&AggregateCall> {
        let mut out = vec![];
        self.collect_aggregates(&mut out);
        out
    }

    fn collect_aggregates<'a>(&'a self, out: &mut Vec<&'a AggregateCall>) {
        match self {
            Expr::Aggregate(agg) => out.push(agg),
            Expr::Identifier(_)
            | Expr::Value(_)
            | Expr::Parameter(_)
            | Expr::Position(_)
            | Expr::Exists(_)
            | Expr::Subquery(_) => (),
            Expr::Nested(expr)
            | Expr::UnaryOp { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::IsTruth { expr, .. }
            | Expr::InSubquery { expr, .. }
            | Expr::Quantified { left: expr, .. } => expr.collect_aggregates(out),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_aggregates(out);
                right.collect_aggregates(out);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_aggregates(out);
                low.collect_aggregates(out);
                high.collect_aggregates(out);
            }
            Expr::Case {
                operand,
                when_clauses,
                else_result,
            } => {
                if let Some(operand) = operand {
                    operand.collect_aggregates(out);
                }
                for clause in when_clauses {
                    clause.condition.collect_aggregates(out);
                    clause.result.collect_aggregates(out);
                }
                if let Some(else_result) = else_result {
                    else_result.collect_aggregates(out);
                }
            }
            Expr::Like { expr, pattern, .. } | Expr::Regexp { expr, pattern, .. } => {
                expr.collect_aggregates(out);
                pattern.collect_aggregates(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_aggregates(out);
                for e in list {
                    e.collect_aggregates(out);
                }
            }
            Expr::Row(exprs) | Expr::Function { args: exprs, .. } => {
                for e in exprs {
                    e.collect_aggregates(out);
                }
            }
            Expr::Variable(var) => {
                if let Some(value) = &var.value {
                    value.collect_aggregates(out);
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Identifier(name) => write!(f, "{}", name),
            Expr::Value(datum) => write!(f, "{}", datum),
            Expr::Parameter(n) => write!(f, "${}", n),
            Expr::Aggregate(agg) => write!(f, "{}(...)", agg.func),
            Expr::Function { name, .. } => write!(f, "{}(...)", name),
            Expr::Variable(var) if var.is_system => write!(f, "@@{}", var.name),
            Expr::Variable(var) => write!(f, "@{}", var.name),
            _ => f.write_str("?column?"),
        }
    }
}

impl Query {
    /// `SELECT <projection> FROM <table>`
    pub fn select(projection: Vec<Expr>, from: Option<&str>) -> Query {
        Query {
            projection: projection
                .into_iter()
                .map(|expr| SelectItem::Expr { expr, alias: None })
                .collect(),
            from: from.map(|name| TableFactor {
                name: name.to_owned(),
                alias: None,
            }),
            selection: None,
            group_by: vec![],
        }
    }

    /// Adds a `WHERE` clause.
    pub fn filter(mut self, selection: Expr) -> Query {
        self.selection = Some(selection);
        self
    }
}
