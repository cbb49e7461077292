// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Physical plans and the executor contract.
//!
//! A physical plan is produced from a pruned, uncorrelated logical plan. Its
//! column references carry resolved positions: the conditions of a join are
//! evaluated against the outer row followed by the inner row, everything
//! else against the row of its input.

use std::fmt;

use serde::{Deserialize, Serialize};

use quill_expr::{EvalError, Expression};
use quill_repr::{Datum, Schema};

use crate::catalog::Catalog;
use crate::plan::logical::{AggregateExpr, ConditionChecker};
use crate::session::Session;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PhysicalPlan {
    Dual,
    TableScan {
        table: String,
        /// The table columns to read, in output order.
        columns: Vec<String>,
        schema: Schema,
    },
    Selection {
        input: Box<PhysicalPlan>,
        conditions: Vec<Expression>,
    },
    Projection {
        input: Box<PhysicalPlan>,
        exprs: Vec<Expression>,
        schema: Schema,
    },
    HashAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
        schema: Schema,
    },
    Apply {
        outer: Box<PhysicalPlan>,
        inner: Box<PhysicalPlan>,
        outer_schema: Schema,
        checker: Option<ConditionChecker>,
        schema: Schema,
    },
    SemiJoin {
        outer: Box<PhysicalPlan>,
        inner: Box<PhysicalPlan>,
        conditions: Vec<Expression>,
        anti: bool,
        as_scalar: bool,
        schema: Schema,
    },
    Exists {
        input: Box<PhysicalPlan>,
        schema: Schema,
    },
    MaxOneRow {
        input: Box<PhysicalPlan>,
    },
}

static EMPTY_SCHEMA: Schema = Schema::empty();

impl PhysicalPlan {
    pub fn schema(&self) -> &Schema {
        match self {
            PhysicalPlan::Dual => &EMPTY_SCHEMA,
            PhysicalPlan::Selection { input, .. } | PhysicalPlan::MaxOneRow { input } => {
                input.schema()
            }
            PhysicalPlan::TableScan { schema, .. }
            | PhysicalPlan::Projection { schema, .. }
            | PhysicalPlan::HashAggregate { schema, .. }
            | PhysicalPlan::Apply { schema, .. }
            | PhysicalPlan::SemiJoin { schema, .. }
            | PhysicalPlan::Exists { schema, .. } => schema,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PhysicalPlan::Dual => "Dual",
            PhysicalPlan::TableScan { .. } => "TableScan",
            PhysicalPlan::Selection { .. } => "Selection",
            PhysicalPlan::Projection { .. } => "Projection",
            PhysicalPlan::HashAggregate { .. } => "HashAggregate",
            PhysicalPlan::Apply { .. } => "Apply",
            PhysicalPlan::SemiJoin { .. } => "SemiJoin",
            PhysicalPlan::Exists { .. } => "Exists",
            PhysicalPlan::MaxOneRow { .. } => "MaxOneRow",
        }
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name(), self.schema())
    }
}

/// Runs uncorrelated subqueries while a statement is being planned.
pub trait SubqueryEvaluator: fmt::Debug {
    /// Executes `plan` and returns the values of its first row, one datum
    /// per output column, or all nulls if it produces no rows.
    fn evaluate(
        &self,
        plan: &PhysicalPlan,
        catalog: &dyn Catalog,
        session: &Session,
    ) -> Result<Vec<Datum>, EvalError>;
}
