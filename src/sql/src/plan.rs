// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! SQL planning.
//!
//! Planning turns the [`Expr`](crate::ast::Expr)s of a query into
//! [`Expression`](quill_expr::Expression)s evaluated against a
//! [`LogicalPlan`], rewriting subqueries into apply, semi-join, exists and
//! max-one-row operators along the way.

// Internal module layout.
//
// The entry point is `PlanBuilder::rewrite`, in the `rewrite` module, which
// translates one expression and threads the plan it is evaluated against.
// Subqueries are handed to the `subquery` module, which plans their bodies
// through `PlanBuilder::build_result_set_node` in the `query` module; that in
// turn calls back into `rewrite` for the expressions of the nested query.

mod builder;
mod error;
mod explain;
mod logical;
mod physical;
mod query;
mod rewrite;
mod subquery;

pub use builder::PlanBuilder;
pub use error::PlanError;
pub use explain::ExplainFormat;
pub use logical::{AggregateExpr, ConditionChecker, LogicalPlan};
pub use physical::{PhysicalPlan, SubqueryEvaluator};
