// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Logical plans.
//!
//! Columns are identified by [`ColumnId`], so plans can be stacked on top of
//! each other without rewriting the expressions they already contain. The
//! `position` stored in a [`Column`] expression is only trustworthy after
//! [`LogicalPlan::prune_columns_and_resolve_indices`] has run.

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::trace;

use quill_expr::Expression;
use quill_repr::{Column, ColumnId, Schema};

use crate::ast::AggregateFunc;
use crate::plan::error::PlanError;
use crate::plan::physical::PhysicalPlan;

static EMPTY_SCHEMA: Schema = Schema::empty();

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    /// Produces a single row with no columns.
    Dual,
    TableScan {
        table: String,
        schema: Schema,
    },
    /// Keeps the rows for which every condition is true.
    Selection {
        input: Box<LogicalPlan>,
        conditions: Vec<Expression>,
    },
    Projection {
        input: Box<LogicalPlan>,
        exprs: Vec<Expression>,
        /// One column per expression.
        schema: Schema,
    },
    /// Groups the input by `group_by` and computes `aggregates` per group.
    ///
    /// The schema holds one column per aggregate followed by the input
    /// columns that are passed through, carrying the value of an arbitrary
    /// row of the group.
    Aggregation {
        input: Box<LogicalPlan>,
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
        schema: Schema,
    },
    /// Evaluates `inner` once per row of `outer`, binding the columns of
    /// `outer_schema` that `inner` refers to as correlated columns.
    ///
    /// Without a checker every outer row is joined with the (at most one) row
    /// the inner plan produces, or with nulls if it produces none. With a
    /// checker every outer row is emitted once, with the inner columns null
    /// and a trailing boolean column holding the folded checker result.
    Apply {
        outer: Box<LogicalPlan>,
        inner: Box<LogicalPlan>,
        outer_schema: Schema,
        checker: Option<ConditionChecker>,
        schema: Schema,
    },
    /// Keeps the rows of `outer` for which some row of `inner` satisfies all
    /// `conditions`, or for which none does if `anti` is set.
    ///
    /// The outcome for an outer row follows three-valued logic: true if some
    /// inner row makes every condition true, else null if some inner row
    /// leaves a condition unknown, else false. `anti` negates it. If
    /// `as_scalar` is set no rows are removed; instead the outcome is
    /// appended as a trailing boolean column.
    SemiJoin {
        outer: Box<LogicalPlan>,
        inner: Box<LogicalPlan>,
        conditions: Vec<Expression>,
        anti: bool,
        as_scalar: bool,
        schema: Schema,
    },
    /// Produces one row with one boolean column that reports whether `input`
    /// produces any row.
    Exists {
        input: Box<LogicalPlan>,
        schema: Schema,
    },
    /// Fails at runtime if `input` produces more than one row.
    MaxOneRow { input: Box<LogicalPlan> },
}

/// An aggregate function call within an [`LogicalPlan::Aggregation`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub func: AggregateFunc,
    pub args: Vec<Expression>,
    pub distinct: bool,
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let distinct = if self.distinct { "distinct " } else { "" };
        match self.args.as_slice() {
            [] => write!(f, "{}({}*)", self.func, distinct),
            args => write!(f, "{}({}{})", self.func, distinct, args.iter().join(", ")),
        }
    }
}

/// Decides the match column of an [`LogicalPlan::Apply`].
///
/// `condition` is evaluated against every pairing of the outer row with an
/// inner row, and the outcomes are folded with [`ConditionChecker::fold`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConditionChecker {
    pub condition: Expression,
    /// Whether every inner row must satisfy `condition` (`ALL`), rather than
    /// at least one (`ANY`).
    pub all: bool,
}

impl ConditionChecker {
    /// Folds per-row outcomes of the condition, where `None` is SQL null.
    ///
    /// In `ALL` mode the result is false if any outcome is false, else null
    /// if any outcome is null, else true (including for no rows). `ANY` mode
    /// is the dual: true if any outcome is true, else null if any is null,
    /// else false.
    pub fn fold<I>(&self, outcomes: I) -> Option<bool>
    where
        I: IntoIterator<Item = Option<bool>>,
    {
        let mut saw_null = false;
        for outcome in outcomes {
            match outcome {
                Some(b) if b != self.all => return Some(b),
                Some(_) => (),
                None => saw_null = true,
            }
        }
        if saw_null {
            None
        } else {
            Some(self.all)
        }
    }
}

impl fmt::Display for ConditionChecker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mode = if self.all { "all" } else { "any" };
        write!(f, "{}({})", mode, self.condition)
    }
}

impl LogicalPlan {
    /// Wraps `input` in a selection, unless there are no conditions.
    pub fn selection(input: LogicalPlan, conditions: Vec<Expression>) -> LogicalPlan {
        if conditions.is_empty() {
            input
        } else {
            LogicalPlan::Selection {
                input: Box::new(input),
                conditions,
            }
        }
    }

    /// The columns this plan produces.
    pub fn schema(&self) -> &Schema {
        match self {
            LogicalPlan::Dual => &EMPTY_SCHEMA,
            LogicalPlan::Selection { input, .. } | LogicalPlan::MaxOneRow { input } => {
                input.schema()
            }
            LogicalPlan::TableScan { schema, .. }
            | LogicalPlan::Projection { schema, .. }
            | LogicalPlan::Aggregation { schema, .. }
            | LogicalPlan::Apply { schema, .. }
            | LogicalPlan::SemiJoin { schema, .. }
            | LogicalPlan::Exists { schema, .. } => schema,
        }
    }

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Dual | LogicalPlan::TableScan { .. } => vec![],
            LogicalPlan::Selection { input, .. }
            | LogicalPlan::Projection { input, .. }
            | LogicalPlan::Aggregation { input, .. }
            | LogicalPlan::Exists { input, .. }
            | LogicalPlan::MaxOneRow { input } => vec![input],
            LogicalPlan::Apply { outer, inner, .. } | LogicalPlan::SemiJoin { outer, inner, .. } => {
                vec![outer, inner]
            }
        }
    }

    /// The expressions this node evaluates itself, not counting its inputs.
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            LogicalPlan::Dual
            | LogicalPlan::TableScan { .. }
            | LogicalPlan::Exists { .. }
            | LogicalPlan::MaxOneRow { .. } => vec![],
            LogicalPlan::Selection { conditions, .. }
            | LogicalPlan::SemiJoin { conditions, .. } => conditions.iter().collect(),
            LogicalPlan::Projection { exprs, .. } => exprs.iter().collect(),
            LogicalPlan::Aggregation {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .chain(aggregates.iter().flat_map(|a| a.args.iter()))
                .collect(),
            LogicalPlan::Apply { checker, .. } => {
                checker.iter().map(|c| &c.condition).collect()
            }
        }
    }

    /// Reports whether this plan refers to columns of an enclosing query.
    pub fn is_correlated(&self) -> bool {
        self.has_free_correlation(0)
    }

    /// Reports whether a correlated column reaches out further than `level`
    /// scopes. The inner side of an apply sits one scope deeper than the
    /// apply itself.
    fn has_free_correlation(&self, level: usize) -> bool {
        if self
            .expressions()
            .iter()
            .any(|e| e.has_free_correlation(level))
        {
            return true;
        }
        match self {
            LogicalPlan::Apply { outer, inner, .. } => {
                outer.has_free_correlation(level) || inner.has_free_correlation(level + 1)
            }
            _ => self
                .children()
                .iter()
                .any(|child| child.has_free_correlation(level)),
        }
    }

    /// Pushes `predicates` as far down the plan as they can go.
    ///
    /// Returns the predicates that could not be pushed into this plan; the
    /// caller must apply them on top of the returned plan. Selections are
    /// merged into the predicates they sit above. Projections are pushed
    /// through by substituting their expressions, except where that would
    /// duplicate a side effect. Every other operator is a barrier, though its
    /// inputs are still optimized.
    pub fn predicate_push_down(
        self,
        predicates: Vec<Expression>,
    ) -> Result<(Vec<Expression>, LogicalPlan), PlanError> {
        match self {
            LogicalPlan::Dual | LogicalPlan::TableScan { .. } => Ok((predicates, self)),
            LogicalPlan::Selection {
                input,
                mut conditions,
            } => {
                conditions.extend(predicates);
                let input = push_into(*input, conditions)?;
                Ok((vec![], input))
            }
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } => {
                let mut pushed = vec![];
                let mut retained = vec![];
                for predicate in predicates {
                    match substitute(&predicate, &schema, &exprs) {
                        Some(substituted) => pushed.push(substituted),
                        None => retained.push(predicate),
                    }
                }
                trace!(
                    pushed = pushed.len(),
                    retained = retained.len(),
                    "pushing predicates through projection"
                );
                let input = push_into(*input, pushed)?;
                Ok((
                    retained,
                    LogicalPlan::Projection {
                        input: Box::new(input),
                        exprs,
                        schema,
                    },
                ))
            }
            LogicalPlan::Aggregation {
                input,
                group_by,
                aggregates,
                schema,
            } => {
                let input = push_into(*input, vec![])?;
                Ok((
                    predicates,
                    LogicalPlan::Aggregation {
                        input: Box::new(input),
                        group_by,
                        aggregates,
                        schema,
                    },
                ))
            }
            LogicalPlan::Apply {
                outer,
                inner,
                outer_schema,
                checker,
                schema,
            } => {
                let outer = push_into(*outer, vec![])?;
                let inner = push_into(*inner, vec![])?;
                Ok((
                    predicates,
                    LogicalPlan::Apply {
                        outer: Box::new(outer),
                        inner: Box::new(inner),
                        outer_schema,
                        checker,
                        schema,
                    },
                ))
            }
            LogicalPlan::SemiJoin {
                outer,
                inner,
                conditions,
                anti,
                as_scalar,
                schema,
            } => {
                let outer = push_into(*outer, vec![])?;
                let inner = push_into(*inner, vec![])?;
                Ok((
                    predicates,
                    LogicalPlan::SemiJoin {
                        outer: Box::new(outer),
                        inner: Box::new(inner),
                        conditions,
                        anti,
                        as_scalar,
                        schema,
                    },
                ))
            }
            LogicalPlan::Exists { input, schema } => {
                let input = push_into(*input, vec![])?;
                Ok((
                    predicates,
                    LogicalPlan::Exists {
                        input: Box::new(input),
                        schema,
                    },
                ))
            }
            LogicalPlan::MaxOneRow { input } => {
                let input = push_into(*input, vec![])?;
                Ok((
                    predicates,
                    LogicalPlan::MaxOneRow {
                        input: Box::new(input),
                    },
                ))
            }
        }
    }

    /// Removes the columns that neither `required` nor any operator above
    /// the inputs needs, and points every column reference at its position
    /// in the schema it is evaluated against.
    ///
    /// Conditions of joins are evaluated against the outer schema followed
    /// by the inner schema. A reference to a column that is not available
    /// is an internal error.
    pub fn prune_columns_and_resolve_indices(
        &mut self,
        required: &BTreeSet<ColumnId>,
    ) -> Result<(), PlanError> {
        match self {
            LogicalPlan::Dual => Ok(()),
            LogicalPlan::TableScan { schema, .. } => {
                schema.retain(|c| required.contains(&c.id));
                Ok(())
            }
            LogicalPlan::Selection { input, conditions } => {
                let mut input_required = required.clone();
                for condition in conditions.iter() {
                    input_required.extend(condition.column_ids());
                }
                input.prune_columns_and_resolve_indices(&input_required)?;
                resolve_indices(conditions, input.schema())
            }
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } => {
                let mut kept_exprs = vec![];
                let mut kept_columns = vec![];
                for (expr, column) in exprs.drain(..).zip(schema.iter()) {
                    if required.contains(&column.id) || expr.contains_func(|f| f.is_volatile()) {
                        kept_exprs.push(expr);
                        kept_columns.push(column.clone());
                    }
                }
                *exprs = kept_exprs;
                *schema = Schema::new(kept_columns);
                let input_required = exprs.iter().flat_map(|e| e.column_ids()).collect();
                input.prune_columns_and_resolve_indices(&input_required)?;
                resolve_indices(exprs, input.schema())
            }
            LogicalPlan::Aggregation {
                input,
                group_by,
                aggregates,
                schema,
            } => {
                let mut kept_aggregates = vec![];
                let mut kept_columns = vec![];
                for (i, column) in schema.iter().enumerate() {
                    if required.contains(&column.id) {
                        if let Some(aggregate) = aggregates.get(i) {
                            kept_aggregates.push(aggregate.clone());
                        }
                        kept_columns.push(column.clone());
                    }
                }
                let mut input_required: BTreeSet<_> = kept_columns[kept_aggregates.len()..]
                    .iter()
                    .map(|c| c.id)
                    .collect();
                for expr in group_by
                    .iter()
                    .chain(kept_aggregates.iter().flat_map(|a| a.args.iter()))
                {
                    input_required.extend(expr.column_ids());
                }
                *aggregates = kept_aggregates;
                *schema = Schema::new(kept_columns);
                input.prune_columns_and_resolve_indices(&input_required)?;
                resolve_indices(group_by, input.schema())?;
                for aggregate in aggregates.iter_mut() {
                    resolve_indices(&mut aggregate.args, input.schema())?;
                }
                Ok(())
            }
            LogicalPlan::Apply {
                outer,
                inner,
                outer_schema,
                checker,
                schema,
            } => {
                let inner_required = inner.schema().iter().map(|c| c.id).collect();
                inner.prune_columns_and_resolve_indices(&inner_required)?;
                let mut outer_required = required.clone();
                outer_required.extend(outer_schema.iter().map(|c| c.id));
                if let Some(checker) = checker.as_ref() {
                    outer_required.extend(checker.condition.column_ids());
                }
                outer.prune_columns_and_resolve_indices(&outer_required)?;
                let joined = outer.schema().concat(inner.schema());
                let mut columns = joined.columns().to_vec();
                if let Some(checker) = checker.as_mut() {
                    resolve_indices(std::slice::from_mut(&mut checker.condition), &joined)?;
                    columns.extend(schema.last().cloned());
                }
                *schema = Schema::new(columns);
                Ok(())
            }
            LogicalPlan::SemiJoin {
                outer,
                inner,
                conditions,
                as_scalar,
                schema,
                ..
            } => {
                let condition_ids: BTreeSet<_> =
                    conditions.iter().flat_map(|c| c.column_ids()).collect();
                let mut outer_required = required.clone();
                outer_required.extend(condition_ids.iter().copied());
                outer.prune_columns_and_resolve_indices(&outer_required)?;
                inner.prune_columns_and_resolve_indices(&condition_ids)?;
                resolve_indices(conditions, &outer.schema().concat(inner.schema()))?;
                let mut columns = outer.schema().columns().to_vec();
                if *as_scalar {
                    columns.extend(schema.last().cloned());
                }
                *schema = Schema::new(columns);
                Ok(())
            }
            LogicalPlan::Exists { input, .. } => {
                input.prune_columns_and_resolve_indices(&BTreeSet::new())
            }
            LogicalPlan::MaxOneRow { input } => input.prune_columns_and_resolve_indices(required),
        }
    }

    /// Converts this plan into a physical plan.
    ///
    /// The plan must not refer to columns of an enclosing query.
    pub fn to_physical(&self) -> Result<PhysicalPlan, PlanError> {
        if self.is_correlated() {
            return Err(PlanError::internal(
                "cannot convert a correlated plan to a physical plan",
            ));
        }
        Ok(self.lower())
    }

    fn lower(&self) -> PhysicalPlan {
        match self {
            LogicalPlan::Dual => PhysicalPlan::Dual,
            LogicalPlan::TableScan { table, schema } => PhysicalPlan::TableScan {
                table: table.clone(),
                columns: schema.iter().map(|c| c.name.clone()).collect(),
                schema: schema.clone(),
            },
            LogicalPlan::Selection { input, conditions } => PhysicalPlan::Selection {
                input: Box::new(input.lower()),
                conditions: conditions.clone(),
            },
            LogicalPlan::Projection {
                input,
                exprs,
                schema,
            } => PhysicalPlan::Projection {
                input: Box::new(input.lower()),
                exprs: exprs.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Aggregation {
                input,
                group_by,
                aggregates,
                schema,
            } => PhysicalPlan::HashAggregate {
                input: Box::new(input.lower()),
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Apply {
                outer,
                inner,
                outer_schema,
                checker,
                schema,
            } => PhysicalPlan::Apply {
                outer: Box::new(outer.lower()),
                inner: Box::new(inner.lower()),
                outer_schema: outer_schema.clone(),
                checker: checker.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::SemiJoin {
                outer,
                inner,
                conditions,
                anti,
                as_scalar,
                schema,
            } => PhysicalPlan::SemiJoin {
                outer: Box::new(outer.lower()),
                inner: Box::new(inner.lower()),
                conditions: conditions.clone(),
                anti: *anti,
                as_scalar: *as_scalar,
                schema: schema.clone(),
            },
            LogicalPlan::Exists { input, schema } => PhysicalPlan::Exists {
                input: Box::new(input.lower()),
                schema: schema.clone(),
            },
            LogicalPlan::MaxOneRow { input } => PhysicalPlan::MaxOneRow {
                input: Box::new(input.lower()),
            },
        }
    }
}

/// Pushes `predicates` into `plan` and applies whatever is left on top.
fn push_into(plan: LogicalPlan, predicates: Vec<Expression>) -> Result<LogicalPlan, PlanError> {
    let (retained, plan) = plan.predicate_push_down(predicates)?;
    Ok(LogicalPlan::selection(plan, retained))
}

/// Rewrites `predicate`, which refers to the output of a projection, in terms
/// of the projection's input.
///
/// Returns `None` if that would evaluate a side effect more often.
fn substitute(predicate: &Expression, schema: &Schema, exprs: &[Expression]) -> Option<Expression> {
    let mut volatile = false;
    let mut out = predicate.clone();
    out.visit_mut_post(&mut |e| {
        if let Expression::Column(c) = e {
            if let Some(i) = schema.index_of(c.id) {
                let replacement = exprs[i].clone();
                volatile |= replacement.contains_func(|f| f.is_volatile());
                *e = replacement;
            }
        }
    });
    if volatile {
        None
    } else {
        Some(out)
    }
}

fn resolve_indices(exprs: &mut [Expression], schema: &Schema) -> Result<(), PlanError> {
    let mut result = Ok(());
    for expr in exprs {
        expr.visit_mut_post(&mut |e| {
            if let Expression::Column(column) = e {
                match schema.index_of(column.id) {
                    Some(i) => column.position = i,
                    None if result.is_ok() => {
                        result = Err(PlanError::internal(format!(
                            "column {} ({}) not found in {}",
                            column, column.id, schema
                        )))
                    }
                    None => (),
                }
            }
        });
    }
    result
}

/// Builds a schema holding the columns of `outer` followed by `extra`.
pub(crate) fn extend_schema(outer: &Schema, extra: impl IntoIterator<Item = Column>) -> Schema {
    let mut columns = outer.columns().to_vec();
    columns.extend(extra);
    Schema::new(columns)
}
