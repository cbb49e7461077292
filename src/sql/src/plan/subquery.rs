// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Rewriting of subqueries into plan operators.
//!
//! Every subquery is planned with the schema of the expression's plan pushed
//! onto the outer schema stack, so that its references to enclosing queries
//! become correlated columns. What happens next depends on the shape of the
//! subquery and on whether the resulting plan is correlated:
//!
//!   * an uncorrelated scalar or `EXISTS` subquery is executed right away
//!     and replaced by the values it produced;
//!   * an uncorrelated `IN` subquery becomes a semi-join, as does an
//!     `EXISTS` over a filter whose input is uncorrelated;
//!   * everything else becomes an apply, which evaluates the subquery once
//!     per row of the enclosing plan.

use tracing::debug;

use quill_expr::{decompose_comparison, row_len, split_cnf, Expression, Func};
use quill_repr::{Datum, Schema};

use crate::ast::{BinaryOperator, Expr, Quantifier, Query};
use crate::plan::error::PlanError;
use crate::plan::logical::{ConditionChecker, LogicalPlan};
use crate::plan::rewrite::ExpressionRewriter;

impl ExpressionRewriter<'_, '_> {
    /// `left op {ANY | ALL} (subquery)`
    pub(super) fn handle_compare_subquery(
        &mut self,
        left: &Expr,
        op: BinaryOperator,
        quantifier: Quantifier,
        subquery: &Query,
    ) -> Result<(), PlanError> {
        self.as_scalar = true;
        self.visit(left)?;
        let lexpr = self.peek()?.clone();
        let (inner, outer_schema) = self.build_subquery(subquery)?;

        let all = quantifier == Quantifier::All;
        let func = op.func();
        let width = inner.schema().len();
        let multi_column = (all && func == Func::Eq) || (!all && func == Func::NotEq);
        if !multi_column && (row_len(&lexpr) != 1 || width != 1) {
            return Err(PlanError::OperandColumns(1));
        }
        if row_len(&lexpr) != width {
            return Err(PlanError::OperandColumns(row_len(&lexpr)));
        }

        let rexpr = subquery_row(inner.schema())?;
        // Only the equality class can be distributed over the components of
        // a row. Other comparisons compare rows as composite values.
        let condition = if func.is_equality_class() {
            decompose_comparison(&lexpr, &rexpr, func)?
        } else {
            Expression::call(func, vec![lexpr, rexpr])?
        };
        let checker = ConditionChecker { condition, all };
        debug!(%checker, "rewriting quantified comparison as apply");

        let outer = self.take_plan();
        self.plan = self
            .builder
            .build_apply(outer, inner, outer_schema, Some(checker));
        let matched = self.last_column()?;
        self.replace_top(matched)
    }

    /// `EXISTS (subquery)`
    pub(super) fn handle_exists_subquery(&mut self, subquery: &Query) -> Result<(), PlanError> {
        let (inner, outer_schema) = self.build_subquery(subquery)?;
        let exists = self.builder.build_exists(inner);

        if !exists.is_correlated() {
            let (datums, schema) = self.evaluate_eagerly(exists)?;
            let value = constants(datums, &schema).swap_remove(0);
            debug!(%value, "evaluated uncorrelated EXISTS subquery");
            self.push(value);
            return Ok(());
        }

        match split_filtered_exists(exists) {
            Ok((input, conditions)) => {
                // A filter drops rows whose condition is unknown, whereas a
                // semi-join reports them as an unknown match.
                let conditions = conditions
                    .into_iter()
                    .map(|c| Expression::call(Func::IsTrue, vec![decorrelate(c)]))
                    .collect::<Result<Vec<_>, _>>()?;
                debug!(
                    conditions = conditions.len(),
                    as_scalar = self.as_scalar,
                    "rewriting correlated EXISTS subquery as semi-join"
                );
                let outer = self.take_plan();
                self.plan =
                    self.builder
                        .build_semi_join(outer, input, conditions, self.as_scalar, false);
                if !self.as_scalar {
                    return Ok(());
                }
            }
            Err(exists) => {
                debug!("rewriting correlated EXISTS subquery as apply");
                let outer = self.take_plan();
                self.plan = self.builder.build_apply(outer, exists, outer_schema, None);
            }
        }
        let matched = self.last_column()?;
        self.push(matched);
        Ok(())
    }

    /// `expr [NOT] IN (subquery)`
    pub(super) fn handle_in_subquery(
        &mut self,
        expr: &Expr,
        subquery: &Query,
        negated: bool,
    ) -> Result<(), PlanError> {
        let as_scalar = self.as_scalar;
        self.as_scalar = true;
        self.visit(expr)?;
        let lexpr = self.peek()?.clone();
        let (inner, outer_schema) = self.build_subquery(subquery)?;
        if row_len(&lexpr) != inner.schema().len() {
            return Err(PlanError::OperandColumns(row_len(&lexpr)));
        }
        let rexpr = subquery_row(inner.schema())?;
        let condition = decompose_comparison(&lexpr, &rexpr, Func::Eq)?;

        if !inner.is_correlated() {
            debug!(negated, as_scalar, "rewriting uncorrelated IN subquery as semi-join");
            let outer = self.take_plan();
            self.plan = self.builder.build_semi_join(
                outer,
                inner,
                split_cnf(condition),
                as_scalar,
                negated,
            );
            if as_scalar {
                let matched = self.last_column()?;
                self.replace_top(matched)?;
            } else {
                self.pop()?;
            }
            return Ok(());
        }

        // `x IN (...)` is `x = ANY (...)` and `x NOT IN (...)` is
        // `x != ALL (...)`.
        let condition = if negated {
            Expression::call(Func::Not, vec![condition])?
        } else {
            condition
        };
        let checker = ConditionChecker {
            condition,
            all: negated,
        };
        debug!(%checker, "rewriting correlated IN subquery as apply");
        let outer = self.take_plan();
        self.plan = self
            .builder
            .build_apply(outer, inner, outer_schema, Some(checker));
        let matched = self.last_column()?;
        self.replace_top(matched)
    }

    /// A subquery used as a value.
    pub(super) fn handle_scalar_subquery(&mut self, subquery: &Query) -> Result<(), PlanError> {
        let (inner, outer_schema) = self.build_subquery(subquery)?;
        let inner = self.builder.build_max_one_row(inner);

        if inner.is_correlated() {
            let value = subquery_row(inner.schema())?;
            debug!(columns = inner.schema().len(), "rewriting correlated scalar subquery as apply");
            let outer = self.take_plan();
            self.plan = self.builder.build_apply(outer, inner, outer_schema, None);
            self.push(value);
            return Ok(());
        }

        let (datums, schema) = self.evaluate_eagerly(inner)?;
        let mut values = constants(datums, &schema);
        let value = if values.len() == 1 {
            values.swap_remove(0)
        } else {
            Expression::call(Func::Row, values)?
        };
        debug!(%value, "evaluated uncorrelated scalar subquery");
        self.push(value);
        Ok(())
    }

    /// Plans `subquery` with the current schema as its innermost enclosing
    /// scope, returning the plan and that scope.
    fn build_subquery(&mut self, subquery: &Query) -> Result<(LogicalPlan, Schema), PlanError> {
        let plan = self.builder.build_subquery(subquery, &self.schema)?;
        Ok((plan, self.schema.clone()))
    }

    /// Optimizes and runs the uncorrelated `plan`, returning the values of
    /// its first row and the schema they belong to.
    fn evaluate_eagerly(&mut self, plan: LogicalPlan) -> Result<(Vec<Datum>, Schema), PlanError> {
        let (retained, plan) = plan.predicate_push_down(vec![])?;
        let mut plan = LogicalPlan::selection(plan, retained);
        let required = plan.schema().iter().map(|c| c.id).collect();
        plan.prune_columns_and_resolve_indices(&required)?;
        let physical = plan.to_physical()?;
        debug!(%physical, "evaluating subquery");
        let datums = self.builder.evaluate(&physical)?;
        let schema = plan.schema().clone();
        if datums.len() < schema.len() {
            return Err(PlanError::internal(format!(
                "subquery evaluation produced {} values for {} columns",
                datums.len(),
                schema.len()
            )));
        }
        Ok((datums, schema))
    }
}

/// The output of a subquery as one expression: its only column, or a row
/// over all of them.
fn subquery_row(schema: &Schema) -> Result<Expression, PlanError> {
    let mut columns: Vec<_> = schema.iter().cloned().map(Expression::Column).collect();
    if columns.len() == 1 {
        return Ok(columns.swap_remove(0));
    }
    Ok(Expression::call(Func::Row, columns)?)
}

/// Wraps each datum in a constant of the type of its column.
fn constants(datums: Vec<Datum>, schema: &Schema) -> Vec<Expression> {
    datums
        .into_iter()
        .zip(schema.iter())
        .map(|(datum, column)| Expression::literal(datum, column.typ.clone()))
        .collect()
}

/// Takes apart `Exists(Selection(input))` where `input` is uncorrelated,
/// returning `input` and the selection's conditions. Any other plan is
/// handed back unchanged.
fn split_filtered_exists(
    plan: LogicalPlan,
) -> Result<(LogicalPlan, Vec<Expression>), LogicalPlan> {
    match plan {
        LogicalPlan::Exists { input, schema } => match *input {
            LogicalPlan::Selection { input, conditions } if !input.is_correlated() => {
                Ok((*input, conditions))
            }
            input => Err(LogicalPlan::Exists {
                input: Box::new(input),
                schema,
            }),
        },
        plan => Err(plan),
    }
}

/// Moves a condition of a subquery one scope out.
///
/// References to the immediately enclosing query become plain columns;
/// references further out keep pointing at the same scope.
fn decorrelate(mut condition: Expression) -> Expression {
    condition.visit_mut_post(&mut |e| {
        if let Expression::CorrelatedColumn(c) = e {
            if c.depth == 1 {
                *e = Expression::Column(c.column.clone());
            } else {
                c.depth -= 1;
            }
        }
    });
    condition
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use quill_expr::CorrelatedColumn;
    use quill_repr::{Column, IdGen, ScalarType};

    use super::*;

    #[test]
    fn test_decorrelate() {
        let mut id_gen = IdGen::default();
        let inner = Column::new(id_gen.allocate_id(), "b", ScalarType::Int64);
        let near = Column::new(id_gen.allocate_id(), "a", ScalarType::Int64);
        let far = Column::new(id_gen.allocate_id(), "z", ScalarType::Int64);
        let correlated = |column: &Column, depth| {
            Expression::CorrelatedColumn(CorrelatedColumn {
                column: column.clone(),
                depth,
            })
        };
        let condition = Expression::call(
            Func::And,
            vec![
                Expression::call(
                    Func::Eq,
                    vec![Expression::Column(inner.clone()), correlated(&near, 1)],
                )
                .unwrap(),
                Expression::call(
                    Func::Eq,
                    vec![Expression::Column(inner.clone()), correlated(&far, 3)],
                )
                .unwrap(),
            ],
        )
        .unwrap();

        let out = decorrelate(condition);
        assert_eq!(out.column_ids(), BTreeSet::from([inner.id, near.id]));
        let depths: Vec<_> = out.correlated_columns().iter().map(|c| c.depth).collect();
        assert_eq!(depths, vec![2]);
    }

    #[test]
    fn test_subquery_row() {
        let mut id_gen = IdGen::default();
        let a = Column::new(id_gen.allocate_id(), "a", ScalarType::Int64);
        let b = Column::new(id_gen.allocate_id(), "b", ScalarType::String);
        let one = Schema::new(vec![a.clone()]);
        assert_eq!(subquery_row(&one).unwrap(), Expression::Column(one.columns()[0].clone()));
        let two = Schema::new(vec![a, b]);
        let row = subquery_row(&two).unwrap();
        assert_eq!(row_len(&row), 2);
        assert_eq!(
            row.typ(),
            ScalarType::Row(vec![ScalarType::Int64, ScalarType::String])
        );
    }
}
