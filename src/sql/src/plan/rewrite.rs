// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Translation of SQL expressions into [`Expression`]s.
//!
//! The rewriter walks the AST depth first. When it enters a node it may
//! intercept it entirely (subqueries, aggregates); otherwise it visits the
//! operands, which leave their translations on a working stack, and then
//! builds the node itself from the top of that stack. Subqueries are
//! rewritten into plan operators stacked on top of the plan the expression
//! is evaluated against, so the rewriter threads that plan through and hands
//! it back to the caller along with the translated expression.

use std::collections::BTreeMap;
use std::mem;

use tracing::trace;

use quill_expr::{decompose_comparison, row_len, CastFunc, CorrelatedColumn, Expression, Func};
use quill_repr::{ColumnName, Datum, ScalarType, Schema};

use crate::ast::{AggregateCall, AggregateId, Expr, UnaryOperator, Variable, WhenClause};
use crate::plan::builder::PlanBuilder;
use crate::plan::error::PlanError;
use crate::plan::logical::{extend_schema, LogicalPlan};
use crate::session::var;

impl PlanBuilder<'_> {
    /// Rewrites `expr` in the context of `plan`.
    ///
    /// `agg_map` maps aggregate calls to the column of `plan` that holds
    /// their result. `as_scalar` requests a value for the expression; when
    /// it is not set, predicates that can be expressed by filtering `plan`
    /// (e.g. `WHERE x IN (SELECT ...)`) may be absorbed into the returned
    /// plan, in which case no expression is returned.
    pub fn rewrite(
        &mut self,
        expr: &Expr,
        plan: LogicalPlan,
        agg_map: Option<&BTreeMap<AggregateId, usize>>,
        as_scalar: bool,
    ) -> Result<(Option<Expression>, LogicalPlan), PlanError> {
        let schema = plan.schema().clone();
        let mut rewriter = ExpressionRewriter {
            builder: self,
            stack: vec![],
            plan,
            schema,
            agg_map,
            as_scalar,
        };
        rewriter.visit(expr)?;

        let ExpressionRewriter {
            mut stack, plan, ..
        } = rewriter;
        if !as_scalar && stack.is_empty() {
            return Ok((None, plan));
        }
        if stack.len() != 1 {
            return Err(PlanError::InvalidStack(stack.len()));
        }
        let expr = stack.remove(0);
        if row_len(&expr) != 1 {
            return Err(PlanError::OperandColumns(1));
        }
        Ok((Some(expr), plan))
    }
}

/// The state of one [`PlanBuilder::rewrite`] call.
#[derive(Debug)]
pub(super) struct ExpressionRewriter<'r, 'a> {
    pub(super) builder: &'r mut PlanBuilder<'a>,
    /// Translations of the operands of the nodes that are still open.
    pub(super) stack: Vec<Expression>,
    /// The plan the expression is evaluated against, grown by subqueries.
    pub(super) plan: LogicalPlan,
    /// The schema names are resolved against. It is the schema of the plan
    /// as it was passed in: operators added on top keep those columns.
    pub(super) schema: Schema,
    agg_map: Option<&'r BTreeMap<AggregateId, usize>>,
    /// Whether the expression being visited must produce a value. Once set
    /// it stays set for the rest of the traversal.
    pub(super) as_scalar: bool,
}

impl ExpressionRewriter<'_, '_> {
    pub(super) fn visit(&mut self, expr: &Expr) -> Result<(), PlanError> {
        match expr {
            Expr::Aggregate(call) => return self.aggregate_column(call),
            Expr::Quantified {
                left,
                op,
                quantifier,
                subquery,
            } => return self.handle_compare_subquery(left, *op, *quantifier, subquery),
            Expr::Exists(subquery) => return self.handle_exists_subquery(subquery),
            Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => return self.handle_in_subquery(expr, subquery, *negated),
            Expr::Subquery(subquery) => return self.handle_scalar_subquery(subquery),
            Expr::Nested(_) => (),
            _ => self.as_scalar = true,
        }
        for operand in operands(expr) {
            self.visit(operand)?;
        }
        self.leave(expr)
    }

    /// Builds `expr` from the translations of its operands on the stack.
    fn leave(&mut self, expr: &Expr) -> Result<(), PlanError> {
        match expr {
            Expr::Nested(_) => Ok(()),
            Expr::Identifier(name) => {
                let column = self.resolve_column(name)?;
                self.push(column);
                Ok(())
            }
            Expr::Value(datum) => {
                self.push(Expression::literal_datum(datum.clone()));
                Ok(())
            }
            Expr::Parameter(n) => {
                let value = n
                    .checked_sub(1)
                    .and_then(|i| self.builder.params.get(i))
                    .ok_or(PlanError::UnknownParameter(*n))?;
                self.push(Expression::literal_datum(value.clone()));
                Ok(())
            }
            Expr::Position(n) => {
                let column = n
                    .checked_sub(1)
                    .and_then(|i| self.schema.get(i))
                    .ok_or(PlanError::PositionOutOfRange(*n))?;
                self.push(Expression::Column(column.clone()));
                Ok(())
            }
            Expr::UnaryOp { op, .. } => self.unary_op(*op),
            Expr::BinaryOp { op, .. } => {
                let mut args = self.pop_n(2)?;
                let (right, left) = (args.remove(1), args.remove(0));
                let func = op.func();
                let expr = if func.is_equality_class() {
                    decompose_comparison(&left, &right, func)?
                } else {
                    Expression::call(func, vec![left, right])?
                };
                self.push(expr);
                Ok(())
            }
            Expr::Between { negated, .. } => self.between(*negated),
            Expr::Case {
                operand,
                when_clauses,
                else_result,
            } => self.case(operand.is_some(), when_clauses, else_result.is_some()),
            Expr::Like {
                escape, negated, ..
            } => {
                let mut args = self.pop_n(2)?;
                let escape = i64::from(u32::from(*escape));
                args.push(Expression::literal(Datum::Int64(escape), ScalarType::Int64));
                let expr = not_to_expression(*negated, Func::Like, args)?;
                self.push(expr);
                Ok(())
            }
            Expr::Regexp { negated, .. } => {
                let args = self.pop_n(2)?;
                let expr = not_to_expression(*negated, Func::Regexp, args)?;
                self.push(expr);
                Ok(())
            }
            Expr::InList { list, negated, .. } => {
                let args = self.pop_n(list.len() + 1)?;
                let expr = not_to_expression(*negated, Func::In, args)?;
                self.push(expr);
                Ok(())
            }
            Expr::Row(exprs) => {
                let args = self.pop_n(exprs.len())?;
                self.push(Expression::call(Func::Row, args)?);
                Ok(())
            }
            Expr::Cast { data_type, .. } => {
                let cast = CastFunc::for_type(data_type)?;
                let arg = self.pop()?;
                self.push(Expression::call(Func::Cast(cast), vec![arg])?);
                Ok(())
            }
            Expr::Function { name, args } => {
                let args = self.pop_n(args.len())?;
                let expr = self.builder.functions.call(&name.to_lowercase(), args)?;
                self.push(expr);
                Ok(())
            }
            Expr::IsNull { negated, .. } => {
                let arg = self.pop()?;
                if row_len(&arg) != 1 {
                    return Err(PlanError::OperandColumns(1));
                }
                let expr = not_to_expression(*negated, Func::IsNull, vec![arg])?;
                self.push(expr);
                Ok(())
            }
            Expr::IsTruth { truth, negated, .. } => {
                let func = if *truth { Func::IsTrue } else { Func::IsFalse };
                let arg = self.pop()?;
                let expr = not_to_expression(*negated, func, vec![arg])?;
                self.push(expr);
                Ok(())
            }
            Expr::Variable(variable) => self.variable(variable),
            Expr::Aggregate(_)
            | Expr::Quantified { .. }
            | Expr::Exists(_)
            | Expr::InSubquery { .. }
            | Expr::Subquery(_) => Err(PlanError::internal(format!(
                "{} is rewritten when it is entered",
                expr
            ))),
        }
    }

    fn aggregate_column(&mut self, call: &AggregateCall) -> Result<(), PlanError> {
        let index = self
            .agg_map
            .and_then(|map| map.get(&call.id))
            .ok_or(PlanError::AggregateNotAllowed)?;
        let column = self.schema.get(*index).ok_or_else(|| {
            PlanError::internal(format!(
                "aggregate {} maps to column {} of {}",
                call.func, index, self.schema
            ))
        })?;
        self.push(Expression::Column(column.clone()));
        Ok(())
    }

    /// Resolves `name` against the current schema, then against the
    /// enclosing queries from the innermost outwards.
    fn resolve_column(&self, name: &ColumnName) -> Result<Expression, PlanError> {
        if let Some(column) = self.schema.find_column(name)? {
            return Ok(Expression::Column(column.clone()));
        }
        let outer = &self.builder.outer_schemas;
        for (i, schema) in outer.iter().enumerate().rev() {
            if let Some(column) = schema.find_column(name)? {
                let depth = outer.len() - i;
                trace!(%name, depth, "resolved correlated column");
                return Ok(Expression::CorrelatedColumn(CorrelatedColumn {
                    column: column.clone(),
                    depth,
                }));
            }
        }
        Err(PlanError::UnknownColumn(name.clone()))
    }

    fn unary_op(&mut self, op: UnaryOperator) -> Result<(), PlanError> {
        let arg = self.pop()?;
        if row_len(&arg) != 1 {
            return Err(PlanError::OperandColumns(1));
        }
        let func = match op {
            UnaryOperator::Plus => {
                self.push(arg);
                return Ok(());
            }
            UnaryOperator::Minus => Func::UnaryMinus,
            UnaryOperator::BitNeg => Func::BitNeg,
            UnaryOperator::Not => Func::Not,
        };
        self.push(Expression::call(func, vec![arg])?);
        Ok(())
    }

    /// `v BETWEEN lo AND hi` is `v >= lo AND v <= hi`, and `v NOT BETWEEN lo
    /// AND hi` is `v < lo OR v > hi`.
    fn between(&mut self, negated: bool) -> Result<(), PlanError> {
        let mut args = self.pop_n(3)?;
        let (high, low, value) = (args.remove(2), args.remove(1), args.remove(0));
        let value = self.materialize(value, "between")?;
        let (low_func, high_func, join) = if negated {
            (Func::Lt, Func::Gt, Func::Or)
        } else {
            (Func::Gte, Func::Lte, Func::And)
        };
        let l = Expression::call(low_func, vec![value.clone(), low])?;
        let r = Expression::call(high_func, vec![value, high])?;
        self.push(Expression::call(join, vec![l, r])?);
        Ok(())
    }

    fn case(
        &mut self,
        has_operand: bool,
        when_clauses: &[WhenClause],
        has_else: bool,
    ) -> Result<(), PlanError> {
        let n = 2 * when_clauses.len() + usize::from(has_else);
        let mut args = self.pop_n(n)?;
        if has_operand {
            let operand = self.pop()?;
            let operand = self.materialize(operand, "case")?;
            for condition in args.iter_mut().take(2 * when_clauses.len()).step_by(2) {
                let when = mem::replace(condition, Expression::literal_null());
                *condition = Expression::call(Func::Eq, vec![operand.clone(), when])?;
            }
        }
        self.push(Expression::call(Func::Case, args)?);
        Ok(())
    }

    fn variable(&mut self, variable: &Variable) -> Result<(), PlanError> {
        let name = variable.name.to_lowercase();
        if !variable.is_system {
            if variable.value.is_some() {
                let value = self.pop()?;
                let name = Expression::literal(Datum::String(name), ScalarType::String);
                self.push(Expression::call(Func::SetVar, vec![name, value])?);
            } else if self.builder.session.user_var(&name).is_some() {
                let name = Expression::literal(Datum::String(name), ScalarType::String);
                self.push(Expression::call(Func::GetVar, vec![name])?);
            } else {
                self.push(Expression::literal_null());
            }
            return Ok(());
        }

        let sys_var = var::lookup(&name).ok_or(PlanError::UnknownSystemVariable(name))?;
        let value = self.builder.system_var_value(sys_var, variable.is_global)?;
        self.push(Expression::literal(Datum::String(value), ScalarType::String));
        Ok(())
    }

    /// Makes `expr` safe to reference more than once.
    ///
    /// An expression with side effects is computed by a projection over the
    /// current plan and replaced by a reference to the projected column, so
    /// it is evaluated once per row no matter how often it is referenced.
    fn materialize(&mut self, expr: Expression, name: &str) -> Result<Expression, PlanError> {
        if !expr.contains_func(|f| f.is_volatile()) {
            return Ok(expr);
        }
        let column = self.builder.allocate_column(name, expr.typ());
        let input = self.take_plan();
        let mut exprs: Vec<_> = input
            .schema()
            .iter()
            .cloned()
            .map(Expression::Column)
            .collect();
        exprs.push(expr);
        let schema = extend_schema(input.schema(), Some(column.clone()));
        trace!(%column, "materializing volatile operand");
        self.plan = LogicalPlan::Projection {
            input: Box::new(input),
            exprs,
            schema,
        };
        Ok(Expression::Column(column))
    }

    pub(super) fn push(&mut self, expr: Expression) {
        self.stack.push(expr);
    }

    pub(super) fn pop(&mut self) -> Result<Expression, PlanError> {
        self.stack
            .pop()
            .ok_or(PlanError::InvalidStack(self.stack.len()))
    }

    /// Pops the top `n` entries, returned in the order they were pushed.
    fn pop_n(&mut self, n: usize) -> Result<Vec<Expression>, PlanError> {
        let len = self.stack.len();
        if len < n {
            return Err(PlanError::InvalidStack(len));
        }
        Ok(self.stack.split_off(len - n))
    }

    pub(super) fn peek(&self) -> Result<&Expression, PlanError> {
        self.stack
            .last()
            .ok_or(PlanError::InvalidStack(self.stack.len()))
    }

    pub(super) fn replace_top(&mut self, expr: Expression) -> Result<(), PlanError> {
        self.pop()?;
        self.push(expr);
        Ok(())
    }

    /// Takes the plan out of the rewriter, for wrapping in a new operator.
    pub(super) fn take_plan(&mut self) -> LogicalPlan {
        mem::replace(&mut self.plan, LogicalPlan::Dual)
    }

    /// A reference to the last column of the plan, which is where apply and
    /// semi-join operators put their outcome.
    pub(super) fn last_column(&self) -> Result<Expression, PlanError> {
        self.plan
            .schema()
            .last()
            .cloned()
            .map(Expression::Column)
            .ok_or_else(|| PlanError::internal("plan has no columns"))
    }
}

/// Builds `func(args)`, wrapped in a negation if `negated` is set.
fn not_to_expression(
    negated: bool,
    func: Func,
    args: Vec<Expression>,
) -> Result<Expression, PlanError> {
    let expr = Expression::call(func, args)?;
    if !negated {
        return Ok(expr);
    }
    Ok(Expression::call(Func::Not, vec![expr])?)
}

/// The operands of `expr` whose translations `leave` expects on the stack,
/// in push order.
fn operands(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Identifier(_)
        | Expr::Value(_)
        | Expr::Parameter(_)
        | Expr::Position(_)
        | Expr::Aggregate(_)
        | Expr::Exists(_)
        | Expr::Subquery(_)
        | Expr::InSubquery { .. }
        | Expr::Quantified { .. } => vec![],
        Expr::Nested(expr)
        | Expr::UnaryOp { expr, .. }
        | Expr::Cast { expr, .. }
        | Expr::IsNull { expr, .. }
        | Expr::IsTruth { expr, .. } => vec![expr.as_ref()],
        Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        Expr::Between {
            expr, low, high, ..
        } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
        Expr::Case {
            operand,
            when_clauses,
            else_result,
        } => {
            let mut out: Vec<&Expr> = vec![];
            out.extend(operand.as_deref());
            for clause in when_clauses {
                out.push(&clause.condition);
                out.push(&clause.result);
            }
            out.extend(else_result.as_deref());
            out
        }
        Expr::Like { expr, pattern, .. } | Expr::Regexp { expr, pattern, .. } => {
            vec![expr.as_ref(), pattern.as_ref()]
        }
        Expr::InList { expr, list, .. } => {
            let mut out = vec![expr.as_ref()];
            out.extend(list);
            out
        }
        Expr::Row(exprs) | Expr::Function { args: exprs, .. } => exprs.iter().collect(),
        Expr::Variable(var) => var.value.as_deref().into_iter().collect(),
    }
}
