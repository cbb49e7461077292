// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Planning of query bodies.
//!
//! Only what the expression rewriter needs to recurse into subqueries is
//! supported: a single table (or none), a `WHERE` clause, `GROUP BY` and
//! aggregates, and the select list.

use std::collections::BTreeMap;

use tracing::trace;

use quill_expr::{split_cnf, Expression};
use quill_repr::{Schema, ScalarType};

use crate::ast::{
    AggregateCall, AggregateFunc, AggregateId, Expr, Query, SelectItem, TableFactor,
};
use crate::plan::builder::PlanBuilder;
use crate::plan::error::PlanError;
use crate::plan::logical::{AggregateExpr, LogicalPlan};

impl PlanBuilder<'_> {
    /// Plans `query` in the scope of the enclosing queries currently on the
    /// outer schema stack.
    pub fn build_result_set_node(&mut self, query: &Query) -> Result<LogicalPlan, PlanError> {
        let mut plan = match &query.from {
            Some(table) => self.build_table_scan(table)?,
            None => LogicalPlan::Dual,
        };
        let from_schema = plan.schema().clone();

        if let Some(selection) = &query.selection {
            let (condition, p) = self.rewrite(selection, plan, None, false)?;
            plan = match condition {
                Some(condition) => LogicalPlan::selection(p, split_cnf(condition)),
                None => p,
            };
        }

        let aggregates: Vec<&AggregateCall> = query
            .projection
            .iter()
            .flat_map(|item| match item {
                SelectItem::Expr { expr, .. } => expr.aggregates(),
                SelectItem::Wildcard => vec![],
            })
            .collect();
        let mut agg_map = None;
        if !aggregates.is_empty() || !query.group_by.is_empty() {
            let (p, map) = self.build_aggregation(plan, &query.group_by, &aggregates)?;
            plan = p;
            agg_map = Some(map);
        }

        self.build_projection(plan, &query.projection, &from_schema, agg_map.as_ref())
    }

    fn build_table_scan(&mut self, table: &TableFactor) -> Result<LogicalPlan, PlanError> {
        let desc = self.catalog.resolve_table(&table.name)?;
        let qualifier = table.alias.clone().unwrap_or_else(|| desc.name.clone());
        let mut columns = Vec::with_capacity(desc.columns.len());
        for c in &desc.columns {
            let mut column = self
                .allocate_column(c.name.clone(), c.typ.clone())
                .with_table(qualifier.clone())
                .nullable(c.nullable);
            if table.alias.is_none() {
                column.database = desc.database.clone();
            }
            columns.push(column);
        }
        trace!(table = %desc.name, columns = columns.len(), "planning table scan");
        Ok(LogicalPlan::TableScan {
            table: desc.name,
            schema: Schema::new(columns),
        })
    }

    /// Rewrites an expression whose value is needed, threading the plan.
    fn rewrite_scalar(
        &mut self,
        expr: &Expr,
        plan: LogicalPlan,
        agg_map: Option<&BTreeMap<AggregateId, usize>>,
    ) -> Result<(Expression, LogicalPlan), PlanError> {
        match self.rewrite(expr, plan, agg_map, true)? {
            (Some(expr), plan) => Ok((expr, plan)),
            (None, _) => Err(PlanError::internal("scalar rewrite produced no expression")),
        }
    }

    fn build_aggregation(
        &mut self,
        mut plan: LogicalPlan,
        group_by: &[Expr],
        calls: &[&AggregateCall],
    ) -> Result<(LogicalPlan, BTreeMap<AggregateId, usize>), PlanError> {
        let mut group_exprs = Vec::with_capacity(group_by.len());
        for expr in group_by {
            let (expr, p) = self.rewrite_scalar(expr, plan, None)?;
            plan = p;
            group_exprs.push(expr);
        }

        let mut aggregates = Vec::with_capacity(calls.len());
        let mut columns = Vec::with_capacity(calls.len() + plan.schema().len());
        let mut agg_map = BTreeMap::new();
        for (i, call) in calls.iter().enumerate() {
            let mut args = Vec::with_capacity(call.args.len());
            for arg in &call.args {
                let (arg, p) = self.rewrite_scalar(arg, plan, None)?;
                plan = p;
                args.push(arg);
            }
            let input_type = args.first().map_or(ScalarType::Null, |a| a.typ());
            let typ = call.func.output_type(&input_type);
            let column = self
                .allocate_column(call.func.to_string(), typ)
                .nullable(call.func != AggregateFunc::Count);
            columns.push(column);
            aggregates.push(AggregateExpr {
                func: call.func,
                args,
                distinct: call.distinct,
            });
            agg_map.insert(call.id, i);
        }
        columns.extend(plan.schema().iter().cloned());

        Ok((
            LogicalPlan::Aggregation {
                input: Box::new(plan),
                group_by: group_exprs,
                aggregates,
                schema: Schema::new(columns),
            },
            agg_map,
        ))
    }

    fn build_projection(
        &mut self,
        mut plan: LogicalPlan,
        items: &[SelectItem],
        from_schema: &Schema,
        agg_map: Option<&BTreeMap<AggregateId, usize>>,
    ) -> Result<LogicalPlan, PlanError> {
        let mut exprs = vec![];
        let mut columns = vec![];
        for item in items {
            match item {
                SelectItem::Wildcard => {
                    for c in from_schema {
                        let mut column = self.allocate_column(c.name.clone(), c.typ.clone());
                        column.table = c.table.clone();
                        columns.push(column);
                        exprs.push(Expression::Column(c.clone()));
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    let (e, p) = self.rewrite_scalar(expr, plan, agg_map)?;
                    plan = p;
                    let name = match (alias, expr) {
                        (Some(alias), _) => alias.clone(),
                        (None, Expr::Identifier(name)) => name.column.clone(),
                        (None, expr) => expr.to_string(),
                    };
                    columns.push(self.allocate_column(name, e.typ()));
                    exprs.push(e);
                }
            }
        }
        Ok(LogicalPlan::Projection {
            input: Box::new(plan),
            exprs,
            schema: Schema::new(columns),
        })
    }
}
