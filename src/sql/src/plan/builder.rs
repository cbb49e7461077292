// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use tracing::{debug, trace};

use quill_expr::{Expression, FunctionRegistry};
use quill_repr::{Column, Datum, IdGen, ScalarType, Schema};

use crate::ast::Query;
use crate::catalog::Catalog;
use crate::plan::error::PlanError;
use crate::plan::logical::{extend_schema, ConditionChecker, LogicalPlan};
use crate::plan::physical::{PhysicalPlan, SubqueryEvaluator};
use crate::session::{GlobalVarAccessor, Session, SysVar, VarScope};

/// Builds the logical plan of one statement.
///
/// A builder hands out the column ids of the statement, so it must not be
/// reused across statements.
#[derive(Debug)]
pub struct PlanBuilder<'a> {
    pub(super) catalog: &'a dyn Catalog,
    pub(super) session: &'a mut Session,
    globals: &'a dyn GlobalVarAccessor,
    evaluator: &'a dyn SubqueryEvaluator,
    pub(super) functions: FunctionRegistry,
    pub(super) params: Vec<Datum>,
    id_gen: IdGen,
    /// The schemas of the enclosing queries, innermost last.
    pub(super) outer_schemas: Vec<Schema>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        session: &'a mut Session,
        globals: &'a dyn GlobalVarAccessor,
        evaluator: &'a dyn SubqueryEvaluator,
    ) -> PlanBuilder<'a> {
        PlanBuilder {
            catalog,
            session,
            globals,
            evaluator,
            functions: FunctionRegistry::builtin(),
            params: vec![],
            id_gen: IdGen::default(),
            outer_schemas: vec![],
        }
    }

    /// Replaces the builtin function registry.
    pub fn with_functions(mut self, functions: FunctionRegistry) -> PlanBuilder<'a> {
        self.functions = functions;
        self
    }

    /// Binds the values of `$1`, `$2`, and so on.
    pub fn with_params(mut self, params: Vec<Datum>) -> PlanBuilder<'a> {
        self.params = params;
        self
    }

    /// The schemas of the queries enclosing the one being built.
    pub fn outer_schemas(&self) -> &[Schema] {
        &self.outer_schemas
    }

    /// Makes a column with a fresh id.
    pub fn allocate_column(&mut self, name: impl Into<String>, typ: ScalarType) -> Column {
        Column::new(self.id_gen.allocate_id(), name, typ)
    }

    /// Builds the plan of a subquery with `outer` as its innermost enclosing
    /// schema. The outer schema stack is restored on every exit path.
    pub(super) fn build_subquery(
        &mut self,
        query: &Query,
        outer: &Schema,
    ) -> Result<LogicalPlan, PlanError> {
        self.outer_schemas.push(outer.clone());
        trace!(depth = self.outer_schemas.len(), "building subquery");
        let mut builder = scopeguard::guard(self, |builder| {
            builder.outer_schemas.pop();
        });
        builder.build_result_set_node(query)
    }

    /// Evaluates `inner` for every row of `outer`.
    ///
    /// The schema is that of `outer` followed by that of `inner`, plus a
    /// boolean match column if `checker` is given.
    pub fn build_apply(
        &mut self,
        outer: LogicalPlan,
        inner: LogicalPlan,
        outer_schema: Schema,
        checker: Option<ConditionChecker>,
    ) -> LogicalPlan {
        let mut columns = outer.schema().concat(inner.schema()).columns().to_vec();
        if checker.is_some() {
            columns.push(self.allocate_column("exists_row", ScalarType::Bool));
        }
        LogicalPlan::Apply {
            outer: Box::new(outer),
            inner: Box::new(inner),
            outer_schema,
            checker,
            schema: Schema::new(columns),
        }
    }

    /// Filters `outer` by whether some row of `inner` satisfies
    /// `conditions`, or none does if `anti` is set.
    ///
    /// With `as_scalar` the outcome becomes a trailing boolean column instead
    /// of a filter.
    pub fn build_semi_join(
        &mut self,
        outer: LogicalPlan,
        inner: LogicalPlan,
        conditions: Vec<Expression>,
        as_scalar: bool,
        anti: bool,
    ) -> LogicalPlan {
        let aux = as_scalar.then(|| self.allocate_column("aux", ScalarType::Bool));
        let schema = extend_schema(outer.schema(), aux);
        LogicalPlan::SemiJoin {
            outer: Box::new(outer),
            inner: Box::new(inner),
            conditions,
            anti,
            as_scalar,
            schema,
        }
    }

    /// Tests `plan` for rows.
    ///
    /// Projections on top of `plan` cannot change whether it produces rows,
    /// so they are dropped unless they have side effects.
    pub fn build_exists(&mut self, mut plan: LogicalPlan) -> LogicalPlan {
        loop {
            match plan {
                LogicalPlan::Projection { input, exprs, .. }
                    if !exprs.iter().any(|e| e.contains_func(|f| f.is_volatile())) =>
                {
                    plan = *input;
                }
                _ => break,
            }
        }
        let exists = self.allocate_column("exists", ScalarType::Bool).nullable(false);
        LogicalPlan::Exists {
            input: Box::new(plan),
            schema: Schema::new(vec![exists]),
        }
    }

    /// Makes `plan` fail at runtime if it produces more than one row.
    pub fn build_max_one_row(&mut self, plan: LogicalPlan) -> LogicalPlan {
        LogicalPlan::MaxOneRow {
            input: Box::new(plan),
        }
    }

    /// Runs an uncorrelated physical plan, returning the datums of its first
    /// row.
    pub(super) fn evaluate(&self, plan: &PhysicalPlan) -> Result<Vec<Datum>, PlanError> {
        Ok(self.evaluator.evaluate(plan, self.catalog, &*self.session)?)
    }

    /// Reads the system variable `var`, in its global scope if `global` is
    /// set.
    ///
    /// A session scoped read that finds no session value falls back to the
    /// global value, which is then stored in the session.
    pub(super) fn system_var_value(
        &mut self,
        var: &'static SysVar,
        global: bool,
    ) -> Result<String, PlanError> {
        if var.scope == VarScope::None {
            return Ok(var.value.to_owned());
        }
        if global {
            return Ok(self.globals.get_global_sys_var(var.name)?);
        }
        if let Some(value) = self.session.system_var(var.name) {
            return Ok(value.to_owned());
        }
        if !var.scope.has_global() {
            return Ok(var.value.to_owned());
        }
        let value = self.globals.get_global_sys_var(var.name)?;
        debug!(name = var.name, %value, "caching global system variable in session");
        self.session.set_system_var(var.name, value.clone())?;
        Ok(value)
    }
}
