// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Test collaborators: an in-memory catalog, a naive executor for physical
//! plans, and a global variable store that counts its reads.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use quill_expr::{CorrelatedColumn, EvalError, Expression, Func, ScalarFunction};
use quill_repr::{Datum, Schema};
use quill_sql::ast::{AggregateFunc, Expr, Query, SelectItem, TableFactor};
use quill_sql::catalog::{Catalog, CatalogError, TableDesc};
use quill_sql::plan::{
    AggregateExpr, LogicalPlan, PhysicalPlan, PlanBuilder, PlanError, SubqueryEvaluator,
};
use quill_sql::session::{var, GlobalVarAccessor, Session, VarError};
use tracing_subscriber::EnvFilter;

pub type Row = Vec<Datum>;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a row from a list of values.
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        vec![$(quill_repr::Datum::from($value)),*]
    };
}

#[derive(Clone, Debug, Default)]
pub struct MemCatalog {
    tables: BTreeMap<String, (TableDesc, Vec<Row>)>,
}

impl MemCatalog {
    pub fn with_table(mut self, desc: TableDesc, rows: Vec<Row>) -> MemCatalog {
        for row in &rows {
            assert_eq!(row.len(), desc.columns.len(), "row arity for {}", desc.name);
        }
        self.tables.insert(desc.name.clone(), (desc, rows));
        self
    }

    fn rows(&self, name: &str) -> Result<&(TableDesc, Vec<Row>), EvalError> {
        self.tables
            .get(name)
            .ok_or_else(|| EvalError::Internal(format!("no table {}", name)))
    }
}

impl Catalog for MemCatalog {
    fn resolve_table(&self, name: &str) -> Result<TableDesc, CatalogError> {
        self.tables
            .get(name)
            .map(|(desc, _)| desc.clone())
            .ok_or_else(|| CatalogError::UnknownTable(name.to_owned()))
    }
}

/// Global system variables, with a count of how often they were read.
#[derive(Debug, Default)]
pub struct CountingGlobals {
    values: RefCell<BTreeMap<String, String>>,
    pub reads: Cell<usize>,
}

impl CountingGlobals {
    pub fn set(&self, name: &str, value: &str) {
        self.values
            .borrow_mut()
            .insert(name.to_owned(), value.to_owned());
    }
}

impl GlobalVarAccessor for CountingGlobals {
    fn get_global_sys_var(&self, name: &str) -> Result<String, VarError> {
        self.reads.set(self.reads.get() + 1);
        if let Some(value) = self.values.borrow().get(name) {
            return Ok(value.clone());
        }
        var::lookup(name)
            .map(|v| v.value.to_owned())
            .ok_or_else(|| VarError::UnknownParameter(name.to_owned()))
    }
}

/// The rows of the enclosing applies, innermost last.
type Env = Vec<(Schema, Row)>;

/// Executes physical plans row at a time over a [`MemCatalog`].
#[derive(Debug)]
pub struct Executor {
    catalog: MemCatalog,
    /// How many subqueries were evaluated while planning.
    pub evaluations: Cell<usize>,
    /// How many times a user variable assignment was evaluated.
    pub assignments: Cell<usize>,
}

impl Executor {
    pub fn new(catalog: &MemCatalog) -> Executor {
        Executor {
            catalog: catalog.clone(),
            evaluations: Cell::new(0),
            assignments: Cell::new(0),
        }
    }

    /// Optimizes `plan` the way the planner prepares subqueries and runs it.
    pub fn run(&self, plan: LogicalPlan, session: &Session) -> Result<Vec<Row>, anyhow::Error> {
        let (retained, plan) = plan.predicate_push_down(vec![])?;
        let mut plan = LogicalPlan::selection(plan, retained);
        let required = plan.schema().iter().map(|c| c.id).collect();
        plan.prune_columns_and_resolve_indices(&required)?;
        let physical = plan.to_physical()?;
        Ok(self.execute(&physical, session, &Env::new())?)
    }

    pub fn execute(
        &self,
        plan: &PhysicalPlan,
        session: &Session,
        env: &Env,
    ) -> Result<Vec<Row>, EvalError> {
        match plan {
            PhysicalPlan::Dual => Ok(vec![vec![]]),
            PhysicalPlan::TableScan { table, columns, .. } => {
                let (desc, rows) = self.catalog.rows(table)?;
                let mut positions = vec![];
                for name in columns {
                    let position = desc
                        .columns
                        .iter()
                        .position(|c| &c.name == name)
                        .ok_or_else(|| EvalError::Internal(format!("no column {}", name)))?;
                    positions.push(position);
                }
                Ok(rows
                    .iter()
                    .map(|row| positions.iter().map(|i| row[*i].clone()).collect())
                    .collect())
            }
            PhysicalPlan::Selection { input, conditions } => {
                let mut out = vec![];
                for row in self.execute(input, session, env)? {
                    if self.all_true(conditions, &row, session, env)? {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            PhysicalPlan::Projection { input, exprs, .. } => {
                let mut out = vec![];
                for row in self.execute(input, session, env)? {
                    let projected = exprs
                        .iter()
                        .map(|e| self.eval(e, &row, session, env))
                        .collect::<Result<_, _>>()?;
                    out.push(projected);
                }
                Ok(out)
            }
            PhysicalPlan::HashAggregate {
                input,
                group_by,
                aggregates,
                schema,
            } => {
                let input_schema = input.schema().clone();
                let rows = self.execute(input, session, env)?;
                let mut groups: BTreeMap<Row, Vec<Row>> = BTreeMap::new();
                for row in rows {
                    let key = group_by
                        .iter()
                        .map(|e| self.eval(e, &row, session, env))
                        .collect::<Result<_, _>>()?;
                    groups.entry(key).or_default().push(row);
                }
                if groups.is_empty() && group_by.is_empty() {
                    groups.insert(vec![], vec![]);
                }
                let mut out = vec![];
                for rows in groups.values() {
                    let mut result = vec![];
                    for aggregate in aggregates {
                        result.push(self.aggregate(aggregate, rows, session, env)?);
                    }
                    for column in &schema.columns()[aggregates.len()..] {
                        let i = input_schema.index_of(column.id).ok_or_else(|| {
                            EvalError::Internal(format!("no input column {}", column))
                        })?;
                        result.push(rows.first().map_or(Datum::Null, |r| r[i].clone()));
                    }
                    out.push(result);
                }
                Ok(out)
            }
            PhysicalPlan::Apply {
                outer,
                inner,
                checker,
                ..
            } => {
                let inner_width = inner.schema().len();
                let outer_schema = outer.schema().clone();
                let mut out = vec![];
                for row in self.execute(outer, session, env)? {
                    let mut inner_env = env.clone();
                    inner_env.push((outer_schema.clone(), row.clone()));
                    let inner_rows = self.execute(inner, session, &inner_env)?;
                    match checker {
                        None if inner_rows.is_empty() => {
                            out.push(concat(&row, &vec![Datum::Null; inner_width]));
                        }
                        None => {
                            for inner_row in inner_rows {
                                out.push(concat(&row, &inner_row));
                            }
                        }
                        Some(checker) => {
                            let mut outcomes = vec![];
                            for inner_row in &inner_rows {
                                let joined = concat(&row, inner_row);
                                let value = self.eval(&checker.condition, &joined, session, env)?;
                                outcomes.push(value.as_truth());
                            }
                            let mut result = concat(&row, &vec![Datum::Null; inner_width]);
                            result.push(Datum::from(checker.fold(outcomes)));
                            out.push(result);
                        }
                    }
                }
                Ok(out)
            }
            PhysicalPlan::SemiJoin {
                outer,
                inner,
                conditions,
                anti,
                as_scalar,
                ..
            } => {
                let inner_rows = self.execute(inner, session, env)?;
                let mut out = vec![];
                for row in self.execute(outer, session, env)? {
                    let mut matched = Some(false);
                    for inner_row in &inner_rows {
                        let joined = concat(&row, inner_row);
                        let mut outcome = Some(true);
                        for condition in conditions {
                            let value = self.eval(condition, &joined, session, env)?;
                            outcome = and(outcome, value.as_truth());
                        }
                        matched = or(matched, outcome);
                    }
                    if *anti {
                        matched = matched.map(|m| !m);
                    }
                    if *as_scalar {
                        let mut row = row;
                        row.push(Datum::from(matched));
                        out.push(row);
                    } else if matched == Some(true) {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            PhysicalPlan::Exists { input, .. } => {
                let rows = self.execute(input, session, env)?;
                Ok(vec![vec![Datum::Bool(!rows.is_empty())]])
            }
            PhysicalPlan::MaxOneRow { input } => {
                let rows = self.execute(input, session, env)?;
                if rows.len() > 1 {
                    return Err(EvalError::MultipleRows);
                }
                Ok(rows)
            }
        }
    }

    fn all_true(
        &self,
        conditions: &[Expression],
        row: &[Datum],
        session: &Session,
        env: &Env,
    ) -> Result<bool, EvalError> {
        for condition in conditions {
            if self.eval(condition, row, session, env)?.as_truth() != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn aggregate(
        &self,
        aggregate: &AggregateExpr,
        rows: &[Row],
        session: &Session,
        env: &Env,
    ) -> Result<Datum, EvalError> {
        let mut values = vec![];
        for row in rows {
            match aggregate.args.first() {
                Some(arg) => {
                    let value = self.eval(arg, row, session, env)?;
                    if !value.is_null() {
                        values.push(value);
                    }
                }
                None => values.push(Datum::Bool(true)),
            }
        }
        Ok(match aggregate.func {
            AggregateFunc::Count => Datum::Int64(values.len() as i64),
            AggregateFunc::Max => values.into_iter().max_by(|a, b| cmp_values(a, b)).into(),
            AggregateFunc::Min => values.into_iter().min_by(|a, b| cmp_values(a, b)).into(),
            AggregateFunc::Sum => match values.iter().map(as_f64).sum::<Option<f64>>() {
                Some(_) if values.is_empty() => Datum::Null,
                Some(sum) if values.iter().all(|v| matches!(v, Datum::Int64(_))) => {
                    Datum::Int64(sum as i64)
                }
                Some(sum) => Datum::from(sum),
                None => Datum::Null,
            },
            AggregateFunc::Avg => match values.iter().map(as_f64).sum::<Option<f64>>() {
                Some(_) if values.is_empty() => Datum::Null,
                Some(sum) => Datum::from(sum / values.len() as f64),
                None => Datum::Null,
            },
        })
    }

    fn eval(
        &self,
        expr: &Expression,
        row: &[Datum],
        session: &Session,
        env: &Env,
    ) -> Result<Datum, EvalError> {
        match expr {
            Expression::Column(c) => row.get(c.position).cloned().ok_or_else(|| {
                EvalError::Internal(format!("column {} at {} out of range", c, c.position))
            }),
            Expression::CorrelatedColumn(c) => lookup(env, c),
            Expression::Constant(c) => Ok(c.value.clone()),
            Expression::ScalarFunction(f) => self.eval_func(f, row, session, env),
        }
    }

    fn eval_func(
        &self,
        f: &ScalarFunction,
        row: &[Datum],
        session: &Session,
        env: &Env,
    ) -> Result<Datum, EvalError> {
        if f.func == Func::Case {
            for pair in f.args.chunks(2) {
                match pair {
                    [condition, result] => {
                        if self.eval(condition, row, session, env)?.as_truth() == Some(true) {
                            return self.eval(result, row, session, env);
                        }
                    }
                    [else_result] => return self.eval(else_result, row, session, env),
                    _ => unreachable!(),
                }
            }
            return Ok(Datum::Null);
        }

        let args: Vec<Datum> = f
            .args
            .iter()
            .map(|a| self.eval(a, row, session, env))
            .collect::<Result<_, _>>()?;
        let comparison = |pred: fn(Ordering) -> bool| {
            Datum::from(compare(&args[0], &args[1]).map(pred))
        };
        Ok(match &f.func {
            Func::Eq => comparison(|o| o == Ordering::Equal),
            Func::NotEq => comparison(|o| o != Ordering::Equal),
            Func::Lt => comparison(|o| o == Ordering::Less),
            Func::Lte => comparison(|o| o != Ordering::Greater),
            Func::Gt => comparison(|o| o == Ordering::Greater),
            Func::Gte => comparison(|o| o != Ordering::Less),
            Func::NullEq => match (&args[0], &args[1]) {
                (Datum::Null, Datum::Null) => Datum::Bool(true),
                (Datum::Null, _) | (_, Datum::Null) => Datum::Bool(false),
                (l, r) => Datum::Bool(compare(l, r) == Some(Ordering::Equal)),
            },
            Func::And => Datum::from(and(args[0].as_truth(), args[1].as_truth())),
            Func::Or => Datum::from(or(args[0].as_truth(), args[1].as_truth())),
            Func::Not => Datum::from(args[0].as_truth().map(|b| !b)),
            Func::IsNull => Datum::Bool(args[0].is_null()),
            Func::IsTrue => Datum::Bool(args[0].as_truth() == Some(true)),
            Func::IsFalse => Datum::Bool(args[0].as_truth() == Some(false)),
            Func::In => {
                let mut result = Some(false);
                for candidate in &args[1..] {
                    let eq = compare(&args[0], candidate).map(|o| o == Ordering::Equal);
                    result = or(result, eq);
                }
                Datum::from(result)
            }
            Func::Plus | Func::Minus => match (as_f64(&args[0]), as_f64(&args[1])) {
                (Some(l), Some(r)) => {
                    let value = if f.func == Func::Plus { l + r } else { l - r };
                    match f.typ {
                        quill_repr::ScalarType::Int64 => Datum::Int64(value as i64),
                        _ => Datum::from(value),
                    }
                }
                _ => Datum::Null,
            },
            Func::UnaryMinus => match &args[0] {
                Datum::Int64(i) => Datum::Int64(-i),
                d => Datum::from(as_f64(d).map(|v| -v)),
            },
            Func::Row => Datum::Row(args.clone()),
            Func::Cast(cast) => cast.eval(&args[0])?,
            Func::SetVar => {
                self.assignments.set(self.assignments.get() + 1);
                args[1].clone()
            }
            Func::GetVar => match &args[0] {
                Datum::String(name) => session.user_var(name).cloned().unwrap_or(Datum::Null),
                _ => Datum::Null,
            },
            other => {
                return Err(EvalError::Internal(format!(
                    "{} is not supported by the test executor",
                    other
                )))
            }
        })
    }
}

impl SubqueryEvaluator for Executor {
    fn evaluate(
        &self,
        plan: &PhysicalPlan,
        _catalog: &dyn Catalog,
        session: &Session,
    ) -> Result<Vec<Datum>, EvalError> {
        self.evaluations.set(self.evaluations.get() + 1);
        let rows = self.execute(plan, session, &Env::new())?;
        Ok(rows
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![Datum::Null; plan.schema().len()]))
    }
}

fn lookup(env: &Env, c: &CorrelatedColumn) -> Result<Datum, EvalError> {
    let frame = env
        .len()
        .checked_sub(c.depth)
        .and_then(|i| env.get(i))
        .ok_or_else(|| EvalError::Internal(format!("no scope at depth {}", c.depth)))?;
    let (schema, row) = frame;
    let i = schema
        .index_of(c.column.id)
        .ok_or_else(|| EvalError::Internal(format!("{} is not bound", c.column)))?;
    Ok(row[i].clone())
}

fn concat(left: &[Datum], right: &[Datum]) -> Row {
    left.iter().chain(right).cloned().collect()
}

fn and(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn as_f64(d: &Datum) -> Option<f64> {
    match d {
        Datum::Int64(i) => Some(*i as f64),
        Datum::UInt64(u) => Some(*u as f64),
        Datum::Float64(f) => Some(f.0),
        _ => None,
    }
}

/// SQL comparison: unknown if either side is null.
fn compare(l: &Datum, r: &Datum) -> Option<Ordering> {
    match (l, r) {
        (Datum::Null, _) | (_, Datum::Null) => None,
        (Datum::Row(l), Datum::Row(r)) => {
            for (l, r) in l.iter().zip(r) {
                match compare(l, r)? {
                    Ordering::Equal => (),
                    other => return Some(other),
                }
            }
            Some(l.len().cmp(&r.len()))
        }
        (l, r) => match (as_f64(l), as_f64(r)) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => Some(l.cmp(r)),
        },
    }
}

fn cmp_values(l: &Datum, r: &Datum) -> Ordering {
    compare(l, r).unwrap_or(Ordering::Equal)
}

/// Plans `query` as a top-level query.
pub fn plan_query(
    catalog: &MemCatalog,
    executor: &Executor,
    globals: &CountingGlobals,
    session: &mut Session,
    query: &Query,
) -> Result<LogicalPlan, PlanError> {
    let mut builder = PlanBuilder::new(catalog, session, globals, executor);
    builder.build_result_set_node(query)
}

/// `SELECT <projection> FROM <from> [WHERE <selection>]`
pub fn select(projection: Vec<Expr>, from: Option<&str>, selection: Option<Expr>) -> Query {
    Query {
        projection: projection
            .into_iter()
            .map(|expr| SelectItem::Expr { expr, alias: None })
            .collect(),
        from: from.map(|name| TableFactor {
            name: name.to_owned(),
            alias: None,
        }),
        selection,
        group_by: vec![],
    }
}

/// `SELECT * FROM <from> [WHERE <selection>]`
pub fn select_star(from: &str, selection: Option<Expr>) -> Query {
    Query {
        projection: vec![SelectItem::Wildcard],
        ..select(vec![], Some(from), selection)
    }
}

/// The operators of `plan`, in preorder.
pub fn operators(plan: &LogicalPlan) -> Vec<&'static str> {
    let mut out = vec![];
    let mut todo = vec![plan];
    while let Some(plan) = todo.pop() {
        out.push(match plan {
            LogicalPlan::Dual => "Dual",
            LogicalPlan::TableScan { .. } => "TableScan",
            LogicalPlan::Selection { .. } => "Selection",
            LogicalPlan::Projection { .. } => "Projection",
            LogicalPlan::Aggregation { .. } => "Aggregation",
            LogicalPlan::Apply { .. } => "Apply",
            LogicalPlan::SemiJoin { .. } => "SemiJoin",
            LogicalPlan::Exists { .. } => "Exists",
            LogicalPlan::MaxOneRow { .. } => "MaxOneRow",
        });
        todo.extend(plan.children().into_iter().rev());
    }
    out
}
