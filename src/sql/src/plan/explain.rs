// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! `EXPLAIN` support for logical plans.

use std::fmt;

use itertools::Itertools;

use crate::plan::error::PlanError;
use crate::plan::logical::LogicalPlan;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExplainFormat {
    /// An indented operator tree, one operator per line.
    Text,
    Json,
}

impl LogicalPlan {
    /// Renders this plan in `format`.
    pub fn explain(&self, format: ExplainFormat) -> Result<String, PlanError> {
        match format {
            ExplainFormat::Text => Ok(self.to_string()),
            ExplainFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| PlanError::internal(format!("explain: {}", e))),
        }
    }

    fn fmt_text(&self, f: &mut fmt::Formatter, depth: usize) -> fmt::Result {
        write!(f, "{:width$}", "", width = depth * 2)?;
        match self {
            LogicalPlan::Dual => writeln!(f, "Dual")?,
            LogicalPlan::TableScan { table, schema } => {
                writeln!(f, "TableScan {} {}", table, schema)?
            }
            LogicalPlan::Selection { conditions, .. } => {
                writeln!(f, "Selection {}", conditions.iter().join(" AND "))?
            }
            LogicalPlan::Projection { exprs, .. } => {
                writeln!(f, "Projection {}", exprs.iter().join(", "))?
            }
            LogicalPlan::Aggregation {
                group_by,
                aggregates,
                ..
            } => {
                write!(f, "Aggregation [{}]", aggregates.iter().join(", "))?;
                if !group_by.is_empty() {
                    write!(f, " group_by=[{}]", group_by.iter().join(", "))?;
                }
                writeln!(f)?
            }
            LogicalPlan::Apply { checker, .. } => match checker {
                Some(checker) => writeln!(f, "Apply {}", checker)?,
                None => writeln!(f, "Apply")?,
            },
            LogicalPlan::SemiJoin {
                conditions,
                anti,
                as_scalar,
                ..
            } => {
                let kind = if *anti { "AntiSemiJoin" } else { "SemiJoin" };
                write!(f, "{} {}", kind, conditions.iter().join(" AND "))?;
                if *as_scalar {
                    write!(f, " (scalar)")?;
                }
                writeln!(f)?
            }
            LogicalPlan::Exists { .. } => writeln!(f, "Exists")?,
            LogicalPlan::MaxOneRow { .. } => writeln!(f, "MaxOneRow")?,
        }
        for child in self.children() {
            child.fmt_text(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_text(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use quill_expr::{Expression, Func};
    use quill_repr::{Column, Datum, IdGen, ScalarType, Schema};

    use super::*;

    #[test]
    fn test_explain_text() {
        let mut id_gen = IdGen::default();
        let a = Column::new(id_gen.allocate_id(), "a", ScalarType::Int64).with_table("t");
        let scan = LogicalPlan::TableScan {
            table: "t".into(),
            schema: Schema::new(vec![a.clone()]),
        };
        let plan = LogicalPlan::selection(
            scan,
            vec![Expression::call(
                Func::Gt,
                vec![Expression::Column(a), Expression::literal_datum(Datum::Int64(1))],
            )
            .unwrap()],
        );
        assert_eq!(
            plan.explain(ExplainFormat::Text).unwrap(),
            "Selection gt(t.a, 1)\n  TableScan t [t.a]\n"
        );
        let json = plan.explain(ExplainFormat::Json).unwrap();
        assert!(json.contains("\"Selection\""));
    }
}
