// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Catalog abstraction layer.
//!
//! The planner only needs to know which columns a table has. Everything else
//! about storage belongs to the implementor of [`Catalog`].

use std::fmt;

use serde::{Deserialize, Serialize};

use quill_repr::ScalarType;

/// A catalog keeps track of the tables a statement may refer to.
pub trait Catalog: fmt::Debug {
    /// Looks up a table by name.
    fn resolve_table(&self, name: &str) -> Result<TableDesc, CatalogError>;
}

/// The shape of a table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableDesc {
    pub database: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDesc>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    pub typ: ScalarType,
    pub nullable: bool,
}

impl TableDesc {
    pub fn new(name: impl Into<String>) -> TableDesc {
        TableDesc {
            database: None,
            name: name.into(),
            columns: vec![],
        }
    }

    /// Appends a nullable column.
    pub fn with_column(mut self, name: impl Into<String>, typ: ScalarType) -> TableDesc {
        self.columns.push(ColumnDesc {
            name: name.into(),
            typ,
            nullable: true,
        });
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("table \"{0}\" does not exist")]
    UnknownTable(String),
    #[error("table \"{table}\" is unavailable: {reason}")]
    Unavailable { table: String, reason: String },
}
