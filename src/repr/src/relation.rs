// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::ScalarType;

/// Identifies a column for the lifetime of a statement.
///
/// Positions change as plans are stacked on top of each other (an apply
/// appends the inner columns after the outer ones, pruning drops columns),
/// but a column keeps its id from the moment the operator that produces it
/// is built.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub u64);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out fresh [`ColumnId`]s.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u64,
}

impl IdGen {
    /// Allocates a new id.
    pub fn allocate_id(&mut self) -> ColumnId {
        let id = ColumnId(self.next);
        self.next += 1;
        id
    }
}

/// A possibly qualified column name, as written in a query.
///
/// Matching is case insensitive. Unqualified parts match anything.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ColumnName {
    pub database: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

impl ColumnName {
    /// An unqualified column name.
    pub fn bare(column: impl Into<String>) -> ColumnName {
        ColumnName {
            database: None,
            table: None,
            column: column.into(),
        }
    }

    /// A column name qualified by its table.
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> ColumnName {
        ColumnName {
            database: None,
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(database) = &self.database {
            write!(f, "{}.", database)?;
        }
        if let Some(table) = &self.table {
            write!(f, "{}.", table)?;
        }
        f.write_str(&self.column)
    }
}

/// Describes one column of a [`Schema`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Column {
    /// The statement-wide identity of this column.
    pub id: ColumnId,
    /// The database of the table the column originates from, if any.
    pub database: Option<String>,
    /// The (possibly aliased) table the column originates from, if any.
    pub table: Option<String>,
    /// The column name. Synthesized columns get an invented name.
    pub name: String,
    /// The ordinal of this column in the schema it was last resolved against.
    pub position: usize,
    pub typ: ScalarType,
    pub nullable: bool,
}

impl Column {
    /// Constructs a nullable column that does not belong to any table.
    pub fn new(id: ColumnId, name: impl Into<String>, typ: ScalarType) -> Column {
        Column {
            id,
            database: None,
            table: None,
            name: name.into(),
            position: 0,
            typ,
            nullable: true,
        }
    }

    /// Sets the originating table.
    pub fn with_table(mut self, table: impl Into<String>) -> Column {
        self.table = Some(table.into());
        self
    }

    /// Sets the nullability.
    pub fn nullable(mut self, nullable: bool) -> Column {
        self.nullable = nullable;
        self
    }

    /// Reports whether `name` refers to this column.
    pub fn matches(&self, name: &ColumnName) -> bool {
        fn eq(a: &str, b: &str) -> bool {
            a.eq_ignore_ascii_case(b)
        }
        if !eq(&self.name, &name.column) {
            return false;
        }
        if let Some(table) = &name.table {
            match &self.table {
                Some(t) if eq(t, table) => (),
                _ => return false,
            }
        }
        if let Some(database) = &name.database {
            match &self.database {
                Some(d) if eq(d, database) => (),
                _ => return false,
            }
        }
        true
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// An error while resolving a name against a [`Schema`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("column reference {0} is ambiguous")]
    AmbiguousColumn(ColumnName),
}

/// The output shape of a plan node: an ordered sequence of columns.
///
/// Column ids are unique within a schema. The `position` of every column
/// equals its index in the schema.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// A schema with no columns.
    pub const fn empty() -> Schema {
        Schema {
            columns: Vec::new(),
        }
    }

    /// Builds a schema from `columns`, renumbering their positions.
    pub fn new(columns: Vec<Column>) -> Schema {
        let mut schema = Schema { columns };
        schema.renumber();
        debug_assert!(
            schema.columns.iter().map(|c| c.id).all_unique(),
            "duplicate column ids in schema {:?}",
            schema
        );
        schema
    }

    fn renumber(&mut self) {
        for (i, column) in self.columns.iter_mut().enumerate() {
            column.position = i;
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Returns the column at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Returns the last column, if any.
    pub fn last(&self) -> Option<&Column> {
        self.columns.last()
    }

    /// Returns the position of the column with identity `id`.
    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    /// Reports whether a column with identity `id` is part of this schema.
    pub fn contains(&self, id: ColumnId) -> bool {
        self.index_of(id).is_some()
    }

    /// Resolves `name` to exactly one column.
    ///
    /// Returns `Ok(None)` if no column matches and an error if more than one
    /// does.
    pub fn find_column(&self, name: &ColumnName) -> Result<Option<&Column>, SchemaError> {
        let mut matches = self.columns.iter().filter(|c| c.matches(name));
        match (matches.next(), matches.next()) {
            (None, _) => Ok(None),
            (Some(column), None) => Ok(Some(column)),
            (Some(_), Some(_)) => Err(SchemaError::AmbiguousColumn(name.clone())),
        }
    }

    /// Appends the columns of `other` after the columns of `self`.
    pub fn concat(&self, other: &Schema) -> Schema {
        Schema::new(self.columns.iter().chain(other.columns.iter()).cloned().collect())
    }

    /// Appends one column.
    pub fn push(&mut self, column: Column) {
        self.columns.push(column);
        self.renumber();
    }

    /// Retains only the columns for which `f` returns true.
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Column) -> bool,
    {
        self.columns.retain(f);
        self.renumber();
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.columns.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(id_gen: &mut IdGen) -> Schema {
        Schema::new(vec![
            Column::new(id_gen.allocate_id(), "a", ScalarType::Int64).with_table("t"),
            Column::new(id_gen.allocate_id(), "b", ScalarType::String).with_table("t"),
            Column::new(id_gen.allocate_id(), "a", ScalarType::Int64).with_table("u"),
        ])
    }

    #[test]
    fn test_find_column() {
        let mut id_gen = IdGen::default();
        let schema = schema(&mut id_gen);

        let b = schema.find_column(&ColumnName::bare("B")).unwrap().unwrap();
        assert_eq!(b.position, 1);

        let ua = schema
            .find_column(&ColumnName::qualified("u", "a"))
            .unwrap()
            .unwrap();
        assert_eq!(ua.position, 2);

        assert_eq!(schema.find_column(&ColumnName::bare("c")), Ok(None));
        assert_eq!(
            schema.find_column(&ColumnName::bare("a")),
            Err(SchemaError::AmbiguousColumn(ColumnName::bare("a")))
        );

        let mut qualified = ColumnName::qualified("t", "a");
        qualified.database = Some("db".into());
        assert_eq!(schema.find_column(&qualified), Ok(None));
    }

    #[test]
    fn test_concat_renumbers() {
        let mut id_gen = IdGen::default();
        let left = schema(&mut id_gen);
        let right = Schema::new(vec![Column::new(
            id_gen.allocate_id(),
            "x",
            ScalarType::Bool,
        )]);
        let both = left.concat(&right);
        assert_eq!(both.len(), 4);
        assert_eq!(both.last().map(|c| c.position), Some(3));
        assert_eq!(both.index_of(right.columns()[0].id), Some(3));
    }
}
