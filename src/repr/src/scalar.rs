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
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A single value.
///
/// Unlike the datums of a storage layer, a `Datum` here owns its data. The
/// expression rewriter only ever holds a handful of them (literals, bound
/// parameters, the results of eagerly evaluated subqueries), so there is no
/// need for an arena.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Datum {
    /// An unknown value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int64(i64),
    /// A 64-bit unsigned integer.
    UInt64(u64),
    /// A 64-bit floating point number.
    Float64(OrderedFloat<f64>),
    /// A sequence of Unicode codepoints encoded as UTF-8.
    String(String),
    /// A sequence of untyped bytes.
    Bytes(Vec<u8>),
    /// A tuple of datums, as produced by a row constructor whose components
    /// are all constant.
    Row(Vec<Datum>),
}

impl Datum {
    /// Reports whether this datum is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Returns the tuple fields of a row datum, or `None` if this datum is
    /// not a row.
    pub fn as_row(&self) -> Option<&[Datum]> {
        match self {
            Datum::Row(fields) => Some(fields),
            _ => None,
        }
    }

    /// Interprets this datum as a SQL truth value.
    ///
    /// Returns `None` for null. Numbers are true iff they are non-zero, which
    /// is how MySQL-flavored predicates treat integer results.
    pub fn as_truth(&self) -> Option<bool> {
        match self {
            Datum::Null => None,
            Datum::Bool(b) => Some(*b),
            Datum::Int64(i) => Some(*i != 0),
            Datum::UInt64(u) => Some(*u != 0),
            Datum::Float64(f) => Some(f.0 != 0.0),
            Datum::String(s) => Some(s.parse::<f64>().map(|f| f != 0.0).unwrap_or(false)),
            Datum::Bytes(b) => Some(!b.is_empty()),
            Datum::Row(_) => Some(true),
        }
    }

    /// The natural type of this datum.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Datum::Null => ScalarType::Null,
            Datum::Bool(_) => ScalarType::Bool,
            Datum::Int64(_) => ScalarType::Int64,
            Datum::UInt64(_) => ScalarType::UInt64,
            Datum::Float64(_) => ScalarType::Float64,
            Datum::String(_) => ScalarType::String,
            Datum::Bytes(_) => ScalarType::Bytes,
            Datum::Row(fields) => ScalarType::Row(fields.iter().map(Datum::scalar_type).collect()),
        }
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Datum {
        Datum::Bool(b)
    }
}

impl From<i64> for Datum {
    fn from(i: i64) -> Datum {
        Datum::Int64(i)
    }
}

impl From<u64> for Datum {
    fn from(u: u64) -> Datum {
        Datum::UInt64(u)
    }
}

impl From<f64> for Datum {
    fn from(f: f64) -> Datum {
        Datum::Float64(OrderedFloat(f))
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Datum {
        Datum::String(s.to_owned())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Datum {
        Datum::String(s)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(o: Option<T>) -> Datum {
        o.map(Into::into).unwrap_or(Datum::Null)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("null"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int64(i) => write!(f, "{}", i),
            Datum::UInt64(u) => write!(f, "{}", u),
            Datum::Float64(n) => write!(f, "{}", n),
            Datum::String(s) => write!(f, "{:?}", s),
            Datum::Bytes(b) => write!(f, "x'{}'", b.iter().map(|b| format!("{:02x}", b)).join("")),
            Datum::Row(fields) => write!(f, "({})", fields.iter().join(", ")),
        }
    }
}

/// The type of a [`Datum`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// The type of a bare `NULL` literal.
    Null,
    /// The type of [`Datum::Bool`].
    Bool,
    /// The type of [`Datum::Int64`].
    Int64,
    /// The type of [`Datum::UInt64`].
    UInt64,
    /// The type of [`Datum::Float64`].
    Float64,
    /// The type of [`Datum::String`].
    String,
    /// The type of [`Datum::Bytes`].
    Bytes,
    /// The type of [`Datum::Row`], one entry per field.
    Row(Vec<ScalarType>),
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScalarType::Null => f.write_str("null"),
            ScalarType::Bool => f.write_str("boolean"),
            ScalarType::Int64 => f.write_str("bigint"),
            ScalarType::UInt64 => f.write_str("bigint unsigned"),
            ScalarType::Float64 => f.write_str("double"),
            ScalarType::String => f.write_str("varchar"),
            ScalarType::Bytes => f.write_str("varbinary"),
            ScalarType::Row(fields) => write!(f, "row({})", fields.iter().join(", ")),
        }
    }
}
