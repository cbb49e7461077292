// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Fundamental data representation.
//!
//! This crate contains the types that every other crate in the workspace
//! speaks: [`Datum`]s and their [`ScalarType`]s, and the [`Column`]s that
//! make up a [`Schema`].

#![warn(missing_debug_implementations)]

mod relation;
mod scalar;

pub use relation::{Column, ColumnId, ColumnName, IdGen, Schema, SchemaError};
pub use scalar::{Datum, ScalarType};
