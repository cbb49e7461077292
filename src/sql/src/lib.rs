// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! SQL expression rewriting and subquery decorrelation.
//!
//! This crate translates parsed SQL expressions into the scalar expression
//! language of [`quill_expr`], planning subqueries into relational operators
//! as it goes. See [`plan::PlanBuilder::rewrite`] for the entry point.

#![warn(missing_debug_implementations)]

pub mod ast;
pub mod catalog;
pub mod plan;
pub mod session;
