// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-connection state visible to the planner.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use quill_repr::Datum;

pub mod var;

pub use self::var::{SysVar, VarError, VarScope};

/// Reads server wide system variable values.
pub trait GlobalVarAccessor: fmt::Debug {
    /// Returns the global value of the system variable `name`, which is
    /// lowercase.
    fn get_global_sys_var(&self, name: &str) -> Result<String, VarError>;
}

/// A [`GlobalVarAccessor`] for a server whose global values were never
/// changed from their defaults.
#[derive(Debug, Default)]
pub struct SystemDefaults;

impl GlobalVarAccessor for SystemDefaults {
    fn get_global_sys_var(&self, name: &str) -> Result<String, VarError> {
        var::lookup(name)
            .map(|v| v.value.to_owned())
            .ok_or_else(|| VarError::UnknownParameter(name.to_owned()))
    }
}

/// The user variables and session scoped system variables of one
/// connection.
///
/// Names are case insensitive and stored lowercase.
#[derive(Debug, Default, Clone)]
pub struct Session {
    user_vars: BTreeMap<String, Datum>,
    system_vars: BTreeMap<String, String>,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    /// Assigns the user variable `@name`.
    pub fn set_user_var(&mut self, name: &str, value: Datum) {
        self.user_vars.insert(name.to_lowercase(), value);
    }

    /// Returns the value of the user variable `@name`, if it was ever set.
    pub fn user_var(&self, name: &str) -> Option<&Datum> {
        self.user_vars.get(&name.to_lowercase())
    }

    /// Sets the session value of the system variable `name`.
    pub fn set_system_var(&mut self, name: &str, value: impl Into<String>) -> Result<(), VarError> {
        let var = var::lookup(name).ok_or_else(|| VarError::UnknownParameter(name.to_owned()))?;
        if var.scope == VarScope::None {
            return Err(VarError::ReadOnly(var.name.to_owned()));
        }
        let value = value.into();
        debug!(name = var.name, %value, "setting session system variable");
        self.system_vars.insert(var.name.to_owned(), value);
        Ok(())
    }

    /// Returns the session value of the system variable `name`, if one was
    /// set.
    pub fn system_var(&self, name: &str) -> Option<&str> {
        self.system_vars
            .get(&name.to_lowercase())
            .map(|v| v.as_str())
    }
}
