// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! System variable definitions.

use serde::Serialize;

/// Where a system variable can be set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum VarScope {
    /// Fixed at startup. Reads always see the default.
    None,
    /// Per session only.
    Session,
    /// Server wide only.
    Global,
    /// Server wide, overridable per session.
    Both,
}

impl VarScope {
    /// Reports whether the variable has a server wide value.
    pub fn has_global(&self) -> bool {
        matches!(self, VarScope::Global | VarScope::Both)
    }
}

/// The definition and default value of a system variable.
#[derive(Debug, Serialize)]
pub struct SysVar {
    pub name: &'static str,
    pub value: &'static str,
    pub scope: VarScope,
    pub description: &'static str,
}

// Names are lowercase. Keep sorted.
static SYSTEM_VARS: &[SysVar] = &[
    SysVar {
        name: "autocommit",
        value: "ON",
        scope: VarScope::Both,
        description: "Whether statements are committed when they complete.",
    },
    SysVar {
        name: "character_set_client",
        value: "utf8",
        scope: VarScope::Both,
        description: "The character set of statements sent by the client.",
    },
    SysVar {
        name: "div_precision_increment",
        value: "4",
        scope: VarScope::Both,
        description: "Digits added to the scale of a division result.",
    },
    SysVar {
        name: "hostname",
        value: "localhost",
        scope: VarScope::None,
        description: "The host name of the server.",
    },
    SysVar {
        name: "interactive_timeout",
        value: "28800",
        scope: VarScope::Both,
        description: "Seconds an idle interactive connection is kept open.",
    },
    SysVar {
        name: "last_insert_id",
        value: "0",
        scope: VarScope::Session,
        description: "The value most recently generated for an auto increment column.",
    },
    SysVar {
        name: "max_allowed_packet",
        value: "67108864",
        scope: VarScope::Both,
        description: "The maximum size of one packet.",
    },
    SysVar {
        name: "port",
        value: "4000",
        scope: VarScope::None,
        description: "The port the server listens on.",
    },
    SysVar {
        name: "read_only",
        value: "OFF",
        scope: VarScope::Global,
        description: "Whether the server rejects writes.",
    },
    SysVar {
        name: "sql_mode",
        value: "",
        scope: VarScope::Both,
        description: "The SQL modes in effect.",
    },
    SysVar {
        name: "sql_select_limit",
        value: "18446744073709551615",
        scope: VarScope::Both,
        description: "The maximum number of rows a SELECT returns.",
    },
    SysVar {
        name: "time_zone",
        value: "SYSTEM",
        scope: VarScope::Both,
        description: "The time zone of the session.",
    },
    SysVar {
        name: "tx_isolation",
        value: "REPEATABLE-READ",
        scope: VarScope::Both,
        description: "The transaction isolation level.",
    },
    SysVar {
        name: "version",
        value: "5.7.1-quill",
        scope: VarScope::None,
        description: "The server version.",
    },
    SysVar {
        name: "version_comment",
        value: "quill",
        scope: VarScope::None,
        description: "A description of the server build.",
    },
    SysVar {
        name: "warning_count",
        value: "0",
        scope: VarScope::Session,
        description: "The number of warnings raised by the last statement.",
    },
];

/// Looks up the system variable named `name`, ignoring case.
pub fn lookup(name: &str) -> Option<&'static SysVar> {
    let name = name.to_lowercase();
    SYSTEM_VARS
        .binary_search_by(|var| var.name.cmp(&name.as_str()))
        .ok()
        .map(|i| &SYSTEM_VARS[i])
}

/// Errors that can occur when reading or writing variables.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum VarError {
    #[error("Unknown system variable '{0}'")]
    UnknownParameter(String),
    #[error("Variable '{0}' is a read only variable")]
    ReadOnly(String),
    #[error("global value of '{name}' is unavailable: {reason}")]
    GlobalUnavailable { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        assert!(SYSTEM_VARS.windows(2).all(|w| w[0].name < w[1].name));
        assert!(SYSTEM_VARS.iter().all(|v| v.name == v.name.to_lowercase()));
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("AutoCommit").map(|v| v.value), Some("ON"));
        assert_eq!(lookup("version").map(|v| v.scope), Some(VarScope::None));
        assert!(lookup("no_such_var").is_none());
    }
}
