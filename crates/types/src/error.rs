// Copyright (c) 2023 -  Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use serde::{Deserialize, Serialize};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The flat error taxonomy shared by every front-end.
///
/// The string form of each kind is a stable identifier that appears on the
/// wire (HTTP bodies, MCP tool results, CLI output); renaming a variant is
/// a protocol break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyNotFound,
    ColumnFamilyNotFound,
    ColumnFamilyExists,
    ColumnFamilyEmpty,
    CannotDropDefault,
    InvalidName,
    CapabilityDenied,
    NoDatabase,
    InvalidArguments,
    InvalidKeyLiteral,
    InvalidBounds,
    ToolNotFound,
    ToolExecutionFailed,
    // carried by per-entry transform errors, not by `Error`
    EvaluatorError,
    EvaluatorTimeout,
    EvaluatorFailureRateExceeded,
    StoreClosed,
    PathInUse,
    CorruptStore,
    IoError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KeyNotFound => "KeyNotFound",
            ErrorKind::ColumnFamilyNotFound => "ColumnFamilyNotFound",
            ErrorKind::ColumnFamilyExists => "ColumnFamilyExists",
            ErrorKind::ColumnFamilyEmpty => "ColumnFamilyEmpty",
            ErrorKind::CannotDropDefault => "CannotDropDefault",
            ErrorKind::InvalidName => "InvalidName",
            ErrorKind::CapabilityDenied => "CapabilityDenied",
            ErrorKind::NoDatabase => "NoDatabase",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::InvalidKeyLiteral => "InvalidKeyLiteral",
            ErrorKind::InvalidBounds => "InvalidBounds",
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ToolExecutionFailed => "ToolExecutionFailed",
            ErrorKind::EvaluatorError => "EvaluatorError",
            ErrorKind::EvaluatorTimeout => "EvaluatorTimeout",
            ErrorKind::EvaluatorFailureRateExceeded => "EvaluatorFailureRateExceeded",
            ErrorKind::StoreClosed => "StoreClosed",
            ErrorKind::PathInUse => "PathInUse",
            ErrorKind::CorruptStore => "CorruptStore",
            ErrorKind::IoError => "IoError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the store, the engines, and the tool dispatcher.
///
/// Engine errors are categorized into this taxonomy at the store boundary
/// and propagate upward unchanged; front-ends only wrap them into their
/// native envelope.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key '{key}' not found in column family '{cf}'")]
    KeyNotFound { cf: String, key: String },
    #[error("column family '{0}' not found")]
    ColumnFamilyNotFound(String),
    #[error("column family '{0}' already exists")]
    ColumnFamilyExists(String),
    #[error("column family '{0}' is empty")]
    ColumnFamilyEmpty(String),
    #[error("cannot drop the 'default' column family")]
    CannotDropDefault,
    #[error("invalid column family name '{0}'")]
    InvalidName(String),
    #[error("operation '{operation}' denied: store is open in read-only mode")]
    CapabilityDenied { operation: &'static str },
    #[error("no database connected")]
    NoDatabase,
    #[error("invalid argument '{field}': {reason}")]
    InvalidArguments { field: String, reason: String },
    #[error("invalid key literal '{literal}': {reason}")]
    InvalidKeyLiteral { literal: String, reason: String },
    #[error("scan bounds inconsistent with direction: {0}")]
    InvalidBounds(String),
    #[error("unknown tool '{0}'")]
    ToolNotFound(String),
    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),
    #[error("evaluator failure rate exceeded: {failed} of the last {window} entries failed")]
    EvaluatorFailureRateExceeded { failed: usize, window: usize },
    #[error("store is closed")]
    StoreClosed,
    #[error("database path '{0}' is already in use")]
    PathInUse(String),
    #[error("store is corrupt: {0}")]
    CorruptStore(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Error::ColumnFamilyNotFound(_) => ErrorKind::ColumnFamilyNotFound,
            Error::ColumnFamilyExists(_) => ErrorKind::ColumnFamilyExists,
            Error::ColumnFamilyEmpty(_) => ErrorKind::ColumnFamilyEmpty,
            Error::CannotDropDefault => ErrorKind::CannotDropDefault,
            Error::InvalidName(_) => ErrorKind::InvalidName,
            Error::CapabilityDenied { .. } => ErrorKind::CapabilityDenied,
            Error::NoDatabase => ErrorKind::NoDatabase,
            Error::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Error::InvalidKeyLiteral { .. } => ErrorKind::InvalidKeyLiteral,
            Error::InvalidBounds(_) => ErrorKind::InvalidBounds,
            Error::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Error::ToolExecutionFailed(_) => ErrorKind::ToolExecutionFailed,
            Error::EvaluatorFailureRateExceeded { .. } => {
                ErrorKind::EvaluatorFailureRateExceeded
            }
            Error::StoreClosed => ErrorKind::StoreClosed,
            Error::PathInUse(_) => ErrorKind::PathInUse,
            Error::CorruptStore(_) => ErrorKind::CorruptStore,
            Error::Io(_) => ErrorKind::IoError,
        }
    }

    pub fn invalid_arguments(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn key_not_found(cf: impl Into<String>, key: impl Into<String>) -> Self {
        Error::KeyNotFound {
            cf: cf.into(),
            key: key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_identifiers_are_stable() {
        assert_eq!(
            Error::key_not_found("default", "x").kind().as_str(),
            "KeyNotFound"
        );
        assert_eq!(
            Error::CapabilityDenied { operation: "put" }.kind().as_str(),
            "CapabilityDenied"
        );
        assert_eq!(Error::NoDatabase.kind().as_str(), "NoDatabase");
        assert_eq!(
            Error::EvaluatorFailureRateExceeded {
                failed: 12,
                window: 1000
            }
            .kind()
            .as_str(),
            "EvaluatorFailureRateExceeded"
        );
    }

    #[test]
    fn messages_name_the_operation_and_scope() {
        let err = Error::key_not_found("users", "u:1");
        assert_eq!(
            err.to_string(),
            "key 'u:1' not found in column family 'users'"
        );

        let err = Error::CapabilityDenied { operation: "delete" };
        assert!(err.to_string().contains("delete"));
        assert!(err.to_string().contains("read-only"));
    }
}
