// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the textual IR.

use thiserror::Error;

/// Error while parsing textual IR. Line numbers are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: unknown type '{name}'")]
    UnknownType { line: usize, name: String },
    #[error("line {line}: use of undefined value '%{name}'")]
    UndefinedValue { line: usize, name: String },
    #[error("line {line}: reference to undefined block '{name}'")]
    UndefinedBlock { line: usize, name: String },
    #[error("line {line}: value '%{name}' is defined twice")]
    DuplicateValue { line: usize, name: String },
    #[error("line {line}: block '{name}' is defined twice")]
    DuplicateBlock { line: usize, name: String },
    /// A block ends without `br`, `ret` or `unreachable`.
    #[error("block '{block}' in function '@{function}' has no terminator")]
    MissingTerminator { function: String, block: String },
    #[error("line {line}: function body is not closed")]
    UnterminatedFunction { line: usize },
    #[error("expected exactly one function, found {0}")]
    ExpectedSingleFunction(usize),
}

pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            line,
            message: message.into(),
        }
    }
}
