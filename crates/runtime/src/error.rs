// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the runtime crate

use thiserror::Error;

/// Runtime errors
///
/// A detected stack smash is not an error: it is reported through
/// [`crate::ExecutionStatus::StackSmashDetected`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("function not found: @{name}")]
    UnknownFunction { name: String },

    #[error("global symbol not found: @{symbol}")]
    UnknownSymbol { symbol: String },

    #[error("@{function} expects {expected} arguments, got {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("out-of-bounds access of {size} bytes at {address:#x}")]
    OutOfBounds { address: u64, size: u32 },

    #[error("stack overflow allocating {requested} bytes")]
    StackOverflow { requested: u64 },

    #[error("step limit {limit} exceeded")]
    StepLimitExceeded { limit: u64 },

    #[error("reached unreachable in @{function}, block '{block}'")]
    ReachedUnreachable { function: String, block: String },

    #[error("use of undefined value '%{value}' in @{function}")]
    UndefinedValue { function: String, value: String },

    #[error("block '{block}' in @{function} has no terminator")]
    MissingTerminator { function: String, block: String },

    #[error("@{function} has no body")]
    EmptyFunction { function: String },
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
