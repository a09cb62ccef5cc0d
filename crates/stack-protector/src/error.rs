// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for stack protection and its verifier.

use thiserror::Error;

/// Contract violations that abort the transformation.
///
/// These are raised before the function is mutated, so a failed run leaves
/// the function untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtectError {
    #[error(
        "canary size {size} of '%{buffer}' in '@{function}' is not a multiple of the pointer width ({pointer_width})"
    )]
    MisalignedCanarySize {
        function: String,
        buffer: String,
        size: u32,
        pointer_width: u32,
    },
    #[error("unsupported pointer width {0} (expected 4 or 8)")]
    UnsupportedPointerWidth(u32),
}

pub type ProtectResult<T> = Result<T, ProtectError>;

/// Problems found in an instrumented function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("protected buffer '%{buffer}' has no canary")]
    UnguardedBuffer { buffer: String },

    #[error("block '{block}' returns without passing through a guarded return")]
    UnguardedReturn { block: String },

    #[error("canary '%{canary}' is not checked on every path to the return in '{block}'")]
    MissingCheck { canary: String, block: String },

    #[error("return in '{block}' is not preceded by a guard check call for canary '%{canary}'")]
    MissingGuardCheckCall { canary: String, block: String },

    #[error("canary '%{canary}' has no initialising store")]
    MissingInitialisation { canary: String },

    #[error("initialisation of canary '%{canary}' does not dominate its check in '{block}'")]
    CheckBeforeInitialisation { canary: String, block: String },

    #[error("failure block '{block}' is malformed: {reason}")]
    MalformedFailureBlock { block: String, reason: String },

    #[error("found {count} failure blocks, expected at most one")]
    MultipleFailureBlocks { count: usize },
}

/// Result of verification containing any errors found
#[derive(Debug, Default)]
pub struct VerificationResult {
    errors: Vec<VerificationError>,
}

impl VerificationResult {
    /// Returns true if verification passed with no errors
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[VerificationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<VerificationError> {
        self.errors
    }

    pub(crate) fn extend(&mut self, errors: impl IntoIterator<Item = VerificationError>) {
        self.errors.extend(errors);
    }
}
