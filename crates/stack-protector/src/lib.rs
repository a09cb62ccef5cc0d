// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Multi-word stack canary instrumentation
//!
//! Hardens stack buffers tagged with `!protect` against overflow:
//! - [`plan`] finds the protected buffers in the entry declarations
//! - [`prologue`] declares a canary before each buffer and fills it with the
//!   guard value (directly, or with a store loop for multi-word canaries)
//! - [`guard`] checks every canary before every original return, through a
//!   chain of compare blocks or the target's guard check primitive
//! - [`failure`] provides the shared block that calls `__stack_chk_fail`
//! - [`verify`] re-checks the structure of an instrumented function
//!
//! Every generated entity carries an [`ir::Origin::Generated`] tag. Running
//! the pass on its own output finds nothing left to protect and changes
//! nothing.

pub mod error;
pub mod failure;
pub mod guard;
pub mod loops;
pub mod plan;
pub mod prologue;
pub mod target;
pub mod verify;

pub use error::{ProtectError, ProtectResult, VerificationError, VerificationResult};
pub use target::{GuardSource, SymbolGuard, Target, TargetInfo};
pub use verify::Verifier;

use ir::{abi, Function, Module};
use tracing::{debug, info};

use crate::{
    failure::FailureHandler,
    guard::{original_returns, ReturnGuardInstrumenter},
    prologue::allocate_and_initialize,
};

/// Protect the buffers of one function. Returns whether it was modified.
///
/// # Errors
///
/// Fails before mutating anything if the target's pointer width is not
/// supported or a canary size is not a multiple of it.
pub fn protect_function(func: &mut Function, target: &dyn TargetInfo) -> ProtectResult<bool> {
    let pointer_width = target.pointer_width();
    if !abi::SUPPORTED_POINTER_WIDTHS.contains(&pointer_width) {
        return Err(ProtectError::UnsupportedPointerWidth(pointer_width));
    }

    let plan = plan::plan(func);
    if plan.is_empty() {
        debug!(function = func.name(), "nothing to protect");
        return Ok(false);
    }

    // Snapshot before the entry is rewritten.
    let returns = original_returns(func);
    let prologue = allocate_and_initialize(func, &plan, target)?;

    let mut failure = FailureHandler::new(func);
    let guarded =
        ReturnGuardInstrumenter::new(target, &prologue).instrument(func, &returns, &mut failure);

    info!(
        function = func.name(),
        buffers = prologue.canaries.len(),
        returns = guarded,
        "protected function"
    );
    Ok(true)
}

/// Protect every function of a module. Returns whether any was modified.
///
/// Functions are processed in order; an error stops at the failing function.
pub fn protect_module(module: &mut Module, target: &dyn TargetInfo) -> ProtectResult<bool> {
    let mut modified = false;
    for func in module.functions_mut() {
        modified |= protect_function(func, target)?;
    }
    Ok(modified)
}
