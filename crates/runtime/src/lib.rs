// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Execution runtime for IR modules
//!
//! This crate interprets functions in the `ir` format so that instrumented
//! code can be run end to end. Memory is simulated with a small global area
//! holding the stack guard and a downward-growing stack on which every
//! `alloca` is carved in declaration order.
//!
//! # Overview
//!
//! ```text
//! Module + Environment
//!      ↓
//! Executor::call(name, args)
//!      ↓
//! Execution { status, return_value, trace, steps }
//! ```
//!
//! A call to `@__stack_chk_fail` (or a failing guard check primitive) ends
//! execution with [`ExecutionStatus::StackSmashDetected`]. Malformed
//! programs and runaway loops are reported as [`RuntimeError`]s.

mod error;
mod execute;
mod memory;

pub use error::{RuntimeError, RuntimeResult};
pub use execute::{
    Environment, Execution, ExecutionStatus, Executor, Visit, DEFAULT_STEP_LIMIT,
};
pub use memory::Memory;
