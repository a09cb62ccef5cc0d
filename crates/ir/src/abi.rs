// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Well-known runtime symbols shared by the instrumentation pass and the
//! interpreter.

/// Global holding the per-process stack guard value.
pub const STACK_CHK_GUARD: &str = "__stack_chk_guard";

/// Zero-argument, non-returning abort primitive called on canary mismatch.
pub const STACK_CHK_FAIL: &str = "__stack_chk_fail";

/// Pointer widths (in bytes) the IR supports.
pub const SUPPORTED_POINTER_WIDTHS: [u32; 2] = [4, 8];
