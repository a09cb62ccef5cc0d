// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Discovery of protected stack buffers.
//!
//! Only the leading contiguous run of `alloca` instructions in the entry block
//! is scanned. A buffer declared after any other instruction is not
//! protected.

use std::collections::HashSet;

use ir::{Function, InstKind, Origin, Role, Value};

/// A buffer to protect and its requested canary size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSlot {
    pub buffer: Value,
    /// `0` for a single pointer-sized canary.
    pub canary_size: u32,
}

/// Protected buffers in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub slots: Vec<PlannedSlot>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Build the instrumentation plan for `func` without mutating it.
///
/// Generated slots are skipped, as are buffers that already have a generated
/// canary slot, so a function that was already protected yields an empty
/// plan.
pub fn plan(func: &Function) -> Plan {
    let Some(entry) = func.entry() else {
        return Plan::default();
    };

    let declarations: Vec<_> = func
        .block_insts(entry)
        .map(|(_, data)| data)
        .take_while(|data| data.kind.is_alloca())
        .collect();

    let guarded: HashSet<Value> = declarations
        .iter()
        .filter_map(|data| match data.origin {
            Origin::Generated(Role::CanarySlot { buffer }) => Some(buffer),
            _ => None,
        })
        .collect();

    let slots = declarations
        .iter()
        .filter(|data| !data.origin.is_generated())
        .filter_map(|data| match (&data.kind, data.result) {
            (
                InstKind::Alloca {
                    protect: Some(size),
                    ..
                },
                Some(buffer),
            ) if !guarded.contains(&buffer) => Some(PlannedSlot {
                buffer,
                canary_size: *size,
            }),
            _ => None,
        })
        .collect();

    Plan { slots }
}
