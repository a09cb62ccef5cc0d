// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Canary allocation and initialisation at function entry.
//!
//! Each planned buffer gets a canary slot declared immediately before it, so
//! the canary sits between the buffer and the rest of the frame. The guard is
//! read once, after the declarations, and that single read initialises every
//! canary: scalar canaries with one volatile store, array canaries with a
//! store loop.
//!
//! When any array canary exists, the declarations and scalar initialisation
//! are split off into a new prologue block that becomes the entry. The store
//! loops are chained between the prologue and the original entry block, which
//! keeps its identity, its remaining instructions and its terminator.

use ir::{BlockId, Function, Origin, Role, Terminator, Type, Value};
use tracing::{debug, warn};

use crate::{
    error::{ProtectError, ProtectResult},
    loops::WordLoop,
    plan::{Plan, PlannedSlot},
    target::TargetInfo,
};

/// Shape of a canary slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryKind {
    /// One pointer-sized word.
    Scalar,
    /// `words` pointer-sized words, walked with the shared `index` slot.
    Array { words: u32, index: Value },
}

/// A canary slot and the buffer it guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canary {
    pub buffer: Value,
    pub slot: Value,
    pub kind: CanaryKind,
}

impl Canary {
    /// Loop over the words of an array canary. `None` for scalars.
    pub fn word_loop(&self, guard: Value, pointer_width: u32) -> Option<WordLoop> {
        match self.kind {
            CanaryKind::Scalar => None,
            CanaryKind::Array { words, index } => Some(WordLoop {
                canary: self.slot,
                words,
                guard,
                index,
                pointer_width,
            }),
        }
    }
}

/// What the entry instrumentation produced.
#[derive(Debug, Clone, Default)]
pub struct Prologue {
    /// Canaries in declaration order.
    pub canaries: Vec<Canary>,
    /// Shared loop index slot, present when any array canary exists.
    pub loop_index: Option<Value>,
    /// Split-off prologue block, present when any array canary exists.
    pub block: Option<BlockId>,
}

/// Number of words of a canary, or `None` for a scalar canary.
///
/// # Errors
///
/// [`ProtectError::MisalignedCanarySize`] if the size is not a multiple of
/// the pointer width.
fn canary_words(
    func: &Function,
    slot: &PlannedSlot,
    pointer_width: u32,
) -> ProtectResult<Option<u32>> {
    if slot.canary_size % pointer_width != 0 {
        return Err(ProtectError::MisalignedCanarySize {
            function: func.name().to_string(),
            buffer: func.value_name(slot.buffer).to_string(),
            size: slot.canary_size,
            pointer_width,
        });
    }
    Ok((slot.canary_size > 0).then_some(slot.canary_size / pointer_width))
}

/// Allocate and initialise one canary per planned buffer.
///
/// Every size is validated before the function is touched, so an error
/// leaves `func` unchanged.
pub fn allocate_and_initialize(
    func: &mut Function,
    plan: &Plan,
    target: &dyn TargetInfo,
) -> ProtectResult<Prologue> {
    let pointer_width = target.pointer_width();
    let sizes = plan
        .slots
        .iter()
        .map(|slot| canary_words(func, slot, pointer_width))
        .collect::<ProtectResult<Vec<_>>>()?;

    let Some(entry) = func.entry() else {
        return Ok(Prologue::default());
    };

    // Slots first, each immediately before its buffer.
    let mut slots = Vec::with_capacity(plan.len());
    for (planned, words) in plan.slots.iter().zip(sizes) {
        let Some(position) = declaration_index(func, entry, planned.buffer) else {
            warn!(
                function = func.name(),
                buffer = func.value_name(planned.buffer),
                "planned buffer is not declared in the entry block"
            );
            continue;
        };
        let name = format!("{}.canary", func.value_name(planned.buffer));
        let slot = func
            .cursor_at(entry, position)
            .with_origin(Origin::Generated(Role::CanarySlot {
                buffer: planned.buffer,
            }))
            .alloca(Type::Ptr, words.unwrap_or(1), &name);
        slots.push((planned.buffer, slot, words));
    }

    let run_end = func
        .block_insts(entry)
        .take_while(|(_, data)| data.kind.is_alloca())
        .count();
    let mut cursor = func
        .cursor_at(entry, run_end)
        .with_origin(Origin::Generated(Role::LoopIndex));
    let loop_index = slots
        .iter()
        .any(|(_, _, words)| words.is_some())
        .then(|| cursor.alloca(Type::I64, 1, "canary.idx"));

    let canaries: Vec<Canary> = slots
        .into_iter()
        .map(|(buffer, slot, words)| {
            let kind = match (words, loop_index) {
                (Some(words), Some(index)) => CanaryKind::Array { words, index },
                _ => CanaryKind::Scalar,
            };
            Canary { buffer, slot, kind }
        })
        .collect();

    cursor.set_origin(Origin::Generated(Role::GuardRead));
    let guard = target.guard().read(&mut cursor);

    cursor.set_origin(Origin::Generated(Role::CanaryMark));
    for canary in &canaries {
        cursor.canary_mark(guard, canary.slot, canary.buffer);
    }

    cursor.set_origin(Origin::Generated(Role::CanaryStore));
    for canary in canaries.iter().filter(|c| c.kind == CanaryKind::Scalar) {
        cursor.store(Type::Ptr, guard, canary.slot, true);
    }
    let split_at = cursor.position();

    let block = loop_index.map(|_| {
        let prologue = func.hoist_prefix(
            entry,
            split_at,
            "canary.prologue",
            Origin::Generated(Role::Prologue),
        );
        let mut next = entry;
        for canary in canaries.iter().rev() {
            if let Some(word_loop) = canary.word_loop(guard, pointer_width) {
                next = word_loop.build_store(func, next, next).head;
            }
        }
        func.set_terminator(prologue, Terminator::Br(next));
        prologue
    });

    debug!(
        function = func.name(),
        canaries = canaries.len(),
        split = block.is_some(),
        "initialised canaries"
    );

    Ok(Prologue {
        canaries,
        loop_index,
        block,
    })
}

fn declaration_index(func: &Function, block: BlockId, value: Value) -> Option<usize> {
    func.block_insts(block)
        .position(|(_, data)| data.result == Some(value))
}
