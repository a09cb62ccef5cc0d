// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The shared block reached when a canary check fails.

use ir::{abi, BlockId, Function, Origin, Role};
use tracing::trace;

/// Lazily created failure block, at most one per function.
#[derive(Debug, Default)]
pub struct FailureHandler {
    block: Option<BlockId>,
}

impl FailureHandler {
    /// Handler for `func`, reusing a failure block left by an earlier run.
    pub fn new(func: &Function) -> Self {
        let block = func
            .blocks()
            .find(|&b| func.block(b).origin == Origin::Generated(Role::Failure));
        Self { block }
    }

    /// The failure block, if one exists.
    pub fn existing(&self) -> Option<BlockId> {
        self.block
    }

    /// Return the failure block, creating it on first use.
    ///
    /// The block calls the abort primitive and is marked unreachable.
    pub fn block(&mut self, func: &mut Function) -> BlockId {
        if let Some(block) = self.block {
            return block;
        }

        let block = func.append_block("canary.fail", Origin::Generated(Role::Failure));
        let mut cursor = func
            .cursor_at_end(block)
            .with_origin(Origin::Generated(Role::Failure));
        cursor.call_void(abi::STACK_CHK_FAIL, Vec::new());
        cursor.unreachable();
        trace!(function = func.name(), "created failure block");

        self.block = Some(block);
        block
    }
}

#[cfg(test)]
mod tests {
    use ir::{InstKind, Terminator};

    use super::*;

    #[test]
    fn test_failure_block_is_created_once() {
        let mut func = Function::new("f", None);
        let entry = func.append_block("entry", Origin::Source);
        func.cursor_at_end(entry).ret(None);

        let mut handler = FailureHandler::new(&func);
        assert_eq!(handler.existing(), None);

        let first = handler.block(&mut func);
        let second = handler.block(&mut func);
        assert_eq!(first, second);
        assert_eq!(func.block_count(), 2);

        let (_, call) = func.block_insts(first).next().unwrap();
        assert_eq!(
            call.kind,
            InstKind::Call {
                callee: abi::STACK_CHK_FAIL.to_string(),
                args: Vec::new(),
                ret: None,
            }
        );
        assert_eq!(func.terminator(first), Some(&Terminator::Unreachable));
    }

    #[test]
    fn test_existing_failure_block_is_reused() {
        let mut func = Function::new("f", None);
        let entry = func.append_block("entry", Origin::Source);
        func.cursor_at_end(entry).ret(None);
        let created = FailureHandler::new(&func).block(&mut func);

        let mut handler = FailureHandler::new(&func);
        assert_eq!(handler.existing(), Some(created));
        assert_eq!(handler.block(&mut func), created);
        assert_eq!(func.block_count(), 2);
    }
}
