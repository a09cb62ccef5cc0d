// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Three-block counted loops over the words of an array canary.
//!
//! ```text
//! head:  store i64 0, %idx                  ; index = 0
//!        br cond
//! cond:  %i = load i64, %idx
//!        %more = icmp ult i64 %i, N
//!        br %more, body, exit
//! body:  %i = load i64, %idx
//!        %off = mul i64 %i, W
//!        %addr = ptradd %canary, %off       ; canary + index * W
//!        <per-word work>
//!        %next = add i64 %i, 1
//!        store i64 %next, %idx
//!        br cond                             ; store loop
//!        br %ok, cond, failure !weights(..)  ; validate loop
//! ```
//!
//! The index lives in a stack slot shared by every loop of a function.

use ir::{
    BinaryOp, BlockId, BranchWeights, Cursor, Function, IntPredicate, LoopPart, Operand, Origin,
    Role, Type, Value,
};

/// Success-heavy weights for checks expected to pass.
pub const LIKELY_SUCCESS: BranchWeights = BranchWeights {
    taken: 2000,
    not_taken: 1,
};

/// Blocks of a built loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountedLoop {
    pub head: BlockId,
    pub cond: BlockId,
    pub body: BlockId,
}

/// What a loop iterates over.
#[derive(Debug, Clone, Copy)]
pub struct WordLoop {
    /// Base address of the canary array.
    pub canary: Value,
    /// Number of pointer-sized words.
    pub words: u32,
    /// Guard value to store or compare against.
    pub guard: Value,
    /// Shared `i64` index slot.
    pub index: Value,
    pub pointer_width: u32,
}

impl WordLoop {
    /// Write the guard into every word, then continue at `exit`.
    ///
    /// The loop blocks are placed before `before` in the layout.
    pub fn build_store(&self, func: &mut Function, before: BlockId, exit: BlockId) -> CountedLoop {
        let blocks = self.skeleton(func, before, Role::StoreLoop, exit);

        let mut cursor = self.body_cursor(func, blocks.body, Role::StoreLoop(LoopPart::Body));
        let (word, addr) = self.word_address(&mut cursor);
        cursor.store(Type::Ptr, self.guard, addr, true);
        self.advance(&mut cursor, word);
        cursor.br(blocks.cond);

        blocks
    }

    /// Compare every word against the guard. A mismatch branches straight to
    /// `failure`; reaching the end continues at `exit`.
    pub fn build_validate(
        &self,
        func: &mut Function,
        before: BlockId,
        exit: BlockId,
        failure: BlockId,
    ) -> CountedLoop {
        let blocks = self.skeleton(func, before, Role::ValidateLoop, exit);

        let mut cursor = self.body_cursor(func, blocks.body, Role::ValidateLoop(LoopPart::Body));
        let (word, addr) = self.word_address(&mut cursor);
        let stored = cursor.load(Type::Ptr, addr, true, "canary.word");
        let intact = cursor.icmp(IntPredicate::Eq, Type::Ptr, stored, self.guard, "canary.ok");
        self.advance(&mut cursor, word);
        cursor.cond_br(intact, blocks.cond, failure, Some(LIKELY_SUCCESS));

        blocks
    }

    /// Create head and cond, and an empty body block.
    fn skeleton(
        &self,
        func: &mut Function,
        before: BlockId,
        role: fn(LoopPart) -> Role,
        exit: BlockId,
    ) -> CountedLoop {
        let prefix = match role(LoopPart::Head) {
            Role::StoreLoop(_) => "canary.store",
            _ => "canary.validate",
        };
        let mut block = |part: LoopPart, suffix: &str| {
            func.insert_block_before(
                before,
                &format!("{prefix}.{suffix}"),
                Origin::Generated(role(part)),
            )
        };
        let head = block(LoopPart::Head, "head");
        let cond = block(LoopPart::Cond, "cond");
        let body = block(LoopPart::Body, "body");

        let mut cursor = func
            .cursor_at_end(head)
            .with_origin(Origin::Generated(role(LoopPart::Head)));
        cursor.store(Type::I64, Operand::constant(Type::I64, 0), self.index, false);
        cursor.br(cond);

        let mut cursor = func
            .cursor_at_end(cond)
            .with_origin(Origin::Generated(role(LoopPart::Cond)));
        let current = cursor.load(Type::I64, self.index, false, "canary.i");
        let more = cursor.icmp(
            IntPredicate::Ult,
            Type::I64,
            current,
            Operand::constant(Type::I64, u64::from(self.words)),
            "canary.more",
        );
        cursor.cond_br(more, body, exit, None);

        CountedLoop { head, cond, body }
    }

    fn body_cursor<'f>(&self, func: &'f mut Function, body: BlockId, role: Role) -> Cursor<'f> {
        func.cursor_at_end(body).with_origin(Origin::Generated(role))
    }

    /// Load the index and compute `canary + index * pointer_width`.
    fn word_address(&self, cursor: &mut Cursor<'_>) -> (Value, Value) {
        let word = cursor.load(Type::I64, self.index, false, "canary.i");
        let offset = cursor.binary(
            BinaryOp::Mul,
            Type::I64,
            word,
            Operand::constant(Type::I64, u64::from(self.pointer_width)),
            "canary.off",
        );
        let addr = cursor.ptr_add(self.canary, offset, "canary.addr");
        (word, addr)
    }

    fn advance(&self, cursor: &mut Cursor<'_>, word: Value) {
        let next = cursor.binary(
            BinaryOp::Add,
            Type::I64,
            word,
            Operand::constant(Type::I64, 1),
            "canary.next",
        );
        cursor.store(Type::I64, next, self.index, false);
    }
}

#[cfg(test)]
mod tests {
    use ir::{InstKind, Terminator};

    use super::*;

    fn scaffold() -> (Function, BlockId, WordLoop) {
        let mut func = Function::new("f", None);
        let entry = func.append_block("entry", Origin::Source);
        let mut cursor = func.cursor_at_end(entry);
        let canary = cursor.alloca(Type::Ptr, 4, "canary");
        let index = cursor.alloca(Type::I64, 1, "idx");
        let guard = cursor.load(Type::Ptr, Operand::global("g"), true, "guard");
        cursor.ret(None);
        let word_loop = WordLoop {
            canary,
            words: 4,
            guard,
            index,
            pointer_width: 8,
        };
        (func, entry, word_loop)
    }

    #[test]
    fn test_store_loop_shape() {
        let (mut func, entry, word_loop) = scaffold();
        let exit = func.append_block("exit", Origin::Source);
        func.cursor_at_end(exit).ret(None);

        let blocks = word_loop.build_store(&mut func, exit, exit);

        assert_eq!(
            func.blocks().collect::<Vec<_>>(),
            vec![entry, blocks.head, blocks.cond, blocks.body, exit]
        );
        assert_eq!(func.terminator(blocks.head), Some(&Terminator::Br(blocks.cond)));
        assert_eq!(func.terminator(blocks.body), Some(&Terminator::Br(blocks.cond)));
        match func.terminator(blocks.cond) {
            Some(Terminator::CondBr {
                then_block,
                else_block,
                weights,
                ..
            }) => {
                assert_eq!((*then_block, *else_block), (blocks.body, exit));
                assert!(weights.is_none());
            }
            other => panic!("unexpected terminator {other:?}"),
        }

        let volatile_stores = func
            .block_insts(blocks.body)
            .filter(|(_, data)| matches!(data.kind, InstKind::Store { volatile: true, .. }))
            .count();
        assert_eq!(volatile_stores, 1);
        assert!(func
            .block_insts(blocks.body)
            .all(|(_, data)| data.origin == Origin::Generated(Role::StoreLoop(LoopPart::Body))));
    }

    #[test]
    fn test_validate_loop_exits_to_failure_on_mismatch() {
        let (mut func, _, word_loop) = scaffold();
        let next = func.append_block("next", Origin::Source);
        func.cursor_at_end(next).ret(None);
        let failure = func.append_block("failure", Origin::Source);
        func.cursor_at_end(failure).unreachable();

        let blocks = word_loop.build_validate(&mut func, next, next, failure);

        match func.terminator(blocks.body) {
            Some(Terminator::CondBr {
                then_block,
                else_block,
                weights,
                ..
            }) => {
                assert_eq!((*then_block, *else_block), (blocks.cond, failure));
                assert_eq!(*weights, Some(LIKELY_SUCCESS));
            }
            other => panic!("unexpected terminator {other:?}"),
        }
        assert_eq!(
            func.block(blocks.head).origin,
            Origin::Generated(Role::ValidateLoop(LoopPart::Head))
        );
    }
}
