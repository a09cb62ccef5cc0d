// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Insertion cursor for building and editing blocks.
//!
//! A [`Cursor`] points into a block (before a given instruction, or at the end
//! of the instruction list) and inserts instructions there, advancing past
//! each one. Terminator helpers replace the block's terminator. Every entity
//! the cursor creates receives the cursor's current [`Origin`].

use crate::{
    function::{BinaryOp, BranchWeights, Function, InstKind, IntPredicate, Terminator},
    types::{BlockId, Operand, Origin, Type, Value},
};

pub struct Cursor<'f> {
    func: &'f mut Function,
    block: BlockId,
    index: usize,
    origin: Origin,
}

impl Function {
    /// Cursor positioned after the last instruction of `block` (before its terminator).
    pub fn cursor_at_end(&mut self, block: BlockId) -> Cursor<'_> {
        let index = self.block(block).insts.len();
        Cursor {
            func: self,
            block,
            index,
            origin: Origin::Source,
        }
    }

    /// Cursor positioned before the `index`-th instruction of `block`.
    pub fn cursor_at(&mut self, block: BlockId, index: usize) -> Cursor<'_> {
        Cursor {
            func: self,
            block,
            index,
            origin: Origin::Source,
        }
    }
}

impl<'f> Cursor<'f> {
    /// Tag everything inserted from now on with `origin`.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Index the next instruction will be inserted at.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn func(&self) -> &Function {
        &*self.func
    }

    pub fn alloca(&mut self, elem: Type, count: u32, name: &str) -> Value {
        self.alloca_with(elem, count, None, name)
    }

    /// Stack slot carrying an optional `canarySize` protection attribute.
    pub fn alloca_with(&mut self, elem: Type, count: u32, protect: Option<u32>, name: &str) -> Value {
        self.emit_value(
            InstKind::Alloca {
                elem,
                count,
                protect,
            },
            name,
        )
    }

    pub fn load(&mut self, ty: Type, ptr: impl Into<Operand>, volatile: bool, name: &str) -> Value {
        self.emit_value(
            InstKind::Load {
                ty,
                ptr: ptr.into(),
                volatile,
            },
            name,
        )
    }

    pub fn store(&mut self, ty: Type, value: impl Into<Operand>, ptr: impl Into<Operand>, volatile: bool) {
        self.emit(InstKind::Store {
            ty,
            value: value.into(),
            ptr: ptr.into(),
            volatile,
        });
    }

    pub fn binary(
        &mut self,
        op: BinaryOp,
        ty: Type,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
        name: &str,
    ) -> Value {
        self.emit_value(
            InstKind::Binary {
                op,
                ty,
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
            name,
        )
    }

    pub fn icmp(
        &mut self,
        pred: IntPredicate,
        ty: Type,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
        name: &str,
    ) -> Value {
        self.emit_value(
            InstKind::Icmp {
                pred,
                ty,
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
            name,
        )
    }

    pub fn ptr_add(&mut self, base: impl Into<Operand>, offset: impl Into<Operand>, name: &str) -> Value {
        self.emit_value(
            InstKind::PtrAdd {
                base: base.into(),
                offset: offset.into(),
            },
            name,
        )
    }

    /// Call returning nothing.
    pub fn call_void(&mut self, callee: &str, args: Vec<(Type, Operand)>) {
        self.emit(InstKind::Call {
            callee: callee.to_string(),
            args,
            ret: None,
        });
    }

    /// Call returning a value of type `ret`.
    pub fn call(&mut self, callee: &str, args: Vec<(Type, Operand)>, ret: Type, name: &str) -> Value {
        self.emit_value(
            InstKind::Call {
                callee: callee.to_string(),
                args,
                ret: Some(ret),
            },
            name,
        )
    }

    pub fn canary_mark(
        &mut self,
        guard: impl Into<Operand>,
        canary: impl Into<Operand>,
        buffer: impl Into<Operand>,
    ) {
        self.emit(InstKind::CanaryMark {
            guard: guard.into(),
            canary: canary.into(),
            buffer: buffer.into(),
        });
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(
        &mut self,
        cond: impl Into<Operand>,
        then_block: BlockId,
        else_block: BlockId,
        weights: Option<BranchWeights>,
    ) {
        self.terminate(Terminator::CondBr {
            cond: cond.into(),
            then_block,
            else_block,
            weights,
        });
    }

    pub fn ret(&mut self, value: Option<(Type, Operand)>) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Set the block's terminator, returning the one it replaces.
    pub fn terminate(&mut self, terminator: Terminator) -> Option<Terminator> {
        self.func.set_terminator(self.block, terminator)
    }

    /// Insert a non-value instruction (store, void call, marker).
    pub fn emit(&mut self, kind: InstKind) {
        self.insert(kind, "");
    }

    /// Insert an instruction that defines a value.
    ///
    /// # Panics
    ///
    /// Panics if `kind` does not define a value; every caller passes one of the
    /// value-producing kinds built by the helpers above.
    fn emit_value(&mut self, kind: InstKind, name: &str) -> Value {
        debug_assert!(kind.result_type().is_some());
        match self.insert(kind, name) {
            Some(value) => value,
            None => unreachable!("value-producing instruction without a result"),
        }
    }

    fn insert(&mut self, kind: InstKind, name: &str) -> Option<Value> {
        let (_, result) = self
            .func
            .insert_inst(self.block, self.index, kind, self.origin, name);
        self.index += 1;
        result
    }
}
