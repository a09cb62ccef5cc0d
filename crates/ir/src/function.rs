// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Function, block and instruction data structures.
//!
//! A [`Function`] owns three arenas (values, instructions, blocks) plus a
//! block layout. Handles ([`Value`], [`InstId`], [`BlockId`]) index into the
//! arenas and stay valid for the lifetime of the function: nothing is ever
//! removed, blocks are only reordered or emptied.

use std::collections::HashSet;

use crate::types::{BlockId, InstId, Operand, Origin, Type, Value};

/// Integer arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl IntPredicate {
    pub fn name(self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let pred = match name {
            "eq" => IntPredicate::Eq,
            "ne" => IntPredicate::Ne,
            "ult" => IntPredicate::Ult,
            "ule" => IntPredicate::Ule,
            "ugt" => IntPredicate::Ugt,
            "uge" => IntPredicate::Uge,
            "slt" => IntPredicate::Slt,
            "sle" => IntPredicate::Sle,
            "sgt" => IntPredicate::Sgt,
            "sge" => IntPredicate::Sge,
            _ => return None,
        };
        Some(pred)
    }
}

/// Non-terminator instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Stack-slot declaration of `count` elements of `elem`.
    ///
    /// `protect` is the `canarySize` attribute: `None` for an ordinary slot,
    /// `Some(0)` for one pointer-sized canary, `Some(n)` for an `n`-byte canary.
    Alloca {
        elem: Type,
        count: u32,
        protect: Option<u32>,
    },
    Load {
        ty: Type,
        ptr: Operand,
        volatile: bool,
    },
    Store {
        ty: Type,
        value: Operand,
        ptr: Operand,
        volatile: bool,
    },
    Binary {
        op: BinaryOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Icmp {
        pred: IntPredicate,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    /// `base + offset` bytes.
    PtrAdd { base: Operand, offset: Operand },
    Call {
        callee: String,
        args: Vec<(Type, Operand)>,
        ret: Option<Type>,
    },
    /// Associates a canary slot with the buffer it protects. Lowered by the
    /// code generator; a no-op for everything in this workspace.
    CanaryMark {
        guard: Operand,
        canary: Operand,
        buffer: Operand,
    },
}

impl InstKind {
    /// Type of the value this instruction defines, if any.
    pub fn result_type(&self) -> Option<Type> {
        match self {
            InstKind::Alloca { .. } | InstKind::PtrAdd { .. } => Some(Type::Ptr),
            InstKind::Load { ty, .. } | InstKind::Binary { ty, .. } => Some(*ty),
            InstKind::Icmp { .. } => Some(Type::I1),
            InstKind::Call { ret, .. } => *ret,
            InstKind::Store { .. } | InstKind::CanaryMark { .. } => None,
        }
    }

    pub fn is_alloca(&self) -> bool {
        matches!(self, InstKind::Alloca { .. })
    }

    /// All operands read by this instruction.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::PtrAdd { base, offset } => vec![base, offset],
            InstKind::Call { args, .. } => args.iter().map(|(_, op)| op).collect(),
            InstKind::CanaryMark {
                guard,
                canary,
                buffer,
            } => vec![guard, canary, buffer],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstData {
    pub kind: InstKind,
    pub result: Option<Value>,
    pub origin: Origin,
}

/// Relative likelihood of the two edges of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchWeights {
    pub taken: u32,
    pub not_taken: u32,
}

/// Block terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
        weights: Option<BranchWeights>,
    },
    Ret(Option<(Type, Operand)>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Terminator::Ret(_))
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
    pub origin: Origin,
}

/// Where an SSA value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Param(usize),
    Inst(InstId),
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub name: String,
    pub def: ValueDef,
}

/// A function: typed parameters, optional return type, and a CFG of blocks.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    params: Vec<Value>,
    ret: Option<Type>,
    values: Vec<ValueData>,
    insts: Vec<InstData>,
    blocks: Vec<BlockData>,
    /// Block order; the first block is the entry.
    layout: Vec<BlockId>,
    value_names: HashSet<String>,
    block_names: HashSet<String>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret: Option<Type>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret,
            values: Vec::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
            value_names: HashSet::new(),
            block_names: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ret_type(&self) -> Option<Type> {
        self.ret
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn add_param(&mut self, ty: Type, name: &str) -> Value {
        let index = self.params.len();
        let value = self.define_value(ty, name, ValueDef::Param(index));
        self.params.push(value);
        value
    }

    /// The entry block, or `None` for a declaration without a body.
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.layout.iter().copied()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.index()]
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst.index()]
    }

    /// Instructions of a block, in order.
    pub fn block_insts(&self, block: BlockId) -> impl Iterator<Item = (InstId, &InstData)> + '_ {
        self.blocks[block.index()]
            .insts
            .iter()
            .map(move |&id| (id, &self.insts[id.index()]))
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn value(&self, value: Value) -> &ValueData {
        &self.values[value.index()]
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn value_type(&self, value: Value) -> Type {
        self.values[value.index()].ty
    }

    pub fn value_name(&self, value: Value) -> &str {
        &self.values[value.index()].name
    }

    /// Instruction that defines `value`, if it is not a parameter.
    pub fn defining_inst(&self, value: Value) -> Option<&InstData> {
        match self.values[value.index()].def {
            ValueDef::Inst(inst) => Some(&self.insts[inst.index()]),
            ValueDef::Param(_) => None,
        }
    }

    pub fn terminator(&self, block: BlockId) -> Option<&Terminator> {
        self.blocks[block.index()].terminator.as_ref()
    }

    /// Replace a block's terminator, returning the previous one.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) -> Option<Terminator> {
        self.blocks[block.index()].terminator.replace(terminator)
    }

    /// Append a new, empty block at the end of the layout.
    pub fn append_block(&mut self, name: &str, origin: Origin) -> BlockId {
        let id = self.new_block(name, origin);
        self.layout.push(id);
        id
    }

    /// Insert a new, empty block immediately before `before` in the layout.
    pub fn insert_block_before(&mut self, before: BlockId, name: &str, origin: Origin) -> BlockId {
        let id = self.new_block(name, origin);
        let position = self
            .layout
            .iter()
            .position(|&b| b == before)
            .unwrap_or(self.layout.len());
        self.layout.insert(position, id);
        id
    }

    /// Move the first `at` instructions of `block` into a new block placed
    /// right before it in the layout.
    ///
    /// `block` keeps its identity, its remaining instructions and its
    /// terminator; the new block has no terminator yet. When `block` is the
    /// entry, the new block becomes the entry.
    pub fn hoist_prefix(&mut self, block: BlockId, at: usize, name: &str, origin: Origin) -> BlockId {
        let hoisted = self.insert_block_before(block, name, origin);
        let source = &mut self.blocks[block.index()].insts;
        let at = at.min(source.len());
        let prefix: Vec<InstId> = source.drain(..at).collect();
        self.blocks[hoisted.index()].insts = prefix;
        hoisted
    }

    /// Find a block by name.
    pub fn find_block(&self, name: &str) -> Option<BlockId> {
        self.blocks().find(|&b| self.blocks[b.index()].name == name)
    }

    /// Find a value by name.
    pub fn find_value(&self, name: &str) -> Option<Value> {
        self.values
            .iter()
            .position(|v| v.name == name)
            .map(Value::new)
    }

    /// Type of an operand. Globals are addresses.
    pub fn operand_type(&self, operand: &Operand) -> Type {
        match operand {
            Operand::Value(value) => self.value_type(*value),
            Operand::Const { ty, .. } => *ty,
            Operand::Global(_) => Type::Ptr,
        }
    }

    pub(crate) fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        origin: Origin,
        name: &str,
    ) -> (InstId, Option<Value>) {
        let id = InstId::new(self.insts.len());
        let result = kind
            .result_type()
            .map(|ty| self.define_value(ty, name, ValueDef::Inst(id)));
        self.insts.push(InstData {
            kind,
            result,
            origin,
        });
        let insts = &mut self.blocks[block.index()].insts;
        let index = index.min(insts.len());
        insts.insert(index, id);
        (id, result)
    }

    fn new_block(&mut self, name: &str, origin: Origin) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        let name = unique_name(&mut self.block_names, name, "bb");
        self.blocks.push(BlockData {
            name,
            insts: Vec::new(),
            terminator: None,
            origin,
        });
        id
    }

    fn define_value(&mut self, ty: Type, name: &str, def: ValueDef) -> Value {
        let id = Value::new(self.values.len());
        let name = unique_name(&mut self.value_names, name, "v");
        self.values.push(ValueData { ty, name, def });
        id
    }
}

/// Reserve a unique name based on `base`, appending `.N` on collision.
fn unique_name(taken: &mut HashSet<String>, base: &str, fallback: &str) -> String {
    let base = if base.is_empty() { fallback } else { base };
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut counter = 1usize;
    loop {
        let candidate = format!("{base}.{counter}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// An ordered collection of functions.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    pub fn into_functions(self) -> Vec<Function> {
        self.functions
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_names_are_uniqued() {
        let mut func = Function::new("f", None);
        let a = func.add_param(Type::I64, "x");
        let b = func.add_param(Type::I64, "x");
        assert_eq!(func.value_name(a), "x");
        assert_eq!(func.value_name(b), "x.1");

        let first = func.append_block("check", Origin::Source);
        let second = func.append_block("check", Origin::Source);
        assert_eq!(func.block(first).name, "check");
        assert_eq!(func.block(second).name, "check.1");
    }

    #[test]
    fn test_hoist_prefix_becomes_entry() {
        let mut func = Function::new("f", None);
        let entry = func.append_block("entry", Origin::Source);
        let mut cursor = func.cursor_at_end(entry);
        cursor.alloca(Type::I64, 1, "a");
        cursor.alloca(Type::I64, 1, "b");
        cursor.ret(None);

        let prologue = func.hoist_prefix(entry, 1, "prologue", Origin::Generated(Role::Prologue));

        assert_eq!(func.entry(), Some(prologue));
        assert_eq!(func.block(prologue).insts.len(), 1);
        assert_eq!(func.block(entry).insts.len(), 1);
        assert!(func.terminator(prologue).is_none());
        assert_eq!(func.terminator(entry), Some(&Terminator::Ret(None)));
    }

    #[test]
    fn test_insert_block_before_keeps_order() {
        let mut func = Function::new("f", None);
        let a = func.append_block("a", Origin::Source);
        let c = func.append_block("c", Origin::Source);
        let b = func.insert_block_before(c, "b", Origin::Source);
        assert_eq!(func.blocks().collect::<Vec<_>>(), vec![a, b, c]);
    }
}
