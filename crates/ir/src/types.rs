// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scalar types, entity handles, operands and provenance tags.

use std::fmt;

/// Integer and pointer types understood by the IR.
///
/// The width of [`Type::Ptr`] is not fixed by the IR; it is supplied by the
/// target (4 or 8 bytes) wherever a size is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    Ptr,
}

impl Type {
    /// Storage size in bytes.
    pub fn size(self, pointer_width: u32) -> u32 {
        match self {
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 => 8,
            Type::Ptr => pointer_width,
        }
    }

    /// Number of significant bits in a value of this type.
    pub fn bits(self, pointer_width: u32) -> u32 {
        match self {
            Type::I1 => 1,
            other => other.size(pointer_width) * 8,
        }
    }

    /// Mask selecting the significant bits of a value of this type.
    pub fn mask(self, pointer_width: u32) -> u64 {
        let bits = self.bits(pointer_width);
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::Ptr => "ptr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "i1" => Some(Type::I1),
            "i8" => Some(Type::I8),
            "i16" => Some(Type::I16),
            "i32" => Some(Type::I32),
            "i64" => Some(Type::I64),
            "ptr" => Some(Type::Ptr),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! entity {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Position of this entity in its owning arena.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

entity!(
    /// Handle to an SSA value (parameter or instruction result).
    Value
);
entity!(
    /// Handle to a basic block.
    BlockId
);
entity!(
    /// Handle to an instruction.
    InstId
);

/// An instruction or terminator operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Value(Value),
    /// Integer constant; `bits` is already truncated to the type's width.
    Const { ty: Type, bits: u64 },
    /// Address of a global symbol.
    Global(String),
}

impl Operand {
    pub fn constant(ty: Type, bits: u64) -> Self {
        Operand::Const { ty, bits }
    }

    pub fn global(symbol: impl Into<String>) -> Self {
        Operand::Global(symbol.into())
    }

    pub fn as_value(&self) -> Option<Value> {
        match self {
            Operand::Value(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

/// Part of a three-block counted loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopPart {
    /// Resets the index to zero.
    Head,
    /// Tests `index < count`.
    Cond,
    /// Does the per-word work and increments the index.
    Body,
}

/// What a pass-generated entity is for.
///
/// Carried on every generated block and instruction so that a later run can
/// recognise its own output without looking at names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Canary storage guarding `buffer`.
    CanarySlot { buffer: Value },
    /// Shared counter slot for store/validate loops.
    LoopIndex,
    /// Split-off function prologue holding declarations and initialisation.
    Prologue,
    /// Read of the guard value at function entry.
    GuardRead,
    /// Marker intrinsic tying a canary to its buffer.
    CanaryMark,
    /// Store of the guard into a scalar canary.
    CanaryStore,
    StoreLoop(LoopPart),
    /// One link of the return-time check chain.
    Check,
    ValidateLoop(LoopPart),
    /// Block holding the clone of a checked return.
    GuardedReturn,
    /// Shared block calling the abort primitive.
    Failure,
    /// Call to a target-provided guard check primitive.
    GuardCheckCall,
}

impl Role {
    /// Keyword used by the textual format, without operands.
    pub fn keyword(self) -> &'static str {
        match self {
            Role::CanarySlot { .. } => "canary",
            Role::LoopIndex => "loop-index",
            Role::Prologue => "prologue",
            Role::GuardRead => "guard-read",
            Role::CanaryMark => "mark",
            Role::CanaryStore => "canary-store",
            Role::StoreLoop(LoopPart::Head) => "store-head",
            Role::StoreLoop(LoopPart::Cond) => "store-cond",
            Role::StoreLoop(LoopPart::Body) => "store-body",
            Role::Check => "check",
            Role::ValidateLoop(LoopPart::Head) => "validate-head",
            Role::ValidateLoop(LoopPart::Cond) => "validate-cond",
            Role::ValidateLoop(LoopPart::Body) => "validate-body",
            Role::GuardedReturn => "guarded-ret",
            Role::Failure => "failure",
            Role::GuardCheckCall => "guard-check",
        }
    }

    /// Inverse of [`Role::keyword`] for roles without operands.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let role = match keyword {
            "loop-index" => Role::LoopIndex,
            "prologue" => Role::Prologue,
            "guard-read" => Role::GuardRead,
            "mark" => Role::CanaryMark,
            "canary-store" => Role::CanaryStore,
            "store-head" => Role::StoreLoop(LoopPart::Head),
            "store-cond" => Role::StoreLoop(LoopPart::Cond),
            "store-body" => Role::StoreLoop(LoopPart::Body),
            "check" => Role::Check,
            "validate-head" => Role::ValidateLoop(LoopPart::Head),
            "validate-cond" => Role::ValidateLoop(LoopPart::Cond),
            "validate-body" => Role::ValidateLoop(LoopPart::Body),
            "guarded-ret" => Role::GuardedReturn,
            "failure" => Role::Failure,
            "guard-check" => Role::GuardCheckCall,
            _ => return None,
        };
        Some(role)
    }
}

/// Provenance of a block or instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Origin {
    /// Present in the input program.
    #[default]
    Source,
    /// Created by an instrumentation pass.
    Generated(Role),
}

impl Origin {
    pub fn is_generated(self) -> bool {
        matches!(self, Origin::Generated(_))
    }

    pub fn role(self) -> Option<Role> {
        match self {
            Origin::Source => None,
            Origin::Generated(role) => Some(role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_size_follows_target() {
        assert_eq!(Type::Ptr.size(8), 8);
        assert_eq!(Type::Ptr.size(4), 4);
        assert_eq!(Type::I64.size(4), 8);
    }

    #[test]
    fn test_masks() {
        assert_eq!(Type::I1.mask(8), 1);
        assert_eq!(Type::I8.mask(8), 0xff);
        assert_eq!(Type::Ptr.mask(4), 0xffff_ffff);
        assert_eq!(Type::I64.mask(4), u64::MAX);
    }

    #[test]
    fn test_role_keywords_round_trip() {
        for role in [
            Role::LoopIndex,
            Role::Prologue,
            Role::StoreLoop(LoopPart::Cond),
            Role::ValidateLoop(LoopPart::Body),
            Role::GuardedReturn,
            Role::Failure,
        ] {
            assert_eq!(Role::from_keyword(role.keyword()), Some(role));
        }
        // `canary` carries an operand and is handled by the parser.
        assert_eq!(Role::from_keyword("canary"), None);
    }
}
