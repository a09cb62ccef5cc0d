// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Target capabilities consumed by the pass.
//!
//! The pass never looks the guard value up by itself: it asks the
//! [`GuardSource`] supplied by the [`TargetInfo`] to emit a read wherever one
//! is needed. Every call emits a fresh read, so the value compared at a
//! return is re-read rather than reused from function entry.

use ir::{abi, Cursor, Operand, Type, Value};

/// Emits reads of the guard value.
pub trait GuardSource {
    /// Emit a fresh read of the guard value at the cursor and return the
    /// pointer-sized result.
    fn read(&self, cursor: &mut Cursor<'_>) -> Value;
}

/// Information about the compilation target.
pub trait TargetInfo {
    /// Pointer width in bytes (4 or 8).
    fn pointer_width(&self) -> u32;

    /// Source of the guard value.
    fn guard(&self) -> &dyn GuardSource;

    /// Built-in guard check primitive, if the target has one.
    ///
    /// When present it is called with one loaded canary word and aborts on
    /// mismatch, so no explicit comparison chain is needed.
    fn guard_check(&self) -> Option<&str> {
        None
    }
}

/// Reads the guard from a global symbol with a volatile load.
#[derive(Debug, Clone)]
pub struct SymbolGuard {
    symbol: String,
}

impl SymbolGuard {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Default for SymbolGuard {
    fn default() -> Self {
        Self::new(abi::STACK_CHK_GUARD)
    }
}

impl GuardSource for SymbolGuard {
    fn read(&self, cursor: &mut Cursor<'_>) -> Value {
        cursor.load(Type::Ptr, Operand::global(&self.symbol), true, "guard")
    }
}

/// Stock [`TargetInfo`] implementation.
#[derive(Debug, Clone)]
pub struct Target {
    pointer_width: u32,
    guard: SymbolGuard,
    guard_check: Option<String>,
}

impl Target {
    pub fn new(pointer_width: u32) -> Self {
        Self {
            pointer_width,
            guard: SymbolGuard::default(),
            guard_check: None,
        }
    }

    /// Use `symbol` as the built-in guard check primitive.
    pub fn with_guard_check(mut self, symbol: impl Into<String>) -> Self {
        self.guard_check = Some(symbol.into());
        self
    }

    pub fn with_guard(mut self, guard: SymbolGuard) -> Self {
        self.guard = guard;
        self
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new(8)
    }
}

impl TargetInfo for Target {
    fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    fn guard(&self) -> &dyn GuardSource {
        &self.guard
    }

    fn guard_check(&self) -> Option<&str> {
        self.guard_check.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use ir::{Function, InstKind, Origin};

    use super::*;

    #[test]
    fn test_symbol_guard_emits_volatile_load() {
        let mut func = Function::new("f", None);
        let entry = func.append_block("entry", Origin::Source);
        let guard = SymbolGuard::new("my_guard");

        let mut cursor = func.cursor_at_end(entry);
        let first = guard.read(&mut cursor);
        let second = guard.read(&mut cursor);

        assert_ne!(first, second);
        let (_, load) = func.block_insts(entry).next().unwrap();
        assert_eq!(
            load.kind,
            InstKind::Load {
                ty: Type::Ptr,
                ptr: Operand::global("my_guard"),
                volatile: true,
            }
        );
    }

    #[test]
    fn test_target_defaults() {
        let target = Target::default();
        assert_eq!(target.pointer_width(), 8);
        assert_eq!(target.guard_check(), None);

        let target = Target::new(4).with_guard_check("__security_check_cookie");
        assert_eq!(target.guard_check(), Some("__security_check_cookie"));
    }
}
