// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Canary checks on every original return.
//!
//! Returns are collected before anything is mutated; see [`original_returns`].
//!
//! # Fast path
//!
//! When the target has a guard check primitive, each canary's first word is
//! loaded and passed to it right before the return. No blocks are created.
//!
//! # Slow path
//!
//! Otherwise each return is rewritten into a chain of check blocks, one per
//! canary, ending in a clone of the return:
//!
//! ```text
//! ret_block:       ...; br check.0
//! check.0:         scalar canary: load, re-read guard, compare
//!                  br %ok, check.1, failure
//! check.1:         array canary: re-read guard, br validate.head
//! validate.*:      word loop, mismatch -> failure, done -> guarded
//! guarded:         ret <original operands>
//! ```

use ir::{BlockId, Cursor, Function, IntPredicate, Origin, Role, Terminator, Type, Value};
use tracing::{debug, trace};

use crate::{
    failure::FailureHandler,
    loops::LIKELY_SUCCESS,
    prologue::{Canary, Prologue},
    target::TargetInfo,
};

/// Source blocks ending in `ret`, in layout order.
pub fn original_returns(func: &Function) -> Vec<BlockId> {
    func.blocks()
        .filter(|&block| {
            let data = func.block(block);
            !data.origin.is_generated()
                && data
                    .terminator
                    .as_ref()
                    .is_some_and(Terminator::is_return)
        })
        .collect()
}

/// Inserts canary checks before returns.
pub struct ReturnGuardInstrumenter<'a> {
    target: &'a dyn TargetInfo,
    canaries: &'a [Canary],
}

impl<'a> ReturnGuardInstrumenter<'a> {
    pub fn new(target: &'a dyn TargetInfo, prologue: &'a Prologue) -> Self {
        Self {
            target,
            canaries: &prologue.canaries,
        }
    }

    /// Guard every block in `returns`. Returns the number of guarded returns.
    pub fn instrument(
        &self,
        func: &mut Function,
        returns: &[BlockId],
        failure: &mut FailureHandler,
    ) -> usize {
        if self.canaries.is_empty() {
            return 0;
        }

        match self.target.guard_check() {
            Some(check) => {
                debug!(function = func.name(), check, "using guard check primitive");
                for &block in returns {
                    self.call_guard_check(func, block, check);
                }
            }
            None => {
                debug!(function = func.name(), returns = returns.len(), "building check chains");
                for &block in returns {
                    self.build_check_chain(func, block, failure);
                }
            }
        }
        returns.len()
    }

    fn call_guard_check(&self, func: &mut Function, block: BlockId, check: &str) {
        let mut cursor = func
            .cursor_at_end(block)
            .with_origin(Origin::Generated(Role::GuardCheckCall));
        for canary in self.canaries {
            let word = cursor.load(Type::Ptr, canary.slot, true, "canary.word");
            cursor.call_void(check, vec![(Type::Ptr, word.into())]);
        }
    }

    fn build_check_chain(&self, func: &mut Function, block: BlockId, failure: &mut FailureHandler) {
        let Some(ret) = func.terminator(block).cloned() else {
            return;
        };
        let failure = failure.block(func);
        let pointer_width = self.target.pointer_width();

        let guarded = func.append_block("canary.ret", Origin::Generated(Role::GuardedReturn));
        func.set_terminator(guarded, ret);

        // Built back to front so every check knows its successor.
        let mut next = guarded;
        for canary in self.canaries.iter().rev() {
            let check =
                func.insert_block_before(next, "canary.check", Origin::Generated(Role::Check));
            let mut cursor = func
                .cursor_at_end(check)
                .with_origin(Origin::Generated(Role::Check));
            let guard = self.read_guard(&mut cursor);

            match canary.word_loop(guard, pointer_width) {
                None => {
                    let stored = cursor.load(Type::Ptr, canary.slot, true, "canary.value");
                    let intact =
                        cursor.icmp(IntPredicate::Eq, Type::Ptr, stored, guard, "canary.ok");
                    cursor.cond_br(intact, next, failure, Some(LIKELY_SUCCESS));
                }
                Some(word_loop) => {
                    let blocks = word_loop.build_validate(func, next, next, failure);
                    func.set_terminator(check, Terminator::Br(blocks.head));
                }
            }
            next = check;
        }

        func.set_terminator(block, Terminator::Br(next));
        trace!(
            function = func.name(),
            block = func.block(block).name.as_str(),
            "guarded return"
        );
    }

    /// Fresh guard read, tagged as such inside whatever block it lands in.
    fn read_guard(&self, cursor: &mut Cursor<'_>) -> Value {
        let origin = cursor.origin();
        cursor.set_origin(Origin::Generated(Role::GuardRead));
        let guard = self.target.guard().read(cursor);
        cursor.set_origin(origin);
        guard
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use ir::{abi, parse_function, InstKind, LoopPart, Operand};

    use super::*;
    use crate::{plan::plan, prologue::allocate_and_initialize, target::Target};

    fn guard(text: &str, target: &Target) -> Function {
        let mut func = parse_function(text).unwrap();
        let plan = plan(&func);
        let returns = original_returns(&func);
        let prologue = allocate_and_initialize(&mut func, &plan, target).unwrap();
        let mut failure = FailureHandler::new(&func);
        let guarded = ReturnGuardInstrumenter::new(target, &prologue).instrument(
            &mut func,
            &returns,
            &mut failure,
        );
        assert_eq!(guarded, returns.len());
        func
    }

    fn blocks_with_role(func: &Function, role: Role) -> Vec<BlockId> {
        func.blocks()
            .filter(|&b| func.block(b).origin == Origin::Generated(role))
            .collect()
    }

    #[test]
    fn test_original_returns_skip_generated_blocks() {
        let func = parse_function(indoc! {"
            fn @f(i1 %c) {
            entry:
              br %c, a, b
            a:
              ret
            b:
              br a
            g: !gen(guarded-ret)
              ret
            }
        "})
        .unwrap();
        assert_eq!(original_returns(&func), vec![func.find_block("a").unwrap()]);
    }

    #[test]
    fn test_scalar_chain() {
        let func = guard(
            indoc! {"
                fn @f(i64 %x) -> i64 {
                entry:
                  %buf = alloca i8, 8 !protect
                  ret i64 %x
                }
            "},
            &Target::default(),
        );

        let entry = func.entry().unwrap();
        let checks = blocks_with_role(&func, Role::Check);
        let guarded = blocks_with_role(&func, Role::GuardedReturn);
        let failures = blocks_with_role(&func, Role::Failure);
        assert_eq!((checks.len(), guarded.len(), failures.len()), (1, 1, 1));

        assert_eq!(func.terminator(entry), Some(&Terminator::Br(checks[0])));
        match func.terminator(checks[0]) {
            Some(Terminator::CondBr {
                then_block,
                else_block,
                weights,
                ..
            }) => {
                assert_eq!((*then_block, *else_block), (guarded[0], failures[0]));
                assert_eq!(*weights, Some(LIKELY_SUCCESS));
            }
            other => panic!("unexpected terminator {other:?}"),
        }

        let x = func.find_value("x").unwrap();
        assert_eq!(
            func.terminator(guarded[0]),
            Some(&Terminator::Ret(Some((Type::I64, Operand::Value(x)))))
        );

        // The check re-reads the guard instead of reusing the entry read.
        let guard_reads = func
            .block_insts(checks[0])
            .filter(|(_, data)| data.origin == Origin::Generated(Role::GuardRead))
            .count();
        assert_eq!(guard_reads, 1);
    }

    #[test]
    fn test_array_chain_uses_validate_loop() {
        let func = guard(
            indoc! {"
                fn @f(i1 %c) {
                entry:
                  %a = alloca i8, 8 !protect
                  %b = alloca i8, 64 !protect(32)
                  br %c, left, right
                left:
                  ret
                right:
                  ret
                }
            "},
            &Target::default(),
        );

        assert_eq!(blocks_with_role(&func, Role::Check).len(), 4);
        assert_eq!(blocks_with_role(&func, Role::GuardedReturn).len(), 2);
        assert_eq!(blocks_with_role(&func, Role::Failure).len(), 1);
        let heads = blocks_with_role(&func, Role::ValidateLoop(LoopPart::Head));
        assert_eq!(heads.len(), 2);

        for block in ["left", "right"] {
            let block = func.find_block(block).unwrap();
            assert!(matches!(func.terminator(block), Some(Terminator::Br(_))));
        }
    }

    #[test]
    fn test_fast_path_adds_calls_only() {
        let text = indoc! {"
            fn @f() {
            entry:
              %a = alloca i8, 8 !protect
              %b = alloca i8, 8 !protect
              ret
            }
        "};
        let target = Target::default().with_guard_check("__security_check_cookie");
        let func = guard(text, &target);

        assert_eq!(func.block_count(), 1);
        let entry = func.entry().unwrap();
        assert_eq!(func.terminator(entry), Some(&Terminator::Ret(None)));

        let calls: Vec<_> = func
            .block_insts(entry)
            .filter(|(_, data)| {
                matches!(&data.kind, InstKind::Call { callee, .. } if callee == "__security_check_cookie")
            })
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|(_, data)| data.origin == Origin::Generated(Role::GuardCheckCall)));
        // The last two instructions before the return are the second check.
        let tail: Vec<_> = func.block_insts(entry).map(|(_, data)| data).collect();
        assert!(matches!(tail[tail.len() - 2].kind, InstKind::Load { volatile: true, .. }));
        assert!(!func.to_string().contains(abi::STACK_CHK_FAIL));
    }
}
