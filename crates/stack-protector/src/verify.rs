// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Structural verification of protected functions
//!
//! Provides [`Verifier`], which checks that an instrumented function keeps the
//! guarantees the pass is meant to establish:
//!
//! | Check | Description |
//! |-------|-------------|
//! | **Buffer coverage** | Every `!protect` buffer in the entry declarations has a canary |
//! | **Return coverage** | Every reachable `ret` sits in a guarded return block, or (with a guard check primitive) is preceded by one call per canary |
//! | **Check dominance** | For every canary, some check of it dominates every guarded return |
//! | **Initialisation first** | The canary's initialising store dominates each of its checks |
//! | **Failure block** | At most one; it calls the abort primitive and ends in `unreachable` |

use std::collections::HashSet;

use ir::{
    abi, BlockGraph, BlockId, Dominance, Function, InstData, InstKind, LoopPart, Operand, Origin,
    Role, Terminator, Value,
};

use crate::error::{VerificationError, VerificationResult};

/// Verifier for one instrumented function.
pub struct Verifier<'a> {
    func: &'a Function,
    guard_check: Option<&'a str>,
}

impl<'a> Verifier<'a> {
    pub fn new(func: &'a Function) -> Self {
        Self {
            func,
            guard_check: None,
        }
    }

    /// Expect the fast-path shape built for a target with this guard check
    /// primitive.
    pub fn with_guard_check(mut self, guard_check: Option<&'a str>) -> Self {
        self.guard_check = guard_check;
        self
    }

    /// Run all checks.
    pub fn verify(&self) -> VerificationResult {
        let mut result = VerificationResult::default();
        let canaries = self.canaries();

        result.extend(self.check_buffer_coverage(&canaries));
        result.extend(self.check_failure_blocks());

        if canaries.is_empty() {
            return result;
        }

        let graph = BlockGraph::new(self.func);
        let Some(dominance) = graph.dominance() else {
            return result;
        };
        let reachable = graph.reachable();
        let returns: Vec<BlockId> = self
            .func
            .blocks()
            .filter(|b| reachable.contains(b))
            .filter(|&b| self.func.terminator(b).is_some_and(Terminator::is_return))
            .collect();

        for &(_, canary) in &canaries {
            let init = self.init_site(canary, &dominance);
            if init.is_none() {
                result.extend([VerificationError::MissingInitialisation {
                    canary: self.name(canary),
                }]);
            }

            let sites = self.check_sites(canary, &dominance);
            if let Some(init) = init {
                for &site in &sites {
                    if !dominance.dominates(init, site) {
                        result.extend([VerificationError::CheckBeforeInitialisation {
                            canary: self.name(canary),
                            block: self.func.block(site).name.clone(),
                        }]);
                    }
                }
            }

            for &block in &returns {
                let covered = sites.iter().any(|&site| dominance.dominates(site, block));
                if covered {
                    continue;
                }
                let block = self.func.block(block).name.clone();
                let canary = self.name(canary);
                result.extend([match self.guard_check {
                    Some(_) => VerificationError::MissingGuardCheckCall { canary, block },
                    None => VerificationError::MissingCheck { canary, block },
                }]);
            }
        }

        if self.guard_check.is_none() {
            for &block in &returns {
                if self.func.block(block).origin != Origin::Generated(Role::GuardedReturn) {
                    result.extend([VerificationError::UnguardedReturn {
                        block: self.func.block(block).name.clone(),
                    }]);
                }
            }
        }

        result
    }

    /// Canary slots and the buffers they guard.
    fn canaries(&self) -> Vec<(Value, Value)> {
        self.func
            .blocks()
            .flat_map(|block| self.func.block_insts(block))
            .filter_map(|(_, data)| match (data.origin, data.result) {
                (Origin::Generated(Role::CanarySlot { buffer }), Some(slot)) => {
                    Some((buffer, slot))
                }
                _ => None,
            })
            .collect()
    }

    fn check_buffer_coverage(&self, canaries: &[(Value, Value)]) -> Vec<VerificationError> {
        let guarded: HashSet<Value> = canaries.iter().map(|&(buffer, _)| buffer).collect();
        let Some(entry) = self.func.entry() else {
            return Vec::new();
        };
        self.func
            .block_insts(entry)
            .take_while(|(_, data)| data.kind.is_alloca())
            .filter_map(|(_, data)| match (&data.kind, data.result) {
                (InstKind::Alloca { protect: Some(_), .. }, Some(buffer))
                    if data.origin == Origin::Source && !guarded.contains(&buffer) =>
                {
                    Some(VerificationError::UnguardedBuffer {
                        buffer: self.name(buffer),
                    })
                }
                _ => None,
            })
            .collect()
    }

    fn check_failure_blocks(&self) -> Vec<VerificationError> {
        let failures: Vec<BlockId> = self
            .func
            .blocks()
            .filter(|&b| self.func.block(b).origin == Origin::Generated(Role::Failure))
            .collect();

        let mut errors = Vec::new();
        if failures.len() > 1 {
            errors.push(VerificationError::MultipleFailureBlocks {
                count: failures.len(),
            });
        }
        for block in failures {
            let aborts = self.func.block_insts(block).any(|(_, data)| {
                matches!(&data.kind, InstKind::Call { callee, .. } if callee == abi::STACK_CHK_FAIL)
            });
            let reason = if !aborts {
                Some(format!("no call to @{}", abi::STACK_CHK_FAIL))
            } else if self.func.terminator(block) != Some(&Terminator::Unreachable) {
                Some("does not end in unreachable".to_string())
            } else {
                None
            };
            if let Some(reason) = reason {
                errors.push(VerificationError::MalformedFailureBlock {
                    block: self.func.block(block).name.clone(),
                    reason,
                });
            }
        }
        errors
    }

    /// Block whose execution guarantees the canary was initialised.
    fn init_site(&self, canary: Value, dominance: &Dominance) -> Option<BlockId> {
        self.blocks_where(|data| match &data.kind {
            InstKind::Store {
                ptr, volatile: true, ..
            } => self.addresses(ptr, canary),
            _ => false,
        })
        .into_iter()
        .map(|block| self.loop_exit_site(block, dominance))
        .next()
    }

    /// Blocks whose execution guarantees the canary was checked.
    fn check_sites(&self, canary: Value, dominance: &Dominance) -> Vec<BlockId> {
        let loads: HashSet<Value> = self
            .func
            .blocks()
            .flat_map(|block| self.func.block_insts(block))
            .filter_map(|(_, data)| match (&data.kind, data.result) {
                (InstKind::Load { ptr, volatile: true, .. }, Some(value))
                    if self.addresses(ptr, canary) =>
                {
                    Some(value)
                }
                _ => None,
            })
            .collect();

        match self.guard_check {
            // The call consuming a loaded canary word is the check.
            Some(check) => self.blocks_where(|data| match &data.kind {
                InstKind::Call { callee, args, .. } if callee == check => args
                    .iter()
                    .any(|(_, arg)| arg.as_value().is_some_and(|v| loads.contains(&v))),
                _ => false,
            }),
            // A comparison of a loaded canary word is the check.
            None => self
                .blocks_where(|data| match &data.kind {
                    InstKind::Icmp { lhs, rhs, .. } => [lhs, rhs]
                        .iter()
                        .any(|op| op.as_value().is_some_and(|v| loads.contains(&v))),
                    _ => false,
                })
                .into_iter()
                .map(|block| self.loop_exit_site(block, dominance))
                .collect(),
        }
    }

    /// A loop body does not dominate the loop exit; its condition block does.
    fn loop_exit_site(&self, block: BlockId, dominance: &Dominance) -> BlockId {
        match self.func.block(block).origin {
            Origin::Generated(Role::StoreLoop(LoopPart::Body))
            | Origin::Generated(Role::ValidateLoop(LoopPart::Body)) => {
                dominance.immediate_dominator(block).unwrap_or(block)
            }
            _ => block,
        }
    }

    /// Whether `ptr` is the canary slot or an offset into it.
    fn addresses(&self, ptr: &Operand, canary: Value) -> bool {
        let Some(ptr) = ptr.as_value() else {
            return false;
        };
        if ptr == canary {
            return true;
        }
        matches!(
            self.func.defining_inst(ptr).map(|data| &data.kind),
            Some(InstKind::PtrAdd { base, .. }) if base.as_value() == Some(canary)
        )
    }

    fn blocks_where(&self, predicate: impl Fn(&InstData) -> bool) -> Vec<BlockId> {
        self.func
            .blocks()
            .filter(|&block| self.func.block_insts(block).any(|(_, data)| predicate(data)))
            .collect()
    }

    fn name(&self, value: Value) -> String {
        self.func.value_name(value).to_string()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use ir::parse_function;

    use super::*;
    use crate::{protect_function, target::Target};

    const TWO_RETURNS: &str = indoc! {"
        fn @f(i1 %c) -> i64 {
        entry:
          %a = alloca i8, 16 !protect
          %b = alloca i8, 64 !protect(32)
          br %c, left, right
        left:
          ret i64 1
        right:
          ret i64 2
        }
    "};

    #[test]
    fn test_protected_function_verifies() {
        let mut func = parse_function(TWO_RETURNS).unwrap();
        assert!(protect_function(&mut func, &Target::default()).unwrap());
        let result = Verifier::new(&func).verify();
        assert!(result.is_ok(), "{:?}", result.errors());
    }

    #[test]
    fn test_fast_path_verifies() {
        let target = Target::default().with_guard_check("__security_check_cookie");
        let mut func = parse_function(TWO_RETURNS).unwrap();
        assert!(protect_function(&mut func, &target).unwrap());

        let result = Verifier::new(&func)
            .with_guard_check(Some("__security_check_cookie"))
            .verify();
        assert!(result.is_ok(), "{:?}", result.errors());

        // Without the primitive the plain returns are reported.
        let errors = Verifier::new(&func).verify().into_errors();
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerificationError::UnguardedReturn { .. })));
    }

    #[test]
    fn test_unprotected_function_is_flagged() {
        let func = parse_function(TWO_RETURNS).unwrap();
        let errors = Verifier::new(&func).verify().into_errors();
        assert_eq!(
            errors,
            vec![
                VerificationError::UnguardedBuffer {
                    buffer: "a".to_string(),
                },
                VerificationError::UnguardedBuffer {
                    buffer: "b".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_bypassed_check_is_flagged() {
        // The return in `exit` is reachable around the check.
        let func = parse_function(indoc! {"
            fn @f(i1 %c) {
            entry:
              %a.canary = alloca ptr !gen(canary %a)
              %a = alloca i8, 8 !protect
              %g = load volatile ptr, @__stack_chk_guard !gen(guard-read)
              store volatile ptr %g, %a.canary !gen(canary-store)
              br %c, check, exit
            check: !gen(check)
              %w = load volatile ptr, %a.canary
              %g2 = load volatile ptr, @__stack_chk_guard
              %ok = icmp eq ptr %w, %g2
              br %ok, exit, fail
            exit: !gen(guarded-ret)
              ret
            fail: !gen(failure)
              call @__stack_chk_fail()
              unreachable
            }
        "})
        .unwrap();

        let errors = Verifier::new(&func).verify().into_errors();
        assert_eq!(
            errors,
            vec![VerificationError::MissingCheck {
                canary: "a.canary".to_string(),
                block: "exit".to_string(),
            }]
        );
    }

    #[test]
    fn test_malformed_failure_blocks() {
        let func = parse_function(indoc! {"
            fn @f() {
            entry:
              ret
            fail: !gen(failure)
              unreachable
            fail2: !gen(failure)
              call @__stack_chk_fail()
              ret
            }
        "})
        .unwrap();

        let errors = Verifier::new(&func).verify().into_errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], VerificationError::MultipleFailureBlocks { count: 2 });
        assert!(matches!(
            &errors[1],
            VerificationError::MalformedFailureBlock { block, .. } if block == "fail"
        ));
        assert!(matches!(
            &errors[2],
            VerificationError::MalformedFailureBlock { block, reason } if block == "fail2" && reason.contains("unreachable")
        ));
    }
}
