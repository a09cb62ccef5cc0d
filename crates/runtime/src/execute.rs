// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Interpreter for IR modules
//!
//! [`Executor`] runs a function of a [`Module`] against simulated stack
//! memory. It knows a handful of external symbols:
//!
//! | Symbol | Behaviour |
//! |--------|-----------|
//! | `@__stack_chk_guard` (configurable) | Global holding the guard value |
//! | `@__stack_chk_fail` | Stops execution with [`ExecutionStatus::StackSmashDetected`] |
//! | guard check primitive (optional) | Same, when its argument differs from the guard value |
//! | `@memset(ptr, i8, i64)` | Fills memory |
//! | `@memcpy(ptr, ptr, i64)` | Copies memory |
//!
//! Calls to other functions of the module are executed. Every executed
//! instruction and terminator costs one step; execution stops with
//! [`RuntimeError::StepLimitExceeded`] when the limit is reached.

use std::collections::HashMap;

use ir::{
    abi, BinaryOp, BlockId, Function, InstKind, IntPredicate, Module, Operand, Terminator, Type,
    Value,
};
use tracing::debug;

use crate::{
    error::{RuntimeError, RuntimeResult},
    memory::Memory,
};

/// Default upper bound on executed instructions.
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

/// Execution parameters.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Pointer width in bytes (4 or 8).
    pub pointer_width: u32,
    /// Global holding the guard value.
    pub guard_symbol: String,
    pub guard_value: u64,
    /// Built-in guard check primitive, if any.
    pub guard_check: Option<String>,
    pub step_limit: u64,
    /// Stack size in bytes.
    pub stack_size: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            pointer_width: 8,
            guard_symbol: abi::STACK_CHK_GUARD.to_string(),
            guard_value: 0x5eed_c0de_cafe_f00d,
            guard_check: None,
            step_limit: DEFAULT_STEP_LIMIT,
            stack_size: 64 * 1024,
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The called function returned normally.
    Returned,
    /// The abort primitive (or a failed guard check) was called.
    StackSmashDetected,
}

/// A block entered during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub function: String,
    pub block: String,
}

/// Result of executing a function.
#[derive(Debug, Clone)]
pub struct Execution {
    pub status: ExecutionStatus,
    /// Return value of the called function, if it returned one.
    pub return_value: Option<u64>,
    /// Blocks entered, in order.
    pub trace: Vec<Visit>,
    /// Instructions and terminators executed.
    pub steps: u64,
}

impl Execution {
    /// Number of times block `block` of `function` was entered.
    pub fn visits(&self, function: &str, block: &str) -> usize {
        self.trace
            .iter()
            .filter(|visit| visit.function == function && visit.block == block)
            .count()
    }
}

/// How a function call ended.
enum Flow {
    Return(Option<u64>),
    Abort,
}

/// Executes functions of a module.
pub struct Executor<'m> {
    module: &'m Module,
    env: Environment,
    memory: Memory,
    globals: HashMap<String, u64>,
    steps: u64,
    trace: Vec<Visit>,
}

impl<'m> Executor<'m> {
    /// Create an executor with the guard value stored in its global.
    pub fn new(module: &'m Module, env: Environment) -> RuntimeResult<Self> {
        let mut memory = Memory::new(env.stack_size);
        let guard = memory.allocate_global(env.pointer_width)?;
        memory.write(guard, env.pointer_width, env.guard_value)?;

        let globals = HashMap::from([(env.guard_symbol.clone(), guard)]);
        Ok(Self {
            module,
            env,
            memory,
            globals,
            steps: 0,
            trace: Vec::new(),
        })
    }

    /// Call `name` with `args` and run it to completion.
    pub fn call(&mut self, name: &str, args: &[u64]) -> RuntimeResult<Execution> {
        self.steps = 0;
        self.trace.clear();

        let flow = self.invoke(name, args)?;
        let (status, return_value) = match flow {
            Flow::Return(value) => (ExecutionStatus::Returned, value),
            Flow::Abort => (ExecutionStatus::StackSmashDetected, None),
        };
        Ok(Execution {
            status,
            return_value,
            trace: std::mem::take(&mut self.trace),
            steps: self.steps,
        })
    }

    fn invoke(&mut self, name: &str, args: &[u64]) -> RuntimeResult<Flow> {
        let func = self
            .module
            .function(name)
            .ok_or_else(|| RuntimeError::UnknownFunction {
                name: name.to_string(),
            })?;
        if func.params().len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                function: name.to_string(),
                expected: func.params().len(),
                found: args.len(),
            });
        }

        let frame = self.memory.stack_pointer();
        let result = self.run(func, args);
        self.memory.reset_stack_pointer(frame);
        result
    }

    fn run(&mut self, func: &Function, args: &[u64]) -> RuntimeResult<Flow> {
        let mut frame = Frame {
            func,
            values: vec![None; func.value_count()],
            pointer_width: self.env.pointer_width,
        };
        for (&param, &arg) in func.params().iter().zip(args) {
            let masked = arg & func.value_type(param).mask(frame.pointer_width);
            frame.values[param.index()] = Some(masked);
        }

        let mut block = func.entry().ok_or_else(|| RuntimeError::EmptyFunction {
            function: func.name().to_string(),
        })?;

        loop {
            self.trace.push(Visit {
                function: func.name().to_string(),
                block: func.block(block).name.clone(),
            });

            for (_, inst) in func.block_insts(block) {
                self.step()?;
                let value = match self.execute(&frame, &inst.kind)? {
                    Some(Flow::Abort) => return Ok(Flow::Abort),
                    Some(Flow::Return(value)) => value,
                    None => None,
                };
                if let (Some(result), Some(value)) = (inst.result, value) {
                    let ty = func.value_type(result);
                    frame.values[result.index()] = Some(value & ty.mask(frame.pointer_width));
                }
            }

            self.step()?;
            let terminator = func
                .terminator(block)
                .ok_or_else(|| RuntimeError::MissingTerminator {
                    function: func.name().to_string(),
                    block: func.block(block).name.clone(),
                })?;
            block = match terminator {
                Terminator::Br(target) => *target,
                Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                    ..
                } => {
                    if frame.operand(cond, &self.globals)? & 1 == 1 {
                        *then_block
                    } else {
                        *else_block
                    }
                }
                Terminator::Ret(None) => return Ok(Flow::Return(None)),
                Terminator::Ret(Some((ty, value))) => {
                    let value = frame.operand(value, &self.globals)? & ty.mask(frame.pointer_width);
                    return Ok(Flow::Return(Some(value)));
                }
                Terminator::Unreachable => return Err(self.unreachable(func, block)),
            };
        }
    }

    /// Execute one instruction. `Some(Flow::Return(v))` carries its result,
    /// `Some(Flow::Abort)` ends the whole execution.
    fn execute(&mut self, frame: &Frame<'_>, kind: &InstKind) -> RuntimeResult<Option<Flow>> {
        let pw = frame.pointer_width;
        let value = match kind {
            InstKind::Alloca { elem, count, .. } => {
                let size = u64::from(elem.size(pw)) * u64::from(*count);
                self.memory.allocate_stack(size, u64::from(elem.size(pw)))?
            }
            InstKind::Load { ty, ptr, .. } => {
                let address = frame.operand(ptr, &self.globals)?;
                self.memory.read(address, ty.size(pw))?
            }
            InstKind::Store { ty, value, ptr, .. } => {
                let value = frame.operand(value, &self.globals)?;
                let address = frame.operand(ptr, &self.globals)?;
                self.memory.write(address, ty.size(pw), value)?;
                return Ok(None);
            }
            InstKind::Binary { op, lhs, rhs, .. } => {
                let lhs = frame.operand(lhs, &self.globals)?;
                let rhs = frame.operand(rhs, &self.globals)?;
                match op {
                    BinaryOp::Add => lhs.wrapping_add(rhs),
                    BinaryOp::Sub => lhs.wrapping_sub(rhs),
                    BinaryOp::Mul => lhs.wrapping_mul(rhs),
                }
            }
            InstKind::Icmp { pred, ty, lhs, rhs } => {
                let lhs = frame.operand(lhs, &self.globals)?;
                let rhs = frame.operand(rhs, &self.globals)?;
                u64::from(compare(*pred, *ty, pw, lhs, rhs))
            }
            InstKind::PtrAdd { base, offset } => {
                let base = frame.operand(base, &self.globals)?;
                let offset = frame.operand(offset, &self.globals)?;
                base.wrapping_add(offset)
            }
            InstKind::Call { callee, args, .. } => {
                let args = args
                    .iter()
                    .map(|(_, arg)| frame.operand(arg, &self.globals))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                return self.call_symbol(callee, &args).map(Some);
            }
            InstKind::CanaryMark { .. } => return Ok(None),
        };
        Ok(Some(Flow::Return(Some(value))))
    }

    fn call_symbol(&mut self, callee: &str, args: &[u64]) -> RuntimeResult<Flow> {
        if callee == abi::STACK_CHK_FAIL {
            debug!("stack smash detected");
            return Ok(Flow::Abort);
        }
        if self.env.guard_check.as_deref() == Some(callee) {
            let mask = Type::Ptr.mask(self.env.pointer_width);
            let word = args.first().copied().unwrap_or_default();
            if word & mask != self.env.guard_value & mask {
                debug!(callee, "guard check failed");
                return Ok(Flow::Abort);
            }
            return Ok(Flow::Return(None));
        }
        match (callee, args) {
            ("memset", &[dst, byte, len]) => {
                self.memory.fill(dst, len, byte as u8)?;
                Ok(Flow::Return(None))
            }
            ("memcpy", &[dst, src, len]) => {
                self.memory.copy(dst, src, len)?;
                Ok(Flow::Return(None))
            }
            _ => self.invoke(callee, args),
        }
    }

    fn step(&mut self) -> RuntimeResult<()> {
        self.steps += 1;
        if self.steps > self.env.step_limit {
            return Err(RuntimeError::StepLimitExceeded {
                limit: self.env.step_limit,
            });
        }
        Ok(())
    }

    fn unreachable(&self, func: &Function, block: BlockId) -> RuntimeError {
        RuntimeError::ReachedUnreachable {
            function: func.name().to_string(),
            block: func.block(block).name.clone(),
        }
    }
}

/// Values of one activation.
struct Frame<'f> {
    func: &'f Function,
    values: Vec<Option<u64>>,
    pointer_width: u32,
}

impl Frame<'_> {
    fn operand(&self, operand: &Operand, globals: &HashMap<String, u64>) -> RuntimeResult<u64> {
        match operand {
            Operand::Value(value) => self.value(*value),
            Operand::Const { bits, .. } => Ok(*bits),
            Operand::Global(symbol) => {
                globals
                    .get(symbol)
                    .copied()
                    .ok_or_else(|| RuntimeError::UnknownSymbol {
                        symbol: symbol.clone(),
                    })
            }
        }
    }

    fn value(&self, value: Value) -> RuntimeResult<u64> {
        self.values[value.index()].ok_or_else(|| RuntimeError::UndefinedValue {
            function: self.func.name().to_string(),
            value: self.func.value_name(value).to_string(),
        })
    }
}

fn compare(pred: IntPredicate, ty: Type, pointer_width: u32, lhs: u64, rhs: u64) -> bool {
    let mask = ty.mask(pointer_width);
    let (lhs, rhs) = (lhs & mask, rhs & mask);
    let signed = |v: u64| {
        let shift = 64 - ty.bits(pointer_width);
        ((v << shift) as i64) >> shift
    };
    match pred {
        IntPredicate::Eq => lhs == rhs,
        IntPredicate::Ne => lhs != rhs,
        IntPredicate::Ult => lhs < rhs,
        IntPredicate::Ule => lhs <= rhs,
        IntPredicate::Ugt => lhs > rhs,
        IntPredicate::Uge => lhs >= rhs,
        IntPredicate::Slt => signed(lhs) < signed(rhs),
        IntPredicate::Sle => signed(lhs) <= signed(rhs),
        IntPredicate::Sgt => signed(lhs) > signed(rhs),
        IntPredicate::Sge => signed(lhs) >= signed(rhs),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use ir::parse_module;

    use super::*;

    fn run(text: &str, name: &str, args: &[u64]) -> RuntimeResult<Execution> {
        let module = parse_module(text).unwrap();
        Executor::new(&module, Environment::default())?.call(name, args)
    }

    #[test]
    fn test_arithmetic_and_memory() {
        let execution = run(
            indoc! {"
                fn @f(i64 %n) -> i64 {
                entry:
                  %slot = alloca i64
                  %x = mul i64 %n, 3
                  store i64 %x, %slot
                  %y = load i64, %slot
                  %z = sub i64 %y, 1
                  ret i64 %z
                }
            "},
            "f",
            &[5],
        )
        .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Returned);
        assert_eq!(execution.return_value, Some(14));
        assert_eq!(execution.visits("f", "entry"), 1);
    }

    #[test]
    fn test_counted_loop_trace() {
        let execution = run(
            indoc! {"
                fn @f() -> i64 {
                entry:
                  %i = alloca i64
                  store i64 0, %i
                  br cond
                cond:
                  %v = load i64, %i
                  %more = icmp ult i64 %v, 3
                  br %more, body, exit
                body:
                  %w = load i64, %i
                  %next = add i64 %w, 1
                  store i64 %next, %i
                  br cond
                exit:
                  %r = load i64, %i
                  ret i64 %r
                }
            "},
            "f",
            &[],
        )
        .unwrap();
        assert_eq!(execution.return_value, Some(3));
        assert_eq!(execution.visits("f", "body"), 3);
        assert_eq!(execution.visits("f", "cond"), 4);
    }

    #[test]
    fn test_stack_chk_fail_stops_execution() {
        let execution = run(
            indoc! {"
                fn @f() -> i64 {
                entry:
                  call @inner()
                  ret i64 1
                }

                fn @inner() {
                entry:
                  call @__stack_chk_fail()
                  unreachable
                }
            "},
            "f",
            &[],
        )
        .unwrap();
        assert_eq!(execution.status, ExecutionStatus::StackSmashDetected);
        assert_eq!(execution.return_value, None);
    }

    #[test]
    fn test_guard_global_holds_guard_value() {
        let execution = run(
            indoc! {"
                fn @f() -> ptr {
                entry:
                  %g = load volatile ptr, @__stack_chk_guard
                  ret ptr %g
                }
            "},
            "f",
            &[],
        )
        .unwrap();
        assert_eq!(execution.return_value, Some(Environment::default().guard_value));
    }

    #[test]
    fn test_signed_comparison() {
        assert!(compare(IntPredicate::Slt, Type::I8, 8, 0xff, 1));
        assert!(!compare(IntPredicate::Ult, Type::I8, 8, 0xff, 1));
        assert!(compare(IntPredicate::Sge, Type::I64, 8, 0, u64::MAX));
    }

    #[test]
    fn test_runtime_errors() {
        let text = indoc! {"
            fn @spin() {
            entry:
              br entry
            }

            fn @dead() {
            entry:
              unreachable
            }

            fn @unknown() {
            entry:
              %x = load i64, @nowhere
              ret
            }
        "};
        let module = parse_module(text).unwrap();
        let env = Environment {
            step_limit: 100,
            ..Environment::default()
        };
        let mut executor = Executor::new(&module, env).unwrap();

        assert_eq!(
            executor.call("spin", &[]).unwrap_err(),
            RuntimeError::StepLimitExceeded { limit: 100 }
        );
        assert!(matches!(
            executor.call("dead", &[]),
            Err(RuntimeError::ReachedUnreachable { .. })
        ));
        assert!(matches!(
            executor.call("unknown", &[]),
            Err(RuntimeError::UnknownSymbol { .. })
        ));
        assert!(matches!(
            executor.call("missing", &[]),
            Err(RuntimeError::UnknownFunction { .. })
        ));
        assert!(matches!(
            executor.call("spin", &[1]),
            Err(RuntimeError::ArityMismatch { .. })
        ));
    }
}
