// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Textual IR printer. The output is accepted by [`crate::parse_module`].

use std::fmt::{self, Display, Formatter, Write};

use crate::{
    function::{Function, InstData, InstKind, Module, Terminator},
    types::{BlockId, Operand, Origin, Role, Type},
};

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (idx, func) in self.functions().iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let params = self
            .params()
            .iter()
            .map(|&p| format!("{} %{}", self.value_type(p), self.value_name(p)))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "fn @{}({params})", self.name())?;
        if let Some(ret) = self.ret_type() {
            write!(f, " -> {ret}")?;
        }
        writeln!(f, " {{")?;

        for block in self.blocks() {
            let data = self.block(block);
            write!(f, "{}:", data.name)?;
            if let Origin::Generated(role) = data.origin {
                write!(f, " !gen({})", self.role(role))?;
            }
            writeln!(f)?;

            for (_, inst) in self.block_insts(block) {
                writeln!(f, "  {}", self.inst_line(inst, data.origin))?;
            }
            match &data.terminator {
                Some(terminator) => writeln!(f, "  {}", self.terminator_line(terminator))?,
                None => writeln!(f, "  ; no terminator")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl Function {
    fn inst_line(&self, inst: &InstData, block_origin: Origin) -> String {
        let mut line = String::new();
        if let Some(result) = inst.result {
            let _ = write!(line, "%{} = ", self.value_name(result));
        }

        let _ = match &inst.kind {
            InstKind::Alloca { elem, count, .. } if *count == 1 => write!(line, "alloca {elem}"),
            InstKind::Alloca { elem, count, .. } => write!(line, "alloca {elem}, {count}"),
            InstKind::Load { ty, ptr, volatile } => {
                write!(line, "load {}{ty}, {}", volatile_prefix(*volatile), self.operand(ptr))
            }
            InstKind::Store {
                ty,
                value,
                ptr,
                volatile,
            } => write!(
                line,
                "store {}{ty} {}, {}",
                volatile_prefix(*volatile),
                self.operand(value),
                self.operand(ptr)
            ),
            InstKind::Binary { op, ty, lhs, rhs } => write!(
                line,
                "{} {ty} {}, {}",
                op.name(),
                self.operand(lhs),
                self.operand(rhs)
            ),
            InstKind::Icmp { pred, ty, lhs, rhs } => write!(
                line,
                "icmp {} {ty} {}, {}",
                pred.name(),
                self.operand(lhs),
                self.operand(rhs)
            ),
            InstKind::PtrAdd { base, offset } => {
                write!(line, "ptradd {}, {}", self.operand(base), self.operand(offset))
            }
            InstKind::Call { callee, args, ret } => {
                let args = self.typed_operands(args);
                match ret {
                    Some(ret) => write!(line, "call {ret} @{callee}({args})"),
                    None => write!(line, "call @{callee}({args})"),
                }
            }
            InstKind::CanaryMark {
                guard,
                canary,
                buffer,
            } => write!(
                line,
                "canary.mark {}, {}, {}",
                self.operand(guard),
                self.operand(canary),
                self.operand(buffer)
            ),
        };

        if let InstKind::Alloca {
            protect: Some(size), ..
        } = inst.kind
        {
            let _ = match size {
                0 => write!(line, " !protect"),
                size => write!(line, " !protect({size})"),
            };
        }

        if inst.origin != block_origin {
            let _ = match inst.origin {
                Origin::Source => write!(line, " !src"),
                Origin::Generated(role) => write!(line, " !gen({})", self.role(role)),
            };
        }
        line
    }

    fn terminator_line(&self, terminator: &Terminator) -> String {
        match terminator {
            Terminator::Br(target) => format!("br {}", self.label(*target)),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
                weights,
            } => {
                let mut line = format!(
                    "br {}, {}, {}",
                    self.operand(cond),
                    self.label(*then_block),
                    self.label(*else_block)
                );
                if let Some(weights) = weights {
                    let _ = write!(line, " !weights({}, {})", weights.taken, weights.not_taken);
                }
                line
            }
            Terminator::Ret(None) => "ret".to_string(),
            Terminator::Ret(Some((ty, value))) => format!("ret {ty} {}", self.operand(value)),
            Terminator::Unreachable => "unreachable".to_string(),
        }
    }

    fn role(&self, role: Role) -> String {
        match role {
            Role::CanarySlot { buffer } => format!("canary %{}", self.value_name(buffer)),
            other => other.keyword().to_string(),
        }
    }

    fn label(&self, block: BlockId) -> &str {
        &self.block(block).name
    }

    fn operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Value(value) => format!("%{}", self.value_name(*value)),
            Operand::Const { bits, .. } => bits.to_string(),
            Operand::Global(symbol) => format!("@{symbol}"),
        }
    }

    fn typed_operands(&self, operands: &[(Type, Operand)]) -> String {
        operands
            .iter()
            .map(|(ty, op)| format!("{ty} {}", self.operand(op)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn volatile_prefix(volatile: bool) -> &'static str {
    if volatile {
        "volatile "
    } else {
        ""
    }
}
