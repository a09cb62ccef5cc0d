// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Textual IR parser.
//!
//! # Format
//!
//! ```text
//! ; comment
//! fn @copy(ptr %src, i64 %len) -> i64 {
//! entry:
//!   %buf = alloca i8, 32 !protect(16)
//!   call @memcpy(ptr %buf, ptr %src, i64 %len)
//!   %ok = icmp ult i64 %len, 32
//!   br %ok, done, done !weights(1, 1)
//! done:
//!   ret i64 %len
//! }
//! ```
//!
//! Trailing annotations start with `!`: `!protect` / `!protect(N)` on
//! allocas, `!weights(a, b)` on conditional branches, `!gen(role)` on labels
//! and instructions created by a pass, and `!src` on a source instruction
//! inside a generated block. An instruction without a provenance annotation
//! inherits the provenance of its block.
//!
//! # Two-Phase Parsing
//!
//! 1. **Binding**: every line of a function body is split into a label or a
//!    statement, and every block and value name is bound to its handle.
//!    Forward references to values and blocks are therefore allowed.
//! 2. **Decoding**: statements are decoded into instructions and
//!    terminators and appended to their block.
//!
//! Operand types are taken from the instruction syntax; they are not checked
//! against the types of the referenced values.

use std::collections::HashMap;

use crate::{
    error::{ParseError, ParseResult},
    function::{BinaryOp, BranchWeights, Function, InstKind, IntPredicate, Module, Terminator},
    types::{BlockId, Operand, Origin, Role, Type, Value},
};

/// Pointer width used to truncate `ptr` constants while parsing.
const CONSTANT_POINTER_WIDTH: u32 = 8;

/// Parse a module made of zero or more functions.
pub fn parse_module(input: &str) -> ParseResult<Module> {
    let lines: Vec<SourceLine<'_>> = input
        .lines()
        .enumerate()
        .filter_map(|(idx, text)| SourceLine::new(idx + 1, text))
        .collect();

    let mut module = Module::new();
    let mut pos = 0;
    while pos < lines.len() {
        let header = &lines[pos];
        let mut func = parse_header(header)?;
        pos += 1;

        let start = pos;
        while pos < lines.len() && lines[pos].text != "}" {
            pos += 1;
        }
        if pos == lines.len() {
            return Err(ParseError::UnterminatedFunction {
                line: header.number,
            });
        }

        FunctionParser::parse(&mut func, &lines[start..pos])?;
        module.push(func);
        pos += 1;
    }
    Ok(module)
}

/// Parse text holding exactly one function.
pub fn parse_function(input: &str) -> ParseResult<Function> {
    let mut functions = parse_module(input)?.into_functions();
    if functions.len() != 1 {
        return Err(ParseError::ExpectedSingleFunction(functions.len()));
    }
    Ok(functions.remove(0))
}

/// A non-empty line with its comment stripped.
struct SourceLine<'a> {
    number: usize,
    text: &'a str,
}

impl<'a> SourceLine<'a> {
    fn new(number: usize, raw: &'a str) -> Option<Self> {
        let text = match raw.find(';') {
            Some(idx) => &raw[..idx],
            None => raw,
        }
        .trim();
        (!text.is_empty()).then_some(Self { number, text })
    }
}

/// `fn @name(ty %a, ty %b) -> ty {`
fn parse_header(line: &SourceLine<'_>) -> ParseResult<Function> {
    let malformed = || ParseError::syntax(line.number, "expected 'fn @name(params) [-> type] {'");

    let rest = line.text.strip_prefix("fn").ok_or_else(malformed)?;
    let rest = rest.trim().strip_suffix('{').ok_or_else(malformed)?.trim();
    let open = rest.find('(').ok_or_else(malformed)?;
    let close = rest.rfind(')').ok_or_else(malformed)?;
    if close < open {
        return Err(malformed());
    }

    let name = rest[..open].trim().strip_prefix('@').ok_or_else(malformed)?;
    if !is_identifier(name) {
        return Err(ParseError::syntax(line.number, format!("invalid function name '@{name}'")));
    }

    let ret = rest[close + 1..].trim();
    let ret = if ret.is_empty() {
        None
    } else {
        let ty = ret.strip_prefix("->").ok_or_else(malformed)?.trim();
        Some(parse_type(line.number, ty)?)
    };

    let mut func = Function::new(name, ret);
    for param in split_operands(&rest[open + 1..close]) {
        let (ty, value) = split_word(param);
        let ty = parse_type(line.number, ty)?;
        let value = value_name(line.number, value)?;
        if func.find_value(value).is_some() {
            return Err(ParseError::DuplicateValue {
                line: line.number,
                name: value.to_string(),
            });
        }
        func.add_param(ty, value);
    }
    Ok(func)
}

/// A trailing `!name` or `!name(args)` annotation.
struct Annotation<'a> {
    name: &'a str,
    args: Option<&'a str>,
}

enum Statement<'a> {
    Label {
        name: &'a str,
        annotations: Vec<Annotation<'a>>,
    },
    Inst {
        result: Option<&'a str>,
        body: &'a str,
        annotations: Vec<Annotation<'a>>,
    },
}

struct ParsedLine<'a> {
    number: usize,
    statement: Statement<'a>,
}

impl<'a> ParsedLine<'a> {
    fn parse(line: &SourceLine<'a>) -> ParseResult<Self> {
        let (body, annotations) = match line.text.find('!') {
            Some(idx) => (
                line.text[..idx].trim(),
                parse_annotations(line.number, &line.text[idx..])?,
            ),
            None => (line.text, Vec::new()),
        };

        let statement = if let Some(name) = body.strip_suffix(':') {
            let name = name.trim();
            if !is_identifier(name) {
                return Err(ParseError::syntax(line.number, format!("invalid label '{name}'")));
            }
            Statement::Label { name, annotations }
        } else if body.starts_with('%') {
            let (result, body) = body
                .split_once('=')
                .ok_or_else(|| ParseError::syntax(line.number, "expected '%name = ...'"))?;
            Statement::Inst {
                result: Some(value_name(line.number, result.trim())?),
                body: body.trim(),
                annotations,
            }
        } else {
            Statement::Inst {
                result: None,
                body,
                annotations,
            }
        };

        Ok(Self {
            number: line.number,
            statement,
        })
    }
}

fn parse_annotations(line: usize, text: &str) -> ParseResult<Vec<Annotation<'_>>> {
    text.split('!')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| match piece.find('(') {
            Some(open) => {
                let args = piece[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| ParseError::syntax(line, format!("unclosed annotation '!{piece}'")))?;
                Ok(Annotation {
                    name: piece[..open].trim(),
                    args: Some(args.trim()),
                })
            }
            None => Ok(Annotation {
                name: piece,
                args: None,
            }),
        })
        .collect()
}

/// Annotations decoded for one statement.
#[derive(Default)]
struct Attributes {
    origin: Option<Origin>,
    protect: Option<u32>,
    weights: Option<BranchWeights>,
}

enum Decoded {
    Inst(InstKind),
    Terminator(Terminator),
}

struct FunctionParser<'p> {
    func: &'p mut Function,
    values: HashMap<String, Value>,
    blocks: HashMap<String, BlockId>,
}

impl<'p> FunctionParser<'p> {
    fn parse(func: &'p mut Function, lines: &[SourceLine<'_>]) -> ParseResult<()> {
        let parsed = lines
            .iter()
            .map(ParsedLine::parse)
            .collect::<ParseResult<Vec<_>>>()?;

        let values = func
            .params()
            .iter()
            .map(|&param| (func.value_name(param).to_string(), param))
            .collect();
        let mut parser = Self {
            func,
            values,
            blocks: HashMap::new(),
        };
        let labels = parser.bind(&parsed)?;
        parser.decode(&parsed, &labels)
    }

    /// First pass: assign a handle to every value and block name.
    ///
    /// Values are created in statement order when decoding, so the `k`-th
    /// defining statement receives the `k`-th handle after the parameters.
    fn bind(&mut self, parsed: &[ParsedLine<'_>]) -> ParseResult<Vec<BlockId>> {
        let mut next = self.func.value_count();
        for line in parsed {
            if let Statement::Inst {
                result: Some(name), ..
            } = &line.statement
            {
                if self.values.contains_key(*name) {
                    return Err(ParseError::DuplicateValue {
                        line: line.number,
                        name: name.to_string(),
                    });
                }
                self.values.insert(name.to_string(), Value::new(next));
                next += 1;
            }
        }

        let mut labels = Vec::new();
        for line in parsed {
            if let Statement::Label { name, annotations } = &line.statement {
                if self.blocks.contains_key(*name) {
                    return Err(ParseError::DuplicateBlock {
                        line: line.number,
                        name: name.to_string(),
                    });
                }
                let attributes = self.attributes(line.number, annotations)?;
                if attributes.protect.is_some() || attributes.weights.is_some() {
                    return Err(ParseError::syntax(line.number, "labels only accept '!gen'"));
                }
                let block = self
                    .func
                    .append_block(name, attributes.origin.unwrap_or_default());
                self.blocks.insert(name.to_string(), block);
                labels.push(block);
            }
        }
        Ok(labels)
    }

    /// Second pass: decode statements into their blocks.
    fn decode(&mut self, parsed: &[ParsedLine<'_>], labels: &[BlockId]) -> ParseResult<()> {
        let mut labels = labels.iter().copied();
        let mut current: Option<BlockId> = None;

        for line in parsed {
            match &line.statement {
                Statement::Label { .. } => {
                    if let Some(block) = current {
                        self.check_terminated(block)?;
                    }
                    current = labels.next();
                }
                Statement::Inst {
                    result,
                    body,
                    annotations,
                } => {
                    let block = current.ok_or_else(|| {
                        ParseError::syntax(line.number, "instruction outside of a block")
                    })?;
                    if self.func.terminator(block).is_some() {
                        return Err(ParseError::syntax(line.number, "instruction after terminator"));
                    }
                    let attributes = self.attributes(line.number, annotations)?;
                    self.statement(line.number, block, *result, body, attributes)?;
                }
            }
        }

        match current {
            Some(block) => self.check_terminated(block),
            None => Ok(()),
        }
    }

    fn statement(
        &mut self,
        line: usize,
        block: BlockId,
        result: Option<&str>,
        body: &str,
        attributes: Attributes,
    ) -> ParseResult<()> {
        let origin = attributes
            .origin
            .unwrap_or_else(|| self.func.block(block).origin);

        match self.decode_statement(line, body, &attributes)? {
            Decoded::Inst(kind) => {
                let produces = kind.result_type().is_some();
                match (result, produces) {
                    (Some(name), true) => {
                        self.func.insert_inst(block, usize::MAX, kind, origin, name);
                    }
                    (None, false) => {
                        self.func.insert_inst(block, usize::MAX, kind, origin, "");
                    }
                    (Some(name), false) => {
                        return Err(ParseError::syntax(
                            line,
                            format!("instruction does not produce a value for '%{name}'"),
                        ))
                    }
                    (None, true) => {
                        return Err(ParseError::syntax(line, "instruction result must be named"))
                    }
                }
            }
            Decoded::Terminator(terminator) => {
                if result.is_some() {
                    return Err(ParseError::syntax(line, "terminators do not produce values"));
                }
                self.func.set_terminator(block, terminator);
            }
        }
        Ok(())
    }

    fn decode_statement(&self, line: usize, body: &str, attributes: &Attributes) -> ParseResult<Decoded> {
        let (opcode, rest) = split_word(body);

        if attributes.protect.is_some() && opcode != "alloca" {
            return Err(ParseError::syntax(line, "'!protect' only applies to alloca"));
        }
        if attributes.weights.is_some() && opcode != "br" {
            return Err(ParseError::syntax(line, "'!weights' only applies to br"));
        }

        let kind = match opcode {
            "alloca" => {
                let operands = split_operands(rest);
                let (elem, count) = match operands.as_slice() {
                    [elem] => (*elem, 1),
                    [elem, count] => (*elem, parse_count(line, count)?),
                    _ => return Err(ParseError::syntax(line, "expected 'alloca type[, count]'")),
                };
                InstKind::Alloca {
                    elem: parse_type(line, elem)?,
                    count,
                    protect: attributes.protect,
                }
            }
            "load" => {
                let (volatile, rest) = strip_volatile(rest);
                let [ty, ptr] = self.expect_operands::<2>(line, rest, "load [volatile] type, ptr")?;
                InstKind::Load {
                    ty: parse_type(line, ty)?,
                    ptr: self.operand(line, Type::Ptr, ptr)?,
                    volatile,
                }
            }
            "store" => {
                let (volatile, rest) = strip_volatile(rest);
                let [value, ptr] = self.expect_operands::<2>(line, rest, "store [volatile] type value, ptr")?;
                let (ty, value) = split_word(value);
                let ty = parse_type(line, ty)?;
                InstKind::Store {
                    ty,
                    value: self.operand(line, ty, value)?,
                    ptr: self.operand(line, Type::Ptr, ptr)?,
                    volatile,
                }
            }
            "add" | "sub" | "mul" => {
                let op = match opcode {
                    "add" => BinaryOp::Add,
                    "sub" => BinaryOp::Sub,
                    _ => BinaryOp::Mul,
                };
                let (ty, rest) = split_word(rest);
                let ty = parse_type(line, ty)?;
                let [lhs, rhs] = self.expect_operands::<2>(line, rest, "op type lhs, rhs")?;
                InstKind::Binary {
                    op,
                    ty,
                    lhs: self.operand(line, ty, lhs)?,
                    rhs: self.operand(line, ty, rhs)?,
                }
            }
            "icmp" => {
                let (pred, rest) = split_word(rest);
                let pred = IntPredicate::from_name(pred).ok_or_else(|| {
                    ParseError::syntax(line, format!("unknown predicate '{pred}'"))
                })?;
                let (ty, rest) = split_word(rest);
                let ty = parse_type(line, ty)?;
                let [lhs, rhs] = self.expect_operands::<2>(line, rest, "icmp pred type lhs, rhs")?;
                InstKind::Icmp {
                    pred,
                    ty,
                    lhs: self.operand(line, ty, lhs)?,
                    rhs: self.operand(line, ty, rhs)?,
                }
            }
            "ptradd" => {
                let [base, offset] = self.expect_operands::<2>(line, rest, "ptradd base, offset")?;
                InstKind::PtrAdd {
                    base: self.operand(line, Type::Ptr, base)?,
                    offset: self.operand(line, Type::I64, offset)?,
                }
            }
            "call" => self.call(line, rest)?,
            "canary.mark" => {
                let [guard, canary, buffer] =
                    self.expect_operands::<3>(line, rest, "canary.mark guard, canary, buffer")?;
                InstKind::CanaryMark {
                    guard: self.operand(line, Type::Ptr, guard)?,
                    canary: self.operand(line, Type::Ptr, canary)?,
                    buffer: self.operand(line, Type::Ptr, buffer)?,
                }
            }
            "br" => return self.branch(line, rest, attributes.weights).map(Decoded::Terminator),
            "ret" => {
                let value = if rest.is_empty() {
                    None
                } else {
                    let (ty, value) = split_word(rest);
                    let ty = parse_type(line, ty)?;
                    Some((ty, self.operand(line, ty, value)?))
                };
                return Ok(Decoded::Terminator(Terminator::Ret(value)));
            }
            "unreachable" => return Ok(Decoded::Terminator(Terminator::Unreachable)),
            other => return Err(ParseError::syntax(line, format!("unknown instruction '{other}'"))),
        };
        Ok(Decoded::Inst(kind))
    }

    /// `call [type] @callee(type op, ...)`
    fn call(&self, line: usize, rest: &str) -> ParseResult<InstKind> {
        let (ret, rest) = if rest.starts_with('@') {
            (None, rest)
        } else {
            let (ty, rest) = split_word(rest);
            (Some(parse_type(line, ty)?), rest)
        };

        let malformed = || ParseError::syntax(line, "expected 'call [type] @callee(args)'");
        let rest = rest.strip_prefix('@').ok_or_else(malformed)?;
        let open = rest.find('(').ok_or_else(malformed)?;
        let args = rest[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
        let callee = rest[..open].trim();
        if !is_identifier(callee) {
            return Err(malformed());
        }

        let args = split_operands(args)
            .into_iter()
            .map(|arg| {
                let (ty, value) = split_word(arg);
                let ty = parse_type(line, ty)?;
                Ok((ty, self.operand(line, ty, value)?))
            })
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(InstKind::Call {
            callee: callee.to_string(),
            args,
            ret,
        })
    }

    /// `br label` or `br cond, then, else`
    fn branch(&self, line: usize, rest: &str, weights: Option<BranchWeights>) -> ParseResult<Terminator> {
        match split_operands(rest).as_slice() {
            [target] if weights.is_none() => Ok(Terminator::Br(self.block(line, target)?)),
            [cond, then_block, else_block] => Ok(Terminator::CondBr {
                cond: self.operand(line, Type::I1, cond)?,
                then_block: self.block(line, then_block)?,
                else_block: self.block(line, else_block)?,
                weights,
            }),
            _ => Err(ParseError::syntax(line, "expected 'br label' or 'br cond, then, else'")),
        }
    }

    fn expect_operands<'t, const N: usize>(
        &self,
        line: usize,
        text: &'t str,
        form: &str,
    ) -> ParseResult<[&'t str; N]> {
        split_operands(text)
            .try_into()
            .map_err(|_| ParseError::syntax(line, format!("expected '{form}'")))
    }

    fn operand(&self, line: usize, ty: Type, text: &str) -> ParseResult<Operand> {
        if let Some(name) = text.strip_prefix('%') {
            return self
                .values
                .get(name)
                .map(|&value| Operand::Value(value))
                .ok_or_else(|| ParseError::UndefinedValue {
                    line,
                    name: name.to_string(),
                });
        }
        if let Some(symbol) = text.strip_prefix('@') {
            if !is_identifier(symbol) {
                return Err(ParseError::syntax(line, format!("invalid symbol '{text}'")));
            }
            return Ok(Operand::global(symbol));
        }
        let bits = match text {
            "true" => 1,
            "false" => 0,
            _ => parse_integer(text)
                .ok_or_else(|| ParseError::syntax(line, format!("invalid operand '{text}'")))?,
        };
        Ok(Operand::constant(ty, bits & ty.mask(CONSTANT_POINTER_WIDTH)))
    }

    fn block(&self, line: usize, name: &str) -> ParseResult<BlockId> {
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::UndefinedBlock {
                line,
                name: name.to_string(),
            })
    }

    fn attributes(&self, line: usize, annotations: &[Annotation<'_>]) -> ParseResult<Attributes> {
        let mut attributes = Attributes::default();
        for annotation in annotations {
            match (annotation.name, annotation.args) {
                ("protect", None) => attributes.protect = Some(0),
                ("protect", Some(size)) => attributes.protect = Some(parse_count(line, size)?),
                ("weights", Some(args)) => {
                    let [taken, not_taken] = self.expect_operands::<2>(line, args, "!weights(a, b)")?;
                    attributes.weights = Some(BranchWeights {
                        taken: parse_count(line, taken)?,
                        not_taken: parse_count(line, not_taken)?,
                    });
                }
                ("gen", Some(role)) => attributes.origin = Some(Origin::Generated(self.role(line, role)?)),
                ("src", None) => attributes.origin = Some(Origin::Source),
                (name, _) => {
                    return Err(ParseError::syntax(line, format!("unknown annotation '!{name}'")))
                }
            }
        }
        Ok(attributes)
    }

    fn role(&self, line: usize, text: &str) -> ParseResult<Role> {
        let (keyword, rest) = split_word(text);
        if keyword == "canary" {
            let buffer = self.operand(line, Type::Ptr, rest)?;
            return match buffer.as_value() {
                Some(buffer) => Ok(Role::CanarySlot { buffer }),
                None => Err(ParseError::syntax(line, "'!gen(canary ...)' expects a value")),
            };
        }
        if !rest.is_empty() {
            return Err(ParseError::syntax(line, format!("unexpected operand in '!gen({text})'")));
        }
        Role::from_keyword(keyword)
            .ok_or_else(|| ParseError::syntax(line, format!("unknown role '{keyword}'")))
    }

    fn check_terminated(&self, block: BlockId) -> ParseResult<()> {
        match self.func.terminator(block) {
            Some(_) => Ok(()),
            None => Err(ParseError::MissingTerminator {
                function: self.func.name().to_string(),
                block: self.func.block(block).name.clone(),
            }),
        }
    }
}

fn parse_type(line: usize, name: &str) -> ParseResult<Type> {
    Type::from_name(name).ok_or_else(|| ParseError::UnknownType {
        line,
        name: name.to_string(),
    })
}

fn parse_count(line: usize, text: &str) -> ParseResult<u32> {
    text.trim()
        .parse()
        .map_err(|_| ParseError::syntax(line, format!("expected an unsigned integer, found '{text}'")))
}

/// Decimal (optionally negative) or `0x` hexadecimal integer, as raw bits.
fn parse_integer(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).ok();
    }
    if text.starts_with('-') {
        return text.parse::<i64>().ok().map(|v| v as u64);
    }
    text.parse::<u64>().ok()
}

fn value_name(line: usize, text: &str) -> ParseResult<&str> {
    text.strip_prefix('%')
        .filter(|name| is_identifier(name))
        .ok_or_else(|| ParseError::syntax(line, format!("invalid value name '{text}'")))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn strip_volatile(text: &str) -> (bool, &str) {
    match text.strip_prefix("volatile") {
        Some(rest) if rest.starts_with(char::is_whitespace) => (true, rest.trim_start()),
        _ => (false, text),
    }
}

/// Split off the first whitespace-delimited word.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

/// Split comma-separated operands. Commas inside `(...)` are not separators.
fn split_operands(text: &str) -> Vec<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut operands = Vec::new();
    let mut start = 0;
    let mut depth: usize = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                operands.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    operands.push(text[start..].trim());
    operands
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::types::LoopPart;

    #[test]
    fn test_parse_simple_function() {
        let func = parse_function(indoc! {"
            ; one buffer, one return
            fn @f(i64 %n) -> i64 {
            entry:
              %buf = alloca i8, 16 !protect
              store i8 7, %buf
              %x = add i64 %n, 1
              ret i64 %x
            }
        "})
        .unwrap();

        assert_eq!(func.name(), "f");
        assert_eq!(func.ret_type(), Some(Type::I64));
        assert_eq!(func.params().len(), 1);

        let entry = func.entry().unwrap();
        let insts: Vec<_> = func.block_insts(entry).map(|(_, data)| data).collect();
        assert_eq!(insts.len(), 3);
        assert_eq!(
            insts[0].kind,
            InstKind::Alloca {
                elem: Type::I8,
                count: 16,
                protect: Some(0),
            }
        );
        assert_eq!(insts[0].origin, Origin::Source);
        let x = func.find_value("x").unwrap();
        assert_eq!(
            func.terminator(entry),
            Some(&Terminator::Ret(Some((Type::I64, Operand::Value(x)))))
        );
    }

    #[test]
    fn test_forward_references() {
        let func = parse_function(indoc! {"
            fn @f(i1 %c) {
            entry:
              br %c, later, exit
            later:
              store i64 %v, %slot
              br exit
            exit:
              %slot = alloca i64
              %v = add i64 1, 2
              ret
            }
        "})
        .unwrap();

        let later = func.find_block("later").unwrap();
        let slot = func.find_value("slot").unwrap();
        let v = func.find_value("v").unwrap();
        let (_, store) = func.block_insts(later).next().unwrap();
        assert_eq!(
            store.kind,
            InstKind::Store {
                ty: Type::I64,
                value: Operand::Value(v),
                ptr: Operand::Value(slot),
                volatile: false,
            }
        );
        assert_eq!(func.value_type(slot), Type::Ptr);
    }

    #[test]
    fn test_generated_annotations() {
        let func = parse_function(indoc! {"
            fn @f() {
            prologue: !gen(prologue)
              %c = alloca ptr, 2 !gen(canary %buf)
              %buf = alloca i8, 16 !protect(16) !src
              %g = load volatile ptr, @__stack_chk_guard !gen(guard-read)
              canary.mark %g, %c, %buf !gen(mark)
              br head
            head: !gen(store-head)
              br entry
            entry:
              %ok = icmp eq i64 1, 1
              br %ok, entry, entry !weights(2000, 1)
            }
        "})
        .unwrap();

        let prologue = func.entry().unwrap();
        assert_eq!(func.block(prologue).origin, Origin::Generated(Role::Prologue));
        let head = func.find_block("head").unwrap();
        assert_eq!(
            func.block(head).origin,
            Origin::Generated(Role::StoreLoop(LoopPart::Head))
        );

        let buf = func.find_value("buf").unwrap();
        let origins: Vec<_> = func.block_insts(prologue).map(|(_, data)| data.origin).collect();
        assert_eq!(
            origins,
            vec![
                Origin::Generated(Role::CanarySlot { buffer: buf }),
                Origin::Source,
                Origin::Generated(Role::GuardRead),
                Origin::Generated(Role::CanaryMark),
            ]
        );

        let entry = func.find_block("entry").unwrap();
        match func.terminator(entry) {
            Some(Terminator::CondBr { weights, .. }) => assert_eq!(
                *weights,
                Some(BranchWeights {
                    taken: 2000,
                    not_taken: 1,
                })
            ),
            other => panic!("unexpected terminator {other:?}"),
        }
    }

    #[test]
    fn test_call_forms() {
        let func = parse_function(indoc! {"
            fn @f(ptr %p) {
            entry:
              call @memset(ptr %p, i8 -1, i64 8)
              %r = call i64 @g()
              ret
            }
        "})
        .unwrap();
        let entry = func.entry().unwrap();
        let calls: Vec<_> = func.block_insts(entry).map(|(_, data)| data.kind.clone()).collect();
        let p = func.find_value("p").unwrap();
        assert_eq!(
            calls[0],
            InstKind::Call {
                callee: "memset".to_string(),
                args: vec![
                    (Type::Ptr, Operand::Value(p)),
                    (Type::I8, Operand::constant(Type::I8, 0xff)),
                    (Type::I64, Operand::constant(Type::I64, 8)),
                ],
                ret: None,
            }
        );
        assert!(matches!(&calls[1], InstKind::Call { ret: Some(Type::I64), .. }));
    }

    #[test]
    fn test_module_with_two_functions() {
        let module = parse_module(indoc! {"
            fn @a() {
            entry:
              ret
            }

            fn @b() -> i32 {
            entry:
              ret i32 0
            }
        "})
        .unwrap();
        assert_eq!(module.functions().len(), 2);
        assert!(module.function("b").is_some());
        assert_eq!(
            parse_function("").unwrap_err(),
            ParseError::ExpectedSingleFunction(0)
        );
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              %x = load i64, %missing
              ret
            }
        "})
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::UndefinedValue {
                line: 3,
                name: "missing".to_string(),
            }
        );

        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              br nowhere
            }
        "})
        .unwrap_err();
        assert!(matches!(err, ParseError::UndefinedBlock { line: 3, .. }));

        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              %x = alloca f32
              ret
            }
        "})
        .unwrap_err();
        assert!(matches!(err, ParseError::UnknownType { line: 3, .. }));
    }

    #[test]
    fn test_structural_errors() {
        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              %x = alloca i64
            }
        "})
        .unwrap_err();
        assert!(matches!(err, ParseError::MissingTerminator { .. }));

        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              ret
        "})
        .unwrap_err();
        assert_eq!(err, ParseError::UnterminatedFunction { line: 1 });

        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              %x = alloca i64
              %x = alloca i64
              ret
            }
        "})
        .unwrap_err();
        assert!(matches!(err, ParseError::DuplicateValue { line: 4, .. }));

        let err = parse_function(indoc! {"
            fn @f() {
            entry:
              %x = load i64, @g !protect
              ret
            }
        "})
        .unwrap_err();
        assert!(matches!(err, ParseError::Syntax { line: 3, .. }));
    }
}
