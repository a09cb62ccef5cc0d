// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A small SSA intermediate representation for stack-protection passes.
//!
//! This crate provides:
//! - Functions made of basic blocks with typed instructions and terminators
//! - Provenance tags ([`Origin`]) marking pass-generated entities
//! - An insertion [`Cursor`] for editing blocks in place
//! - A petgraph [`BlockGraph`] with reachability and dominators
//! - A line-oriented textual format ([`parse_module`] and `Display`)

pub mod abi;
pub mod block_graph;
pub mod cursor;
pub mod error;
pub mod function;
pub mod parser;
pub mod printer;
pub mod types;

pub use block_graph::{BlockGraph, BlockIndex, Dominance};
pub use cursor::Cursor;
pub use error::{ParseError, ParseResult};
pub use function::{
    BinaryOp, BlockData, BranchWeights, Function, InstData, InstKind, IntPredicate, Module,
    Terminator, ValueData, ValueDef,
};
pub use parser::{parse_function, parse_module};
pub use types::{BlockId, InstId, LoopPart, Operand, Origin, Role, Type, Value};
