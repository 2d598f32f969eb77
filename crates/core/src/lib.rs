#![allow(clippy::result_large_err)]
//! vfr-core: front end for the VFR form-description language.
//!
//! Turns preprocessed VFR source into a tree of logical opcode records
//! ready for an external serializer.
//!
//! # Public API
//!
//! - [`compile()`] -- lex, parse and link one unit
//! - [`parse()`] / [`parse_unlinked()`] -- the same from a token slice
//! - [`link()`] -- the forward-reference pass on its own
//! - [`parse_expression()`] -- a standalone expression
//! - [`VfrError`] -- the error type shared by every stage
//! - Tree types: [`OpcodeNode`], [`Opcode`], [`ExpressionInfo`]

pub mod builder;
pub mod compile;
pub mod config;
pub mod cursor;
pub mod error;
pub mod flags;
pub mod layout;
pub mod lexer;
pub mod link;
pub mod opcode;
pub mod parser;
pub mod symbols;

// ── Convenience re-exports: key types ────────────────────────────────

pub use compile::CompiledUnit;
pub use config::ParserConfig;
pub use error::{VfrError, VfrResult};
pub use opcode::{ExpressionInfo, Opcode, OpcodeNode, Reference};
pub use symbols::{SymbolTable, VarPath, VarStoreInfo};

// ── Convenience re-exports: entry points ─────────────────────────────

pub use compile::compile;
pub use lexer::lex;
pub use link::link;
pub use parser::{parse, parse_expression, parse_unlinked};
