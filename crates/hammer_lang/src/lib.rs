#![cfg_attr(docsrs, feature(doc_cfg))]

//! # hammer-lang
//!
//! Scanner, expression arena, and Pratt parser for the hammer language.
//!
//! ## Architecture
//!
//! 1. **Scanner** ([`lexer`]) - turns a source buffer into a flat [`Token`]
//!    sequence via [`lexer::scan_all`]. Allocation-free, restartable.
//!
//! 2. **Expression tree** ([`ast`]) - five node shapes (`Literal`, `Unary`,
//!    `Binary`, `Ternary`, `Block`) stored in an [`ast::ExprArena`] and
//!    addressed by [`ast::ExprId`].
//!
//! 3. **Parser** ([`parser`]) - precedence-climbing parser producing a
//!    program-level [`parser::ParseResult`].
//!
//! ```rust
//! use hammer_lang::parser::parse;
//!
//! let result = parse("add: a b = a + b; add 2 3");
//! assert!(!result.diagnostics.has_errors());
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{BinaryOp, BlockKind, Expr, ExprArena, ExprId, LiteralKind, Node, SliceMode, TernaryOp, UnaryOp};
pub use lexer::{scan_all, Scanner};
pub use parser::{parse, ParseResult, Precedence};
pub use token::{keyword_kind, Token, TokenKind};
