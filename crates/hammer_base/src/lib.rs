#![cfg_attr(docsrs, feature(doc_cfg))]

//! # hammer-base
//!
//! Pure structural atoms shared by every hammer crate.
//!
//! This crate provides the foundational types the scanner, parser,
//! compiler, and VM all build on:
//!
//! - [`Arena`]/[`Id`] — index-based arena for stable references into an
//!   append-only vector, used for the parsed expression tree
//! - [`Span`] — source location tracking
//! - [`SpannedError`]/[`Result`] — errors annotated with source position
//! - [`Diagnostics`] — accumulates compile-time errors with duplicate
//!   suppression, so a single syntax mistake does not cascade into pages
//!   of noise
//!
//! # Design Principles
//!
//! This crate has no knowledge of hammer's grammar, bytecode, or runtime
//! values. It provides only generic, reusable infrastructure that
//! higher-level crates build upon.
//!
//! # Example
//!
//! ```
//! use hammer_base::{Arena, Span, SpannedError, Diagnostics};
//!
//! let mut arena: Arena<&str> = Arena::new();
//! let id = arena.alloc("hello");
//! assert_eq!(*arena.get(id), "hello");
//!
//! let mut diags = Diagnostics::new();
//! diags.report(SpannedError::new("unexpected token", Span::new(0, 1, 1)));
//! assert!(diags.has_errors());
//! ```

pub mod arena;
pub mod error;
pub mod span;

pub use arena::{Arena, Id};
pub use error::{Diagnostics, Result, SpannedError};
pub use span::Span;
