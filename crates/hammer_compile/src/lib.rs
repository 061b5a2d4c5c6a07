#![cfg_attr(docsrs, feature(doc_cfg))]

//! # hammer_compile
//!
//! The back half of the hammer pipeline: bytecode compiler, object model,
//! garbage collector, and stack VM.
//!
//! ## Architecture
//!
//! ```text
//! Expression Tree (hammer_lang)
//!      │
//!      ▼
//! ┌────────────┐
//! │  Compiler  │  single pass: resolve names, assign slots, fold constants
//! └────────────┘
//!      │
//!      ▼
//! ┌────────────┐     ┌───────┐     ┌─────┐
//! │   Chunk    │ ──▶ │  Vm   │ ──▶ │ Value│
//! └────────────┘     └───┬───┘     └─────┘
//!                        │
//!                        ▼
//!                 ┌────────────┐
//!                 │ Heap (GC)  │
//!                 └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`compiler`]: tree-to-bytecode compiler
//! - [`chunk`]: compiled function bodies (code, lines, constants)
//! - [`opcode`]: the bytecode instruction set
//! - [`value`]: the runtime value representation
//! - [`object`]: heap object kinds and handles
//! - [`table`]: open-addressed hash table backing strings, globals, and maps
//! - [`gc`]: the object heap and its tracing collector
//! - [`vm`]: the stack VM
//! - [`natives`]: the natives a fresh [`vm::Vm`] starts with
//! - [`error`]: runtime error type
//! - [`disassemble`]: bytecode-to-text debugging output
//!
//! ## Getting Started
//!
//! ```
//! use hammer_compile::gc::Heap;
//! use hammer_compile::compiler::compile;
//! use hammer_compile::vm::Vm;
//! use hammer_compile::natives;
//!
//! let mut vm = Vm::new();
//! natives::install(&mut vm);
//! let function = compile("2 + 3 * 4", &mut vm.heap).unwrap();
//! let result = vm.interpret(function).unwrap();
//! ```

pub mod chunk;
pub mod compiler;
pub mod disassemble;
pub mod error;
pub mod gc;
pub mod natives;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;
pub mod vm;

pub use compiler::compile;
pub use error::{FrameTrace, RuntimeError, RuntimeErrorKind};
pub use gc::Heap;
pub use value::Value;
pub use vm::Vm;
