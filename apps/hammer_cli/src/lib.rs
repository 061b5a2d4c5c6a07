//! hammer CLI
//!
//! Command-line interface for running hammer programs. This crate is the
//! host driver the core specification assumes but leaves external: it
//! supplies a source string and consumes the VM's execution result.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hammer run` | Compile and execute a source file |
//! | `hammer check` | Compile without running, reporting diagnostics |
//! | `hammer disassemble` | Print a source file's compiled bytecode |
//!
//! # Module Structure
//!
//! - [`cli`] - Command-line argument parsing and dispatch
//!
//! # Library Usage
//!
//! ```no_run
//! fn main() {
//!     if let Err(e) = hammer_cli::run_cli() {
//!         eprintln!("Error: {}", e);
//!         std::process::exit(1);
//!     }
//! }
//! ```

pub mod cli;

/// Entry point for the CLI.
///
/// Parses command-line arguments and executes the appropriate command. See
/// [`cli::run_cli`] for details.
pub use cli::run_cli;
