//! `hammer` CLI
//!
//! Command-line interface for running and inspecting hammer programs.
//!
//! This is the **host driver** the core assumes but deliberately leaves
//! external (§1): it reads a source file, drives it through
//! scan → parse → compile → execute, and reports diagnostics or the
//! program's result.
//!
//! # Architecture
//!
//! The CLI is built on [`clap`] for argument parsing with derive macros.
//! Each command variant in [`Commands`] maps to a handler function that
//! performs the actual work.
//!
//! # Examples
//!
//! ```bash
//! # Run a program
//! hammer run examples/fact.hm
//!
//! # Check for compile errors without running it
//! hammer check examples/fact.hm
//!
//! # Inspect the compiled bytecode
//! hammer disassemble examples/fact.hm
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use hammer_compile::disassemble::disassemble_chunk;
use hammer_compile::gc::Heap;
use hammer_compile::object::Object;
use hammer_compile::value::Value;
use hammer_compile::vm::Vm;
use hammer_compile::{compiler, natives};

/// Command-line interface for the hammer tool.
#[derive(Parser)]
#[command(name = "hammer")]
#[command(about = "Run and inspect hammer programs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile and execute a source file, printing its result.
    Run {
        /// Path to a hammer source file.
        path: PathBuf,
    },

    /// Compile a source file without running it, reporting diagnostics.
    Check {
        /// Path to a hammer source file.
        path: PathBuf,
    },

    /// Print the disassembled bytecode of a source file's top-level chunk.
    Disassemble {
        /// Path to a hammer source file.
        path: PathBuf,
    },
}

/// Parse CLI arguments and execute the corresponding command.
pub fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { path } => cmd_run(&path),
        Commands::Check { path } => cmd_check(&path),
        Commands::Disassemble { path } => cmd_disassemble(&path),
    }
}

fn read_source(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    fs::read_to_string(path).map_err(|e| format!("reading '{}': {e}", path.display()).into())
}

fn cmd_run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = read_source(path)?;
    let mut vm = Vm::new();
    natives::install(&mut vm);
    let function = compiler::compile(&source, &mut vm.heap).map_err(|d| render_diagnostics(&source, &d))?;
    let result = vm.interpret(function)?;
    println!("{}", render_value(&vm.heap, result));
    Ok(())
}

fn cmd_check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = read_source(path)?;
    let mut heap = Heap::new();
    match compiler::compile(&source, &mut heap) {
        Ok(_) => {
            println!("Check passed");
            Ok(())
        }
        Err(diagnostics) => Err(render_diagnostics(&source, &diagnostics).into()),
    }
}

fn cmd_disassemble(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let source = read_source(path)?;
    let mut heap = Heap::new();
    let function = compiler::compile(&source, &mut heap).map_err(|d| render_diagnostics(&source, &d))?;
    match heap.get(function) {
        Object::Function(f) => print!("{}", disassemble_chunk(&f.chunk, "script")),
        _ => unreachable!("compile() always returns a Function object"),
    }
    Ok(())
}

fn render_diagnostics(source: &str, diagnostics: &hammer_base::Diagnostics) -> String {
    let mut out = String::new();
    for error in diagnostics.errors() {
        let line_text = source.lines().nth(error.span.line.saturating_sub(1) as usize).unwrap_or("");
        out.push_str(&format!("{error}\n  {line_text}\n"));
    }
    out
}

/// Renders a result value for CLI output. The core has no `printf`/`show`
/// native (§9): rendering lives here, in the host driver, not the VM.
fn render_value(heap: &Heap, value: Value) -> String {
    match value {
        Value::Unit => "unit".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Char(c) => format!("'{c}'"),
        Value::Obj(r) => render_object(heap, r),
    }
}

fn render_object(heap: &Heap, r: hammer_compile::object::ObjRef) -> String {
    match heap.get(r) {
        Object::Str(s) => s.chars.clone(),
        Object::Cell(car, cdr) => format!("({}, {})", render_value(heap, *car), render_value(heap, *cdr)),
        Object::List(items) => {
            let rendered: Vec<String> = items.iter().map(|v| render_value(heap, *v)).collect();
            format!("[{}]", rendered.join(", "))
        }
        Object::Map(table) => {
            let rendered: Vec<String> = table
                .entries_snapshot()
                .into_iter()
                .map(|(k, v)| format!("{}: {}", render_value(heap, Value::Obj(k)), render_value(heap, v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Object::Function(f) => match f.name {
            Some(name) => format!("<function {}>", render_object(heap, name)),
            None => "<function>".to_string(),
        },
        Object::Closure(c) => render_object(heap, c.function),
        Object::Native(n) => format!("<native {}>", n.name),
        Object::Composed(..) => "<composed function>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn run_prints_the_final_expression_result() {
        let file = write_source("2 + 3 * 4");
        cmd_run(file.path()).unwrap();
    }

    #[test]
    fn check_reports_no_error_for_valid_source() {
        let file = write_source("x = 1; x + 1");
        cmd_check(file.path()).unwrap();
    }

    #[test]
    fn check_fails_for_a_self_referential_initializer() {
        let file = write_source("{ x = x + 1 }");
        assert!(cmd_check(file.path()).is_err());
    }

    #[test]
    fn render_value_formats_a_list_of_ints() {
        let mut heap = Heap::new();
        let list = heap.new_list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(render_value(&heap, Value::Obj(list)), "[1, 2]");
    }
}
