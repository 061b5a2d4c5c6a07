//! hammer CLI - Standalone binary
//!
//! This is the entry point for the `hammer` command-line tool.
//!
//! The binary is a thin wrapper around [`hammer_cli::run_cli`], handling
//! error display and exit codes. All command logic is implemented in the
//! library crate for testability.
//!
//! # Exit Codes
//!
//! - `0` - Success
//! - `1` - Error (message printed to stderr)

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = hammer_cli::run_cli() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
