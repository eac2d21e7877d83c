//! A single-pass bytecode compiler and stack-based virtual machine for a
//! small dynamically typed, lexically scoped scripting language (spec.md
//! §1). `main.rs` is a thin CLI/REPL shell around this library; tests and
//! embedders drive [`Vm`] directly.

pub mod chunk;
pub mod compiler;
pub mod object;
pub mod reporter;
pub mod table;
pub mod token;
pub mod tokenizer;
pub mod value;
pub mod vm;

pub use reporter::{CliReporter, CollectingReporter, Diagnostic, Reporter};
pub use vm::{InterpretResult, Vm};
