use std::fs;
use std::io;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use rustyline::Editor;

use lang::{CliReporter, InterpretResult, Vm};

/// `lang` with zero args starts the REPL; `lang <path>` runs a script file
/// (spec.md §6).
#[derive(Parser)]
#[command(name = "lang", about = "A bytecode compiler and VM for a small scripting language")]
struct Args {
    path: Option<String>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                print!("{err}");
                return ExitCode::from(exitcode::OK as u8);
            }
            eprint!("{err}");
            return ExitCode::from(exitcode::USAGE as u8);
        }
    };

    match args.path {
        Some(path) => run_file(&path),
        None => run_repl(),
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Can't read file '{path}': {err}");
            return ExitCode::from(exitcode::IOERR as u8);
        }
    };

    let mut vm = Vm::new();
    let mut reporter = CliReporter;
    let mut out = io::stdout();
    match vm.interpret(&source, &mut reporter, &mut out) {
        InterpretResult::Ok => ExitCode::from(exitcode::OK as u8),
        InterpretResult::CompileError => ExitCode::from(exitcode::DATAERR as u8),
        InterpretResult::RuntimeError => ExitCode::from(exitcode::SOFTWARE as u8),
    }
}

/// Each line is compiled and run independently: a failed line reports its
/// error but does not end the session (spec.md's ambient CLI contract).
/// `Ctrl-D`/EOF, like any readline error, ends the session.
fn run_repl() -> ExitCode {
    let mut vm = Vm::new();
    let mut reporter = CliReporter;
    let mut editor = Editor::<()>::new();

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                editor.add_history_entry(&line);
                let mut out = io::stdout();
                let _ = vm.interpret(&line, &mut reporter, &mut out);
            }
            Err(_) => break,
        }
    }

    ExitCode::from(exitcode::OK as u8)
}
