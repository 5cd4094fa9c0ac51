//! Command-line interface for nullc

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::NullError;
use crate::lexer::{Lexer, TokenKind};
use crate::parser::ast::Node;
use crate::preprocess::Preprocessor;
use crate::{analyzer, codegen, interp, parser};

#[derive(ClapParser)]
#[command(name = "nullc")]
#[command(about = "Compiler and interpreter for the null programming language")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Source file to compile and run (same as `run <file>`)
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and JIT-execute main
    Run {
        /// Path to a .null source file
        file: PathBuf,
    },

    /// Run the program in the tree-walking evaluator
    Interp {
        /// Path to a .null source file
        file: PathBuf,
    },

    /// Compile to a native executable
    Build {
        /// Path to a .null source file
        file: PathBuf,

        /// Output path for the executable
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build and run every .null file in a directory
    Test {
        /// Directory containing test programs
        #[arg(default_value = "tests")]
        dir: PathBuf,
    },

    /// Interactive mode using the evaluator
    Repl,
}

pub fn run_cli() -> i32 {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { file }) => run_file(&file),
        Some(Commands::Interp { file }) => interp_file(&file),
        Some(Commands::Build { file, output }) => build_file(&file, &output),
        Some(Commands::Test { dir }) => run_tests(&dir),
        Some(Commands::Repl) => repl(),
        None => match cli.file {
            Some(file) => run_file(&file),
            None => {
                use clap::CommandFactory;
                let _ = Cli::command().print_help();
                1
            }
        },
    }
}

/// Preprocess, parse and analyze a source file. Stage diagnostics go to
/// stderr as they are found; the driver only reports driver-level errors.
fn compile_to_ast(path: &Path) -> Result<Node, NullError> {
    let mut preprocessor = Preprocessor::new();
    let source = preprocessor.preprocess_file(path)?;

    let (mut program, ok) = parser::parse(&source);
    if !ok {
        return Err(NullError::Parse);
    }
    if !analyzer::analyze_with_source(&mut program, &source) {
        return Err(NullError::Analysis);
    }
    Ok(program)
}

fn report_driver_error(err: &NullError) {
    match err {
        // Parse and analysis failures already printed their diagnostics.
        NullError::Parse | NullError::Analysis => {}
        other => eprintln!("{}: {}", "Error".red().bold(), other),
    }
}

fn run_file(path: &Path) -> i32 {
    let program = match compile_to_ast(path) {
        Ok(p) => p,
        Err(e) => {
            report_driver_error(&e);
            return 1;
        }
    };

    let mut jit = match codegen::Jit::new() {
        Ok(j) => j,
        Err(e) => {
            report_driver_error(&e);
            return 1;
        }
    };
    match jit.compile(&program) {
        Ok(true) => {}
        Ok(false) => return 1,
        Err(e) => {
            report_driver_error(&e);
            return 1;
        }
    }

    match jit.run_main() {
        Ok(code) => code as i32,
        Err(e) => {
            report_driver_error(&e);
            1
        }
    }
}

fn interp_file(path: &Path) -> i32 {
    let program = match compile_to_ast(path) {
        Ok(p) => p,
        Err(e) => {
            report_driver_error(&e);
            return 1;
        }
    };
    interp::run(&program) as i32
}

/// C bodies for the builtin host bindings that are not plain libc
/// functions. The JIT resolves these names to in-process shims; built
/// executables link this file instead, so `run` and `build` observe the
/// same runtime. Weak linkage lets a program that defines one of these
/// names itself win the link, matching the JIT's resolution order.
const RUNTIME_SHIM_C: &str = r#"/* null language runtime support */
#include <stdio.h>

#define NULL_RT __attribute__((weak))

NULL_RT void io_print(const char *s) { puts(s); }
NULL_RT void print(const char *s) { puts(s); }

NULL_RT void print_raw(const char *s) {
    fputs(s, stdout);
    fflush(stdout);
}

NULL_RT int printf(const char *fmt, ...) {
    int n = fputs(fmt, stdout);
    fflush(stdout);
    return n;
}

NULL_RT void print_int(long long v) {
    fprintf(stdout, "%lld", v);
    fflush(stdout);
}

NULL_RT void println(void) { putchar('\n'); }
"#;

fn build_file(path: &Path, output: &Path) -> i32 {
    let program = match compile_to_ast(path) {
        Ok(p) => p,
        Err(e) => {
            report_driver_error(&e);
            return 1;
        }
    };

    let object = match codegen::emit_object(&program) {
        Ok(bytes) => bytes,
        Err(e) => {
            report_driver_error(&e);
            return 1;
        }
    };

    let pid = std::process::id();
    let obj_path = std::env::temp_dir().join(format!("null_{}.o", pid));
    let rt_path = std::env::temp_dir().join(format!("null_{}_rt.c", pid));
    if let Err(e) = std::fs::write(&obj_path, &object) {
        report_driver_error(&NullError::Io(e));
        return 1;
    }
    if let Err(e) = std::fs::write(&rt_path, RUNTIME_SHIM_C) {
        let _ = std::fs::remove_file(&obj_path);
        report_driver_error(&NullError::Io(e));
        return 1;
    }

    // Link via argv only; user input never reaches a shell. The runtime
    // shim rides along so builtin bindings resolve like they do under
    // the JIT.
    let status = Command::new("clang")
        .arg(&obj_path)
        .arg(&rt_path)
        .arg("-o")
        .arg(output)
        .arg("-lm")
        .status();

    // Temporary files are removed whether or not the link worked.
    let _ = std::fs::remove_file(&obj_path);
    let _ = std::fs::remove_file(&rt_path);

    match status {
        Ok(s) if s.success() => 0,
        Ok(s) => {
            report_driver_error(&NullError::Link(format!(
                "clang exited with {}",
                s.code().unwrap_or(-1)
            )));
            1
        }
        Err(e) => {
            report_driver_error(&NullError::Link(format!("failed to run clang: {}", e)));
            1
        }
    }
}

fn run_tests(dir: &Path) -> i32 {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => {
            eprintln!(
                "{}: Could not open test directory: {}",
                "Error".red().bold(),
                dir.display()
            );
            return 1;
        }
    };

    println!("Running tests in {}...", dir.display());

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "null").unwrap_or(false))
        .collect();
    files.sort();

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        print!("  Testing {}... ", name);
        let _ = std::io::stdout().flush();

        let result = run_file(&file);
        if result == 0 {
            println!("{}", "OK".green());
            passed += 1;
        } else {
            println!("{} (exit {})", "FAIL".red(), result);
            failed += 1;
        }
    }

    println!();
    println!("Results: {} passed, {} failed", passed, failed);
    if failed > 0 {
        1
    } else {
        0
    }
}

// ============================================================================
// REPL
// ============================================================================

/// Unclosed `do` blocks mean the input continues on the next line.
fn needs_more_input(text: &str) -> bool {
    let mut depth = 0i32;
    for tok in Lexer::tokenize(text) {
        match tok.kind {
            TokenKind::Do => depth += 1,
            TokenKind::End => depth -= 1,
            _ => {}
        }
    }
    depth > 0
}

fn starts_declaration(text: &str) -> bool {
    matches!(
        Lexer::tokenize(text).first().map(|t| t.kind.clone()),
        Some(TokenKind::Fn)
            | Some(TokenKind::Struct)
            | Some(TokenKind::Enum)
            | Some(TokenKind::DirUse)
            | Some(TokenKind::DirExtern)
    )
}

fn repl() -> i32 {
    println!("null repl (Ctrl-D to exit)");
    let mut session = String::new();
    let stdin = std::io::stdin();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if input.trim().is_empty() {
            continue;
        }
        if input.trim() == "exit" {
            break;
        }

        while needs_more_input(&input) {
            print!(".. ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => input.push_str(&line),
            }
        }

        if starts_declaration(&input) {
            // Keep the declaration for the rest of the session if it
            // parses on its own.
            let candidate = format!("{}{}\n", session, input);
            let (_, ok) = parser::parse(&candidate);
            if ok {
                session = candidate;
            }
            continue;
        }

        let source = format!(
            "{}fn __repl_main__() -> i64 do\n{}\nret 0\nend\n",
            session, input
        );
        let (mut program, ok) = parser::parse(&source);
        if !ok {
            continue;
        }
        if !analyzer::analyze(&mut program) {
            continue;
        }
        interp::run(&program);
    }

    0
}
