//! Error types and diagnostic rendering for nullc

use colored::Colorize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NullError>;

#[derive(Error, Debug)]
pub enum NullError {
    #[error("Could not open file: {0}")]
    FileNotFound(PathBuf),

    #[error("Source file too large (max {max} bytes): {path}")]
    SourceTooLarge { path: PathBuf, max: usize },

    #[error("Preprocessed source exceeds {max} bytes")]
    PreprocessedTooLarge { max: usize },

    #[error("Too many imported modules (max {max})")]
    TooManyModules { max: usize },

    #[error("Parse failed")]
    Parse,

    #[error("Analysis failed")]
    Analysis,

    #[error("Code generation error: {0}")]
    Codegen(String),

    #[error("Linker error: {0}")]
    Link(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rendered source location for the caret diagnostics below.
pub struct SourceContext<'a> {
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed column of the first offending character.
    pub column: u32,
    /// Text of the offending token, if any.
    pub lexeme: Option<&'a str>,
    /// Full text of the source line, without trailing newline.
    pub source_line: Option<&'a str>,
    /// Number of characters the caret underline spans (>= 1).
    pub caret_len: usize,
}

/// Expand tabs to four spaces, tracking how many display columns the
/// first `col` characters occupy so the caret stays aligned.
fn expand_tabs(line: &str, col: usize) -> (String, usize) {
    let mut out = String::with_capacity(line.len());
    let mut display_col = 0usize;
    for (i, ch) in line.chars().enumerate() {
        if ch == '\t' {
            out.push_str("    ");
            if i < col {
                display_col += 4;
            }
        } else {
            out.push(ch);
            if i < col {
                display_col += 1;
            }
        }
    }
    (out, display_col)
}

/// Print a diagnostic to stderr in the compiler's standard format:
///
/// ```text
/// Error at line L, column C near 'lexeme'
///   NNNN | <source line>
///        |      ^~~~~
/// <message>
/// Hint: <hint>
/// ```
pub fn report(ctx: &SourceContext, message: &str) {
    let label = "Error".red().bold();
    match ctx.lexeme {
        Some(lex) if !lex.is_empty() => {
            eprintln!(
                "{} at line {}, column {} near '{}'",
                label, ctx.line, ctx.column, lex
            );
        }
        _ => {
            eprintln!("{} at line {}, column {}", label, ctx.line, ctx.column);
        }
    }

    if let Some(src) = ctx.source_line {
        let col = (ctx.column as usize).saturating_sub(1);
        let (expanded, display_col) = expand_tabs(src, col);
        eprintln!("  {:>4} | {}", ctx.line, expanded);
        let mut underline = String::with_capacity(display_col + ctx.caret_len);
        for _ in 0..display_col {
            underline.push(' ');
        }
        underline.push('^');
        for _ in 1..ctx.caret_len.max(1) {
            underline.push('~');
        }
        eprintln!("       | {}", underline);
    }

    eprintln!("{}", message);

    if let Some(hint) = hint_for(message) {
        eprintln!("{} {}", "Hint:".green().bold(), hint);
    }
}

/// Context-specific hints keyed off the diagnostic text.
fn hint_for(message: &str) -> Option<&'static str> {
    if message.contains("'end'") {
        Some("every 'do' block must be closed with a matching 'end'")
    } else if message.contains("']'") || message.contains("')'") || message.contains("'}'") {
        Some("check for a missing closing bracket earlier on this line")
    } else if message.contains("Expected type") {
        Some("types are written like 'i64', 'ptr<u8>', '[i64; 4]' or a struct name")
    } else if message.contains("'do'") {
        Some("blocks open with 'do', e.g. 'if x > 0 do ... end'")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_expansion_aligns_caret() {
        let (expanded, col) = expand_tabs("\tlet x = 1", 1);
        assert_eq!(expanded, "    let x = 1");
        assert_eq!(col, 4);
    }

    #[test]
    fn hints_match_messages() {
        assert!(hint_for("Expected 'end' after block.").is_some());
        assert!(hint_for("Expected 'do' after if condition.").is_some());
        assert!(hint_for("Expected type.").is_some());
        assert!(hint_for("Unexpected character.").is_none());
    }
}
