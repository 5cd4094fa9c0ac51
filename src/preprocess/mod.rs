//! Module preprocessor
//!
//! Resolves `@use "path"` directives before the lexer runs by textual
//! inclusion. The context is threaded explicitly through the recursion;
//! a set of canonical paths suppresses re-inclusion so diamond and cyclic
//! import graphs terminate with each module included exactly once.

use crate::error::{NullError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum size of a single source file.
pub const MAX_SOURCE_SIZE: usize = 10 * 1024 * 1024;
/// Maximum size of the accumulated preprocessed buffer.
pub const MAX_PREPROCESSED_SIZE: usize = 50 * 1024 * 1024;
/// Maximum number of distinct modules per compilation.
pub const MAX_MODULES: usize = 64;

pub struct Preprocessor {
    imported: HashSet<PathBuf>,
    module_count: usize,
    std_root: PathBuf,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            imported: HashSet::new(),
            module_count: 0,
            std_root: find_std_root(),
        }
    }

    /// Read and preprocess a top-level source file.
    pub fn preprocess_file(&mut self, path: &Path) -> Result<String> {
        let source = read_source(path)?;
        self.mark_imported(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut out = String::with_capacity(source.len());
        self.expand(&source, &base_dir, &mut out)?;
        Ok(out)
    }

    /// Preprocess an in-memory buffer (REPL input) relative to `base_dir`.
    pub fn preprocess_source(&mut self, source: &str, base_dir: &Path) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        self.expand(source, base_dir, &mut out)?;
        Ok(out)
    }

    fn mark_imported(&mut self, path: &Path) -> Result<bool> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.imported.insert(key) {
            return Ok(false);
        }
        self.module_count += 1;
        if self.module_count > MAX_MODULES {
            return Err(NullError::TooManyModules { max: MAX_MODULES });
        }
        Ok(true)
    }

    fn resolve(&self, path: &str, base_dir: &Path) -> PathBuf {
        if let Some(rest) = path.strip_prefix("std/") {
            self.std_root.join(rest)
        } else if let Some(rest) = path.strip_prefix("./") {
            base_dir.join(rest)
        } else {
            PathBuf::from(path)
        }
    }

    fn expand(&mut self, source: &str, base_dir: &Path, out: &mut String) -> Result<()> {
        let bytes = source.as_bytes();
        let mut i = 0;
        let mut in_string = false;

        while i < bytes.len() {
            let b = bytes[i];

            if in_string {
                if b == b'\\' && i + 1 < bytes.len() {
                    push_checked(out, &source[i..i + 2])?;
                    i += 2;
                    continue;
                }
                if b == b'"' {
                    in_string = false;
                }
                push_checked(out, &source[i..i + 1])?;
                i += 1;
                continue;
            }

            if b == b'"' {
                in_string = true;
                push_checked(out, "\"")?;
                i += 1;
                continue;
            }

            if b == b'@' && source[i..].starts_with("@use") && !is_ident_byte(bytes.get(i + 4)) {
                i = self.splice_use(source, i + 4, base_dir, out)?;
                continue;
            }

            // Copy a whole UTF-8 character verbatim.
            let ch_len = utf8_len(b);
            push_checked(out, &source[i..(i + ch_len).min(source.len())])?;
            i += ch_len;
        }

        Ok(())
    }

    /// Consume the remainder of a `@use "path" [as alias]` directive
    /// starting just past `@use`, splicing the resolved module in place.
    /// Returns the index to resume copying at.
    fn splice_use(
        &mut self,
        source: &str,
        mut i: usize,
        base_dir: &Path,
        out: &mut String,
    ) -> Result<usize> {
        let bytes = source.as_bytes();

        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'"' {
            // Malformed directive: leave it for the parser to report.
            push_checked(out, "@use")?;
            return Ok(i);
        }
        i += 1;
        let path_start = i;
        while i < bytes.len() && bytes[i] != b'"' && bytes[i] != b'\n' {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'"' {
            push_checked(out, "@use")?;
            return Ok(path_start.saturating_sub(1));
        }
        let import_path = &source[path_start..i];
        i += 1;

        // Optional "as alias"
        let mut j = i;
        while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
            j += 1;
        }
        if j > i && source[j..].starts_with("as") && !is_ident_byte(bytes.get(j + 2)) {
            j += 2;
            while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
                j += 1;
            }
            while is_ident_byte(bytes.get(j)) {
                j += 1;
            }
            i = j;
        }

        let resolved = self.resolve(import_path, base_dir);
        if self.mark_imported(&resolved)? {
            let module_source = read_source(&resolved)?;
            let module_base = resolved
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            self.expand(&module_source, &module_base, out)?;
        }

        Ok(i)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn push_checked(out: &mut String, text: &str) -> Result<()> {
    if out.len() + text.len() > MAX_PREPROCESSED_SIZE {
        return Err(NullError::PreprocessedTooLarge {
            max: MAX_PREPROCESSED_SIZE,
        });
    }
    out.push_str(text);
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    let meta = fs::metadata(path).map_err(|_| NullError::FileNotFound(path.to_path_buf()))?;
    if meta.len() as usize > MAX_SOURCE_SIZE {
        return Err(NullError::SourceTooLarge {
            path: path.to_path_buf(),
            max: MAX_SOURCE_SIZE,
        });
    }
    fs::read_to_string(path).map_err(|_| NullError::FileNotFound(path.to_path_buf()))
}

/// Locate the standard library root: `./std`, then `<exe>/std`, then
/// `<exe>/../std`, falling back to `./std`.
fn find_std_root() -> PathBuf {
    let cwd_std = PathBuf::from("std");
    if cwd_std.is_dir() {
        return cwd_std;
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let beside = dir.join("std");
            if beside.is_dir() {
                return beside;
            }
            let above = dir.join("../std");
            if above.is_dir() {
                return above;
            }
        }
    }
    PathBuf::from("./std")
}

fn is_ident_byte(b: Option<&u8>) -> bool {
    matches!(b, Some(c) if c.is_ascii_alphanumeric() || *c == b'_')
}

fn utf8_len(b: u8) -> usize {
    match b {
        _ if b < 0x80 => 1,
        _ if b >= 0xF0 => 4,
        _ if b >= 0xE0 => 3,
        _ => 2,
    }
}
