//! Lexer for the null language
//!
//! Hand-written scanner producing a finite token stream ending in `Eof`.
//! Line and column numbers are 1-indexed; newlines are significant tokens.
//! A line index is built up front so the parser can render source context
//! in diagnostics.

pub mod token;

pub use token::{Token, TokenKind};

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    start: usize,
    start_line: u32,
    start_column: u32,
    line_starts: Vec<usize>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = Vec::with_capacity(64);
        line_starts.push(0);
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
            start: 0,
            start_line: 1,
            start_column: 1,
            line_starts,
        }
    }

    /// Text of a 1-indexed source line, without the trailing newline.
    pub fn line_text(&self, line_num: u32) -> Option<&'a str> {
        let idx = (line_num as usize).checked_sub(1)?;
        let start = *self.line_starts.get(idx)?;
        let rest = &self.source[start..];
        Some(rest.split('\n').next().unwrap_or(rest))
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.bytes[self.pos]
        }
    }

    fn peek_next(&self) -> u8 {
        *self.bytes.get(self.pos + 1).unwrap_or(&0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        *self.bytes.get(self.pos + offset).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        self.column += 1;
        b
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.pos] != expected {
            return false;
        }
        self.pos += 1;
        self.column += 1;
        true
    }

    fn newline(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                b'-' if self.peek_next() == b'-' => {
                    if self.peek_at(2) == b'-' {
                        // Block comment: --- ... ---
                        self.advance();
                        self.advance();
                        self.advance();
                        while !self.is_at_end() {
                            if self.peek() == b'-'
                                && self.peek_next() == b'-'
                                && self.peek_at(2) == b'-'
                            {
                                self.advance();
                                self.advance();
                                self.advance();
                                break;
                            }
                            if self.peek() == b'\n' {
                                self.advance();
                                self.newline();
                            } else {
                                self.advance();
                            }
                        }
                    } else {
                        // Line comment: -- to end of line
                        while !self.is_at_end() && self.peek() != b'\n' {
                            self.advance();
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            &self.source[self.start..self.pos],
            self.start_line,
            self.start_column,
        )
    }

    fn error(&self, message: &str) -> Token {
        Token::new(
            TokenKind::Error(message.to_string()),
            &self.source[self.start..self.pos],
            self.start_line,
            self.start_column,
        )
    }

    fn identifier(&mut self) -> Token {
        while is_alnum(self.peek()) {
            self.advance();
        }
        let text = &self.source[self.start..self.pos];
        match TokenKind::keyword(text) {
            Some(kind) => self.make(kind),
            None => self.make(TokenKind::Ident(text.to_string())),
        }
    }

    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
            let text = &self.source[self.start..self.pos];
            let value = text.parse::<f64>().unwrap_or(0.0);
            return self.make(TokenKind::FloatLit(value));
        }
        let text = &self.source[self.start..self.pos];
        // i64::MAX + 1 wraps to i64::MIN so that unary negation of the
        // minimum literal round-trips.
        let value = text
            .parse::<i64>()
            .unwrap_or_else(|_| text.parse::<u64>().map(|v| v as i64).unwrap_or(i64::MAX));
        self.make(TokenKind::IntLit(value))
    }

    fn string(&mut self) -> Token {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.advance();
                self.newline();
                continue;
            }
            if self.peek() == b'\\' && self.peek_next() != 0 {
                self.advance();
            }
            self.advance();
        }
        if self.is_at_end() {
            return self.error("Unterminated string.");
        }
        self.advance(); // closing quote
        let raw = &self.source[self.start + 1..self.pos - 1];
        self.make(TokenKind::StrLit(raw.to_string()))
    }

    fn directive(&mut self) -> Token {
        while is_alpha(self.peek()) {
            self.advance();
        }
        match &self.source[self.start..self.pos] {
            "@use" => self.make(TokenKind::DirUse),
            "@extern" => self.make(TokenKind::DirExtern),
            "@alloc" => self.make(TokenKind::DirAlloc),
            "@free" => self.make(TokenKind::DirFree),
            _ => self.error("Unknown directive."),
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        self.start = self.pos;
        self.start_line = self.line;
        self.start_column = self.column;

        if self.is_at_end() {
            return self.make(TokenKind::Eof);
        }

        let c = self.advance();

        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'\n' => {
                let tok = self.make(TokenKind::Newline);
                self.newline();
                tok
            }
            b'(' => self.make(TokenKind::LParen),
            b')' => self.make(TokenKind::RParen),
            b'{' => self.make(TokenKind::LBrace),
            b'}' => self.make(TokenKind::RBrace),
            b'[' => self.make(TokenKind::LBracket),
            b']' => self.make(TokenKind::RBracket),
            b',' => self.make(TokenKind::Comma),
            b';' => self.make(TokenKind::Semicolon),
            b'~' => self.make(TokenKind::Tilde),
            b'?' => self.make(TokenKind::Question),
            b'@' => self.directive(),
            b'+' => self.make(TokenKind::Plus),
            b'*' => self.make(TokenKind::Star),
            b'/' => self.make(TokenKind::Slash),
            b'%' => self.make(TokenKind::Percent),
            b'^' => self.make(TokenKind::Caret),
            b'"' => self.string(),
            b'.' => {
                if self.matches(b'.') {
                    self.make(TokenKind::DotDot)
                } else {
                    self.make(TokenKind::Dot)
                }
            }
            b':' => {
                if self.matches(b':') {
                    self.make(TokenKind::ColonColon)
                } else {
                    self.make(TokenKind::Colon)
                }
            }
            b'-' => {
                if self.matches(b'>') {
                    self.make(TokenKind::Arrow)
                } else {
                    self.make(TokenKind::Minus)
                }
            }
            b'=' => {
                if self.matches(b'=') {
                    self.make(TokenKind::EqEq)
                } else if self.matches(b'>') {
                    self.make(TokenKind::FatArrow)
                } else {
                    self.make(TokenKind::Eq)
                }
            }
            b'!' => {
                if self.matches(b'=') {
                    self.make(TokenKind::Ne)
                } else {
                    self.error("Expected '=' after '!'.")
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    self.make(TokenKind::Le)
                } else if self.matches(b'<') {
                    self.make(TokenKind::Shl)
                } else {
                    self.make(TokenKind::Lt)
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    self.make(TokenKind::Ge)
                } else if self.matches(b'>') {
                    self.make(TokenKind::Shr)
                } else {
                    self.make(TokenKind::Gt)
                }
            }
            b'&' => self.make(TokenKind::Amp),
            b'|' => {
                if self.matches(b'>') {
                    self.make(TokenKind::PipeGt)
                } else {
                    self.make(TokenKind::Pipe)
                }
            }
            _ => {
                // Consume any UTF-8 continuation bytes so the lexeme slice
                // stays on a character boundary.
                while self.peek() & 0xC0 == 0x80 {
                    self.advance();
                }
                self.error("Unexpected character.")
            }
        }
    }

    /// Tokenize the whole input, for tests and tooling.
    pub fn tokenize(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token();
            let done = matches!(tok.kind, TokenKind::Eof);
            tokens.push(tok);
            if done {
                break;
            }
        }
        tokens
    }
}

/// Translate escape sequences in a raw string slice. `\n`, `\t`, `\r`,
/// `\\`, `\"` and `\0` map to their control characters; any other escape
/// passes through literally.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_alnum(c: u8) -> bool {
    is_alpha(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_tokens() {
        let toks = kinds("fn main() do end");
        assert_eq!(
            toks,
            vec![
                TokenKind::Fn,
                TokenKind::Ident("main".to_string()),
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Do,
                TokenKind::End,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let toks = kinds(":: -> => == != <= >= << >> .. |>");
        assert_eq!(
            toks,
            vec![
                TokenKind::ColonColon,
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::DotDot,
                TokenKind::PipeGt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let toks = kinds("42 3.14 9223372036854775807");
        assert_eq!(toks[0], TokenKind::IntLit(42));
        assert!(matches!(toks[1], TokenKind::FloatLit(f) if (f - 3.14).abs() < 1e-9));
        assert_eq!(toks[2], TokenKind::IntLit(i64::MAX));
    }

    #[test]
    fn test_int_min_wraps() {
        // The literal half of INT64_MIN; unary minus restores it exactly.
        let toks = kinds("9223372036854775808");
        assert_eq!(toks[0], TokenKind::IntLit(i64::MIN));
    }

    #[test]
    fn test_strings_raw() {
        let toks = kinds(r#""hello" "a\nb""#);
        assert_eq!(toks[0], TokenKind::StrLit("hello".to_string()));
        // Escapes stay untranslated in the token; the parser unescapes.
        assert_eq!(toks[1], TokenKind::StrLit("a\\nb".to_string()));
    }

    #[test]
    fn test_escaped_quote_does_not_terminate() {
        let toks = kinds(r#""a\"b""#);
        assert_eq!(toks[0], TokenKind::StrLit("a\\\"b".to_string()));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"a\nb\tc\\d\"), "a\nb\tc\\d\\");
        assert_eq!(unescape(r#"a\"e"#), "a\"e");
        assert_eq!(unescape(r"\0"), "\0");
        assert_eq!(unescape(r"\q"), "\\q");
    }

    #[test]
    fn test_comments() {
        let toks = kinds("a -- comment\nb --- block\nstill --- c");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_string()),
                TokenKind::Ident("c".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment_reaches_eof() {
        let toks = kinds("x --- never closed");
        assert_eq!(toks[0], TokenKind::Ident("x".to_string()));
        assert_eq!(toks[1], TokenKind::Eof);
    }

    #[test]
    fn test_directives() {
        let toks = kinds("@use @extern @alloc @free @bogus");
        assert_eq!(toks[0], TokenKind::DirUse);
        assert_eq!(toks[1], TokenKind::DirExtern);
        assert_eq!(toks[2], TokenKind::DirAlloc);
        assert_eq!(toks[3], TokenKind::DirFree);
        assert!(matches!(toks[4], TokenKind::Error(_)));
    }

    #[test]
    fn test_bang_requires_eq() {
        let toks = kinds("a != b ! c");
        assert_eq!(toks[1], TokenKind::Ne);
        assert!(matches!(toks[3], TokenKind::Error(_)));
    }

    #[test]
    fn test_positions() {
        let toks = Lexer::tokenize("let x\n  mut y");
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[1].line, toks[1].column), (1, 5));
        // Newline token, then indented tokens on line 2.
        assert_eq!((toks[3].line, toks[3].column), (2, 3));
        assert_eq!((toks[4].line, toks[4].column), (2, 7));
    }

    #[test]
    fn test_line_index() {
        let src = "one\ntwo\nthree";
        let lexer = Lexer::new(src);
        assert_eq!(lexer.line_text(1), Some("one"));
        assert_eq!(lexer.line_text(2), Some("two"));
        assert_eq!(lexer.line_text(3), Some("three"));
        assert_eq!(lexer.line_text(4), None);
    }

    #[test]
    fn test_every_input_terminates() {
        for src in ["", "\"", "@", "!", "---", "\\", "\u{0}abc"] {
            let toks = Lexer::tokenize(src);
            assert!(matches!(toks.last().unwrap().kind, TokenKind::Eof));
        }
    }
}
