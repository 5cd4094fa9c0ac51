//! Recursive-descent parser for the null language
//!
//! One-token lookahead (`current`) plus one-token history (`previous`),
//! explicit precedence climbing for expressions, and panic-mode error
//! recovery: the first syntax error prints a full caret diagnostic, then
//! diagnostics are suppressed until the parser resynchronizes at a
//! declaration boundary. Parsing always produces a program node; the
//! driver consults `had_error` before letting the back ends run.

pub mod ast;

use crate::error::{self, SourceContext};
use crate::lexer::{unescape, Lexer, Token, TokenKind};
use ast::{BinaryOp, Node, NodeKind, Type, UnaryOp};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
    pub had_error: bool,
    panic_mode: bool,
}

/// Parse a full translation unit. Returns the program node and whether the
/// parse was error-free.
pub fn parse(source: &str) -> (Node, bool) {
    let mut parser = Parser::new(source);
    let program = parser.parse_program();
    let ok = !parser.had_error;
    (program, ok)
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut parser = Self {
            lexer: Lexer::new(source),
            current: Token::new(TokenKind::Eof, "", 1, 1),
            previous: Token::new(TokenKind::Eof, "", 1, 1),
            had_error: false,
            panic_mode: false,
        };
        parser.advance();
        parser
    }

    fn error_at_current(&mut self, msg: &str) {
        let tok = self.current.clone();
        self.error_at(&tok, msg);
    }

    fn error_at(&mut self, token: &Token, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let lexeme = match token.kind {
            TokenKind::Eof => None,
            _ => Some(token.lexeme.as_str()),
        };
        let ctx = SourceContext {
            line: token.line,
            column: token.column,
            lexeme,
            source_line: self.lexer.line_text(token.line),
            caret_len: token.lexeme.chars().count().max(1),
        };
        error::report(&ctx, msg);
    }

    fn advance(&mut self) {
        self.previous = std::mem::replace(
            &mut self.current,
            Token::new(TokenKind::Eof, "", 0, 0),
        );
        loop {
            self.current = self.lexer.next_token();
            match &self.current.kind {
                TokenKind::Error(msg) => {
                    let msg = msg.clone();
                    let tok = self.current.clone();
                    self.error_at(&tok, &msg);
                }
                _ => break,
            }
        }
    }

    fn consume(&mut self, kind: &TokenKind, msg: &str) {
        if self.current.is(kind) {
            self.advance();
            return;
        }
        self.error_at_current(msg);
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current.is(kind)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn skip_newlines(&mut self) {
        while self.matches(&TokenKind::Newline) {}
    }

    /// Skip tokens until a declaration boundary, then leave panic mode.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(&TokenKind::Eof) {
            if matches!(self.previous.kind, TokenKind::Newline) {
                match self.current.kind {
                    TokenKind::Fn
                    | TokenKind::Struct
                    | TokenKind::Enum
                    | TokenKind::Let
                    | TokenKind::Mut
                    | TokenKind::Const
                    | TokenKind::DirUse
                    | TokenKind::DirExtern => return,
                    _ => {}
                }
            }
            self.advance();
        }
    }

    fn node(&self, kind: NodeKind) -> Node {
        Node::new(kind, self.previous.line, self.previous.column)
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    pub fn parse_program(&mut self) -> Node {
        let mut decls = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            decls.push(self.parse_decl());
            if self.panic_mode {
                self.synchronize();
            }
            self.skip_newlines();
        }
        Node::new(NodeKind::Program { decls }, 1, 1)
    }

    fn parse_decl(&mut self) -> Node {
        self.skip_newlines();

        if self.matches(&TokenKind::DirUse) {
            return self.parse_use();
        }
        if self.matches(&TokenKind::DirExtern) {
            return self.parse_extern();
        }
        if self.check(&TokenKind::Fn) {
            return self.parse_fn_decl();
        }
        if self.check(&TokenKind::Struct) {
            return self.parse_struct_decl();
        }
        if self.check(&TokenKind::Enum) {
            return self.parse_enum_decl();
        }
        if self.check(&TokenKind::Let) || self.check(&TokenKind::Mut) || self.check(&TokenKind::Const)
        {
            return self.parse_var_decl();
        }

        self.parse_stmt()
    }

    fn parse_use(&mut self) -> Node {
        let (line, column) = (self.previous.line, self.previous.column);
        self.consume(
            &TokenKind::StrLit(String::new()),
            "Expected path string after @use.",
        );
        let path = match &self.previous.kind {
            TokenKind::StrLit(raw) => raw.clone(),
            _ => String::new(),
        };
        let mut alias = None;
        if self.matches(&TokenKind::As) {
            self.consume(
                &TokenKind::Ident(String::new()),
                "Expected alias name after 'as'.",
            );
            if let TokenKind::Ident(name) = &self.previous.kind {
                alias = Some(name.clone());
            }
        }
        Node::new(NodeKind::Use { path, alias }, line, column)
    }

    fn parse_extern(&mut self) -> Node {
        let (line, column) = (self.previous.line, self.previous.column);
        self.consume(
            &TokenKind::StrLit(String::new()),
            "Expected ABI string after @extern.",
        );
        let abi = match &self.previous.kind {
            TokenKind::StrLit(raw) => raw.clone(),
            _ => String::new(),
        };
        self.consume(&TokenKind::Do, "Expected 'do' after @extern ABI.");
        self.skip_newlines();

        let mut fns = Vec::new();
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            let mut decl = self.parse_fn_decl();
            if let NodeKind::FnDecl { is_extern, .. } = &mut decl.kind {
                *is_extern = true;
            }
            fns.push(decl);
            if self.panic_mode {
                break;
            }
            self.skip_newlines();
        }

        self.consume(&TokenKind::End, "Expected 'end' after extern block.");
        Node::new(NodeKind::Extern { abi, fns }, line, column)
    }

    fn parse_fn_decl(&mut self) -> Node {
        self.consume(&TokenKind::Fn, "Expected 'fn'.");
        let (line, column) = (self.previous.line, self.previous.column);

        self.consume(&TokenKind::Ident(String::new()), "Expected function name.");
        let name = self.previous.lexeme.clone();

        self.consume(&TokenKind::LParen, "Expected '(' after function name.");

        let mut params: Vec<Node> = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (pline, pcol) = (self.current.line, self.current.column);
                self.consume(&TokenKind::Ident(String::new()), "Expected parameter name.");
                let pname = self.previous.lexeme.clone();
                if params
                    .iter()
                    .any(|p| matches!(&p.kind, NodeKind::Param { name, .. } if *name == pname))
                {
                    let tok = self.previous.clone();
                    self.error_at(&tok, "Duplicate parameter name.");
                }
                self.consume(
                    &TokenKind::ColonColon,
                    "Expected '::' before parameter type.",
                );
                let param_type = self.parse_type();
                params.push(Node::new(
                    NodeKind::Param {
                        name: pname,
                        param_type,
                    },
                    pline,
                    pcol,
                ));
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::RParen, "Expected ')' after parameters.");

        let ret_type = if self.matches(&TokenKind::Arrow) {
            self.parse_type()
        } else {
            Type::Void
        };

        let body = if self.matches(&TokenKind::Do) {
            Some(Box::new(self.parse_block()))
        } else {
            None
        };

        Node::new(
            NodeKind::FnDecl {
                name,
                params,
                ret_type,
                body,
                is_extern: false,
            },
            line,
            column,
        )
    }

    fn parse_struct_decl(&mut self) -> Node {
        self.consume(&TokenKind::Struct, "Expected 'struct'.");
        let (line, column) = (self.previous.line, self.previous.column);

        self.consume(&TokenKind::Ident(String::new()), "Expected struct name.");
        let name = self.previous.lexeme.clone();

        self.consume(&TokenKind::Do, "Expected 'do' after struct name.");
        self.skip_newlines();

        let mut fields = Vec::new();
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            self.consume(&TokenKind::Ident(String::new()), "Expected field name.");
            let field_name = self.previous.lexeme.clone();
            self.consume(&TokenKind::ColonColon, "Expected '::' after field name.");
            let field_type = self.parse_type();
            if fields.iter().any(|(n, _)| *n == field_name) {
                let tok = self.previous.clone();
                self.error_at(&tok, "Duplicate field name in struct.");
            }
            fields.push((field_name, field_type));
            if self.panic_mode {
                break;
            }
            self.skip_newlines();
        }

        self.consume(&TokenKind::End, "Expected 'end' after struct body.");
        Node::new(NodeKind::StructDecl { name, fields }, line, column)
    }

    fn parse_enum_decl(&mut self) -> Node {
        self.consume(&TokenKind::Enum, "Expected 'enum'.");
        let (line, column) = (self.previous.line, self.previous.column);

        self.consume(&TokenKind::Ident(String::new()), "Expected enum name.");
        let name = self.previous.lexeme.clone();

        self.consume(&TokenKind::Do, "Expected 'do' after enum name.");
        self.skip_newlines();

        let mut variants: Vec<(String, i64)> = Vec::new();
        let mut next_value: i64 = 0;
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            self.consume(&TokenKind::Ident(String::new()), "Expected variant name.");
            let variant_name = self.previous.lexeme.clone();
            let mut value = next_value;
            if self.matches(&TokenKind::Eq) {
                let negative = self.matches(&TokenKind::Minus);
                self.consume(&TokenKind::IntLit(0), "Expected variant value.");
                if let TokenKind::IntLit(n) = self.previous.kind {
                    value = if negative { n.wrapping_neg() } else { n };
                }
            }
            if variants.iter().any(|(n, _)| *n == variant_name) {
                let tok = self.previous.clone();
                self.error_at(&tok, "Duplicate variant name in enum.");
            }
            variants.push((variant_name, value));
            next_value = value.wrapping_add(1);
            if self.panic_mode {
                break;
            }
            self.skip_newlines();
        }

        self.consume(&TokenKind::End, "Expected 'end' after enum body.");
        Node::new(NodeKind::EnumDecl { name, variants }, line, column)
    }

    fn parse_var_decl(&mut self) -> Node {
        let is_mut = self.matches(&TokenKind::Mut);
        let is_const = !is_mut && self.matches(&TokenKind::Const);
        if !is_mut && !is_const {
            self.consume(&TokenKind::Let, "Expected 'let', 'mut' or 'const'.");
        }
        let (line, column) = (self.previous.line, self.previous.column);

        self.consume(&TokenKind::Ident(String::new()), "Expected variable name.");
        let name = self.previous.lexeme.clone();

        let var_type = if self.matches(&TokenKind::ColonColon) {
            Some(self.parse_type())
        } else {
            None
        };

        self.consume(&TokenKind::Eq, "Expected '=' in variable declaration.");
        let init = Box::new(self.parse_expr());

        Node::new(
            NodeKind::VarDecl {
                name,
                var_type,
                init,
                is_mut,
                is_const,
            },
            line,
            column,
        )
    }

    // ========================================================================
    // Types
    // ========================================================================

    fn parse_type(&mut self) -> Type {
        if self.matches(&TokenKind::Void) {
            return Type::Void;
        }
        if self.matches(&TokenKind::Bool) {
            return Type::Bool;
        }
        if self.matches(&TokenKind::I8) {
            return Type::I8;
        }
        if self.matches(&TokenKind::I16) {
            return Type::I16;
        }
        if self.matches(&TokenKind::I32) {
            return Type::I32;
        }
        if self.matches(&TokenKind::I64) {
            return Type::I64;
        }
        if self.matches(&TokenKind::U8) {
            return Type::U8;
        }
        if self.matches(&TokenKind::U16) {
            return Type::U16;
        }
        if self.matches(&TokenKind::U32) {
            return Type::U32;
        }
        if self.matches(&TokenKind::U64) {
            return Type::U64;
        }
        if self.matches(&TokenKind::F32) {
            return Type::F32;
        }
        if self.matches(&TokenKind::F64) {
            return Type::F64;
        }

        // ptr<T>
        if self.matches(&TokenKind::Ptr) {
            self.consume(&TokenKind::Lt, "Expected '<' after 'ptr'.");
            let inner = self.parse_type();
            self.consume(&TokenKind::Gt, "Expected '>' after pointer type.");
            return Type::Ptr(Box::new(inner));
        }

        // [T] or [T; N]
        if self.matches(&TokenKind::LBracket) {
            let elem = self.parse_type();
            if self.matches(&TokenKind::Semicolon) {
                self.consume(&TokenKind::IntLit(0), "Expected array size.");
                let size = match self.previous.kind {
                    TokenKind::IntLit(n) => n,
                    _ => 0,
                };
                self.consume(&TokenKind::RBracket, "Expected ']'.");
                if !(0..i32::MAX as i64).contains(&size) {
                    let tok = self.previous.clone();
                    self.error_at(&tok, "Array size out of range.");
                    return Type::Unknown;
                }
                return Type::Array {
                    elem: Box::new(elem),
                    size: size as i32,
                };
            }
            self.consume(&TokenKind::RBracket, "Expected ']'.");
            return Type::Slice(Box::new(elem));
        }

        // Named type (struct or enum reference)
        if self.matches(&TokenKind::Ident(String::new())) {
            return Type::Struct {
                name: self.previous.lexeme.clone(),
                fields: Vec::new(),
            };
        }

        self.error_at_current("Expected type.");
        Type::Unknown
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_block(&mut self) -> Node {
        let (line, column) = (self.previous.line, self.previous.column);
        let mut stmts = Vec::new();

        self.skip_newlines();
        while !self.check(&TokenKind::End)
            && !self.check(&TokenKind::Elif)
            && !self.check(&TokenKind::Else)
            && !self.check(&TokenKind::Eof)
        {
            stmts.push(self.parse_stmt());
            if self.panic_mode {
                break;
            }
            self.skip_newlines();
        }

        if self.check(&TokenKind::End) {
            self.advance();
        }

        Node::new(NodeKind::Block { stmts }, line, column)
    }

    /// Like `parse_block` but stops before `elif`/`else`/`end` without
    /// consuming them; used for if-statement arms.
    fn parse_block_until_branch(&mut self) -> Node {
        let (line, column) = (self.previous.line, self.previous.column);
        let mut stmts = Vec::new();

        self.skip_newlines();
        while !self.check(&TokenKind::End)
            && !self.check(&TokenKind::Elif)
            && !self.check(&TokenKind::Else)
            && !self.check(&TokenKind::Eof)
        {
            stmts.push(self.parse_stmt());
            if self.panic_mode {
                break;
            }
            self.skip_newlines();
        }

        Node::new(NodeKind::Block { stmts }, line, column)
    }

    fn parse_stmt(&mut self) -> Node {
        self.skip_newlines();

        if self.check(&TokenKind::Let) || self.check(&TokenKind::Mut) || self.check(&TokenKind::Const)
        {
            return self.parse_var_decl();
        }
        if self.check(&TokenKind::Ret) {
            return self.parse_return();
        }
        if self.matches(&TokenKind::Break) {
            return self.node(NodeKind::Break);
        }
        if self.matches(&TokenKind::Continue) {
            return self.node(NodeKind::Continue);
        }
        if self.check(&TokenKind::If) {
            return self.parse_if();
        }
        if self.check(&TokenKind::While) {
            return self.parse_while();
        }
        if self.check(&TokenKind::For) {
            return self.parse_for();
        }

        self.parse_expr_stmt()
    }

    fn parse_return(&mut self) -> Node {
        self.consume(&TokenKind::Ret, "Expected 'ret'.");
        let (line, column) = (self.previous.line, self.previous.column);

        let value = if !self.check(&TokenKind::Newline)
            && !self.check(&TokenKind::End)
            && !self.check(&TokenKind::Eof)
        {
            Some(Box::new(self.parse_expr()))
        } else {
            None
        };

        Node::new(NodeKind::Return { value }, line, column)
    }

    fn parse_if(&mut self) -> Node {
        self.consume(&TokenKind::If, "Expected 'if'.");
        let (line, column) = (self.previous.line, self.previous.column);

        let cond = Box::new(self.parse_expr());
        self.consume(&TokenKind::Do, "Expected 'do' after if condition.");
        let then_block = Box::new(self.parse_block_until_branch());

        let mut elifs = Vec::new();
        while self.matches(&TokenKind::Elif) {
            let elif_cond = self.parse_expr();
            self.consume(&TokenKind::Do, "Expected 'do' after elif condition.");
            let elif_block = self.parse_block_until_branch();
            elifs.push((elif_cond, elif_block));
        }

        let else_block = if self.matches(&TokenKind::Else) {
            self.consume(&TokenKind::Do, "Expected 'do' after else.");
            Some(Box::new(self.parse_block_until_branch()))
        } else {
            None
        };

        self.consume(&TokenKind::End, "Expected 'end' after if statement.");
        Node::new(
            NodeKind::If {
                cond,
                then_block,
                elifs,
                else_block,
            },
            line,
            column,
        )
    }

    fn parse_while(&mut self) -> Node {
        self.consume(&TokenKind::While, "Expected 'while'.");
        let (line, column) = (self.previous.line, self.previous.column);

        let cond = Box::new(self.parse_expr());
        self.consume(&TokenKind::Do, "Expected 'do' after while condition.");
        let body = Box::new(self.parse_block());

        Node::new(NodeKind::While { cond, body }, line, column)
    }

    fn parse_for(&mut self) -> Node {
        self.consume(&TokenKind::For, "Expected 'for'.");
        let (line, column) = (self.previous.line, self.previous.column);

        self.consume(&TokenKind::Ident(String::new()), "Expected loop variable.");
        let var = self.previous.lexeme.clone();

        self.consume(&TokenKind::In, "Expected 'in' in for loop.");

        let start = Box::new(self.parse_expr());
        self.consume(&TokenKind::DotDot, "Expected '..' in range.");
        let end = Box::new(self.parse_expr());

        self.consume(&TokenKind::Do, "Expected 'do' after for range.");
        let body = Box::new(self.parse_block());

        Node::new(
            NodeKind::For {
                var,
                start,
                end,
                body,
            },
            line,
            column,
        )
    }

    fn parse_expr_stmt(&mut self) -> Node {
        let expr = self.parse_expr();
        let (line, column) = (expr.line, expr.column);
        Node::new(
            NodeKind::ExprStmt {
                expr: Box::new(expr),
            },
            line,
            column,
        )
    }

    // ========================================================================
    // Expressions (precedence climbing, low to high)
    // ========================================================================

    fn parse_expr(&mut self) -> Node {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Node {
        let expr = self.parse_or();

        if self.matches(&TokenKind::Eq) {
            let value = self.parse_assignment();
            if !matches!(
                expr.kind,
                NodeKind::Ident(_) | NodeKind::Member { .. } | NodeKind::Index { .. }
            ) {
                let tok = self.previous.clone();
                self.error_at(&tok, "Invalid assignment target.");
            }
            let (line, column) = (expr.line, expr.column);
            return Node::new(
                NodeKind::Assign {
                    target: Box::new(expr),
                    value: Box::new(value),
                },
                line,
                column,
            );
        }

        expr
    }

    fn binary(&mut self, left: Node, op: BinaryOp, right: Node) -> Node {
        let (line, column) = (left.line, left.column);
        Node::new(
            NodeKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            line,
            column,
        )
    }

    fn parse_or(&mut self) -> Node {
        let mut left = self.parse_and();
        while self.matches(&TokenKind::Or) {
            let right = self.parse_and();
            left = self.binary(left, BinaryOp::Or, right);
        }
        left
    }

    fn parse_and(&mut self) -> Node {
        let mut left = self.parse_equality();
        while self.matches(&TokenKind::And) {
            let right = self.parse_equality();
            left = self.binary(left, BinaryOp::And, right);
        }
        left
    }

    fn parse_equality(&mut self) -> Node {
        let mut left = self.parse_comparison();
        loop {
            let op = if self.matches(&TokenKind::EqEq) {
                BinaryOp::Eq
            } else if self.matches(&TokenKind::Ne) {
                BinaryOp::Ne
            } else {
                break;
            };
            let right = self.parse_comparison();
            left = self.binary(left, op, right);
        }
        left
    }

    fn parse_comparison(&mut self) -> Node {
        let mut left = self.parse_bitwise_or();
        loop {
            let op = if self.matches(&TokenKind::Lt) {
                BinaryOp::Lt
            } else if self.matches(&TokenKind::Le) {
                BinaryOp::Le
            } else if self.matches(&TokenKind::Gt) {
                BinaryOp::Gt
            } else if self.matches(&TokenKind::Ge) {
                BinaryOp::Ge
            } else {
                break;
            };
            let right = self.parse_bitwise_or();
            left = self.binary(left, op, right);
        }
        left
    }

    fn parse_bitwise_or(&mut self) -> Node {
        let mut left = self.parse_bitwise_xor();
        while self.matches(&TokenKind::Pipe) {
            let right = self.parse_bitwise_xor();
            left = self.binary(left, BinaryOp::BitOr, right);
        }
        left
    }

    fn parse_bitwise_xor(&mut self) -> Node {
        let mut left = self.parse_bitwise_and();
        while self.matches(&TokenKind::Caret) {
            let right = self.parse_bitwise_and();
            left = self.binary(left, BinaryOp::BitXor, right);
        }
        left
    }

    fn parse_bitwise_and(&mut self) -> Node {
        let mut left = self.parse_shift();
        while self.matches(&TokenKind::Amp) {
            let right = self.parse_shift();
            left = self.binary(left, BinaryOp::BitAnd, right);
        }
        left
    }

    fn parse_shift(&mut self) -> Node {
        let mut left = self.parse_term();
        loop {
            let op = if self.matches(&TokenKind::Shl) {
                BinaryOp::Shl
            } else if self.matches(&TokenKind::Shr) {
                BinaryOp::Shr
            } else {
                break;
            };
            let right = self.parse_term();
            left = self.binary(left, op, right);
        }
        left
    }

    fn parse_term(&mut self) -> Node {
        let mut left = self.parse_factor();
        loop {
            let op = if self.matches(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_factor();
            left = self.binary(left, op, right);
        }
        left
    }

    fn parse_factor(&mut self) -> Node {
        let mut left = self.parse_unary();
        loop {
            let op = if self.matches(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary();
            left = self.binary(left, op, right);
        }
        left
    }

    fn parse_unary(&mut self) -> Node {
        let op = if self.matches(&TokenKind::Minus) {
            Some(UnaryOp::Neg)
        } else if self.matches(&TokenKind::Not) {
            Some(UnaryOp::Not)
        } else if self.matches(&TokenKind::Tilde) {
            Some(UnaryOp::BitNot)
        } else if self.matches(&TokenKind::Amp) {
            Some(UnaryOp::Addr)
        } else if self.matches(&TokenKind::Star) {
            Some(UnaryOp::Deref)
        } else {
            None
        };

        if let Some(op) = op {
            let (line, column) = (self.previous.line, self.previous.column);
            let operand = self.parse_unary();
            return Node::new(
                NodeKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                line,
                column,
            );
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Node {
        let mut left = self.parse_primary();

        loop {
            if self.matches(&TokenKind::LParen) {
                left = self.finish_call(left);
            } else if self.matches(&TokenKind::Dot) {
                self.consume(
                    &TokenKind::Ident(String::new()),
                    "Expected member name after '.'.",
                );
                let member = self.previous.lexeme.clone();
                let (line, column) = (left.line, left.column);
                left = Node::new(
                    NodeKind::Member {
                        object: Box::new(left),
                        member,
                    },
                    line,
                    column,
                );
            } else if self.matches(&TokenKind::LBracket) {
                let index = self.parse_expr();
                self.consume(&TokenKind::RBracket, "Expected ']' after index.");
                let (line, column) = (left.line, left.column);
                left = Node::new(
                    NodeKind::Index {
                        object: Box::new(left),
                        index: Box::new(index),
                    },
                    line,
                    column,
                );
            } else if self.matches(&TokenKind::PipeGt) {
                // x |> f desugars to f(x); x becomes the first argument of
                // an existing call on the right-hand side.
                left = self.finish_pipe(left);
            } else {
                break;
            }
        }

        left
    }

    fn finish_call(&mut self, callee: Node) -> Node {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr());
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RParen, "Expected ')' after arguments.");
        let (line, column) = (callee.line, callee.column);
        Node::new(
            NodeKind::Call {
                callee: Box::new(callee),
                args,
            },
            line,
            column,
        )
    }

    fn finish_pipe(&mut self, piped: Node) -> Node {
        // Parse the target without consuming further pipes so that chains
        // stay left-associative: a |> f |> g is g(f(a)).
        let mut target = self.parse_primary();
        loop {
            if self.matches(&TokenKind::LParen) {
                target = self.finish_call(target);
            } else if self.matches(&TokenKind::Dot) {
                self.consume(
                    &TokenKind::Ident(String::new()),
                    "Expected member name after '.'.",
                );
                let member = self.previous.lexeme.clone();
                let (line, column) = (target.line, target.column);
                target = Node::new(
                    NodeKind::Member {
                        object: Box::new(target),
                        member,
                    },
                    line,
                    column,
                );
            } else {
                break;
            }
        }

        let (line, column) = (piped.line, piped.column);
        match target.kind {
            NodeKind::Call { callee, mut args } => {
                args.insert(0, piped);
                Node::new(NodeKind::Call { callee, args }, line, column)
            }
            _ => Node::new(
                NodeKind::Call {
                    callee: Box::new(target),
                    args: vec![piped],
                },
                line,
                column,
            ),
        }
    }

    fn parse_primary(&mut self) -> Node {
        if self.matches(&TokenKind::IntLit(0)) {
            let value = match self.previous.kind {
                TokenKind::IntLit(n) => n,
                _ => 0,
            };
            return self.node(NodeKind::IntLit(value));
        }

        if self.matches(&TokenKind::FloatLit(0.0)) {
            let value = match self.previous.kind {
                TokenKind::FloatLit(f) => f,
                _ => 0.0,
            };
            return self.node(NodeKind::FloatLit(value));
        }

        if self.matches(&TokenKind::StrLit(String::new())) {
            let raw = match &self.previous.kind {
                TokenKind::StrLit(s) => s.clone(),
                _ => String::new(),
            };
            return self.node(NodeKind::StrLit(unescape(&raw)));
        }

        if self.matches(&TokenKind::True) {
            return self.node(NodeKind::BoolLit(true));
        }
        if self.matches(&TokenKind::False) {
            return self.node(NodeKind::BoolLit(false));
        }

        if self.matches(&TokenKind::Ident(String::new())) {
            let name = self.previous.lexeme.clone();
            let (line, column) = (self.previous.line, self.previous.column);

            // Enum variant access: Name::Variant
            if self.matches(&TokenKind::ColonColon) {
                self.consume(
                    &TokenKind::Ident(String::new()),
                    "Expected variant name after '::'.",
                );
                let variant = self.previous.lexeme.clone();
                return Node::new(
                    NodeKind::EnumVariant {
                        enum_name: name,
                        variant,
                    },
                    line,
                    column,
                );
            }

            // Struct initializer: Name { field = expr, ... }
            if self.check(&TokenKind::LBrace) {
                self.advance();
                let mut fields = Vec::new();
                self.skip_newlines();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        self.consume(&TokenKind::Ident(String::new()), "Expected field name.");
                        let field_name = self.previous.lexeme.clone();
                        self.consume(&TokenKind::Eq, "Expected '=' after field name.");
                        let value = self.parse_expr();
                        fields.push((field_name, value));
                        self.skip_newlines();
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                }
                self.consume(&TokenKind::RBrace, "Expected '}' after struct initializer.");
                return Node::new(NodeKind::StructInit { name, fields }, line, column);
            }

            return Node::new(NodeKind::Ident(name), line, column);
        }

        if self.matches(&TokenKind::LParen) {
            let expr = self.parse_expr();
            self.consume(&TokenKind::RParen, "Expected ')' after expression.");
            return expr;
        }

        if self.matches(&TokenKind::LBracket) {
            let (line, column) = (self.previous.line, self.previous.column);
            let mut elems = Vec::new();
            if !self.check(&TokenKind::RBracket) {
                loop {
                    elems.push(self.parse_expr());
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.consume(&TokenKind::RBracket, "Expected ']' after array elements.");
            return Node::new(NodeKind::ArrayInit { elems }, line, column);
        }

        self.error_at_current("Expected expression.");
        // Placeholder so parsing can continue; the driver refuses to go
        // further once had_error is set.
        let mut node = self.node(NodeKind::IntLit(0));
        node.ty = Some(Type::Unknown);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Node {
        let (program, ok) = parse(source);
        assert!(ok, "parse failed for: {}", source);
        program
    }

    fn first_decl(program: &Node) -> &Node {
        match &program.kind {
            NodeKind::Program { decls } => &decls[0],
            _ => panic!("not a program"),
        }
    }

    /// Unwrap `ExprStmt(expr)`.
    fn expr_of(stmt: &Node) -> &Node {
        match &stmt.kind {
            NodeKind::ExprStmt { expr } => expr,
            _ => panic!("not an expr stmt: {:?}", stmt.kind),
        }
    }

    #[test]
    fn parses_function_declaration() {
        let program = parse_ok("fn add(a :: i64, b :: i64) -> i64 do\nret a + b\nend");
        match &first_decl(&program).kind {
            NodeKind::FnDecl {
                name,
                params,
                ret_type,
                body,
                is_extern,
            } => {
                assert_eq!(name, "add");
                assert_eq!(params.len(), 2);
                assert_eq!(*ret_type, Type::I64);
                assert!(body.is_some());
                assert!(!is_extern);
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn missing_return_type_defaults_to_void() {
        let program = parse_ok("fn f() do end");
        match &first_decl(&program).kind {
            NodeKind::FnDecl { ret_type, .. } => assert_eq!(*ret_type, Type::Void),
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let program = parse_ok("1 + 2 * 3");
        let expr = expr_of(first_decl(&program));
        match &expr.kind {
            NodeKind::Binary { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(
                    right.kind,
                    NodeKind::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn precedence_comparison_over_bitor() {
        // a < b | c parses as a < (b | c)
        let program = parse_ok("a < b | c");
        let expr = expr_of(first_decl(&program));
        match &expr.kind {
            NodeKind::Binary { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Lt);
                assert!(matches!(
                    right.kind,
                    NodeKind::Binary {
                        op: BinaryOp::BitOr,
                        ..
                    }
                ));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn precedence_shift_over_add() {
        // a << b + c parses as a << (b + c)
        let program = parse_ok("a << b + c");
        let expr = expr_of(first_decl(&program));
        match &expr.kind {
            NodeKind::Binary { op, right, .. } => {
                assert_eq!(*op, BinaryOp::Shl);
                assert!(matches!(
                    right.kind,
                    NodeKind::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn assignment_is_right_associative() {
        let program = parse_ok("a = b = c");
        let stmt = first_decl(&program);
        match &expr_of(stmt).kind {
            NodeKind::Assign { value, .. } => {
                assert!(matches!(value.kind, NodeKind::Assign { .. }));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn pipe_desugars_to_call() {
        let program = parse_ok("x |> f");
        let expr = expr_of(first_decl(&program));
        match &expr.kind {
            NodeKind::Call { callee, args } => {
                assert!(matches!(&callee.kind, NodeKind::Ident(n) if n == "f"));
                assert_eq!(args.len(), 1);
                assert!(matches!(&args[0].kind, NodeKind::Ident(n) if n == "x"));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn pipe_inserts_first_argument() {
        let program = parse_ok("x |> f(y)");
        let expr = expr_of(first_decl(&program));
        match &expr.kind {
            NodeKind::Call { args, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[0].kind, NodeKind::Ident(n) if n == "x"));
                assert!(matches!(&args[1].kind, NodeKind::Ident(n) if n == "y"));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn pipe_chain_is_left_associative() {
        let program = parse_ok("a |> f |> g");
        let expr = expr_of(first_decl(&program));
        // g(f(a))
        match &expr.kind {
            NodeKind::Call { callee, args } => {
                assert!(matches!(&callee.kind, NodeKind::Ident(n) if n == "g"));
                assert!(matches!(&args[0].kind, NodeKind::Call { .. }));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn struct_init_keeps_written_order() {
        let program = parse_ok("let p = Point { y = 10, x = 5 }");
        match &first_decl(&program).kind {
            NodeKind::VarDecl { init, .. } => match &init.kind {
                NodeKind::StructInit { name, fields } => {
                    assert_eq!(name, "Point");
                    assert_eq!(fields[0].0, "y");
                    assert_eq!(fields[1].0, "x");
                }
                other => panic!("unexpected init: {:?}", other),
            },
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn enum_variant_access() {
        let program = parse_ok("let c = Color::Red");
        match &first_decl(&program).kind {
            NodeKind::VarDecl { init, .. } => {
                assert!(matches!(
                    &init.kind,
                    NodeKind::EnumVariant { enum_name, variant }
                        if enum_name == "Color" && variant == "Red"
                ));
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn enum_decl_auto_increments() {
        let program = parse_ok("enum Color do\nRed\nGreen = 5\nBlue\nend");
        match &first_decl(&program).kind {
            NodeKind::EnumDecl { variants, .. } => {
                assert_eq!(
                    variants,
                    &vec![
                        ("Red".to_string(), 0),
                        ("Green".to_string(), 5),
                        ("Blue".to_string(), 6)
                    ]
                );
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn extern_block_marks_functions() {
        let program =
            parse_ok("@extern \"C\" do\nfn puts(s :: ptr<u8>) -> i64\nend");
        match &first_decl(&program).kind {
            NodeKind::Extern { abi, fns } => {
                assert_eq!(abi, "C");
                assert_eq!(fns.len(), 1);
                match &fns[0].kind {
                    NodeKind::FnDecl {
                        is_extern, body, ..
                    } => {
                        assert!(is_extern);
                        assert!(body.is_none());
                    }
                    other => panic!("unexpected fn: {:?}", other),
                }
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn array_type_bounds() {
        let (_, ok) = parse("fn f(a :: [i64; 2147483647]) -> void do end");
        assert!(!ok, "INT32_MAX array size must be rejected");
        let (_, ok) = parse("fn f(a :: [i64; 0]) -> void do end");
        assert!(ok, "zero-size array is accepted");
    }

    #[test]
    fn string_escapes_translated() {
        let program = parse_ok(r#"let s = "a\nb\tc\\d\"e""#);
        match &first_decl(&program).kind {
            NodeKind::VarDecl { init, .. } => match &init.kind {
                NodeKind::StrLit(s) => assert_eq!(s, "a\nb\tc\\d\"e"),
                other => panic!("unexpected init: {:?}", other),
            },
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn invalid_assignment_target_rejected() {
        let (_, ok) = parse("1 + 2 = 3");
        assert!(!ok);
    }

    #[test]
    fn recovery_continues_after_error() {
        let (program, ok) = parse("fn broken( do end\nfn fine() -> i64 do\nret 1\nend");
        assert!(!ok);
        match &program.kind {
            NodeKind::Program { decls } => {
                assert!(decls
                    .iter()
                    .any(|d| matches!(&d.kind, NodeKind::FnDecl { name, .. } if name == "fine")));
            }
            _ => panic!("not a program"),
        }
    }

    #[test]
    fn deeply_nested_parens() {
        // The compiler binary runs on a 16MB stack; give the test thread
        // the same headroom.
        std::thread::Builder::new()
            .stack_size(16 * 1024 * 1024)
            .spawn(|| {
                let mut src = String::from("let x = ");
                for _ in 0..1000 {
                    src.push('(');
                }
                src.push('1');
                for _ in 0..1000 {
                    src.push(')');
                }
                let (_, ok) = parse(&src);
                assert!(ok);
            })
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn duplicate_parameter_names_rejected() {
        let (_, ok) = parse("fn f(a :: i64, a :: i64) -> i64 do\nret a\nend");
        assert!(!ok);
    }

    #[test]
    fn int_extremes_round_trip() {
        let program = parse_ok("let a = 9223372036854775807\nlet b = -9223372036854775808");
        match &program.kind {
            NodeKind::Program { decls } => {
                match &decls[0].kind {
                    NodeKind::VarDecl { init, .. } => {
                        assert!(matches!(init.kind, NodeKind::IntLit(n) if n == i64::MAX));
                    }
                    _ => panic!(),
                }
                match &decls[1].kind {
                    NodeKind::VarDecl { init, .. } => match &init.kind {
                        NodeKind::Unary { op, operand } => {
                            assert_eq!(*op, UnaryOp::Neg);
                            assert!(
                                matches!(operand.kind, NodeKind::IntLit(n) if n == i64::MIN)
                            );
                        }
                        other => panic!("unexpected init: {:?}", other),
                    },
                    _ => panic!(),
                }
            }
            _ => panic!(),
        }
    }
}
